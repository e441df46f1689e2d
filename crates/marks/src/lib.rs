//! Append-only audio mark ledger.
//!
//! Each call accumulates a flat, append-only log of `AudioMark`s; logical
//! segments (a "user was talking for this stretch" interval) are never
//! stored directly — they're derived on demand by folding over the marks.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkType {
    RecordingStart,
    WindowOpen,
    TalkStart,
    TalkEnd,
    DeltaActivity,
    CompletedChunk,
    ListenStart,
    IntentFinalized,
    Timeout,
    WindowClose,
}

impl MarkType {
    fn opens_segment(self) -> bool {
        matches!(self, MarkType::WindowOpen | MarkType::TalkStart)
    }

    fn closes_segment(self) -> bool {
        matches!(
            self,
            MarkType::WindowClose | MarkType::IntentFinalized | MarkType::Timeout
        )
    }
}

#[derive(Debug, Clone)]
pub struct AudioMark {
    pub id: u64,
    pub mark_type: MarkType,
    pub offset_ms: u64,
    pub at_epoch_ms: i64,
    pub meta: Option<serde_json::Value>,
}

/// A logical talk segment derived by folding over marks. `end_offset_ms` is
/// `None` while the segment is still open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start_offset_ms: u64,
    pub end_offset_ms: Option<u64>,
}

#[derive(Default)]
struct CallLedger {
    marks: Vec<AudioMark>,
    next_id: u64,
}

/// Single-writer-per-call, append-only mark store shared via the same
/// pattern as the snoop contract store: shared via the store but mutated
/// by the engine only.
#[derive(Default)]
pub struct AudioMarkLedger {
    calls: Mutex<HashMap<String, CallLedger>>,
}

impl AudioMarkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &self,
        linked_id: &str,
        mark_type: MarkType,
        offset_ms: u64,
        at_epoch_ms: i64,
        meta: Option<serde_json::Value>,
    ) -> u64 {
        let mut calls = self.calls.lock().unwrap();
        let ledger = calls.entry(linked_id.to_string()).or_default();
        let id = ledger.next_id;
        ledger.next_id += 1;
        ledger.marks.push(AudioMark {
            id,
            mark_type,
            offset_ms,
            at_epoch_ms,
            meta,
        });
        id
    }

    pub fn marks_for(&self, linked_id: &str) -> Vec<AudioMark> {
        self.calls
            .lock()
            .unwrap()
            .get(linked_id)
            .map(|l| l.marks.clone())
            .unwrap_or_default()
    }

    /// Fold the mark log into logical talk segments: open on
    /// `WINDOW_OPEN`/`TALK_START`, close on
    /// `WINDOW_CLOSE`/`INTENT_FINALIZED`/`TIMEOUT`. Re-opening an already-open
    /// segment is a no-op (idempotent).
    pub fn segments_for(&self, linked_id: &str) -> Vec<Segment> {
        let marks = self.marks_for(linked_id);
        let mut segments = Vec::new();
        let mut open: Option<u64> = None;

        for mark in &marks {
            if mark.mark_type.opens_segment() {
                if open.is_none() {
                    open = Some(mark.offset_ms);
                }
            } else if mark.mark_type.closes_segment() {
                if let Some(start) = open.take() {
                    segments.push(Segment {
                        start_offset_ms: start,
                        end_offset_ms: Some(mark.offset_ms),
                    });
                }
            }
        }

        if let Some(start) = open {
            segments.push(Segment {
                start_offset_ms: start,
                end_offset_ms: None,
            });
        }

        segments
    }

    pub fn clear(&self, linked_id: &str) {
        self.calls.lock().unwrap().remove(linked_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(marks: &[(MarkType, u64)]) -> AudioMarkLedger {
        let ledger = AudioMarkLedger::new();
        for (i, (t, offset)) in marks.iter().enumerate() {
            ledger.append("call-1", *t, *offset, i as i64, None);
        }
        ledger
    }

    #[test]
    fn folds_a_single_closed_segment() {
        let ledger = ledger_with(&[
            (MarkType::WindowOpen, 0),
            (MarkType::DeltaActivity, 100),
            (MarkType::WindowClose, 900),
        ]);
        let segments = ledger.segments_for("call-1");
        assert_eq!(
            segments,
            vec![Segment {
                start_offset_ms: 0,
                end_offset_ms: Some(900)
            }]
        );
    }

    #[test]
    fn leaves_trailing_segment_open() {
        let ledger = ledger_with(&[(MarkType::TalkStart, 50)]);
        let segments = ledger.segments_for("call-1");
        assert_eq!(
            segments,
            vec![Segment {
                start_offset_ms: 50,
                end_offset_ms: None
            }]
        );
    }

    #[test]
    fn reopening_an_open_segment_is_idempotent() {
        let ledger = ledger_with(&[
            (MarkType::WindowOpen, 0),
            (MarkType::TalkStart, 10),
            (MarkType::IntentFinalized, 500),
        ]);
        let segments = ledger.segments_for("call-1");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_offset_ms, 0);
        assert_eq!(segments[0].end_offset_ms, Some(500));
    }

    #[test]
    fn timeout_closes_a_segment() {
        let ledger = ledger_with(&[(MarkType::WindowOpen, 0), (MarkType::Timeout, 4000)]);
        let segments = ledger.segments_for("call-1");
        assert_eq!(segments[0].end_offset_ms, Some(4000));
    }

    #[test]
    fn marks_for_unknown_call_is_empty() {
        let ledger = AudioMarkLedger::new();
        assert!(ledger.marks_for("nope").is_empty());
        assert!(ledger.segments_for("nope").is_empty());
    }
}
