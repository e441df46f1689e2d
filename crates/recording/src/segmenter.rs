//! Pure segment-boundary bookkeeping: opens a segment on
//! `ChannelTalkingStarted`, closes it `MIN_SILENCE_MS` after the matching
//! `ChannelTalkingFinished` provided no new talk-start arrived in between.
//! Mirrors the debounce-state idiom from the mic-activity detector (a small
//! owned struct with a `should_trigger`-style gate), generalized from a
//! binary on/off signal to a pair of millisecond boundaries.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSegment {
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    open_since_ms: Option<u64>,
    /// Set when talk-finished fires while a segment is open; cleared by a
    /// subsequent talk-start before the silence window elapses.
    pending_close_at_ms: Option<u64>,
    closed: Vec<PendingSegment>,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_talk_started(&mut self, now_ms: u64) {
        self.pending_close_at_ms = None;
        if self.open_since_ms.is_none() {
            self.open_since_ms = Some(now_ms);
        }
    }

    pub fn on_talk_finished(&mut self, now_ms: u64) {
        if self.open_since_ms.is_some() {
            self.pending_close_at_ms = Some(now_ms);
        }
    }

    /// Called on a timer tick; closes the open segment once the silence
    /// window has elapsed since the last talk-finished with no intervening
    /// talk-start. Returns the closed segment, if any.
    pub fn check_timeout(&mut self, now_ms: u64, min_silence_ms: u64) -> Option<PendingSegment> {
        let finished_at = self.pending_close_at_ms?;
        if now_ms < finished_at + min_silence_ms {
            return None;
        }
        let start_ms = self.open_since_ms.take()?;
        self.pending_close_at_ms = None;
        let segment = PendingSegment { start_ms, end_ms: finished_at };
        self.closed.push(segment);
        Some(segment)
    }

    /// Drains every segment closed so far (by `check_timeout`) plus, if a
    /// segment is still open, force-closes it at `now_ms` (call end).
    pub fn finish(&mut self, now_ms: u64) -> Vec<PendingSegment> {
        if let Some(start_ms) = self.open_since_ms.take() {
            let end_ms = self.pending_close_at_ms.take().unwrap_or(now_ms);
            self.closed.push(PendingSegment { start_ms, end_ms });
        }
        std::mem::take(&mut self.closed)
    }

    pub fn segments(&self) -> Vec<(u64, u64)> {
        self.closed.iter().map(|s| (s.start_ms, s.end_ms)).collect()
    }
}
