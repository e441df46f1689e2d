//! Realtime duplex STT session client and batch transcription/TTS surface.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use reqwest::multipart;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;

use crate::cache::{TtsCache, TtsCacheKey};
use crate::state::{ConnectionState, SttEvent, SttState, StreamStableReason};
use crate::wire::{ClientEvent, ServerEvent, SessionConfig};
use crate::{Result, SttError};

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

const DEFAULT_VOICES: &[&str] = &["alloy", "verse", "aria"];

#[async_trait]
pub trait SttSessionClient: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn update_session(&self, config: SessionConfig) -> Result<()>;
    async fn stream_audio(&self, bytes: &[u8]) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn wait_for_transcript(&self, timeout: Duration) -> Result<String>;
    async fn cancel_current_response(&self, reason: &str) -> Result<()>;
    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
    fn subscribe(&self) -> broadcast::Receiver<SttEvent>;
    fn enable_incremental(&self);
    fn disable_incremental(&self);
}

pub struct WsSttSession {
    ws_url: String,
    http_base_url: String,
    api_key: String,
    write: AsyncMutex<Option<WsWrite>>,
    state: Arc<StdMutex<SttState>>,
    events_tx: broadcast::Sender<SttEvent>,
    stream_stable_threshold: Duration,
    min_audio_input_bytes: usize,
    tts_cache: TtsCache,
    default_voice: String,
}

impl WsSttSession {
    pub fn new(ws_url: impl Into<String>, http_base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            ws_url: ws_url.into(),
            http_base_url: http_base_url.into(),
            api_key: api_key.into(),
            write: AsyncMutex::new(None),
            state: Arc::new(StdMutex::new(SttState::new())),
            events_tx,
            // 8 kHz, 8-bit mu-law: 8 bytes per millisecond of audio.
            stream_stable_threshold: Duration::from_millis(300),
            min_audio_input_bytes: 180 * 8,
            tts_cache: TtsCache::new(256),
            default_voice: "alloy".to_string(),
        }
    }

    fn http_client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    async fn send_event(&self, event: ClientEvent) -> Result<()> {
        let json = serde_json::to_string(&event).map_err(|e| SttError::Protocol(e.to_string()))?;
        let mut guard = self.write.lock().await;
        let write = guard.as_mut().ok_or(SttError::ModelNotLoaded)?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| SttError::Protocol(e.to_string()))?;
        Ok(())
    }

    fn spawn_stream_stability_watchdog(&self) {
        let state = self.state.clone();
        let events_tx = self.events_tx.clone();
        let threshold = self.stream_stable_threshold;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(50));
            loop {
                ticker.tick().await;
                let mut guard = state.lock().unwrap();
                if !guard.connected() {
                    break;
                }
                if !guard.delta_tracking.is_stream_active {
                    continue;
                }
                let Some(last) = guard.delta_tracking.last_delta_at else {
                    continue;
                };
                let elapsed = last.elapsed();
                if elapsed >= threshold && !guard.delta_tracking.paused_emitted {
                    guard.delta_tracking.paused_emitted = true;
                    drop(guard);
                    let _ = events_tx.send(SttEvent::StreamStable {
                        reason: StreamStableReason::StreamPaused,
                    });
                    continue;
                }
                if elapsed >= threshold * 2 && !guard.delta_tracking.stable_emitted {
                    guard.delta_tracking.stable_emitted = true;
                    drop(guard);
                    let _ = events_tx.send(SttEvent::StreamStable {
                        reason: StreamStableReason::StreamStable,
                    });
                }
            }
        });
    }

    fn spawn_reader(&self, mut read: futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>) {
        let state = self.state.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let Ok(Message::Text(text)) = msg else {
                    continue;
                };
                let event: ServerEvent = match serde_json::from_str(&text) {
                    Ok(e) => e,
                    Err(err) => {
                        tracing::warn!(%err, "failed to parse stt server event");
                        continue;
                    }
                };
                handle_server_event(event, &state, &events_tx);
            }
            let mut guard = state.lock().unwrap();
            guard.connection = Some(ConnectionState::Disconnected);
        });
    }
}

fn handle_server_event(
    event: ServerEvent,
    state: &Arc<StdMutex<SttState>>,
    events_tx: &broadcast::Sender<SttEvent>,
) {
    match event {
        ServerEvent::SessionCreated {} => {
            state.lock().unwrap().connection = Some(ConnectionState::Connected);
        }
        ServerEvent::InputAudioTranscriptionCompleted { transcript } => {
            state.lock().unwrap().last_transcript = transcript.clone();
            let _ = events_tx.send(SttEvent::Partial {
                text: transcript,
                is_delta: false,
            });
        }
        ServerEvent::ConversationItemCreated {} => {}
        ServerEvent::ResponseCreated { response } => {
            state.lock().unwrap().begin_response(response.id);
        }
        ServerEvent::ResponseAudioTranscriptDone { transcript } => {
            state.lock().unwrap().last_assistant_response = transcript.clone();
            let _ = events_tx.send(SttEvent::Partial {
                text: transcript,
                is_delta: true,
            });
        }
        ServerEvent::ResponseAudioDelta { delta } => {
            let _ = delta;
            let mut guard = state.lock().unwrap();
            guard.delta_tracking.last_delta_at = Some(Instant::now());
            guard.delta_tracking.is_stream_active = true;
            guard.delta_tracking.reset_emitted();
        }
        ServerEvent::ResponseDone { .. } => {
            let mut guard = state.lock().unwrap();
            guard.clear_response();
            guard.delta_tracking.is_stream_active = false;
            drop(guard);
            let _ = events_tx.send(SttEvent::StreamStable {
                reason: StreamStableReason::StreamComplete,
            });
        }
        ServerEvent::Error { error } => {
            tracing::warn!(message = %error.message, "stt server error event");
        }
        ServerEvent::Unknown => {}
    }
}

#[async_trait]
impl SttSessionClient for WsSttSession {
    async fn connect(&self) -> Result<()> {
        {
            let mut guard = self.state.lock().unwrap();
            guard.connection = Some(ConnectionState::Connecting);
        }
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|e| SttError::Protocol(e.to_string()))?;
        let (write, read) = ws_stream.split();
        *self.write.lock().await = Some(write);
        self.spawn_reader(read);
        self.spawn_stream_stability_watchdog();
        self.update_session(SessionConfig::default()).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.write.lock().await;
        if let Some(mut write) = guard.take() {
            let _ = write.close().await;
        }
        self.state.lock().unwrap().connection = Some(ConnectionState::Disconnected);
        Ok(())
    }

    async fn update_session(&self, config: SessionConfig) -> Result<()> {
        self.send_event(ClientEvent::SessionUpdate { session: config }).await
    }

    /// Audio shorter than the configured minimum is dropped with a warning
    /// and never sent. No audio is accepted while a response is
    /// active unless incremental mode is on.
    async fn stream_audio(&self, bytes: &[u8]) -> Result<()> {
        let incremental = {
            let mut guard = self.state.lock().unwrap();
            if guard.has_active_response() && !guard.incremental_mode {
                return Err(SttError::ResponseActive);
            }
            guard.buffered_bytes += bytes.len();
            guard.incremental_mode
        };
        let _ = incremental;
        let audio = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.send_event(ClientEvent::InputAudioBufferAppend { audio }).await
    }

    async fn commit(&self) -> Result<()> {
        let buffered = self.state.lock().unwrap().buffered_bytes;
        if buffered < self.min_audio_input_bytes {
            tracing::warn!(buffered, minimum = self.min_audio_input_bytes, "audio input below minimum, dropping commit");
            self.state.lock().unwrap().buffered_bytes = 0;
            return Ok(());
        }
        self.send_event(ClientEvent::InputAudioBufferCommit {}).await?;
        self.state.lock().unwrap().buffered_bytes = 0;
        Ok(())
    }

    async fn wait_for_transcript(&self, timeout: Duration) -> Result<String> {
        let mut rx = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(self.state.lock().unwrap().last_transcript.clone());
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(SttEvent::Partial { text, is_delta: false })) => return Ok(text),
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => return Ok(self.state.lock().unwrap().last_transcript.clone()),
                Err(_) => return Ok(self.state.lock().unwrap().last_transcript.clone()),
            }
        }
    }

    /// Idempotent when no response is active.
    async fn cancel_current_response(&self, reason: &str) -> Result<()> {
        let response_id = self.state.lock().unwrap().active_response_id.clone();
        if response_id.is_none() {
            return Ok(());
        }
        tracing::debug!(reason, response_id = ?response_id, "cancelling active stt response");
        self.send_event(ClientEvent::ResponseCancel { response_id }).await?;
        self.send_event(ClientEvent::InputAudioBufferClear {}).await?;
        self.state.lock().unwrap().clear_response();
        Ok(())
    }

    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let voice = if DEFAULT_VOICES.contains(&voice) {
            voice.to_string()
        } else {
            tracing::warn!(requested = voice, fallback = %self.default_voice, "unknown tts voice, using default");
            self.default_voice.clone()
        };

        let key = TtsCacheKey {
            text: text.to_string(),
            voice: voice.clone(),
        };
        if let Some(cached) = self.tts_cache.get(&key) {
            return Ok(cached);
        }

        let resp = self
            .http_client()
            .post(format!("{}/audio/speech", self.http_base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": "tts-1",
                "input": text,
                "voice": voice,
                "response_format": "pcm",
            }))
            .send()
            .await
            .map_err(|e| SttError::Protocol(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SttError::Protocol(format!("tts http error {status}: {body}")));
        }

        let bytes = resp.bytes().await.map_err(|e| SttError::Protocol(e.to_string()))?.to_vec();
        self.tts_cache.insert(key, bytes.clone());
        Ok(bytes)
    }

    fn subscribe(&self) -> broadcast::Receiver<SttEvent> {
        self.events_tx.subscribe()
    }

    fn enable_incremental(&self) {
        self.state.lock().unwrap().incremental_mode = true;
    }

    fn disable_incremental(&self) {
        self.state.lock().unwrap().incremental_mode = false;
    }
}

/// Batch transcription over the HTTP endpoint, used by the
/// continuous-recording fallback path and as a no-partial-transcript
/// backstop for the turn state machine.
pub async fn transcribe_batch(http_base_url: &str, api_key: &str, wav_bytes: Vec<u8>, language: &str) -> Result<String> {
    let file_part = multipart::Part::bytes(wav_bytes)
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .map_err(|e| SttError::Protocol(e.to_string()))?;
    let form = multipart::Form::new()
        .text("model", "whisper-1")
        .text("language", language.to_string())
        .part("file", file_part);

    let resp = reqwest::Client::new()
        .post(format!("{http_base_url}/audio/transcriptions"))
        .bearer_auth(api_key)
        .multipart(form)
        .send()
        .await
        .map_err(|e| SttError::Protocol(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(SttError::Protocol(format!("transcription http error {status}: {body}")));
    }

    let json: serde_json::Value = resp.json().await.map_err(|e| SttError::Protocol(e.to_string()))?;
    Ok(json["text"].as_str().unwrap_or_default().to_string())
}

impl SttState {
    fn connected(&self) -> bool {
        self.connection == Some(ConnectionState::Connected) || self.connection == Some(ConnectionState::Connecting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_audio_input_bytes_matches_one_hundred_eighty_ms_at_8khz() {
        let session = WsSttSession::new("ws://example", "http://example", "key");
        assert_eq!(session.min_audio_input_bytes, 1440);
    }
}
