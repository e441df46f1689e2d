mod cache;
mod session;
mod state;
mod wire;

pub use cache::{TtsCache, TtsCacheKey};
pub use session::{transcribe_batch, SttSessionClient, WsSttSession};
pub use state::{ConnectionState, SttEvent, SttState, StreamStableReason};
pub use wire::{ClientEvent, ServerEvent, SessionConfig};

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("model not loaded")]
    ModelNotLoaded,
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
    #[error("invalid audio format")]
    InvalidAudioFormat,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("a response is already active; enable incremental mode to send more audio")]
    ResponseActive,
}

pub type Result<T> = std::result::Result<T, SttError>;
