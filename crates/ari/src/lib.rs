//! PBX control-plane client: REST operations over ARI's stasis interface,
//! plus a WebSocket event stream.

pub mod events;

use std::sync::Mutex;

use async_trait::async_trait;
pub use events::StasisEvent;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, thiserror::Error)]
pub enum AriError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("channel not in stasis application")]
    NotInStasis,
    #[error("channel currently recording")]
    CurrentlyRecording,
    #[error("channel not found")]
    ChannelNotFound,
    #[error("ari request failed: {0}")]
    Other(String),
}

impl AriError {
    /// The "expected-and-recovered" class: these two conditions are retried
    /// by the caller with exponential backoff; everything else is either a
    /// treated-as-success 404 or propagates.
    pub fn recoverable(&self) -> bool {
        matches!(self, AriError::NotInStasis | AriError::CurrentlyRecording)
    }
}

pub type Result<T> = std::result::Result<T, AriError>;

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct Bridge {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Playback {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ExternalMediaParams<'a> {
    pub app: &'a str,
    pub external_host: &'a str,
    pub format: &'a str,
    pub direction: &'a str,
    pub app_args: &'a str,
}

#[derive(Debug, Clone)]
pub struct SnoopParams<'a> {
    pub app: &'a str,
    pub app_args: &'a str,
    pub spy: &'a str,
    pub whisper: &'a str,
}

/// The PBX operations the media plane and engine rely on. Abstracted so the
/// engine can run against `InMemoryAriClient` in tests.
#[async_trait]
pub trait AriClient: Send + Sync {
    async fn channel_get(&self, channel_id: &str) -> Result<Channel>;
    async fn channel_play(&self, channel_id: &str, media: &str) -> Result<Playback>;
    async fn channel_hangup(&self, channel_id: &str) -> Result<()>;
    async fn channel_record(&self, channel_id: &str, name: &str, format: &str) -> Result<Recording>;
    async fn set_channel_var(&self, channel_id: &str, variable: &str, value: &str) -> Result<()>;
    async fn bridge_create(&self, bridge_type: &str) -> Result<Bridge>;
    async fn bridge_destroy(&self, bridge_id: &str) -> Result<()>;
    async fn bridge_add_channel(&self, bridge_id: &str, channel_id: &str) -> Result<()>;
    async fn snoop_channel(&self, parent_channel_id: &str, params: SnoopParams<'_>) -> Result<Channel>;
    async fn external_media(&self, params: ExternalMediaParams<'_>) -> Result<Channel>;
    async fn playback_stop(&self, playback_id: &str) -> Result<()>;
    async fn recording_stop(&self, name: &str) -> Result<()>;
}

/// Production client: REST calls over `reqwest`, events delivered through a
/// separately-spawned WebSocket reader task.
pub struct HttpAriClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpAriClient {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn classify(status: reqwest::StatusCode, body: &str) -> AriError {
        if status == reqwest::StatusCode::NOT_FOUND {
            return AriError::ChannelNotFound;
        }
        if body.contains("not in Stasis") || body.contains("not in stasis") {
            return AriError::NotInStasis;
        }
        if body.contains("recording") {
            return AriError::CurrentlyRecording;
        }
        AriError::Other(format!("{status}: {body}"))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Self::classify(status, &body))
    }

    /// Connects the stasis event WebSocket and forwards parsed events into a
    /// channel; runs until the socket closes or errors.
    pub async fn connect_events(&self, app: &str) -> Result<mpsc::Receiver<StasisEvent>> {
        let ws_url = format!(
            "{}/events?app={}&api_key={}:{}",
            self.base_url.replacen("http", "ws", 1),
            app,
            self.username,
            self.password
        );
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let (_, mut read) = ws_stream.split();
            while let Some(msg) = read.next().await {
                let Ok(Message::Text(text)) = msg else {
                    continue;
                };
                match serde_json::from_str::<StasisEvent>(&text) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(%err, "failed to parse stasis event"),
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl AriClient for HttpAriClient {
    async fn channel_get(&self, channel_id: &str) -> Result<Channel> {
        let resp = self
            .http
            .get(self.url(&format!("/channels/{channel_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(Channel {
            id: channel_id.to_string(),
            state: json["state"].as_str().unwrap_or("Unknown").to_string(),
        })
    }

    async fn channel_play(&self, channel_id: &str, media: &str) -> Result<Playback> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{channel_id}/play")))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "media": media }))
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(Playback {
            id: json["id"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn channel_hangup(&self, channel_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/channels/{channel_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        match Self::check(resp).await {
            // A channel that's already gone is treated as a successful hangup.
            Err(AriError::ChannelNotFound) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn channel_record(&self, channel_id: &str, name: &str, format: &str) -> Result<Recording> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{channel_id}/record")))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "name": name, "format": format }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(Recording { name: name.to_string() })
    }

    async fn set_channel_var(&self, channel_id: &str, variable: &str, value: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{channel_id}/variable")))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "variable": variable, "value": value }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn bridge_create(&self, bridge_type: &str) -> Result<Bridge> {
        let resp = self
            .http
            .post(self.url("/bridges"))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "type": bridge_type }))
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(Bridge {
            id: json["id"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn bridge_destroy(&self, bridge_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/bridges/{bridge_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        match Self::check(resp).await {
            Err(AriError::ChannelNotFound) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn bridge_add_channel(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/bridges/{bridge_id}/addChannel")))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "channel": channel_id }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn snoop_channel(&self, parent_channel_id: &str, params: SnoopParams<'_>) -> Result<Channel> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{parent_channel_id}/snoop")))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({
                "app": params.app,
                "appArgs": params.app_args,
                "spy": params.spy,
                "whisper": params.whisper,
            }))
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(Channel {
            id: json["id"].as_str().unwrap_or_default().to_string(),
            state: "Unknown".to_string(),
        })
    }

    async fn external_media(&self, params: ExternalMediaParams<'_>) -> Result<Channel> {
        let resp = self
            .http
            .post(self.url("/channels/externalMedia"))
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({
                "app": params.app,
                "external_host": params.external_host,
                "format": params.format,
                "direction": params.direction,
                "appArgs": params.app_args,
            }))
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let json: serde_json::Value = resp.json().await?;
        Ok(Channel {
            id: json["id"].as_str().unwrap_or_default().to_string(),
            state: "Unknown".to_string(),
        })
    }

    async fn playback_stop(&self, playback_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/playbacks/{playback_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        match Self::check(resp).await {
            Err(AriError::ChannelNotFound) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn recording_stop(&self, name: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/recordings/live/{name}/stop")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        match Self::check(resp).await {
            Err(AriError::ChannelNotFound) => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

/// In-memory fake for the engine's tests: records every call it receives
/// and returns deterministic ids, with no network I/O.
#[derive(Default)]
pub struct InMemoryAriClient {
    pub calls: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
}

impl InMemoryAriClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn gen_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{prefix}-{next}")
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl AriClient for InMemoryAriClient {
    async fn channel_get(&self, channel_id: &str) -> Result<Channel> {
        self.record(format!("channel_get:{channel_id}"));
        Ok(Channel {
            id: channel_id.to_string(),
            state: "Up".to_string(),
        })
    }

    async fn channel_play(&self, channel_id: &str, media: &str) -> Result<Playback> {
        self.record(format!("channel_play:{channel_id}:{media}"));
        Ok(Playback {
            id: self.gen_id("playback"),
        })
    }

    async fn channel_hangup(&self, channel_id: &str) -> Result<()> {
        self.record(format!("channel_hangup:{channel_id}"));
        Ok(())
    }

    async fn channel_record(&self, channel_id: &str, name: &str, _format: &str) -> Result<Recording> {
        self.record(format!("channel_record:{channel_id}:{name}"));
        Ok(Recording { name: name.to_string() })
    }

    async fn set_channel_var(&self, channel_id: &str, variable: &str, value: &str) -> Result<()> {
        self.record(format!("set_channel_var:{channel_id}:{variable}={value}"));
        Ok(())
    }

    async fn bridge_create(&self, bridge_type: &str) -> Result<Bridge> {
        self.record(format!("bridge_create:{bridge_type}"));
        Ok(Bridge {
            id: self.gen_id("bridge"),
        })
    }

    async fn bridge_destroy(&self, bridge_id: &str) -> Result<()> {
        self.record(format!("bridge_destroy:{bridge_id}"));
        Ok(())
    }

    async fn bridge_add_channel(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        self.record(format!("bridge_add_channel:{bridge_id}:{channel_id}"));
        Ok(())
    }

    async fn snoop_channel(&self, parent_channel_id: &str, _params: SnoopParams<'_>) -> Result<Channel> {
        self.record(format!("snoop_channel:{parent_channel_id}"));
        Ok(Channel {
            id: self.gen_id("snoop"),
            state: "Up".to_string(),
        })
    }

    async fn external_media(&self, _params: ExternalMediaParams<'_>) -> Result<Channel> {
        self.record("external_media");
        Ok(Channel {
            id: self.gen_id("extmedia"),
            state: "Up".to_string(),
        })
    }

    async fn playback_stop(&self, playback_id: &str) -> Result<()> {
        self.record(format!("playback_stop:{playback_id}"));
        Ok(())
    }

    async fn recording_stop(&self, name: &str) -> Result<()> {
        self.record(format!("recording_stop:{name}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_client_records_calls_and_generates_ids() {
        let client = InMemoryAriClient::new();
        let bridge = client.bridge_create("mixing").await.unwrap();
        let snoop = client
            .snoop_channel(
                "chan-1",
                SnoopParams {
                    app: "crm_app",
                    app_args: "linkedId=abc",
                    spy: "in",
                    whisper: "none",
                },
            )
            .await
            .unwrap();
        assert!(bridge.id.starts_with("bridge-"));
        assert!(snoop.id.starts_with("snoop-"));
        let calls = client.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.starts_with("bridge_create")));
        assert!(calls.iter().any(|c| c.starts_with("snoop_channel")));
    }

    #[test]
    fn ari_error_classifies_recoverable_conditions() {
        assert!(AriError::NotInStasis.recoverable());
        assert!(AriError::CurrentlyRecording.recoverable());
        assert!(!AriError::ChannelNotFound.recoverable());
    }
}
