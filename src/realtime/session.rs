//! Persistent websocket session against the realtime transcription
//! service.
//!
//! A spawned reader task decodes inbound frames and forwards them over
//! an unbounded channel in arrival order; backpressure is not modeled
//! here. A transport failure becomes a terminal [`ServerEvent::Error`]
//! on that channel — the session ends, the process does not.

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{ClientEvent, ServerEvent, SessionConfig};
use super::RealtimeError;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime?intent=transcription";

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: String,
    pub api_key: String,
    pub session: SessionConfig,
}

impl RealtimeConfig {
    pub fn new(api_key: impl Into<String>, session: SessionConfig) -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            api_key: api_key.into(),
            session,
        }
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// One live transcription session.
pub struct RealtimeSession {
    sink: WsSink,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    reader: JoinHandle<()>,
}

impl RealtimeSession {
    /// Connect, authenticate, and send the initial session
    /// configuration.
    pub async fn connect(config: RealtimeConfig) -> Result<Self, RealtimeError> {
        if config.api_key.trim().is_empty() {
            return Err(RealtimeError::MissingApiKey);
        }

        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        info!("realtime session connected to {}", config.url);

        let (sink, mut source) = stream.split();
        let (tx, events) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Some(event) = ServerEvent::decode(text.as_str()) else {
                            debug!("dropping undecodable frame");
                            continue;
                        };
                        let terminal = matches!(event, ServerEvent::Error { .. });
                        if tx.send(event).is_err() || terminal {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("realtime session closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("realtime transport error: {}", e);
                        let _ = tx.send(ServerEvent::Error {
                            message: e.to_string(),
                        });
                        break;
                    }
                }
            }
        });

        let mut session = Self {
            sink,
            events,
            reader,
        };
        session.configure(config.session).await?;
        Ok(session)
    }

    /// Send a (new) session configuration.
    pub async fn configure(&mut self, session: SessionConfig) -> Result<(), RealtimeError> {
        self.send(ClientEvent::SessionUpdate { session }).await
    }

    /// Append a raw PCM16 chunk.
    pub async fn append_audio(&mut self, pcm16: &[u8]) -> Result<(), RealtimeError> {
        self.send(ClientEvent::append_pcm16(pcm16)).await
    }

    /// Flush the audio buffer into a new item.
    pub async fn commit(&mut self) -> Result<(), RealtimeError> {
        self.send(ClientEvent::AudioCommit).await
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), RealtimeError> {
        self.sink
            .send(Message::Text(event.to_json().into()))
            .await
            .map_err(|e| RealtimeError::SendFailed(e.to_string()))
    }

    /// Next decoded server event, in arrival order. `None` once the
    /// reader loop has ended and the channel is drained.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`next_event`](Self::next_event).
    pub fn try_next_event(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// Tear the session down. The reader loop is cancelled; results of
    /// in-flight sends are simply ignored.
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        self.reader.abort();
        debug!("realtime session torn down");
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
