use crate::config::AppConfig;
use crate::error::SessionError;
use crate::model::{Inbound, Notification, Request, Response, TerminationReason};
use crate::orchestrator::SessionInput;
use crate::status::now_unix_ms;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const PROTOCOL_VERSION: u8 = 1;
const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
const PROTOCOL_ERROR_WINDOW: Duration = Duration::from_secs(10);
const PROTOCOL_ERROR_RESET_THRESHOLD: usize = 5;

/// Outbound half of the head-unit proxy as seen by the session core.
pub trait Transport: Send {
    /// Hands the request over for delivery. Never waits for the response.
    fn send(&mut self, request: &Request) -> Result<(), SessionError>;

    /// Whether the head unit can store files (display reports graphics support).
    fn query_file_support(&mut self) -> Result<bool, SessionError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    v: u8,
    id: String,
    ts_unix_ms: u64,
    #[serde(rename = "type")]
    message_type: String,
    payload: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegisterAppPayload {
    app_name: String,
    app_id: String,
    is_media_app: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegisterAppAckPayload {
    success: bool,
    #[serde(default)]
    graphic_supported: bool,
    #[serde(default)]
    info: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionTerminatedPayload {
    reason: String,
}

fn make_envelope<T: Serialize>(message_type: &str, payload: T) -> Envelope<T> {
    Envelope {
        v: PROTOCOL_VERSION,
        id: Uuid::new_v4().to_string(),
        ts_unix_ms: now_unix_ms(),
        message_type: message_type.to_string(),
        payload,
    }
}

fn encode_frame<T: Serialize>(message: &Envelope<T>) -> Result<Vec<u8>, SessionError> {
    let payload = rmp_serde::to_vec_named(message)
        .map_err(|err| SessionError::Codec(format!("encode failed: {err}")))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(SessionError::Codec(format!(
            "encoded frame too large: {}",
            payload.len()
        )));
    }
    Ok(payload)
}

struct ProtocolErrorTracker {
    recent: VecDeque<Instant>,
}

impl ProtocolErrorTracker {
    fn new() -> Self {
        Self {
            recent: VecDeque::new(),
        }
    }

    fn record_and_should_reset(&mut self) -> bool {
        let now = Instant::now();
        self.recent.push_back(now);
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) > PROTOCOL_ERROR_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.len() > PROTOCOL_ERROR_RESET_THRESHOLD
    }
}

/// Framed link to a local head-unit proxy bridge.
///
/// Outbound frames are queued to a writer task so `send` never blocks the
/// session loop. A reader task decodes inbound frames and pushes them into
/// the session queue; it ends the session with `Terminated` when the stream
/// closes.
pub struct ProxyLink {
    frames: mpsc::UnboundedSender<Vec<u8>>,
    graphic_supported: Arc<Mutex<Option<bool>>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ProxyLink {
    pub async fn connect(
        host: &str,
        port: u16,
        app: &AppConfig,
        inputs: mpsc::UnboundedSender<SessionInput>,
    ) -> Result<Self, SessionError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Self::start(reader, writer, app, inputs)
    }

    pub fn start<R, W>(
        reader: R,
        writer: W,
        app: &AppConfig,
        inputs: mpsc::UnboundedSender<SessionInput>,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let register = encode_frame(&make_envelope(
            "register_app",
            RegisterAppPayload {
                app_name: app.name.clone(),
                app_id: app.id.clone(),
                is_media_app: app.is_media_app,
            },
        ))?;
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        frames_tx
            .send(register)
            .map_err(|_| SessionError::SendFailed("proxy link closed".to_string()))?;

        let graphic_supported = Arc::new(Mutex::new(None));
        let writer = tokio::spawn(run_writer(writer, frames_rx));
        let reader = tokio::spawn(run_reader(reader, graphic_supported.clone(), inputs));
        tracing::info!(app_name = %app.name, "proxy link started, registration sent");

        Ok(Self {
            frames: frames_tx,
            graphic_supported,
            reader,
            writer,
        })
    }
}

impl Transport for ProxyLink {
    fn send(&mut self, request: &Request) -> Result<(), SessionError> {
        let frame = encode_frame(&make_envelope("request", request))?;
        self.frames
            .send(frame)
            .map_err(|_| SessionError::SendFailed("proxy link closed".to_string()))
    }

    fn query_file_support(&mut self) -> Result<bool, SessionError> {
        let guard = self
            .graphic_supported
            .lock()
            .map_err(|_| SessionError::CapabilityQuery("capability state poisoned".to_string()))?;
        guard.ok_or_else(|| {
            SessionError::CapabilityQuery("registration not acknowledged yet".to_string())
        })
    }
}

impl Drop for ProxyLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn run_writer<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(err) = write_raw_frame(&mut writer, &frame).await {
            tracing::warn!(error = %err, "proxy link write failed");
            break;
        }
    }
}

async fn run_reader<R>(
    mut reader: R,
    graphic_supported: Arc<Mutex<Option<bool>>>,
    inputs: mpsc::UnboundedSender<SessionInput>,
) where
    R: AsyncRead + Unpin,
{
    let mut protocol_errors = ProtocolErrorTracker::new();
    let terminate = |reason: TerminationReason| {
        let _ = inputs.send(SessionInput::Inbound(Inbound::Terminated { reason }));
    };

    loop {
        let envelope = match read_frame(&mut reader).await {
            Ok(envelope) => envelope,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                let msg = err.to_string();
                if msg.contains("frame too large") {
                    tracing::warn!(error = %msg, "proxy link cannot resync after oversized frame");
                    terminate(TerminationReason::ProxyReported(msg));
                    return;
                }
                tracing::warn!(error = %msg, "proxy link frame decode failed");
                if protocol_errors.record_and_should_reset() {
                    tracing::warn!("proxy link reset after repeated protocol errors");
                    terminate(TerminationReason::ProxyReported(
                        "repeated protocol errors".to_string(),
                    ));
                    return;
                }
                continue;
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::UnexpectedEof {
                    tracing::warn!(error = %err, "proxy link read failed");
                }
                terminate(TerminationReason::TransportClosed);
                return;
            }
        };

        if envelope.v != PROTOCOL_VERSION {
            terminate(TerminationReason::ProxyReported(format!(
                "protocol version mismatch: proxy={}, bridge={}",
                envelope.v, PROTOCOL_VERSION
            )));
            return;
        }

        let inbound = match decode_inbound(&envelope, &graphic_supported) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(
                    message_type = %envelope.message_type,
                    error = %err,
                    "proxy link payload decode failed"
                );
                if protocol_errors.record_and_should_reset() {
                    tracing::warn!("proxy link reset after repeated protocol errors");
                    terminate(TerminationReason::ProxyReported(
                        "repeated protocol errors".to_string(),
                    ));
                    return;
                }
                continue;
            }
        };

        let terminal = matches!(inbound, Inbound::Terminated { .. });
        if inputs.send(SessionInput::Inbound(inbound)).is_err() {
            return;
        }
        if terminal {
            return;
        }
    }
}

fn decode_inbound(
    envelope: &Envelope<serde_json::Value>,
    graphic_supported: &Mutex<Option<bool>>,
) -> Result<Option<Inbound>, SessionError> {
    match envelope.message_type.as_str() {
        "register_app_ack" => {
            let ack: RegisterAppAckPayload = decode_payload(envelope)?;
            if !ack.success {
                let reason = ack
                    .info
                    .unwrap_or_else(|| "registration rejected".to_string());
                return Ok(Some(Inbound::Terminated {
                    reason: TerminationReason::ProxyReported(reason),
                }));
            }
            if let Ok(mut slot) = graphic_supported.lock() {
                *slot = Some(ack.graphic_supported);
            }
            tracing::info!(
                graphic_supported = ack.graphic_supported,
                "proxy acknowledged registration"
            );
            Ok(None)
        }
        "notification" => {
            let notification: Notification = decode_payload(envelope)?;
            tracing::trace!(?notification, "inbound notification");
            Ok(Some(Inbound::Notification(notification)))
        }
        "response" => {
            let response: Response = decode_payload(envelope)?;
            tracing::debug!(
                correlation_id = response.correlation_id,
                success = response.success,
                "inbound response"
            );
            Ok(Some(Inbound::Response(response)))
        }
        "session_terminated" => {
            let payload: SessionTerminatedPayload = decode_payload(envelope)?;
            Ok(Some(Inbound::Terminated {
                reason: TerminationReason::ProxyReported(payload.reason),
            }))
        }
        other => {
            tracing::debug!(message_type = %other, "ignoring unsupported proxy message");
            Ok(None)
        }
    }
}

fn decode_payload<T: for<'de> Deserialize<'de>>(
    envelope: &Envelope<serde_json::Value>,
) -> Result<T, SessionError> {
    serde_json::from_value(envelope.payload.clone())
        .map_err(|err| SessionError::Codec(format!("payload decode failed: {err}")))
}

async fn read_frame<R>(reader: &mut R) -> io::Result<Envelope<serde_json::Value>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len}"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    rmp_serde::from_slice(&buf)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("decode failed: {err}")))
}

async fn write_raw_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32_le(frame.len() as u32).await?;
    writer.write_all(frame).await?;
    writer.flush().await
}
