use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

const PROTOCOL_VERSION: u8 = 1;
const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_LISTEN: &str = "127.0.0.1:12345";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    v: u8,
    id: String,
    ts_unix_ms: u64,
    #[serde(rename = "type")]
    message_type: String,
    payload: T,
}

#[derive(Debug, Clone)]
struct SimOptions {
    listen: String,
    files: Vec<String>,
    graphic_supported: bool,
    first_run: bool,
    press_ok_after: Option<Duration>,
}

impl SimOptions {
    fn from_args() -> Self {
        let mut opts = SimOptions {
            listen: DEFAULT_LISTEN.to_string(),
            files: Vec::new(),
            graphic_supported: true,
            first_run: true,
            press_ok_after: None,
        };
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--listen" => {
                    if let Some(addr) = args.next() {
                        opts.listen = addr;
                    }
                }
                "--files" => {
                    if let Some(list) = args.next() {
                        opts.files = list
                            .split(',')
                            .filter(|name| !name.is_empty())
                            .map(str::to_string)
                            .collect();
                    }
                }
                "--no-graphics" => opts.graphic_supported = false,
                "--not-first-run" => opts.first_run = false,
                "--press-ok-after-ms" => {
                    opts.press_ok_after = args
                        .next()
                        .and_then(|ms| ms.parse().ok())
                        .map(Duration::from_millis);
                }
                other => eprintln!("headunit-sim: ignoring unknown argument {other}"),
            }
        }
        opts
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn make_envelope(message_type: &str, payload: Value) -> Envelope<Value> {
    Envelope {
        v: PROTOCOL_VERSION,
        id: Uuid::new_v4().to_string(),
        ts_unix_ms: now_unix_ms(),
        message_type: message_type.to_string(),
        payload,
    }
}

fn hmi_status(level: &str, audio: &str, first_run: bool) -> Envelope<Value> {
    make_envelope(
        "notification",
        json!({
            "notification": "hmi_status",
            "hmi_level": level,
            "audio_streaming_state": audio,
            "system_context": "MAIN",
            "first_run": first_run,
        }),
    )
}

/// Builds the response for one request and updates the simulated file store.
fn answer(request: &Value, files: &mut Vec<String>) -> Option<Envelope<Value>> {
    let correlation_id = request.get("correlation_id")?.as_u64()?;
    let function = request.get("function")?.as_str()?;
    let filename = request
        .get("filename")
        .and_then(Value::as_str)
        .map(str::to_string);

    let payload = match function {
        "list_files" => json!({ "function": "list_files", "filenames": files.clone() }),
        "put_file" => {
            if let Some(name) = filename {
                if !files.contains(&name) {
                    files.push(name);
                }
            }
            json!({ "function": "put_file" })
        }
        "delete_file" => {
            if let Some(name) = filename {
                files.retain(|f| *f != name);
            }
            json!({ "function": "delete_file" })
        }
        other => json!({ "function": "generic", "name": other }),
    };

    Some(make_envelope(
        "response",
        json!({
            "correlation_id": correlation_id,
            "success": true,
            "payload": payload,
        }),
    ))
}

async fn read_frame<R>(reader: &mut R) -> std::io::Result<Envelope<Value>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {len}"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    rmp_serde::from_slice(&buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))
}

async fn write_frame<W>(writer: &mut W, msg: &Envelope<Value>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let buf = rmp_serde::to_vec_named(msg)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
    if buf.len() > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("encoded frame too large: {}", buf.len()),
        ));
    }
    writer.write_u32_le(buf.len() as u32).await?;
    writer.write_all(&buf).await?;
    writer.flush().await
}

fn describe(msg: &Envelope<Value>) -> String {
    match msg.message_type.as_str() {
        // Uploaded bytes would flood the console.
        "request" => {
            let mut payload = msg.payload.clone();
            if let Some(obj) = payload.as_object_mut() {
                if let Some(bytes) = obj.get("bulk_data").and_then(Value::as_array) {
                    let len = bytes.len();
                    obj.insert("bulk_data".to_string(), json!(format!("<{len} bytes>")));
                }
            }
            payload.to_string()
        }
        _ => msg.payload.to_string(),
    }
}

async fn serve_session(
    stream: tokio::net::TcpStream,
    opts: &SimOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope<Value>>();

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            println!("-> {} {}", msg.message_type, msg.payload);
            if write_frame(&mut writer, &msg).await.is_err() {
                break;
            }
        }
    });

    let mut files = opts.files.clone();
    loop {
        let msg = read_frame(&mut reader).await?;
        println!("<- {} {}", msg.message_type, describe(&msg));

        match msg.message_type.as_str() {
            "register_app" => {
                out_tx.send(make_envelope(
                    "register_app_ack",
                    json!({ "success": true, "graphic_supported": opts.graphic_supported }),
                ))?;
                out_tx.send(hmi_status("NONE", "NOT_AUDIBLE", false))?;
                out_tx.send(hmi_status("FULL", "AUDIBLE", opts.first_run))?;

                if let Some(delay) = opts.press_ok_after {
                    let press_tx = out_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = press_tx.send(make_envelope(
                            "notification",
                            json!({ "notification": "button_press", "button": "OK" }),
                        ));
                    });
                }
            }
            "request" => {
                if let Some(response) = answer(&msg.payload, &mut files) {
                    out_tx.send(response)?;
                }
            }
            _ => {}
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let opts = SimOptions::from_args();
    let listener = TcpListener::bind(&opts.listen).await?;
    println!("headunit-sim: listening on {}", opts.listen);

    loop {
        let (stream, peer) = listener.accept().await?;
        println!("headunit-sim: app connected from {peer}");
        if let Err(err) = serve_session(stream, &opts).await {
            println!("headunit-sim: session ended: {err}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run().await
}
