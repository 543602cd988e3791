use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use scrobble_presence_engine::PresencePayload;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

pub(crate) const PORTS: [u16; 10] = [6463, 6464, 6465, 6466, 6467, 6468, 6469, 6470, 6471, 6472];
pub(crate) const IPC_SLOTS: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];

const OPCODE_HANDSHAKE: i32 = 0;
const OPCODE_FRAME: i32 = 1;
const OPCODE_CLOSE: i32 = 2;

const ACTIVITY_LISTENING: u8 = 2;
const MAX_TEXT_CHARS: usize = 128;
const MAX_BUTTON_LABEL_CHARS: usize = 32;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Transport {
    Ipc(IpcTransport),
    Ws(Box<Ws>),
}

#[cfg(unix)]
enum IpcTransport {
    Unix(tokio::net::UnixStream),
}

#[cfg(windows)]
enum IpcTransport {
    Pipe(tokio::net::windows::named_pipe::NamedPipeClient),
}

/// A handshaken connection to the local Discord client for one application id.
pub struct DiscordRpcClient {
    client_id: String,
    transport: Transport,
}

impl DiscordRpcClient {
    pub async fn connect(client_id: &str) -> Result<Self> {
        if let Some(ipc) = try_connect_ipc(client_id).await {
            return Ok(Self {
                client_id: client_id.to_string(),
                transport: Transport::Ipc(ipc),
            });
        }
        if let Some(ws) = try_connect_ws(client_id).await {
            return Ok(Self {
                client_id: client_id.to_string(),
                transport: Transport::Ws(Box::new(ws)),
            });
        }
        Err(anyhow!("unable to connect to the local Discord client"))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn set_activity(&mut self, payload: &PresencePayload) -> Result<()> {
        self.send_command(activity_json(payload)).await
    }

    pub async fn clear_activity(&mut self) -> Result<()> {
        self.send_command(Value::Null).await
    }

    pub async fn close(self) {
        match self.transport {
            Transport::Ipc(mut ipc) => {
                let _ = send_ipc_frame(&mut ipc, OPCODE_CLOSE, b"{}").await;
            }
            Transport::Ws(mut ws) => {
                let _ = ws.close(None).await;
            }
        }
    }

    async fn send_command(&mut self, activity: Value) -> Result<()> {
        let payload = json!({
            "cmd": "SET_ACTIVITY",
            "args": {
                "pid": std::process::id(),
                "activity": activity
            },
            "nonce": uuid::Uuid::new_v4().to_string()
        });

        match &mut self.transport {
            Transport::Ipc(ipc) => {
                send_ipc_frame(ipc, OPCODE_FRAME, payload.to_string().as_bytes()).await?;
                let (opcode, raw) = recv_ipc_frame(ipc).await?;
                if opcode == OPCODE_CLOSE {
                    bail!("discord closed the connection: {}", String::from_utf8_lossy(&raw));
                }
                validate_rpc_response(&raw)
            }
            Transport::Ws(ws) => {
                ws.send(Message::Text(payload.to_string()))
                    .await
                    .context("failed sending discord ws message")?;
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => validate_rpc_response(text.as_bytes()),
                    Some(Ok(Message::Binary(bin))) => validate_rpc_response(&bin),
                    Some(Ok(Message::Close(_))) | None => Err(anyhow!("discord ws closed")),
                    Some(Ok(_)) => Ok(()),
                    Some(Err(err)) => Err(anyhow!("discord ws receive failed: {err}")),
                }
            }
        }
    }
}

pub(crate) fn activity_json(payload: &PresencePayload) -> Value {
    let mut activity = json!({
        "type": ACTIVITY_LISTENING,
        "details": truncate_chars(&payload.details, MAX_TEXT_CHARS),
        "state": truncate_chars(&payload.state, MAX_TEXT_CHARS),
        "instance": true,
    });

    if let Some(obj) = activity.as_object_mut() {
        let mut assets = serde_json::Map::new();
        if let Some(v) = &payload.large_image_key {
            assets.insert("large_image".to_string(), json!(v));
        }
        if let Some(v) = &payload.large_image_text {
            assets.insert("large_text".to_string(), json!(truncate_chars(v, MAX_TEXT_CHARS)));
        }
        if !assets.is_empty() {
            obj.insert("assets".to_string(), Value::Object(assets));
        }

        if !payload.buttons.is_empty() {
            let buttons: Vec<Value> = payload
                .buttons
                .iter()
                .take(2)
                .map(|b| json!({"label": truncate_chars(&b.label, MAX_BUTTON_LABEL_CHARS), "url": b.url}))
                .collect();
            obj.insert("buttons".to_string(), Value::Array(buttons));
        }
    }
    activity
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

async fn try_connect_ws(client_id: &str) -> Option<Ws> {
    for port in PORTS {
        let url = Url::parse(&format!("ws://127.0.0.1:{port}/?v=1&client_id={client_id}")).ok()?;
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => match ws.next().await {
                Some(Ok(Message::Text(text))) if is_ready(text.as_bytes()) => {
                    debug!("connected to discord rpc websocket on port {}", port);
                    return Some(ws);
                }
                other => debug!("discord ws on port {} did not become ready: {:?}", port, other),
            },
            Err(err) => {
                debug!("discord ws connect failed on port {}: {}", port, err);
            }
        }
    }
    None
}

async fn try_connect_ipc(client_id: &str) -> Option<IpcTransport> {
    for slot in IPC_SLOTS {
        match connect_ipc_slot(slot).await {
            Ok(mut ipc) => {
                let hs = json!({"v": 1, "client_id": client_id}).to_string();
                if send_ipc_frame(&mut ipc, OPCODE_HANDSHAKE, hs.as_bytes())
                    .await
                    .is_err()
                {
                    continue;
                }
                match recv_ipc_frame(&mut ipc).await {
                    Ok((OPCODE_FRAME, raw)) if is_ready(&raw) => {
                        debug!("connected to discord ipc slot {}", slot);
                        return Some(ipc);
                    }
                    Ok((opcode, raw)) => {
                        warn!(
                            "discord ipc slot {} refused handshake (opcode {}): {}",
                            slot,
                            opcode,
                            String::from_utf8_lossy(&raw)
                        );
                    }
                    Err(err) => debug!("discord ipc slot {} handshake failed: {}", slot, err),
                }
            }
            Err(err) => {
                debug!("discord ipc slot {} unavailable: {}", slot, err);
            }
        }
    }
    None
}

#[cfg(unix)]
pub(crate) fn ipc_candidates(slot: u8) -> Vec<std::path::PathBuf> {
    use std::path::PathBuf;

    let mut paths: Vec<PathBuf> = Vec::new();
    for var in ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"] {
        if let Ok(dir) = std::env::var(var) {
            let base = PathBuf::from(dir);
            paths.push(base.join(format!("discord-ipc-{slot}")));
            paths.push(base.join("app/com.discordapp.Discord").join(format!("discord-ipc-{slot}")));
        }
    }
    paths.push(PathBuf::from(format!("/tmp/discord-ipc-{slot}")));
    paths
}

#[cfg(unix)]
async fn connect_ipc_slot(slot: u8) -> Result<IpcTransport> {
    for p in ipc_candidates(slot) {
        if let Ok(stream) = tokio::net::UnixStream::connect(&p).await {
            return Ok(IpcTransport::Unix(stream));
        }
    }
    Err(anyhow!("no unix discord ipc socket found"))
}

#[cfg(windows)]
async fn connect_ipc_slot(slot: u8) -> Result<IpcTransport> {
    use tokio::net::windows::named_pipe::ClientOptions;
    let path = format!(r"\\?\pipe\discord-ipc-{}", slot);
    let pipe = ClientOptions::new().open(&path)?;
    Ok(IpcTransport::Pipe(pipe))
}

async fn send_ipc_frame(ipc: &mut IpcTransport, opcode: i32, payload: &[u8]) -> Result<()> {
    let len = i32::try_from(payload.len()).context("discord ipc payload too large")?;
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);

    match ipc {
        #[cfg(unix)]
        IpcTransport::Unix(stream) => {
            stream.write_all(&frame).await?;
            stream.flush().await?;
        }
        #[cfg(windows)]
        IpcTransport::Pipe(pipe) => {
            pipe.write_all(&frame).await?;
            pipe.flush().await?;
        }
    }
    Ok(())
}

async fn recv_ipc_frame(ipc: &mut IpcTransport) -> Result<(i32, Vec<u8>)> {
    let mut hdr = [0u8; 8];
    match ipc {
        #[cfg(unix)]
        IpcTransport::Unix(stream) => stream.read_exact(&mut hdr).await?,
        #[cfg(windows)]
        IpcTransport::Pipe(pipe) => pipe.read_exact(&mut hdr).await?,
    };

    let (opcode, len) = decode_header(hdr)?;
    let mut payload = vec![0u8; len];
    match ipc {
        #[cfg(unix)]
        IpcTransport::Unix(stream) => stream.read_exact(&mut payload).await?,
        #[cfg(windows)]
        IpcTransport::Pipe(pipe) => pipe.read_exact(&mut payload).await?,
    };

    Ok((opcode, payload))
}

fn decode_header(hdr: [u8; 8]) -> Result<(i32, usize)> {
    let opcode = i32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let len = i32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
    let len = usize::try_from(len).map_err(|_| anyhow!("invalid discord ipc frame length"))?;
    Ok((opcode, len))
}

fn is_ready(raw: &[u8]) -> bool {
    serde_json::from_slice::<Value>(raw)
        .ok()
        .and_then(|v| v.get("evt").and_then(|e| e.as_str()).map(|e| e == "READY"))
        .unwrap_or(false)
}

fn validate_rpc_response(raw: &[u8]) -> Result<()> {
    let value: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    if value
        .get("evt")
        .and_then(|v| v.as_str())
        .map(|evt| evt.eq_ignore_ascii_case("ERROR"))
        .unwrap_or(false)
    {
        let data = value.get("data");
        let code = data
            .and_then(|d| d.get("code"))
            .and_then(|c| c.as_i64())
            .unwrap_or_default();
        let msg = data
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown discord rpc error");
        return Err(anyhow!("discord rpc error {code}: {msg}"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{activity_json, decode_header, is_ready, truncate_chars, validate_rpc_response};
    use scrobble_presence_engine::{PresenceButton, PresencePayload};

    fn payload() -> PresencePayload {
        PresencePayload {
            details: "Группа крови".to_string(),
            state: "Кино".to_string(),
            large_image_key: Some("https://img/xl.png".to_string()),
            large_image_text: Some("Прослушано 3 раза".to_string()),
            buttons: vec![PresenceButton {
                label: "Открыть".to_string(),
                url: "https://www.last.fm/user/rj".to_string(),
            }],
        }
    }

    #[test]
    fn activity_carries_assets_and_buttons() {
        let activity = activity_json(&payload());

        assert_eq!(activity["type"], 2);
        assert_eq!(activity["details"], "Группа крови");
        assert_eq!(activity["instance"], true);
        assert_eq!(activity["assets"]["large_image"], "https://img/xl.png");
        assert_eq!(activity["assets"]["large_text"], "Прослушано 3 раза");
        assert_eq!(activity["buttons"][0]["url"], "https://www.last.fm/user/rj");
    }

    #[test]
    fn activity_omits_empty_sections() {
        let mut bare = payload();
        bare.large_image_key = None;
        bare.large_image_text = None;
        bare.buttons.clear();
        let activity = activity_json(&bare);

        assert!(activity.get("assets").is_none());
        assert!(activity.get("buttons").is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("абвгд", 3), "абв");
        assert_eq!(truncate_chars("ab", 3), "ab");
    }

    #[test]
    fn rpc_errors_are_surfaced() {
        let err = br#"{"evt":"ERROR","data":{"code":4000,"message":"bad activity"}}"#;
        let ok = br#"{"cmd":"SET_ACTIVITY","evt":null,"data":{}}"#;

        assert!(validate_rpc_response(err).is_err());
        assert!(validate_rpc_response(ok).is_ok());
        assert!(is_ready(br#"{"cmd":"DISPATCH","evt":"READY","data":{}}"#));
        assert!(!is_ready(ok));
    }

    #[test]
    fn negative_frame_length_is_rejected() {
        let mut hdr = [0u8; 8];
        hdr[4..].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(decode_header(hdr).is_err());

        hdr[4..].copy_from_slice(&5i32.to_le_bytes());
        assert_eq!(decode_header(hdr).unwrap(), (0, 5));
    }
}
