//! In-process stand-in for a game server, speaking just enough of the
//! server-list protocol for the probe: status replies and login disconnects.
#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use craft_scan_rs::varint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const STATUS_JSON: &str = r#"{"description":"A server","version":{"name":"1.19","protocol":759},"players":{"online":3,"max":20,"sample":[{"name":"alice","id":"1"},{"name":"bob","id":"2"}]},"favicon":"data:image/png;base64,iVBORw0KGgo="}"#;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer status with `status`, answer logins with `login_reply`.
    Respond { status: String, login_reply: String },
    /// Answer the status request with bytes that are not a valid packet.
    Garbage,
    /// Answer with packet id 0x01 instead of 0x00.
    WrongId,
    /// Accept and never write anything.
    Silent,
}

impl Behavior {
    pub fn open() -> Self {
        Behavior::Respond {
            status: STATUS_JSON.to_string(),
            login_reply: r#"{"text":"Server is full"}"#.to_string(),
        }
    }

    pub fn whitelisted() -> Self {
        Behavior::Respond {
            status: STATUS_JSON.to_string(),
            login_reply: r#"{"text":"You are not whitelisted on this server!"}"#.to_string(),
        }
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub status_connections: Arc<AtomicUsize>,
    pub login_connections: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn status_count(&self) -> usize {
        self.status_connections.load(Ordering::SeqCst)
    }

    pub fn login_count(&self) -> usize {
        self.login_connections.load(Ordering::SeqCst)
    }
}

pub async fn spawn(behavior: Behavior) -> MockServer {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status_connections = Arc::new(AtomicUsize::new(0));
    let login_connections = Arc::new(AtomicUsize::new(0));

    let (sc, lc) = (status_connections.clone(), login_connections.clone());
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let behavior = behavior.clone();
            let (sc, lc) = (sc.clone(), lc.clone());
            tokio::spawn(async move {
                let _ = handle(stream, behavior, sc, lc).await;
            });
        }
    });

    MockServer {
        addr,
        status_connections,
        login_connections,
    }
}

/// A port on loopback with nothing listening.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = varint::decode_from_stream(stream)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

fn text_packet(id: u8, text: &str) -> Vec<u8> {
    let mut body = vec![id];
    body.extend(varint::encode(text.len() as u32));
    body.extend_from_slice(text.as_bytes());
    let mut out = varint::encode(body.len() as u32);
    out.extend(body);
    out
}

/// Next-state field: the last byte of a handshake body for our small values.
fn next_state(handshake: &[u8]) -> u8 {
    handshake.last().copied().unwrap_or(0)
}

async fn handle(
    mut stream: TcpStream,
    behavior: Behavior,
    status_connections: Arc<AtomicUsize>,
    login_connections: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let handshake = read_frame(&mut stream).await?;
    let login = next_state(&handshake) == 2;
    if login {
        login_connections.fetch_add(1, Ordering::SeqCst);
    } else {
        status_connections.fetch_add(1, Ordering::SeqCst);
    }
    // Status request or login start.
    let _ = read_frame(&mut stream).await?;

    match behavior {
        Behavior::Respond { status, login_reply } => {
            let text = if login { login_reply } else { status };
            stream.write_all(&text_packet(0x00, &text)).await?;
        }
        Behavior::Garbage => {
            stream.write_all(&[0x03, 0x00, 0x7f, b'{']).await?;
        }
        Behavior::WrongId => {
            stream.write_all(&text_packet(0x01, "{}")).await?;
        }
        Behavior::Silent => {
            let mut sink = [0u8; 64];
            while stream.read(&mut sink).await? > 0 {}
        }
    }
    stream.flush().await?;
    // Hold the socket until the client hangs up.
    let mut sink = [0u8; 64];
    while stream.read(&mut sink).await? > 0 {}
    Ok(())
}
