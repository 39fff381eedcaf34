use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracon_runtime::{RequestEnvelope, ResponseEnvelope, SimError};

use crate::dispatcher::SimDispatcher;
use crate::metrics::BandwidthStats;

/// Path clients must `CONNECT` to before switching to framed RPC.
pub const RPC_PATH: &str = "/tracon/rpc";
pub const CONNECTED_STATUS: &str = "200 Connected to TRACON RPC";
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
/// Upper bound on the HTTP request head read before the upgrade.
pub const MAX_HANDSHAKE_LEN: u64 = 8 * 1024;

pub struct RpcServer {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RpcServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until the accept loop exits.
    pub fn wait(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                log::error!("RPC accept loop panicked");
            }
        }
    }

    /// Stops accepting new connections; open connections run until their
    /// client disconnects.
    pub fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn start_rpc_server(bind_addr: SocketAddr, dispatcher: SimDispatcher) -> io::Result<RpcServer> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    let stopping = Arc::new(AtomicBool::new(false));
    let accept_stopping = Arc::clone(&stopping);
    let stats = dispatcher.manager().bandwidth();

    let accept_thread = thread::Builder::new()
        .name("rpc-accept".to_string())
        .spawn(move || {
            while !accept_stopping.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        log::info!("RPC client connected: {}", addr);
                        let dispatcher = dispatcher.clone();
                        let stats = Arc::clone(&stats);
                        let spawned = thread::Builder::new()
                            .name(format!("rpc-conn-{addr}"))
                            .spawn(move || {
                                if let Err(err) = serve_connection(stream, &dispatcher, &stats) {
                                    log::warn!("RPC client {} dropped: {}", addr, err);
                                } else {
                                    log::info!("RPC client disconnected: {}", addr);
                                }
                            });
                        if let Err(err) = spawned {
                            log::error!("Failed to spawn connection thread for {}: {}", addr, err);
                        }
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(err) => {
                        log::error!("Error accepting RPC client: {}", err);
                        thread::sleep(Duration::from_millis(200));
                    }
                }
            }
        })?;

    log::info!("RPC server listening on {}", local_addr);
    Ok(RpcServer {
        local_addr,
        stopping,
        accept_thread: Some(accept_thread),
    })
}

fn serve_connection(
    stream: TcpStream,
    dispatcher: &SimDispatcher,
    stats: &BandwidthStats,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    if let Err(err) = stream.set_nodelay(true) {
        log::warn!("Failed to set TCP_NODELAY: {}", err);
    }
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    if !accept_handshake(&mut reader, &mut writer)? {
        return Ok(());
    }

    while let Some(frame) = read_frame(&mut reader)? {
        stats.record_received(frame.len() + 4);
        let response = match RequestEnvelope::decode_tagged(&frame) {
            (_, Ok(envelope)) => {
                ResponseEnvelope::new(envelope.call_id, dispatcher.dispatch(envelope.request))
            }
            // Frames that are not protobuf at all have no call id to echo.
            (call_id, Err(err)) => {
                let call_id = call_id.unwrap_or(0);
                log::warn!("Rejecting undecodable request {}: {}", call_id, err);
                ResponseEnvelope::new(call_id, Err(SimError::MalformedRequest(err.to_string())))
            }
        };
        let bytes = response
            .encode_to_vec()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        write_frame(&mut writer, &bytes)?;
        stats.record_sent(bytes.len() + 4);
    }
    Ok(())
}

/// Reads the HTTP request head; answers `200` to a `CONNECT` on [`RPC_PATH`]
/// and an HTTP error to anything else.
fn accept_handshake<R: BufRead, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<bool> {
    let mut head = reader.by_ref().take(MAX_HANDSHAKE_LEN);
    let mut request_line = String::new();
    if head.read_line(&mut request_line)? == 0 {
        return Ok(false);
    }
    loop {
        let mut header = String::new();
        if head.read_line(&mut header)? == 0 || header.trim().is_empty() {
            break;
        }
    }
    if head.limit() == 0 {
        writer.write_all(b"HTTP/1.0 431 Request Header Fields Too Large\r\n\r\n")?;
        return Ok(false);
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    if method != "CONNECT" {
        writer.write_all(
            b"HTTP/1.0 405 Method Not Allowed\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n405 must CONNECT\n",
        )?;
        return Ok(false);
    }
    if path != RPC_PATH {
        writer.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n")?;
        return Ok(false);
    }
    writer.write_all(format!("HTTP/1.0 {CONNECTED_STATUS}\r\n\r\n").as_bytes())?;
    writer.flush()?;
    Ok(true)
}

/// Writes one 4-byte little-endian length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = frame.len() as u32;
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(frame);
    writer.write_all(&buffer)?;
    writer.flush()
}

/// Reads one frame; `None` on a clean end of stream between frames.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame)?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_are_length_prefixed() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"abc").expect("write");
        assert_eq!(&buffer[..4], &3u32.to_le_bytes());

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_frame(&mut cursor).expect("read"), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut cursor).expect("eof"), None);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut cursor = Cursor::new(u32::MAX.to_le_bytes().to_vec());
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn handshake_requires_connect() {
        let mut reader = Cursor::new(b"GET /tracon/rpc HTTP/1.0\r\n\r\n".to_vec());
        let mut out = Vec::new();
        assert!(!accept_handshake(&mut reader, &mut out).expect("handshake"));
        assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.0 405"));

        let mut reader = Cursor::new(format!("CONNECT {RPC_PATH} HTTP/1.0\r\n\r\n").into_bytes());
        let mut out = Vec::new();
        assert!(accept_handshake(&mut reader, &mut out).expect("handshake"));
        assert_eq!(
            String::from_utf8_lossy(&out),
            format!("HTTP/1.0 {CONNECTED_STATUS}\r\n\r\n")
        );
    }

    #[test]
    fn endless_header_line_is_cut_off() {
        let mut request = format!("CONNECT {RPC_PATH} HTTP/1.0\r\nX-Pad: ").into_bytes();
        request.extend(std::iter::repeat(b'a').take(MAX_HANDSHAKE_LEN as usize * 4));
        let mut reader = Cursor::new(request);
        let mut out = Vec::new();
        assert!(!accept_handshake(&mut reader, &mut out).expect("handshake"));
        assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.0 431"));
        assert!(reader.position() <= MAX_HANDSHAKE_LEN);
    }
}
