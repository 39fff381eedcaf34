mod common;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use anyhow::Result;
use tracon_core::network::{read_frame, write_frame, RPC_PATH};
use tracon_runtime::{RequestEnvelope, ResponseEnvelope, RpcRequest, RpcResponse, SimError};

fn connect(server: &tracon_core::LocalSimServer) -> Result<(TcpStream, BufReader<TcpStream>)> {
    let mut stream = TcpStream::connect(server.addr())?;
    stream.write_all(format!("CONNECT {RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut status = String::new();
    reader.read_line(&mut status)?;
    assert!(status.starts_with("HTTP/1.0 200"), "status: {status}");
    let mut blank = String::new();
    reader.read_line(&mut blank)?;
    Ok((stream, reader))
}

#[test]
fn plain_http_is_refused() -> Result<()> {
    let server = common::local_server()?;
    let mut stream = TcpStream::connect(server.addr())?;
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n")?;
    let mut status = String::new();
    BufReader::new(stream).read_line(&mut status)?;
    assert!(status.starts_with("HTTP/1.0 405"));
    server.shutdown();
    Ok(())
}

#[test]
fn pipelined_calls_echo_their_ids() -> Result<()> {
    let server = common::local_server()?;
    let (mut stream, mut reader) = connect(&server)?;

    for call_id in [41, 42] {
        let bytes = RequestEnvelope::new(call_id, RpcRequest::ListActiveSims).encode_to_vec()?;
        write_frame(&mut stream, &bytes)?;
    }
    for expected in [41, 42] {
        let frame = read_frame(&mut reader)?.expect("response frame");
        let response = ResponseEnvelope::decode(&frame)?;
        assert_eq!(response.call_id, expected);
        assert!(matches!(response.result, Ok(RpcResponse::ActiveSims(ref sims)) if sims.is_empty()));
    }
    server.shutdown();
    Ok(())
}

#[test]
fn undecodable_frame_gets_malformed_request() -> Result<()> {
    let server = common::local_server()?;
    let (mut stream, mut reader) = connect(&server)?;
    write_frame(&mut stream, &[0xff, 0xff, 0xff])?;

    let frame = read_frame(&mut reader)?.expect("response frame");
    let response = ResponseEnvelope::decode(&frame)?;
    assert_eq!(response.call_id, 0);
    assert!(matches!(response.result, Err(SimError::MalformedRequest(_))));
    server.shutdown();
    Ok(())
}

#[test]
fn invalid_payload_is_answered_with_its_call_id() -> Result<()> {
    let server = common::local_server()?;
    let (mut stream, mut reader) = connect(&server)?;
    // call_id = 5, new_sim = {} (sim type left unspecified)
    write_frame(&mut stream, &[0x08, 0x05, 0x62, 0x00])?;

    let frame = read_frame(&mut reader)?.expect("response frame");
    let response = ResponseEnvelope::decode(&frame)?;
    assert_eq!(response.call_id, 5);
    assert!(matches!(response.result, Err(SimError::MalformedRequest(_))));
    server.shutdown();
    Ok(())
}
