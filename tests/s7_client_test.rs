// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the S7 client against the device simulator
//!
//! These tests validate the client by starting a simulator instance and
//! exercising the protocol against it: connection setup and PDU length
//! negotiation, data block reads and writes including chunking, device
//! identification and the error return codes.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::time;

use rust_s7_monitor::s7::{
    ConnectOptions, CpuState, Error, PlcSimulator, ReturnCode, S7Client, S7Server,
};
use rust_s7_monitor::values::{decode, Value, ValueKind};

/// Test utility function to start a simulator in the background
async fn start_test_server(
    simulator: PlcSimulator,
) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let server = S7Server::bind("127.0.0.1:0", simulator).await?;
    let socket_addr = server.local_addr()?;
    println!("Test server started on: {}", socket_addr);

    // Start the server in a background task
    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(100)).await;

    Ok(socket_addr)
}

fn options_for(addr: SocketAddr) -> ConnectOptions {
    let mut options = ConnectOptions::new("127.0.0.1");
    options.port = addr.port();
    options
}

#[tokio::test]
async fn test_connect_negotiates_pdu_length() -> Result<(), Box<dyn std::error::Error>> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;

    // The simulator grants 480 bytes, below the 960 the client asks for
    assert!(client.is_connected());
    assert_eq!(client.negotiated_pdu_length(), 480);

    // Disconnecting twice is harmless
    client.disconnect().await?;
    assert!(!client.is_connected());
    client.disconnect().await?;

    Ok(())
}

#[tokio::test]
async fn test_read_seeded_encoder_value() -> Result<(), Box<dyn std::error::Error>> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;

    // The factory image carries 10.0 mm at the encoder offset
    let data = client.db_read(5, 124, 4).await?;
    assert_eq!(data, [0x41, 0x20, 0x00, 0x00]);

    let value = decode(ValueKind::Real, &data, 0, 0)?;
    assert_eq!(value, Value::Real(10.0));

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_chunked_read_crosses_pdu_budget() -> Result<(), Box<dyn std::error::Error>> {
    let simulator = PlcSimulator::new().with_pdu_length(240);
    let image: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    simulator.insert_data_block(9, image.clone());
    let addr = start_test_server(simulator).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;
    assert_eq!(client.negotiated_pdu_length(), 240);

    // 1024 bytes cannot travel in one 240 byte PDU, the client has to chunk
    let data = client.db_read(9, 0, 1024).await?;
    assert_eq!(data, image);

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_then_read_back() -> Result<(), Box<dyn std::error::Error>> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;

    let raw = 42.5f32.to_be_bytes();
    client.db_write(5, 64, &raw).await?;

    // Read back the value to verify it was written
    let data = client.db_read(5, 64, 4).await?;
    assert_eq!(data, raw);
    let value = decode(ValueKind::Real, &data, 0, 0)?;
    assert_eq!(value, Value::Real(42.5));

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_chunked_write_crosses_pdu_budget() -> Result<(), Box<dyn std::error::Error>> {
    let simulator = PlcSimulator::new().with_pdu_length(240);
    simulator.insert_data_block(9, vec![0u8; 700]);
    let addr = start_test_server(simulator).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;

    let payload: Vec<u8> = (0..600u32).map(|i| (i % 241) as u8).collect();
    client.db_write(9, 50, &payload).await?;

    let data = client.db_read(9, 50, 600).await?;
    assert_eq!(data, payload);

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_data_block() -> Result<(), Box<dyn std::error::Error>> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;

    let result = client.db_read(99, 0, 4).await;
    match result {
        Err(Error::ReturnCode(code)) => assert_eq!(code, ReturnCode::ObjectMissing),
        other => panic!("expected an object missing error, got {:?}", other),
    }

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_access() -> Result<(), Box<dyn std::error::Error>> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;

    // The factory DB5 image is 128 bytes
    let result = client.db_read(5, 300, 4).await;
    match result {
        Err(Error::ReturnCode(code)) => assert_eq!(code, ReturnCode::OutOfRange),
        other => panic!("expected an out of range error, got {:?}", other),
    }

    // Writes past the end of the block are rejected the same way
    let result = client.db_write(5, 126, &[1, 2, 3, 4]).await;
    match result {
        Err(Error::ReturnCode(code)) => assert_eq!(code, ReturnCode::OutOfRange),
        other => panic!("expected an out of range error, got {:?}", other),
    }

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_offset_beyond_addressable_range() -> Result<(), Box<dyn std::error::Error>> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;

    // Byte 0x0020_0000 is the first offset whose bit address no longer fits
    // the 24 bit item address field; an unchecked encode would truncate it
    // and the read would answer from byte 0 of the block
    let result = client.db_read(5, 0x0020_0000, 4).await;
    match result {
        Err(Error::AddressOverflow { start, len }) => {
            assert_eq!(start, 0x0020_0000);
            assert_eq!(len, 4);
        }
        other => panic!("expected an address overflow error, got {:?}", other),
    }

    // A span that starts inside the range but ends past it is rejected too
    let result = client.db_write(5, 0x001F_FFFF, &[1, 2, 3, 4]).await;
    match result {
        Err(Error::AddressOverflow { .. }) => {}
        other => panic!("expected an address overflow error, got {:?}", other),
    }

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_device_identification() -> Result<(), Box<dyn std::error::Error>> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut client = S7Client::connect(&options_for(addr)).await?;
    assert_eq!(client.order_number().await?, "6ES7 315-2EH14-0AB0");
    assert_eq!(client.cpu_state().await?, CpuState::Run);
    client.disconnect().await?;

    // A stopped CPU reports its state the same way
    let addr = start_test_server(PlcSimulator::new().with_cpu_stopped()).await?;
    let mut client = S7Client::connect(&options_for(addr)).await?;
    assert_eq!(client.cpu_state().await?, CpuState::Stop);
    client.disconnect().await?;

    Ok(())
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() -> Result<(), Box<dyn std::error::Error>> {
    // Bind and immediately drop a listener to find a free port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut options = options_for(addr);
    options.connect_timeout = Duration::from_millis(500);
    assert!(S7Client::connect(&options).await.is_err());

    Ok(())
}
