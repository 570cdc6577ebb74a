// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the acquisition layer against the device simulator
//!
//! Covers single reads over the covering span, the bounded retry helper,
//! and the continuous monitor loop: polling, CSV recording, cooperative
//! stop, the configured duration and recovery from device failures.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::tempdir;
use tokio::time;

use rust_s7_monitor::acquisition::{read_points_once, read_points_with_retry, Monitor};
use rust_s7_monitor::config::{Config, PointConfig};
use rust_s7_monitor::s7::{ConnectOptions, PlcSimulator, S7Client, S7Server};
use rust_s7_monitor::values::{Value, ValueKind};

/// Test utility function to start a simulator in the background
async fn start_test_server(simulator: PlcSimulator) -> Result<SocketAddr> {
    let server = S7Server::bind("127.0.0.1:0", simulator).await?;
    let socket_addr = server.local_addr()?;
    println!("Test server started on: {}", socket_addr);

    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(100)).await;

    Ok(socket_addr)
}

/// Configuration pointing at the test simulator, polling fast
fn test_config(addr: SocketAddr) -> Config {
    let mut config = Config::default();
    config.plc.address = "127.0.0.1".to_string();
    config.plc.port = addr.port();
    config.acquisition.interval_ms = 50;
    config.acquisition.retry_delay_ms = 50;
    config
}

fn options_for(addr: SocketAddr) -> ConnectOptions {
    let mut options = ConnectOptions::new("127.0.0.1");
    options.port = addr.port();
    options
}

#[tokio::test]
async fn test_read_points_once() -> Result<()> {
    let addr = start_test_server(PlcSimulator::new()).await?;
    let config = test_config(addr);

    let mut client = S7Client::connect(&options_for(addr)).await?;
    let reading = read_points_once(&mut client, &config.acquisition).await?;

    assert_eq!(reading.len(), 1);
    let sample = reading.get("right_encoder").unwrap();
    assert_eq!(sample.value, Value::Real(10.0));

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_read_points_once_covers_multiple_points() -> Result<()> {
    let simulator = PlcSimulator::new();
    // a second encoder value right before the first one
    assert!(simulator.patch(5, 120, &3.5f32.to_be_bytes()));
    let addr = start_test_server(simulator).await?;

    let mut config = test_config(addr);
    config.acquisition.points.push(PointConfig {
        name: "left_encoder".to_string(),
        offset: 120,
        bit: 0,
        kind: ValueKind::Real,
        unit: Some("mm".to_string()),
    });

    let mut client = S7Client::connect(&options_for(addr)).await?;
    let reading = read_points_once(&mut client, &config.acquisition).await?;

    assert_eq!(reading.len(), 2);
    assert_eq!(
        reading.get("right_encoder").unwrap().value,
        Value::Real(10.0)
    );
    assert_eq!(reading.get("left_encoder").unwrap().value, Value::Real(3.5));

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces_last_error() -> Result<()> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let mut config = test_config(addr);
    config.acquisition.db_number = 99;
    config.acquisition.max_retries = 2;
    config.acquisition.retry_delay_ms = 50;

    let mut client = S7Client::connect(&options_for(addr)).await?;
    let started = Instant::now();
    let result = read_points_with_retry(&mut client, &config.acquisition).await;

    assert!(result.is_err());
    // two attempts with one delay in between
    assert!(started.elapsed() >= Duration::from_millis(50));

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() -> Result<()> {
    let simulator = PlcSimulator::new();
    simulator.remove_data_block(5);
    let addr = start_test_server(simulator.clone()).await?;

    let mut config = test_config(addr);
    config.acquisition.max_retries = 3;
    config.acquisition.retry_delay_ms = 100;

    // heal the device while the retry helper waits between attempts
    let healer = simulator.clone();
    tokio::spawn(async move {
        time::sleep(Duration::from_millis(50)).await;
        let mut image = vec![0u8; 128];
        image[124..128].copy_from_slice(&10.0f32.to_be_bytes());
        healer.insert_data_block(5, image);
    });

    let mut client = S7Client::connect(&options_for(addr)).await?;
    let reading = read_points_with_retry(&mut client, &config.acquisition).await?;
    assert_eq!(
        reading.get("right_encoder").unwrap().value,
        Value::Real(10.0)
    );

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_monitor_runs_for_duration_and_records() -> Result<()> {
    let addr = start_test_server(PlcSimulator::new()).await?;

    let temp_dir = tempdir()?;
    let csv_path = temp_dir.path().join("encoder.csv");

    let mut config = test_config(addr);
    config.acquisition.duration_s = Some(1);
    config.recording.enabled = true;
    config.recording.path = csv_path.to_string_lossy().to_string();

    let running = Arc::new(AtomicBool::new(true));
    let monitor = Monitor::new(&config, running.clone());
    let totals = monitor.run().await?;

    assert!(totals.reads >= 5, "expected several polls, got {:?}", totals);
    assert_eq!(totals.failures(), 0);
    assert_eq!(totals.success_rate(), 100.0);
    // a finished run clears the shared flag
    assert!(!running.load(Ordering::SeqCst));

    let contents = std::fs::read_to_string(&csv_path)?;
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("timestamp,right_encoder"));
    let rows: Vec<&str> = lines.collect();
    assert!(rows.len() >= 5);
    assert!(rows.iter().all(|row| row.ends_with(",10.000")));

    Ok(())
}

#[tokio::test]
async fn test_monitor_stops_on_flag() -> Result<()> {
    let addr = start_test_server(PlcSimulator::new()).await?;
    let config = test_config(addr);

    let running = Arc::new(AtomicBool::new(true));
    let monitor = Monitor::new(&config, running.clone());
    let handle = tokio::spawn(monitor.run());

    time::sleep(Duration::from_millis(300)).await;
    running.store(false, Ordering::SeqCst);

    let totals = time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor did not stop")??;
    assert!(totals.reads >= 1);

    Ok(())
}

#[tokio::test]
async fn test_monitor_recovers_after_failures() -> Result<()> {
    let simulator = PlcSimulator::new();
    let addr = start_test_server(simulator.clone()).await?;

    let temp_dir = tempdir()?;
    let csv_path = temp_dir.path().join("recovery.csv");

    let mut config = test_config(addr);
    config.recording.enabled = true;
    config.recording.path = csv_path.to_string_lossy().to_string();

    let running = Arc::new(AtomicBool::new(true));
    let monitor = Monitor::new(&config, running.clone());
    let handle = tokio::spawn(monitor.run());

    // healthy phase
    time::sleep(Duration::from_millis(300)).await;

    // the data block disappears, every poll now fails
    simulator.remove_data_block(5);
    time::sleep(Duration::from_millis(300)).await;

    // the block comes back with a new position value
    let mut image = vec![0u8; 128];
    image[124..128].copy_from_slice(&20.0f32.to_be_bytes());
    simulator.insert_data_block(5, image);
    time::sleep(Duration::from_millis(300)).await;

    running.store(false, Ordering::SeqCst);
    let totals = time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor did not stop")??;

    assert!(
        totals.failures() >= 1,
        "expected failed polls, got {:?}",
        totals
    );
    assert!(
        totals.successes >= 2,
        "expected successful polls, got {:?}",
        totals
    );

    // the recording shows values from before and after the outage
    let contents = std::fs::read_to_string(&csv_path)?;
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], "timestamp,right_encoder");
    assert!(lines.iter().any(|line| line.ends_with(",10.000")));
    assert!(lines.last().unwrap().ends_with(",20.000"));

    Ok(())
}
