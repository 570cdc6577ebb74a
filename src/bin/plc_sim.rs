// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Standalone device simulator for development and testing.
//!
//! Serves the PUT/GET protocol subset on a TCP port and animates a Real
//! value inside a data block so the monitor has something moving to read.
//! The value follows a sine wave around a centre position, like a hydraulic
//! cylinder cycling between its end stops.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::time::{Duration, Instant};
use tokio::time;

use rust_s7_monitor::s7::{PlcSimulator, S7Server};

/// Device simulator serving an animated data block
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Listen address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Listen port (102 needs elevated rights, the default avoids that)
    #[clap(long, default_value = "1102")]
    port: u16,

    /// Data block number to serve
    #[clap(long, default_value = "5")]
    db: u16,

    /// Size of the data block in bytes
    #[clap(long, default_value = "128")]
    size: usize,

    /// Byte offset of the animated Real value
    #[clap(long, default_value = "124")]
    offset: usize,

    /// Centre position of the animated value
    #[clap(long, default_value = "250.0")]
    centre: f32,

    /// Amplitude of the movement
    #[clap(long, default_value = "120.0")]
    amplitude: f32,

    /// Period of one full movement cycle in seconds
    #[clap(long, default_value = "20.0")]
    period: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    if args.offset + 4 > args.size {
        eprintln!(
            "Error: offset {} does not leave room for a Real in a {} byte block",
            args.offset, args.size
        );
        std::process::exit(1);
    }
    if args.period <= 0.0 {
        eprintln!("Error: period must be positive");
        std::process::exit(1);
    }

    let simulator = PlcSimulator::new();
    simulator.insert_data_block(args.db, vec![0u8; args.size]);

    // animate the value so monitoring shows movement
    let updater = simulator.clone();
    let db = args.db;
    let offset = args.offset;
    let centre = args.centre;
    let amplitude = args.amplitude;
    let period = args.period;
    tokio::spawn(async move {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed().as_secs_f32();
            let phase = elapsed / period * std::f32::consts::TAU;
            let position = centre + amplitude * phase.sin();
            updater.patch(db, offset, &position.to_be_bytes());
            time::sleep(Duration::from_millis(100)).await;
        }
    });

    let listen = format!("{}:{}", args.address, args.port);
    let server = S7Server::bind(&listen, simulator).await?;
    info!(
        "Simulator listening on {} serving DB{} ({} bytes, Real at offset {})",
        server.local_addr()?,
        args.db,
        args.size,
        args.offset
    );
    server.serve().await?;
    Ok(())
}
