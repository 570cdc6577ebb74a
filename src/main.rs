// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the S7 data block monitor

use anyhow::{bail, Context, Result};
use chrono::SecondsFormat;
use clap::Parser;
use log::info;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::signal;
use tokio::time;

use rust_s7_monitor::acquisition::read_points_with_retry;
use rust_s7_monitor::config::{self, Config};
use rust_s7_monitor::daemon::Daemon;
use rust_s7_monitor::s7::{frame, S7Client};
use rust_s7_monitor::values::{self, Value, ValueKind};

/// Data block reader and monitor for S7 family controllers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device IP address or hostname
    #[arg(long)]
    ip: Option<String>,

    /// Rack number of the CPU
    #[arg(long)]
    rack: Option<u16>,

    /// Slot number of the CPU
    #[arg(long)]
    slot: Option<u16>,

    /// Data block number to read
    #[arg(long)]
    db: Option<u16>,

    /// Byte offset of the first configured point
    #[arg(long)]
    offset: Option<u32>,

    /// Poll interval in milliseconds
    #[arg(long)]
    interval: Option<u64>,

    /// Stop monitoring after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Record values to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Read every configured point once and exit
    #[arg(long)]
    once: bool,

    /// Scan a byte offset range (START..END, end exclusive) and print raw data
    #[arg(long, value_name = "RANGE")]
    scan: Option<String>,

    /// Write a value to the first configured point and read it back
    #[arg(long, value_name = "VALUE")]
    write: Option<String>,

    /// Run connection diagnostics and exit
    #[arg(long)]
    probe: bool,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    // Check if --show-config-schema flag is set
    if args.show_config_schema {
        return config::output_config_schema();
    }

    // Load configuration
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    // Apply command line overrides
    config.apply_args(
        args.ip.clone(),
        args.rack,
        args.slot,
        args.db,
        args.offset,
        args.interval,
        args.duration,
        args.csv.clone(),
    )?;

    if args.probe {
        return run_probe(&config).await;
    }
    if let Some(range) = args.scan.as_deref() {
        return run_scan(&config, range).await;
    }
    if let Some(literal) = args.write.as_deref() {
        return run_write(&config, literal).await;
    }
    if args.once {
        return run_once(&config).await;
    }
    run_monitor(&config).await
}

/// Read every configured point a single time and print the values
async fn run_once(config: &Config) -> Result<()> {
    let acq = &config.acquisition;
    let mut client = S7Client::connect(&config.plc.connect_options())
        .await
        .with_context(|| format!("Failed to connect to {}", config.plc.address))?;

    let reading = read_points_with_retry(&mut client, acq).await?;
    if let Some((_, sample)) = reading.iter().next() {
        println!(
            "Read at {}",
            sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
    for (name, sample) in reading.iter() {
        let unit = acq
            .points
            .iter()
            .find(|point| &point.name == name)
            .and_then(|point| point.unit.as_deref())
            .unwrap_or("");
        if unit.is_empty() {
            println!("{} = {}", name, sample.value);
        } else {
            println!("{} = {} {}", name, sample.value, unit);
        }
    }

    client.disconnect().await?;
    Ok(())
}

/// Scan a byte offset range of the configured data block.
///
/// Prints the raw bytes of every 4-byte-aligned offset in the range along
/// with their Real interpretation. Useful when the block layout is unknown
/// and an expected value has to be located by eye.
async fn run_scan(config: &Config, range: &str) -> Result<()> {
    let (start, end) = parse_scan_range(range)?;
    let db = config.acquisition.db_number;

    let mut client = S7Client::connect(&config.plc.connect_options())
        .await
        .with_context(|| format!("Failed to connect to {}", config.plc.address))?;
    println!(
        "Scanning DB{} offsets {}..{} on {}",
        db, start, end, config.plc.address
    );

    // first 4-byte-aligned offset inside the range
    let mut offset = start + (4 - start % 4) % 4;
    let mut scanned = 0u32;
    while offset + 4 <= end {
        match client.db_read(db, offset, 4).await {
            Ok(data) => match values::decode(ValueKind::Real, &data, 0, 0) {
                Ok(value) => println!(
                    "DB{}.DBD{:<6} {}  real: {}",
                    db,
                    offset,
                    hex_string(&data),
                    value
                ),
                Err(_) => println!("DB{}.DBD{:<6} {}", db, offset, hex_string(&data)),
            },
            Err(e) => println!("DB{}.DBD{:<6} read failed: {}", db, offset, e),
        }
        offset += 4;
        scanned += 1;
    }

    client.disconnect().await?;
    println!("Scanned {} offsets", scanned);
    Ok(())
}

/// Write a command line literal to the first configured point, then read it
/// back for verification.
async fn run_write(config: &Config, literal: &str) -> Result<()> {
    let acq = &config.acquisition;
    let point = acq.points.first().context("No points configured")?;
    let value = Value::parse_as(point.kind, literal)?;

    let mut client = S7Client::connect(&config.plc.connect_options())
        .await
        .with_context(|| format!("Failed to connect to {}", config.plc.address))?;

    let data = if point.kind == ValueKind::Bool {
        // read-modify-write keeps the other bits of the byte intact
        let current = client.db_read(acq.db_number, point.offset, 1).await?;
        let mask = 1u8 << point.bit;
        let byte = if matches!(value, Value::Bool(true)) {
            current[0] | mask
        } else {
            current[0] & !mask
        };
        vec![byte]
    } else {
        value.encode()
    };

    client
        .db_write(acq.db_number, point.offset, &data)
        .await
        .with_context(|| {
            format!(
                "Failed to write DB{} offset {}",
                acq.db_number, point.offset
            )
        })?;
    println!(
        "Wrote {} = {} to DB{} offset {}",
        point.name, value, acq.db_number, point.offset
    );

    let raw = client
        .db_read(acq.db_number, point.offset, point.kind.size())
        .await?;
    let read_back = values::decode(point.kind, &raw, 0, point.bit)?;
    if read_back == value {
        println!("Read back {} (verified)", read_back);
    } else {
        println!("Read back {} (differs from the written value)", read_back);
    }

    client.disconnect().await?;
    Ok(())
}

/// Connection diagnostics.
///
/// Walks through the checks an operator runs when a device does not answer:
/// plain TCP reachability, protocol connection with the configured rack and
/// slot, device identity and a test read of the configured data block. Each
/// failure prints the usual causes.
async fn run_probe(config: &Config) -> Result<()> {
    let plc = &config.plc;
    let acq = &config.acquisition;
    println!(
        "Connection diagnostics for {}:{} (rack {}, slot {})",
        plc.address, plc.port, plc.rack, plc.slot
    );

    println!("1. Checking TCP reachability...");
    let connect_timeout = Duration::from_millis(plc.connect_timeout_ms);
    let reached = time::timeout(
        connect_timeout,
        TcpStream::connect((plc.address.as_str(), plc.port)),
    )
    .await;
    match reached {
        Ok(Ok(_stream)) => println!("   OK: port {} is reachable", plc.port),
        Ok(Err(e)) => {
            println!("   FAILED: {}", e);
            println!("   Check that the device address is correct, the network");
            println!("   is up and no firewall blocks port {}.", plc.port);
            bail!("Device is not reachable");
        }
        Err(_) => {
            println!("   FAILED: no answer within {:?}", connect_timeout);
            println!("   Check that the device address is correct, the network");
            println!("   is up and no firewall blocks port {}.", plc.port);
            bail!("Device is not reachable");
        }
    }

    println!("2. Connecting with rack {} slot {}...", plc.rack, plc.slot);
    let mut client = match S7Client::connect(&plc.connect_options()).await {
        Ok(client) => {
            println!("   OK: connection established");
            client
        }
        Err(e) => {
            println!("   FAILED: {}", e);
            println!("   A refused connection usually means a wrong rack/slot");
            println!("   combination or remote PUT/GET access being disabled.");
            bail!("Connection setup failed");
        }
    };

    println!(
        "3. Negotiated PDU length: {} bytes",
        client.negotiated_pdu_length()
    );

    // not every firmware answers the identification requests
    println!("4. Reading device information...");
    match client.order_number().await {
        Ok(order) => println!("   Order number: {}", order),
        Err(e) => println!("   Order number unavailable: {}", e),
    }
    match client.cpu_state().await {
        Ok(state) => println!("   CPU state: {}", state),
        Err(e) => println!("   CPU state unavailable: {}", e),
    }

    println!("5. Reading DB{} data...", acq.db_number);
    match client.db_read(acq.db_number, 0, 10).await {
        Ok(head) => println!(
            "   DB{} first 10 bytes: {}",
            acq.db_number,
            hex_string(&head)
        ),
        Err(e) => {
            println!("   FAILED: {}", e);
            println!(
                "   Check that DB{} exists, is not an optimized block and",
                acq.db_number
            );
            println!("   that PUT/GET communication access is enabled on the CPU.");
        }
    }
    if let Some(point) = acq.points.first() {
        match client
            .db_read(acq.db_number, point.offset, point.kind.size())
            .await
        {
            Ok(data) => {
                let shown = match values::decode(point.kind, &data, 0, point.bit) {
                    Ok(value) => match point.unit.as_deref() {
                        Some(unit) if !unit.is_empty() => format!("{} {}", value, unit),
                        _ => format!("{}", value),
                    },
                    Err(e) => format!("undecodable: {}", e),
                };
                println!(
                    "   {} at DB{} offset {}: {} = {}",
                    point.name,
                    acq.db_number,
                    point.offset,
                    hex_string(&data),
                    shown
                );
            }
            Err(e) => println!("   Reading {} failed: {}", point.name, e),
        }
    }

    client.disconnect().await?;
    println!("Diagnostics finished");
    Ok(())
}

/// Continuous monitoring through the daemon until Ctrl-C or the configured
/// duration ends it.
async fn run_monitor(config: &Config) -> Result<()> {
    info!("Starting in daemon mode");
    let mut daemon = Daemon::new();
    daemon.launch(config).await?;

    // The monitor clears the flag itself when a configured duration
    // elapses, so wait for either the signal or the flag.
    let running = daemon.get_running();
    let finished = async {
        while running.load(Ordering::SeqCst) {
            time::sleep(Duration::from_millis(200)).await;
        }
    };
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal, terminating daemon"),
                Err(err) => eprintln!("Error waiting for shutdown signal: {}", err),
            }
        }
        _ = finished => {
            info!("Monitoring finished, terminating daemon");
        }
    }

    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}

/// Parse a byte range given as `START..END` with an exclusive end
fn parse_scan_range(range: &str) -> Result<(u32, u32)> {
    let (start, end) = range
        .split_once("..")
        .with_context(|| format!("Invalid scan range {:?}, expected START..END", range))?;
    let start: u32 = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid scan range start {:?}", start))?;
    let end: u32 = end
        .trim()
        .parse()
        .with_context(|| format!("Invalid scan range end {:?}", end))?;
    if start >= end {
        bail!("Scan range {}..{} is empty", start, end);
    }
    if end > frame::ADDRESS_LIMIT {
        bail!(
            "Scan range end {} exceeds the addressable data block size",
            end
        );
    }
    Ok((start, end))
}

fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_range() {
        assert_eq!(parse_scan_range("100..132").unwrap(), (100, 132));
        assert_eq!(parse_scan_range(" 0 .. 16 ").unwrap(), (0, 16));
        assert!(parse_scan_range("132..100").is_err());
        assert!(parse_scan_range("100").is_err());
        assert!(parse_scan_range("a..b").is_err());
        // 2097152 is the exclusive end of the addressable range
        assert!(parse_scan_range("2097144..2097152").is_ok());
        assert!(parse_scan_range("2097144..2097153").is_err());
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x41, 0x20, 0x00, 0x00]), "41 20 00 00");
        assert_eq!(hex_string(&[]), "");
    }
}
