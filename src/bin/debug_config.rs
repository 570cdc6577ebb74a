// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Debug helper for configuration file validation
use anyhow::Result;
use clap::Parser;
use rust_s7_monitor::config::Config;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(author, version, about = "Check a configuration file for errors", long_about = None)]
struct Args {
    /// Input file path (.yaml)
    ///
    /// The path where the configuration file is located.
    /// Should be .yaml or .yml format.
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    input: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Check if input file exists
    if !Path::new(&args.input).exists() {
        eprintln!(
            "Error: Input file '{}' does not exist",
            args.input.display()
        );
        std::process::exit(1);
    }

    let path = args.input.as_path();

    println!("Testing file: {:?}", path);

    match Config::from_file(path) {
        Ok(config) => {
            println!("Validation succeeded for file: {:?}", path);
            println!(
                "Device: {}:{} (rack {}, slot {})",
                config.plc.address, config.plc.port, config.plc.rack, config.plc.slot
            );
            println!(
                "Polling DB{} every {}ms, {} point(s) configured:",
                config.acquisition.db_number,
                config.acquisition.interval_ms,
                config.acquisition.points.len()
            );
            for point in &config.acquisition.points {
                println!(
                    "  {} at offset {} ({})",
                    point.name, point.offset, point.kind
                );
            }
        }
        Err(e) => println!("Validation failed: {:#}", e),
    }

    Ok(())
}
