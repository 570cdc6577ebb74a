// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Append-only CSV recording of polled values

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::Reading;

/// Appends one CSV row per successful poll.
///
/// The header row is written when the file is created or empty so restarts
/// keep appending to an existing record instead of truncating it.
pub struct CsvRecorder {
    file: File,
    path: PathBuf,
}

impl CsvRecorder {
    /// Open the file for appending, writing the header if needed.
    ///
    /// `point_names` become the columns after the leading timestamp, in
    /// configuration order.
    pub fn create<P: AsRef<Path>>(path: P, point_names: &[String]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open recording file at {:?}", path))?;
        let mut recorder = Self { file, path };
        let length = recorder
            .file
            .metadata()
            .with_context(|| format!("Failed to stat recording file at {:?}", recorder.path))?
            .len();
        if length == 0 {
            let mut header = String::from("timestamp");
            for name in point_names {
                header.push(',');
                header.push_str(name);
            }
            recorder.write_line(&header)?;
        }
        Ok(recorder)
    }

    /// Append one tick of samples
    pub fn append(&mut self, reading: &Reading) -> Result<()> {
        let mut row = match reading.iter().next() {
            Some((_, sample)) => sample
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            None => return Ok(()), // nothing to record
        };
        for (_, sample) in reading.iter() {
            row.push(',');
            row.push_str(&sample.value.to_string());
        }
        self.write_line(&row)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{}", line)
            .with_context(|| format!("Failed to write to {:?}", self.path))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Sample;
    use crate::values::Value;
    use chrono::Utc;

    fn reading_with(values: &[(&str, Value)]) -> Reading {
        let timestamp = Utc::now();
        Reading {
            samples: values
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        Sample {
                            value: *value,
                            timestamp,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.csv");
        let names = vec!["right_encoder".to_string()];

        let mut recorder = CsvRecorder::create(&path, &names).unwrap();
        recorder
            .append(&reading_with(&[("right_encoder", Value::Real(10.0))]))
            .unwrap();
        drop(recorder);

        // reopening appends instead of rewriting the header
        let mut recorder = CsvRecorder::create(&path, &names).unwrap();
        recorder
            .append(&reading_with(&[("right_encoder", Value::Real(11.5))]))
            .unwrap();
        drop(recorder);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,right_encoder");
        assert!(lines[1].ends_with(",10.000"));
        assert!(lines[2].ends_with(",11.500"));
    }

    #[test]
    fn test_row_follows_point_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.csv");
        let names = vec!["pressure".to_string(), "encoder".to_string()];

        let mut recorder = CsvRecorder::create(&path, &names).unwrap();
        recorder
            .append(&reading_with(&[
                ("pressure", Value::Word(180)),
                ("encoder", Value::Real(42.5)),
            ]))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp,pressure,encoder");
        assert!(lines[1].ends_with(",180,42.500"));
    }
}
