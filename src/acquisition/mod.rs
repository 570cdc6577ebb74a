// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data acquisition from the device
//!
//! This module reads the configured points out of the polled data block,
//! retries transient failures, and drives the continuous monitor with its
//! statistics and CSV recording.
//!
//! ## Components
//!
//! * [`monitor`] - the polling loop used by daemon mode
//! * [`recorder`] - append-only CSV recording
//! * [`stats`] - running statistics, change detection and history

pub mod monitor;
pub mod recorder;
pub mod stats;

pub use monitor::{Monitor, MonitorTotals};
pub use recorder::CsvRecorder;
pub use stats::{ChangeDetector, History, RunningStats};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use std::time::Duration;
use tokio::time;

use crate::config::{AcquisitionConfig, PointConfig};
use crate::s7::S7Client;
use crate::values::{self, Value};

/// One decoded value with its capture time
#[derive(Debug, Clone)]
pub struct Sample {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// All samples of one poll tick, in configuration order
#[derive(Debug, Clone)]
pub struct Reading {
    samples: Vec<(String, Sample)>,
}

impl Reading {
    /// Sample of a named point, if it was part of this tick
    pub fn get(&self, name: &str) -> Option<&Sample> {
        self.samples
            .iter()
            .find(|(point, _)| point == name)
            .map(|(_, sample)| sample)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Sample)> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Smallest byte span of the data block covering every configured point
pub fn covering_span(points: &[PointConfig]) -> Result<(u32, usize)> {
    let first = points.first().context("no points configured")?;
    let mut start = first.offset;
    let mut end = first.end();
    for point in &points[1..] {
        start = start.min(point.offset);
        end = end.max(point.end());
    }
    Ok((start, (end - start) as usize))
}

/// Fetch the covering span once and decode every configured point.
///
/// All points share a single read request, so one tick observes one
/// consistent snapshot of the block. A failed fetch or a failed decode
/// fails the whole tick.
pub async fn read_points_once(
    client: &mut S7Client,
    acq: &AcquisitionConfig,
) -> Result<Reading> {
    let (start, size) = covering_span(&acq.points)?;
    let image = client
        .db_read(acq.db_number, start, size)
        .await
        .with_context(|| {
            format!(
                "reading DB{} bytes {}..{}",
                acq.db_number,
                start,
                start as usize + size
            )
        })?;
    let timestamp = Utc::now();
    let mut samples = Vec::with_capacity(acq.points.len());
    for point in &acq.points {
        let offset = (point.offset - start) as usize;
        let value = values::decode(point.kind, &image, offset, point.bit)
            .with_context(|| format!("decoding point {}", point.name))?;
        samples.push((point.name.clone(), Sample { value, timestamp }));
    }
    Ok(Reading { samples })
}

/// Bounded retry around [`read_points_once`].
///
/// Makes up to `max_retries` attempts with a fixed delay in between and
/// surfaces the last error when every attempt fails.
pub async fn read_points_with_retry(
    client: &mut S7Client,
    acq: &AcquisitionConfig,
) -> Result<Reading> {
    let delay = Duration::from_millis(acq.retry_delay_ms);
    let mut last_error = None;
    for attempt in 1..=acq.max_retries {
        match read_points_once(client, acq).await {
            Ok(reading) => return Ok(reading),
            Err(e) => {
                warn!("Read attempt {}/{} failed: {:#}", attempt, acq.max_retries, e);
                last_error = Some(e);
                if attempt < acq.max_retries {
                    time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no read attempts were made")))
}

/// Check a sample against the configured plausibility range.
///
/// Returns false and logs a warning when the value falls outside; a bound
/// that is not configured does not constrain anything.
pub fn check_range(name: &str, value: f64, acq: &AcquisitionConfig) -> bool {
    let below = acq.range_min.is_some_and(|min| value < min);
    let above = acq.range_max.is_some_and(|max| value > max);
    if below || above {
        warn!(
            "{} = {} is outside the plausible range {:?}..{:?}",
            name, value, acq.range_min, acq.range_max
        );
        return false;
    }
    true
}
