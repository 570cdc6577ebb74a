// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Continuous monitor loop
//!
//! Polls the configured points on a fixed interval, tracks statistics and
//! changes, records to CSV and rides out read failures by dropping the
//! session and reconnecting on the next tick. The loop stops when the
//! shared running flag is cleared or the configured duration elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::time;

use super::{
    check_range, read_points_once, ChangeDetector, CsvRecorder, History, Reading, RunningStats,
};
use crate::config::{AcquisitionConfig, Config, PlcConfig, RecordingConfig};
use crate::s7::S7Client;

// windowed summary line cadence, in polls
const WINDOW_LOG_EVERY: u64 = 10;

/// Outcome counters of one monitor run
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorTotals {
    pub reads: u64,
    pub successes: u64,
}

impl MonitorTotals {
    pub fn failures(&self) -> u64 {
        self.reads - self.successes
    }

    pub fn success_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            self.successes as f64 / self.reads as f64 * 100.0
        }
    }
}

struct PointTracker {
    name: String,
    unit: String,
    stats: RunningStats,
    detector: ChangeDetector,
    history: History,
}

/// Polls the device until stopped
pub struct Monitor {
    plc: PlcConfig,
    acq: AcquisitionConfig,
    recording: RecordingConfig,
    running: Arc<AtomicBool>,
}

impl Monitor {
    pub fn new(config: &Config, running: Arc<AtomicBool>) -> Self {
        Self {
            plc: config.plc.clone(),
            acq: config.acquisition.clone(),
            recording: config.recording.clone(),
            running,
        }
    }

    /// Run the polling loop.
    ///
    /// Read failures never end the run; they are counted, logged, and the
    /// session is dropped so the next tick reconnects. When the loop ends
    /// it clears the shared running flag so sibling tasks wind down too.
    pub async fn run(self) -> Result<MonitorTotals> {
        let interval_duration = Duration::from_millis(self.acq.interval_ms);
        info!(
            "Monitoring DB{} every {:?} ({} point{})",
            self.acq.db_number,
            interval_duration,
            self.acq.points.len(),
            if self.acq.points.len() == 1 { "" } else { "s" }
        );

        let mut recorder = if self.recording.enabled {
            let names: Vec<String> = self.acq.points.iter().map(|p| p.name.clone()).collect();
            let recorder = CsvRecorder::create(&self.recording.path, &names)?;
            info!("Recording to {:?}", recorder.path());
            Some(recorder)
        } else {
            None
        };

        let mut trackers: Vec<PointTracker> = self
            .acq
            .points
            .iter()
            .map(|point| PointTracker {
                name: point.name.clone(),
                unit: point.unit.clone().unwrap_or_default(),
                stats: RunningStats::new(),
                detector: ChangeDetector::new(self.acq.change_threshold),
                history: History::new(self.acq.history_capacity),
            })
            .collect();

        let started = Instant::now();
        let deadline = self
            .acq
            .duration_s
            .map(|seconds| started + Duration::from_secs(seconds));
        let mut interval = time::interval(interval_duration);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let mut client: Option<S7Client> = None;
        let mut totals = MonitorTotals::default();

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("Monitoring duration elapsed");
                    break;
                }
            }

            // reconnect when the previous tick dropped the session
            if client.is_none() {
                match S7Client::connect(&self.plc.connect_options()).await {
                    Ok(connected) => client = Some(connected),
                    Err(e) => {
                        totals.reads += 1;
                        error!("Connect failed: {}", e);
                        continue;
                    }
                }
            }
            let Some(active) = client.as_mut() else {
                continue;
            };

            totals.reads += 1;
            match read_points_once(active, &self.acq).await {
                Ok(reading) => {
                    totals.successes += 1;
                    self.observe(&reading, &mut trackers, totals.successes);
                    if let Some(recorder) = recorder.as_mut() {
                        if let Err(e) = recorder.append(&reading) {
                            warn!("Recording failed: {:#}", e);
                        }
                    }
                }
                Err(e) => {
                    error!("Poll failed: {:#}", e);
                    // drop the session, the next tick reconnects
                    if let Some(mut broken) = client.take() {
                        let _ = broken.disconnect().await;
                    }
                }
            }
        }

        if let Some(mut active) = client.take() {
            let _ = active.disconnect().await;
        }
        // the monitor ending takes the other daemon tasks with it
        self.running.store(false, Ordering::SeqCst);

        info!(
            "Monitoring ended after {:?}: {} reads, {} ok, success rate {:.1}%",
            started.elapsed(),
            totals.reads,
            totals.successes,
            totals.success_rate()
        );
        for tracker in &trackers {
            if let (Some(min), Some(max), Some(mean)) =
                (tracker.stats.min(), tracker.stats.max(), tracker.stats.mean())
            {
                info!(
                    "{}: n={} min={:.3} max={:.3} mean={:.3} changes={}",
                    tracker.name,
                    tracker.stats.count(),
                    min,
                    max,
                    mean,
                    tracker.detector.changes()
                );
            }
        }
        Ok(totals)
    }

    fn observe(&self, reading: &Reading, trackers: &mut [PointTracker], tick: u64) {
        for tracker in trackers.iter_mut() {
            let Some(sample) = reading.get(&tracker.name) else {
                continue;
            };
            let value = sample.value.as_f64();
            tracker.stats.push(value);
            tracker.history.push(value);
            let changed = tracker.detector.observe(value);
            check_range(&tracker.name, value, &self.acq);

            let marker = if changed { " (changed)" } else { "" };
            if tracker.unit.is_empty() {
                info!("{} = {}{}", tracker.name, sample.value, marker);
            } else {
                info!(
                    "{} = {} {}{}",
                    tracker.name, sample.value, tracker.unit, marker
                );
            }

            if tick % WINDOW_LOG_EVERY == 0 {
                if let Some((min, max, mean)) = tracker.history.window_stats() {
                    debug!(
                        "{} window: n={} min={:.3} max={:.3} mean={:.3}",
                        tracker.name,
                        tracker.history.len(),
                        min,
                        max,
                        mean
                    );
                }
            }
        }
    }
}
