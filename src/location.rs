//! Current-position tracking and the phone-clock-sync gate.
//!
//! Mirrors `update_location`/`ntp()` in the original's `dot11hunter.py`: a
//! connected phone pushes `{latitude, longitude, timestamp}` frames over
//! Bluetooth RFCOMM, and the sensor either trusts NTP or falls back to the
//! phone's clock before it is allowed to start sniffing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf};
use tokio::process::Command;

use crate::frame::GeoFix;

type BtWriter = WriteHalf<bluer::rfcomm::Stream>;

/// How far a phone-reported clock may drift from ours before we shell out to
/// correct it, matching the original's `abs(ts_phone - time.time()) > 10`.
const CLOCK_DRIFT_TOLERANCE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct PhoneFix {
    latitude: f64,
    longitude: f64,
    /// Milliseconds since epoch, per spec.md §4.2.
    timestamp: i64,
}

pub struct LocationTracker {
    current: Mutex<Option<GeoFix>>,
    time_synchronized: AtomicBool,
    /// Connected phones, used by `telemetry::StatusPush` to broadcast status
    /// lines back down the same channel they sent geo fixes on.
    connections: Mutex<Vec<BtWriter>>,
}

impl LocationTracker {
    pub fn new() -> Self {
        LocationTracker {
            current: Mutex::new(None),
            time_synchronized: AtomicBool::new(false),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Sends `payload` (plus a trailing newline) to every connected phone,
    /// dropping any writer whose connection has gone away.
    pub async fn broadcast(&self, payload: &[u8]) {
        let writers = {
            let mut guard = self.connections.lock().expect("location tracker poisoned");
            std::mem::take(&mut *guard)
        };
        let mut alive = Vec::with_capacity(writers.len());
        for mut w in writers {
            if w.write_all(payload).await.is_ok() && w.write_all(b"\n").await.is_ok() {
                alive.push(w);
            }
        }
        *self.connections.lock().expect("location tracker poisoned") = alive;
    }

    /// Returns the current fix iff it is still within the freshness window.
    pub fn current_geo(&self) -> Option<GeoFix> {
        let guard = self.current.lock().expect("location tracker poisoned");
        guard.filter(|fix| fix.is_fresh(Instant::now()))
    }

    pub fn is_time_synchronized(&self) -> bool {
        self.time_synchronized.load(Ordering::Acquire)
    }

    fn update_fix(&self, latitude: f64, longitude: f64) {
        let mut guard = self.current.lock().expect("location tracker poisoned");
        *guard = Some(GeoFix {
            latitude,
            longitude,
            timestamp: Instant::now(),
        });
    }

    /// One line of phone telemetry. Updates the fix unconditionally, then
    /// reconciles the system clock against the phone's reported timestamp.
    async fn handle_phone_line(&self, line: &str, ntp_command: &str) -> Result<()> {
        let fix: PhoneFix = serde_json::from_str(line).context("invalid phone geo frame")?;
        self.update_fix(fix.latitude, fix.longitude);

        let local_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let drift = Duration::from_millis(local_ms.abs_diff(fix.timestamp));

        if drift > CLOCK_DRIFT_TOLERANCE {
            self.set_system_clock(fix.timestamp).await?;
            self.time_synchronized.store(true, Ordering::Release);
        } else if !self.is_time_synchronized() {
            self.time_synchronized.store(true, Ordering::Release);
        }
        let _ = ntp_command;
        Ok(())
    }

    async fn set_system_clock(&self, epoch_ms: i64) -> Result<()> {
        let secs = epoch_ms / 1000;
        let status = Command::new("date")
            .arg("-s")
            .arg(format!("@{secs}"))
            .status()
            .await
            .context("failed to invoke `date -s`")?;
        if !status.success() {
            log::warn!("`date -s` exited with {status}");
        }
        Ok(())
    }

    /// Run the one-shot startup NTP sync. Failure is logged, not fatal — the
    /// sniffer gate also accepts a phone-confirmed clock.
    pub async fn run_ntp_sync(&self, ntp_command: &str) -> bool {
        let result = Command::new(ntp_command)
            .arg("ntp1.aliyun.com")
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {
                self.time_synchronized.store(true, Ordering::Release);
                true
            }
            Ok(status) => {
                log::warn!("{ntp_command} exited with {status}");
                false
            }
            Err(e) => {
                log::warn!("failed to invoke {ntp_command}: {e}");
                false
            }
        }
    }

    /// Serve the short-range geo-fix channel: accepts RFCOMM connections
    /// advertising `uuid`, reading newline-delimited JSON frames from each.
    pub async fn serve_bluetooth(
        self: std::sync::Arc<Self>,
        uuid: uuid::Uuid,
        ntp_command: String,
        running: std::sync::Arc<AtomicBool>,
    ) -> Result<()> {
        let session = bluer::Session::new().await.context("failed to open bluetooth session")?;
        let profile = bluer::rfcomm::Profile {
            uuid,
            name: Some("dot11sentinel-geo".to_string()),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let mut handle = session
            .register_profile(profile)
            .await
            .context("failed to register rfcomm profile")?;

        while running.load(Ordering::Acquire) {
            let req = match handle.next().await {
                Some(req) => req,
                None => break,
            };
            let stream = req.accept().context("failed to accept rfcomm connection")?;
            let (read_half, write_half) = tokio::io::split(stream);
            self.connections
                .lock()
                .expect("location tracker poisoned")
                .push(write_half);

            let tracker = self.clone();
            let ntp_command = ntp_command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if let Err(e) = tracker.handle_phone_line(&line, &ntp_command).await {
                                log::warn!("discarding malformed phone geo frame: {e}");
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("bluetooth geo stream error: {e}");
                            break;
                        }
                    }
                }
            });
        }
        Ok(())
    }
}

impl Default for LocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn phone_line_updates_fix_and_confirms_sync_within_tolerance() {
        let tracker = LocationTracker::new();
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let line = format!(r#"{{"latitude":1.5,"longitude":2.5,"timestamp":{now_ms}}}"#);
        tracker.handle_phone_line(&line, "ntpdate").await.unwrap();
        assert!(tracker.current_geo().is_some());
        assert!(tracker.is_time_synchronized());
    }

    #[test]
    fn stale_fix_is_not_returned() {
        let tracker = LocationTracker::new();
        tracker.update_fix(1.0, 2.0);
        {
            let mut guard = tracker.current.lock().unwrap();
            if let Some(fix) = guard.as_mut() {
                fix.timestamp = Instant::now() - Duration::from_secs(20);
            }
        }
        assert!(tracker.current_geo().is_none());
    }
}
