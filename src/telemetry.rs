//! Periodic status push over the Bluetooth geo channel: latest mac/ssid/
//! association sightings plus CPU/mem/temperature, matching the original's
//! `send_latest_captures_sys_status`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use sysinfo::{Components, System};

use crate::location::LocationTracker;

/// Sightings older than this are not worth reporting to a connected phone.
const FRESHNESS_WINDOW_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct StatusReport {
    cpu_percent: f32,
    mem_used_bytes: u64,
    mem_total_bytes: u64,
    temperature: Option<f32>,
    latest_mac: Option<String>,
    latest_ssid: Option<String>,
    latest_association: Option<(i64, i64)>,
    mac_count: i64,
    ap_count: i64,
    geo_count: i64,
    association_count: i64,
}

pub struct StatusPush {
    db_path: String,
    interval: Duration,
}

impl StatusPush {
    pub fn new(db_path: String, interval: Duration) -> Self {
        StatusPush { db_path, interval }
    }

    pub async fn run(&self, location: Arc<LocationTracker>, running: Arc<AtomicBool>) {
        let mut system = System::new_all();
        let conn = match Connection::open(&self.db_path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("status push could not open store at {}: {e}", self.db_path);
                return;
            }
        };

        while running.load(Ordering::Acquire) {
            system.refresh_cpu_usage();
            system.refresh_memory();

            match self.collect(&conn, &system) {
                Ok(report) => match serde_json::to_vec(&report) {
                    Ok(payload) => location.broadcast(&payload).await,
                    Err(e) => log::error!("failed to serialize status report: {e}"),
                },
                Err(e) => log::error!("failed to collect status report: {e}"),
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    fn collect(&self, conn: &Connection, system: &System) -> Result<StatusReport> {
        let cpu_percent = system.global_cpu_usage();
        let mem_used_bytes = system.used_memory();
        let mem_total_bytes = system.total_memory();

        let latest_mac: Option<String> = conn
            .query_row(
                "SELECT printf('%012X', addr) FROM mac WHERE (strftime('%s','now') - strftime('%s', last_seen)) < ?1 ORDER BY last_seen DESC LIMIT 1",
                [FRESHNESS_WINDOW_SECS],
                |r| r.get(0),
            )
            .optional_or_none();

        let latest_ssid: Option<String> = conn
            .query_row(
                "SELECT ssid FROM ap WHERE (strftime('%s','now') - strftime('%s', last_seen)) < ?1 ORDER BY last_seen DESC LIMIT 1",
                [FRESHNESS_WINDOW_SECS],
                |r| r.get(0),
            )
            .optional_or_none();

        let latest_association: Option<(i64, i64)> = conn
            .query_row(
                "SELECT mac_id, ap_id FROM association WHERE (strftime('%s','now') - strftime('%s', last_seen)) < ?1 ORDER BY last_seen DESC LIMIT 1",
                [FRESHNESS_WINDOW_SECS],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional_or_none();

        let mac_count = count_rows(conn, "mac");
        let ap_count = count_rows(conn, "ap");
        let geo_count = count_rows(conn, "geo");
        let association_count = count_rows(conn, "association");

        let temperature = Components::new_with_refreshed_list().iter().find_map(|c| c.temperature());

        Ok(StatusReport {
            cpu_percent,
            mem_used_bytes,
            mem_total_bytes,
            temperature,
            latest_mac,
            latest_ssid,
            latest_association,
            mac_count,
            ap_count,
            geo_count,
            association_count,
        })
    }
}

/// `COUNT(*)` against one of the four sighting tables, for the status
/// report's `*_count` fields. A query failure reports zero rather than
/// aborting the whole status push.
fn count_rows(conn: &Connection, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    conn.query_row(&sql, [], |r| r.get(0)).optional_or_none().unwrap_or(0)
}

/// `rusqlite::Result<T>::optional()` collapses `QueryReturnedNoRows` into
/// `None`; this extends that to also swallow any other query error as `None`
/// since a missing telemetry field should never abort the push.
trait OptionalOrNone<T> {
    fn optional_or_none(self) -> Option<T>;
}

impl<T> OptionalOrNone<T> for rusqlite::Result<T> {
    fn optional_or_none(self) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                log::warn!("status query failed: {e}");
                None
            }
        }
    }
}
