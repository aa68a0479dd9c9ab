//! The `Event`/`Origin` types emitted by parsers and consumed by
//! `EventWorker`s, and the `EventGroup` unit-of-work they travel in.

use chrono::{DateTime, Utc};

use crate::frame::GeoFix;

/// Which frame class produced an observation, replacing the original's
/// string discriminators (`'from_beacon'`, ...) that were interpolated
/// directly into SQL column names. `column_name` is the one place that
/// mapping survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Beacon,
    Mgmt,
    Ctrl,
    Data,
    ProbeReq,
    ProbeResp,
}

impl Origin {
    pub fn column_name(self) -> &'static str {
        match self {
            Origin::Beacon => "from_beacon",
            Origin::Mgmt => "from_mgmt",
            Origin::Ctrl => "from_ctrl",
            Origin::Data => "from_data",
            Origin::ProbeReq => "from_probe_req",
            Origin::ProbeResp => "from_probe_resp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Mac,
    Ssid,
    Geo,
    Association,
}

/// A single observation extracted from a frame. `src`/`dst` are 48-bit MAC
/// integers (`macaddr::MacAddr6` converted via `crate::store::mac_to_u64`).
/// Only `ASSOCIATION` events from anonymous probe requests have `src =
/// None`.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub src: Option<u64>,
    pub dst: Option<u64>,
    /// SSID bytes, stored raw: the wire value may be empty or non-UTF8.
    pub ssid: Option<Vec<u8>>,
    pub geo: Option<GeoFix>,
    pub timestamp: DateTime<Utc>,
    pub origin: Option<Origin>,
}

impl Event {
    pub fn mac(src: u64, origin: Origin, timestamp: DateTime<Utc>) -> Self {
        Event {
            kind: EventKind::Mac,
            src: Some(src),
            dst: None,
            ssid: None,
            geo: None,
            timestamp,
            origin: Some(origin),
        }
    }

    pub fn geo(src: u64, geo: Option<GeoFix>, timestamp: DateTime<Utc>) -> Self {
        Event {
            kind: EventKind::Geo,
            src: Some(src),
            dst: None,
            ssid: None,
            geo,
            timestamp,
            origin: None,
        }
    }

    pub fn ssid(src: Option<u64>, ssid: Vec<u8>, origin: Origin, timestamp: DateTime<Utc>) -> Self {
        Event {
            kind: EventKind::Ssid,
            src,
            dst: None,
            ssid: Some(ssid),
            geo: None,
            timestamp,
            origin: Some(origin),
        }
    }

    pub fn association(
        src: u64,
        dst: Option<u64>,
        ssid: Option<Vec<u8>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Event {
            kind: EventKind::Association,
            src: Some(src),
            dst,
            ssid,
            geo: None,
            timestamp,
            origin: None,
        }
    }
}

/// An ordered list of events from a single observation, processed
/// atomically by one `EventWorker` so that dependency order (MAC before
/// SSID before ASSOCIATION) is preserved.
pub type EventGroup = Vec<Event>;
