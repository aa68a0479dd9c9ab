//! The relational store: `mac`/`ap`/`geo`/`association` tables plus the
//! §4.5/§4.5.1 upsert and STA/AP resolution logic.
//!
//! Each `EventWorker` owns its own `rusqlite::Connection` (SQLite handles
//! are not `Sync`); `Store` wraps one such connection. Origin is recorded by
//! setting the matching `from_*` column to `TRUE`, replacing the original's
//! string-interpolated `UPDATE ... SET {origin} = 1`.

use chrono::{DateTime, Utc};
use macaddr::MacAddr6;
use rusqlite::{params, Connection, OptionalExtension};

use crate::event::Origin;
use crate::frame::GeoFix;
use crate::error::StoreError;

pub fn mac_to_u64(mac: MacAddr6) -> u64 {
    let b = mac.as_bytes();
    u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]])
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Store { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS mac (
                id              INTEGER PRIMARY KEY,
                addr            INTEGER NOT NULL UNIQUE,
                first_seen      TEXT NOT NULL,
                last_seen       TEXT NOT NULL,
                count           INTEGER NOT NULL DEFAULT 0,
                from_beacon     INTEGER NOT NULL DEFAULT 0,
                from_mgmt       INTEGER NOT NULL DEFAULT 0,
                from_ctrl       INTEGER NOT NULL DEFAULT 0,
                from_data       INTEGER NOT NULL DEFAULT 0,
                from_probe_req  INTEGER NOT NULL DEFAULT 0,
                from_probe_resp INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS ap (
                id              INTEGER PRIMARY KEY,
                ssid            BLOB NOT NULL,
                mac_id          INTEGER REFERENCES mac(id),
                first_seen      TEXT NOT NULL,
                last_seen       TEXT NOT NULL,
                count           INTEGER NOT NULL DEFAULT 0,
                from_beacon     INTEGER NOT NULL DEFAULT 0,
                from_mgmt       INTEGER NOT NULL DEFAULT 0,
                from_ctrl       INTEGER NOT NULL DEFAULT 0,
                from_data       INTEGER NOT NULL DEFAULT 0,
                from_probe_req  INTEGER NOT NULL DEFAULT 0,
                from_probe_resp INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS geo (
                id        INTEGER PRIMARY KEY,
                mac_id    INTEGER NOT NULL REFERENCES mac(id),
                latitude  REAL NOT NULL,
                longitude REAL NOT NULL,
                seen      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS association (
                id         INTEGER PRIMARY KEY,
                mac_id     INTEGER NOT NULL REFERENCES mac(id),
                ap_id      INTEGER NOT NULL REFERENCES ap(id),
                first_seen TEXT NOT NULL,
                last_seen  TEXT NOT NULL,
                UNIQUE(mac_id, ap_id)
            );
            ",
        )?;
        Ok(())
    }

    /// Returns the `mac.id` row for `addr`, if any.
    fn mac_id(&self, addr: u64) -> Result<Option<i64>, StoreError> {
        self.conn
            .query_row("SELECT id FROM mac WHERE addr = ?1", params![addr], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)
    }

    pub fn handle_mac(&self, addr: u64, origin: Origin, ts: DateTime<Utc>) -> Result<(), StoreError> {
        let col = origin.column_name();
        match self.mac_id(addr)? {
            None => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO mac (addr, first_seen, last_seen, count, {col}) VALUES (?1, ?2, ?2, 1, 1)"
                    ),
                    params![addr, ts],
                )?;
            }
            Some(id) => {
                self.conn.execute(
                    &format!(
                        "UPDATE mac SET last_seen = ?1, count = count + 1, {col} = 1 WHERE id = ?2"
                    ),
                    params![ts, id],
                )?;
            }
        }
        Ok(())
    }

    fn ap_by_mac(&self, mac_id: i64) -> Result<Option<(i64, Vec<u8>)>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, ssid FROM ap WHERE mac_id = ?1",
                params![mac_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn ap_by_ssid(&self, ssid: &[u8]) -> Result<Option<i64>, StoreError> {
        self.conn
            .query_row("SELECT id FROM ap WHERE ssid = ?1", params![ssid], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)
    }

    /// Known-source branch: the SSID is attributed to the MAC that sent it
    /// (beacon, probe response, ...). Anonymous branch (`src = None`, always
    /// a probe request): matched by SSID text alone since there is no MAC to
    /// attach it to.
    pub fn handle_ssid(
        &self,
        src: Option<u64>,
        ssid: &[u8],
        origin: Origin,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let col = origin.column_name();
        match src {
            Some(addr) => {
                let mac_id = self.mac_id(addr)?;
                match self.ap_by_mac(mac_id.unwrap_or(-1))? {
                    Some((ap_id, existing_ssid)) if existing_ssid == ssid => {
                        self.conn.execute(
                            &format!("UPDATE ap SET last_seen = ?1, count = count + 1, {col} = 1 WHERE id = ?2"),
                            params![ts, ap_id],
                        )?;
                    }
                    _ => {
                        let Some(mac_id) = mac_id else {
                            if origin == Origin::Beacon {
                                return Err(StoreError::InvariantViolation { mac: addr });
                            }
                            return Ok(());
                        };
                        self.conn.execute(
                            &format!(
                                "INSERT INTO ap (ssid, mac_id, first_seen, last_seen, count, {col}) VALUES (?1, ?2, ?3, ?3, 1, 1)"
                            ),
                            params![ssid, mac_id, ts],
                        )?;
                    }
                }
            }
            None => {
                if ssid.is_empty() {
                    return Ok(());
                }
                match self.ap_by_ssid(ssid)? {
                    Some(ap_id) => {
                        self.conn.execute(
                            &format!("UPDATE ap SET last_seen = ?1, count = count + 1, {col} = 1 WHERE id = ?2"),
                            params![ts, ap_id],
                        )?;
                    }
                    None => {
                        self.conn.execute(
                            &format!(
                                "INSERT INTO ap (ssid, mac_id, first_seen, last_seen, count, {col}) VALUES (?1, NULL, ?2, ?2, 1, 1)"
                            ),
                            params![ssid, ts],
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drops silently if `geo` is absent (stale fix) or the MAC row for
    /// `src` hasn't been inserted yet (logs a warning) — persisted `seen`
    /// uses the worker-supplied wall-clock `ts`, not the `GeoFix`'s
    /// process-local `Instant`.
    pub fn handle_geo(&self, src: u64, geo: Option<GeoFix>, ts: DateTime<Utc>) -> Result<(), StoreError> {
        let Some(geo) = geo else {
            return Ok(());
        };
        let Some(mac_id) = self.mac_id(src)? else {
            log::warn!("dropping GEO event for unknown mac {src:012X}");
            return Ok(());
        };
        self.conn.execute(
            "INSERT INTO geo (mac_id, latitude, longitude, seen) VALUES (?1, ?2, ?3, ?4)",
            params![mac_id, geo.latitude, geo.longitude, ts],
        )?;
        Ok(())
    }

    /// §4.5.1: resolve the non-AP side and the AP side of an observation.
    pub fn resolve_sta_ap(
        &self,
        src: Option<u64>,
        dst: Option<u64>,
        ssid: Option<&[u8]>,
    ) -> Result<(Option<i64>, Option<i64>), StoreError> {
        let src_mac_id = match src {
            Some(a) => self.mac_id(a)?,
            None => None,
        };
        let dst_mac_id = match dst {
            Some(a) => self.mac_id(a)?,
            None => None,
        };

        if let Some(smid) = src_mac_id {
            if let Some((ap_id, _)) = self.ap_by_mac(smid)? {
                let sta_id = dst_mac_id;
                return Ok((sta_id, Some(ap_id)));
            }
        }

        if let Some(ssid) = ssid {
            if !ssid.is_empty() {
                if let Some(ap_id) = self.ap_by_ssid(ssid)? {
                    return Ok((src_mac_id, Some(ap_id)));
                }
            }
        }

        if let Some(dmid) = dst_mac_id {
            if let Some((ap_id, _)) = self.ap_by_mac(dmid)? {
                let sta_id = src_mac_id;
                return Ok((sta_id, Some(ap_id)));
            }
        }

        Ok((None, None))
    }

    pub fn handle_association(&self, sta_id: i64, ap_id: i64, ts: DateTime<Utc>) -> Result<(), StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM association WHERE mac_id = ?1 AND ap_id = ?2",
                params![sta_id, ap_id],
                |r| r.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE association SET last_seen = ?1 WHERE id = ?2",
                    params![ts, id],
                )?;
            }
            None => {
                self.conn.execute(
                    "INSERT INTO association (mac_id, ap_id, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)",
                    params![sta_id, ap_id, ts],
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open(":memory:").unwrap()
    }

    #[test]
    fn mac_insert_then_update() {
        let s = store();
        let now = Utc::now();
        s.handle_mac(1, Origin::Beacon, now).unwrap();
        s.handle_mac(1, Origin::Mgmt, now).unwrap();
        let count: i64 = s
            .conn
            .query_row("SELECT count FROM mac WHERE addr = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn ssid_insert_fails_without_mac_for_beacon_origin() {
        let s = store();
        let now = Utc::now();
        let err = s.handle_ssid(Some(99), b"Net1", Origin::Beacon, now).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation { mac: 99 }));
    }

    #[test]
    fn ssid_anonymous_insert_then_match_by_ssid() {
        let s = store();
        let now = Utc::now();
        s.handle_ssid(None, b"Ghost", Origin::ProbeReq, now).unwrap();
        let ap_id = s.ap_by_ssid(b"Ghost").unwrap();
        assert!(ap_id.is_some());
    }

    #[test]
    fn resolve_sta_ap_shortcut_via_ssid_for_anonymous_src() {
        let s = store();
        let now = Utc::now();
        s.handle_mac(0xAABBCC112233, Origin::Beacon, now).unwrap();
        s.handle_ssid(Some(0xAABBCC112233), b"Net1", Origin::Beacon, now)
            .unwrap();
        s.handle_mac(0x112233445566, Origin::ProbeReq, now).unwrap();
        let (sta, ap) = s
            .resolve_sta_ap(Some(0x112233445566), None, Some(b"Net1"))
            .unwrap();
        assert!(sta.is_some());
        assert!(ap.is_some());
    }

    #[test]
    fn association_insert_then_update_is_idempotent_on_pair() {
        let s = store();
        let now = Utc::now();
        s.handle_association(1, 2, now).unwrap();
        s.handle_association(1, 2, now + chrono::Duration::seconds(5)).unwrap();
        let count: i64 = s
            .conn
            .query_row("SELECT COUNT(*) FROM association", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
