//! End-to-end scenarios from spec.md §8, driven through the real
//! Dispatcher -> parser -> EventWorker -> Store pipeline (minus the sniffer
//! and its pcap device, which these tests feed directly).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::bounded;
use dot11sentinel::config::Config;
use dot11sentinel::dispatcher::{Dispatcher, FrameTally};
use dot11sentinel::event::EventGroup;
use dot11sentinel::frame::FrameClass;
use dot11sentinel::freshness::FreshnessCache;
use dot11sentinel::location::LocationTracker;
use dot11sentinel::store::Store;
use dot11sentinel::worker::{EventTally, EventWorker};

const MGMT_HEADER_LEN: usize = 24;

fn mgmt_frame(type_subtype_byte: u8, src: [u8; 6], dst: [u8; 6]) -> Vec<u8> {
    let mut data = vec![0u8; MGMT_HEADER_LEN];
    data[0] = type_subtype_byte;
    data[4..10].copy_from_slice(&dst);
    data[10..16].copy_from_slice(&src);
    data
}

fn ssid_ie(ssid: &[u8]) -> Vec<u8> {
    let mut ie = vec![0u8, ssid.len() as u8];
    ie.extend_from_slice(ssid);
    ie
}

fn probe_req(src: [u8; 6], ssid: Option<&[u8]>) -> Vec<u8> {
    let mut data = mgmt_frame(0x40, src, [0; 6]); // type=0, subtype=4
    if let Some(ssid) = ssid {
        data.extend_from_slice(&ssid_ie(ssid));
    }
    data
}

fn beacon(src: [u8; 6], ssid: Option<&[u8]>) -> Vec<u8> {
    let mut data = mgmt_frame(0x80, src, [0xff; 6]); // type=0, subtype=8
    data.extend_from_slice(&[0u8; 12]); // timestamp + interval + capability
    if let Some(ssid) = ssid {
        data.extend_from_slice(&ssid_ie(ssid));
    }
    data
}

/// Spins up one parser + one worker against a fresh `:memory:`-like temp
/// store, wired through a single-class dispatcher, and returns the store
/// (after the caller has fed it frames and dropped the returned handles).
struct Harness {
    dispatcher: Dispatcher,
    store_path: String,
    _parser: std::thread::JoinHandle<()>,
    _worker: std::thread::JoinHandle<()>,
}

impl Harness {
    fn new(store_path: &str) -> Self {
        let cfg = Config::default_config();
        let location = Arc::new(LocationTracker::new());

        let (frame_tx, frame_rx) = bounded(64);
        let mut senders = HashMap::new();
        for class in FrameClass::ALL {
            senders.insert(class, frame_tx.clone());
        }
        let dispatcher = Dispatcher::new(senders, &cfg.dot11, location, Arc::new(FrameTally::default()));

        let (event_tx, event_rx) = bounded::<EventGroup>(64);
        let parser = std::thread::spawn(move || dot11sentinel::parsers::run("test", frame_rx, event_tx));

        let store = Store::open(store_path).unwrap();
        let freshness = Arc::new(FreshnessCache::new(&cfg.store));
        let worker = EventWorker::new(0, event_rx, store, freshness, Arc::new(EventTally::default()));
        let worker_handle = std::thread::spawn(move || worker.run());

        Harness {
            dispatcher,
            store_path: store_path.to_string(),
            _parser: parser,
            _worker: worker_handle,
        }
    }

    fn feed(&mut self, data: Vec<u8>) {
        let _ = self.dispatcher.dispatch(data);
    }

    /// Drops the dispatcher's senders (closing the pipeline) and gives the
    /// parser/worker threads time to drain before reopening the store for
    /// assertions.
    fn drain(self) -> rusqlite::Connection {
        drop(self.dispatcher);
        std::thread::sleep(Duration::from_millis(200));
        rusqlite::Connection::open(&self.store_path).unwrap()
    }
}

#[test]
fn s1_beacon_then_probe_creates_mac_ap_and_association() {
    let path = "./target/s1_test.db";
    let _ = std::fs::remove_file(path);
    let mut h = Harness::new(path);

    h.feed(beacon([0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33], Some(b"Net1")));
    h.feed(probe_req([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], Some(b"Net1")));

    let conn = h.drain();

    let mac_count: i64 = conn.query_row("SELECT COUNT(*) FROM mac", [], |r| r.get(0)).unwrap();
    assert_eq!(mac_count, 2);

    let ap_count: i64 = conn.query_row("SELECT COUNT(*) FROM ap", [], |r| r.get(0)).unwrap();
    assert_eq!(ap_count, 1);

    let assoc_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM association", [], |r| r.get(0))
        .unwrap();
    assert_eq!(assoc_count, 1);

    let _ = std::fs::remove_file(path);
}

#[test]
fn s3_probe_without_known_ap_still_inserts_mac_and_ap() {
    let path = "./target/s3_test.db";
    let _ = std::fs::remove_file(path);
    let mut h = Harness::new(path);

    h.feed(probe_req([0xAA, 0x00, 0x00, 0x00, 0x00, 0x01], Some(b"Ghost")));

    let conn = h.drain();

    let mac_count: i64 = conn.query_row("SELECT COUNT(*) FROM mac", [], |r| r.get(0)).unwrap();
    assert_eq!(mac_count, 1);

    let ap_mac_id: Option<i64> = conn
        .query_row("SELECT mac_id FROM ap WHERE ssid = 'Ghost'", [], |r| r.get(0))
        .unwrap();
    assert!(ap_mac_id.is_none());

    let _ = std::fs::remove_file(path);
}

#[test]
fn freshness_gate_suppresses_duplicate_mac_within_window() {
    let cfg = Config::default_config();
    let cache = FreshnessCache::new(&cfg.store);
    let now = Utc::now();
    assert!(cache.admit_mac(1, now));
    assert!(!cache.admit_mac(1, now));
    assert!(cache.admit_mac(1, now + chrono::Duration::seconds(3600)));
}

#[test]
fn bounded_queue_drops_rather_than_blocks_on_backpressure() {
    let (tx, _rx) = bounded::<u8>(1);
    tx.try_send(1).unwrap();
    assert!(tx.try_send(2).is_err());
}

#[test]
fn shutdown_closes_channel_and_worker_drains_then_exits() {
    let cfg = Config::default_config();
    let path = "./target/s6_test.db";
    let _ = std::fs::remove_file(path);

    let (event_tx, event_rx) = bounded::<EventGroup>(8);
    let store = Store::open(path).unwrap();
    let freshness = Arc::new(FreshnessCache::new(&cfg.store));
    let worker = EventWorker::new(0, event_rx, store, freshness, Arc::new(EventTally::default()));
    let handle = std::thread::spawn(move || worker.run());

    event_tx
        .send(vec![dot11sentinel::event::Event::mac(
            0x1,
            dot11sentinel::event::Origin::Mgmt,
            Utc::now(),
        )])
        .unwrap();
    drop(event_tx);

    handle.join().unwrap();

    let conn = rusqlite::Connection::open(path).unwrap();
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM mac", [], |r| r.get(0)).unwrap();
    assert_eq!(count, 1);

    let _ = std::fs::remove_file(path);
}
