//! `EventWorker`: drains the shared event queue and, for each group, applies
//! the freshness gate then the store in order, so a group's MAC event lands
//! before its dependent SSID/ASSOCIATION events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::error::StoreError;
use crate::event::{Event, EventGroup, EventKind};
use crate::freshness::{FreshnessCache, SsidKey};
use crate::store::Store;

/// Per-`EventKind` new/total counts, shared across every `EventWorker` and
/// read by the supervisor's periodic log-dump task. "total" counts every
/// event seen; "new" counts only those that passed the freshness gate and
/// were actually persisted.
#[derive(Default)]
pub struct EventTally {
    total: [AtomicU64; 4],
    new: [AtomicU64; 4],
}

impl EventTally {
    fn record(&self, kind: EventKind, admitted: bool) {
        self.total[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
        if admitted {
            self.new[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// (new, total) counts since the last call, resetting both to zero.
    pub fn take_snapshot(&self) -> HashMap<EventKind, (u64, u64)> {
        [EventKind::Mac, EventKind::Ssid, EventKind::Geo, EventKind::Association]
            .into_iter()
            .map(|k| {
                let i = kind_index(k);
                (k, (self.new[i].swap(0, Ordering::Relaxed), self.total[i].swap(0, Ordering::Relaxed)))
            })
            .collect()
    }
}

fn kind_index(kind: EventKind) -> usize {
    match kind {
        EventKind::Mac => 0,
        EventKind::Ssid => 1,
        EventKind::Geo => 2,
        EventKind::Association => 3,
    }
}

pub struct EventWorker {
    id: usize,
    receiver: Receiver<EventGroup>,
    store: Store,
    freshness: Arc<FreshnessCache>,
    tally: Arc<EventTally>,
}

impl EventWorker {
    pub fn new(
        id: usize,
        receiver: Receiver<EventGroup>,
        store: Store,
        freshness: Arc<FreshnessCache>,
        tally: Arc<EventTally>,
    ) -> Self {
        EventWorker {
            id,
            receiver,
            store,
            freshness,
            tally,
        }
    }

    /// Blocks on `recv()` until the channel is closed (all senders dropped
    /// during shutdown), processing each group as it arrives.
    pub fn run(&self) {
        while let Ok(group) = self.receiver.recv() {
            self.process_group(&group);
        }
        log::debug!("event worker {} exiting, channel closed", self.id);
    }

    /// Aborts the rest of the group on `InvariantViolation` — later events in
    /// the same group (SSID, ASSOCIATION) depend on the MAC row that just
    /// failed to insert, so continuing would only raise more of the same
    /// error. Any other `StoreError` is transient: logged, and the group
    /// keeps going.
    fn process_group(&self, group: &EventGroup) {
        for event in group {
            if let Err(e) = self.process_event(event) {
                log::error!("event worker {}: {e}", self.id);
                if matches!(e, StoreError::InvariantViolation { .. }) {
                    break;
                }
            }
        }
    }

    fn process_event(&self, event: &Event) -> Result<(), StoreError> {
        match event.kind {
            EventKind::Mac => {
                let src = event.src.expect("MAC event always carries src");
                let origin = event.origin.expect("MAC event always carries origin");
                let admitted = self.freshness.admit_mac(src, event.timestamp);
                if admitted {
                    self.store.handle_mac(src, origin, event.timestamp)?;
                }
                self.tally.record(EventKind::Mac, admitted);
            }
            EventKind::Ssid => {
                let ssid = event.ssid.as_deref().unwrap_or(&[]);
                let origin = event.origin.expect("SSID event always carries origin");
                let key = match event.src {
                    Some(src) => SsidKey::ByMac(src, origin.into()),
                    None => SsidKey::BySsid(ssid.to_vec(), origin.into()),
                };
                let admitted = self.freshness.admit_ssid(key, event.timestamp);
                if admitted {
                    self.store.handle_ssid(event.src, ssid, origin, event.timestamp)?;
                }
                self.tally.record(EventKind::Ssid, admitted);
            }
            EventKind::Geo => {
                let src = event.src.expect("GEO event always carries src");
                let admitted = self.freshness.admit_geo(src, event.timestamp);
                if admitted {
                    self.store.handle_geo(src, event.geo, event.timestamp)?;
                }
                self.tally.record(EventKind::Geo, admitted);
            }
            EventKind::Association => {
                let ssid = event.ssid.as_deref();
                let (sta_id, ap_id) = self.store.resolve_sta_ap(event.src, event.dst, ssid)?;
                let (Some(sta_id), Some(ap_id)) = (sta_id, ap_id) else {
                    self.tally.record(EventKind::Association, false);
                    return Ok(());
                };
                let admitted = self.freshness.admit_association(sta_id, ap_id, event.timestamp);
                if admitted {
                    self.store.handle_association(sta_id, ap_id, event.timestamp)?;
                }
                self.tally.record(EventKind::Association, admitted);
            }
        }
        Ok(())
    }
}
