//! Wires the pipeline together: bounded queues, parser/worker thread pools,
//! the location/channel/telemetry async tasks, the startup sync gate, and
//! graceful shutdown on Ctrl+C.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::bounded;

use crate::config::Config;
use crate::dispatcher::{Dispatcher, FrameTally};
use crate::event::EventGroup;
use crate::frame::{FrameClass, GeoFrame};
use crate::freshness::{FreshnessCache, EVICTION_INTERVAL};
use crate::location::LocationTracker;
use crate::store::Store;
use crate::telemetry::StatusPush;
use crate::worker::{EventTally, EventWorker};

const STATUS_PUSH_INTERVAL: Duration = Duration::from_secs(5);

pub struct Supervisor {
    interface: String,
    config: Config,
}

impl Supervisor {
    pub fn new(interface: String, config: Config) -> Self {
        Supervisor { interface, config }
    }

    pub async fn run(self) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        self.install_signal_handler(running.clone())?;

        let location = Arc::new(LocationTracker::new());
        let uuid = uuid::Uuid::parse_str(&self.config.bluetooth.uuid)
            .context("invalid bluetooth.uuid in config")?;

        let bt_location = location.clone();
        let bt_running = running.clone();
        let bt_ntp_command = self.config.default.ntp_command.clone();
        tokio::spawn(async move {
            if let Err(e) = bt_location.serve_bluetooth(uuid, bt_ntp_command, bt_running).await {
                log::error!("bluetooth geo server exited: {e}");
            }
        });

        let status_push = StatusPush::new(self.config.store.path.clone(), STATUS_PUSH_INTERVAL);
        let status_location = location.clone();
        let status_running = running.clone();
        tokio::spawn(async move {
            status_push.run(status_location, status_running).await;
        });

        let hopper = crate::channels::ChannelHopper::new(
            self.interface.clone(),
            self.config.dot11.max_channel,
            Duration::from_secs_f64(self.config.default.channel_interval),
        );
        let current_channel = hopper.current_channel_handle();
        let hopper_running = running.clone();
        tokio::spawn(async move {
            if let Err(e) = hopper.run(hopper_running).await {
                log::error!("channel hopper exited: {e}");
            }
        });

        self.wait_for_clock_sync(&location).await;

        let freshness = Arc::new(FreshnessCache::new(&self.config.store));
        let eviction_freshness = freshness.clone();
        let eviction_running = running.clone();
        tokio::spawn(async move {
            while eviction_running.load(Ordering::Acquire) {
                tokio::time::sleep(EVICTION_INTERVAL).await;
                eviction_freshness.evict_stale(chrono::Utc::now());
            }
        });

        let (frame_senders, frame_receivers) = build_frame_queues(self.config.default.frm_queue_max_size);
        let (event_tx, event_rx) = bounded::<EventGroup>(self.config.default.event_queue_max_size);
        let event_depth_handle = event_rx.clone();

        let enabled = self.config.dot11.enabled_classes();
        let mut parser_handles = Vec::new();
        for class in enabled {
            let rx = frame_receivers.get(&class).expect("queue built for every class").clone();
            let tx = event_tx.clone();
            let label = class.config_key();
            parser_handles.push(std::thread::spawn(move || crate::parsers::run(label, rx, tx)));
        }
        drop(event_tx);

        let event_tally = Arc::new(EventTally::default());
        let mut worker_handles = Vec::new();
        for id in 0..self.config.default.num_event_handlers {
            let store = Store::open(&self.config.store.path).context("failed to open event worker store")?;
            let worker = EventWorker::new(id, event_rx.clone(), store, freshness.clone(), event_tally.clone());
            worker_handles.push(std::thread::spawn(move || worker.run()));
        }
        drop(event_rx);

        let frame_tally = Arc::new(FrameTally::default());
        let dispatcher = Dispatcher::new(frame_senders, &self.config.dot11, location.clone(), frame_tally.clone());
        let sniff_running = running.clone();
        let interface = self.interface.clone();
        let sniffer_handle =
            std::thread::spawn(move || crate::sniffer::run(&interface, dispatcher, sniff_running));

        let log_interval = Duration::from_secs_f64(self.config.default.log_interval);
        let log_running = running.clone();
        tokio::spawn(async move {
            while log_running.load(Ordering::Acquire) {
                tokio::time::sleep(log_interval).await;
                dump_log(&frame_tally, &event_tally, &current_channel, &event_depth_handle);
            }
        });

        // Block the async runtime until shutdown is requested, then drain.
        while running.load(Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        sniffer_handle
            .join()
            .map_err(|_| anyhow::anyhow!("sniffer thread panicked"))??;

        tokio::time::sleep(Duration::from_secs(self.config.default.shutdown_grace_secs)).await;

        for h in parser_handles {
            let _ = h.join();
        }
        for h in worker_handles {
            let _ = h.join();
        }

        Ok(())
    }

    fn install_signal_handler(&self, running: Arc<AtomicBool>) -> Result<()> {
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            running.store(false, Ordering::SeqCst);
        })
        .context("failed to install signal handler")
    }

    /// Blocks until the sniffer is allowed to start: either the startup NTP
    /// sync succeeded, or the phone has confirmed/corrected the clock.
    async fn wait_for_clock_sync(&self, location: &Arc<LocationTracker>) {
        let synced = location.run_ntp_sync(&self.config.default.ntp_command).await;
        if synced {
            return;
        }
        log::warn!("NTP sync failed, waiting for phone clock confirmation");
        while !location.is_time_synchronized() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Periodic status line mirroring the original's `dump_log`: per-class frame
/// counts since the last dump, current channel, buffered event-queue depth,
/// and per-event-kind new/total counts.
fn dump_log(
    frame_tally: &FrameTally,
    event_tally: &EventTally,
    current_channel: &std::sync::atomic::AtomicU8,
    event_depth: &crossbeam_channel::Receiver<EventGroup>,
) {
    let frames = frame_tally.take_snapshot();
    let events = event_tally.take_snapshot();
    log::info!(
        "channel={} event_queue_depth={} frames={:?} events(new/total)={:?}",
        current_channel.load(Ordering::Relaxed),
        event_depth.len(),
        frames,
        events,
    );
}

fn build_frame_queues(
    capacity: usize,
) -> (
    HashMap<FrameClass, crossbeam_channel::Sender<GeoFrame>>,
    HashMap<FrameClass, crossbeam_channel::Receiver<GeoFrame>>,
) {
    let mut senders = HashMap::new();
    let mut receivers = HashMap::new();
    for class in FrameClass::ALL {
        let (tx, rx) = bounded(capacity);
        senders.insert(class, tx);
        receivers.insert(class, rx);
    }
    (senders, receivers)
}
