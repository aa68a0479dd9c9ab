//! The packet-capture loop: owns the `pcap::Capture` handle and feeds the
//! Dispatcher, one frame per call, from a dedicated OS thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use pcap::Capture;

use crate::dispatcher::Dispatcher;

pub fn run(interface: &str, mut dispatcher: Dispatcher, running: Arc<AtomicBool>) -> Result<()> {
    let device = pcap::Device::list()
        .context("failed to list capture devices")?
        .into_iter()
        .find(|d| d.name == interface)
        .with_context(|| format!("no such capture device: {interface}"))?;

    let mut cap = Capture::from_device(device)
        .context("failed to open capture device")?
        .promisc(true)
        .snaplen(65535)
        .timeout(1000)
        .open()
        .context("failed to activate capture")?;

    log::info!("sniffer started on {interface}");

    while running.load(Ordering::Acquire) {
        match cap.next_packet() {
            Ok(packet) => {
                if let Err(e) = dispatcher.dispatch(packet.data.to_vec()) {
                    log::debug!("{e}");
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                log::error!("capture error: {e}");
                break;
            }
        }
    }

    log::info!("sniffer stopped");
    Ok(())
}
