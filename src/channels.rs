//! Channel hopping and the `iw`/`ip` interface utilities it depends on.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Cycles through the channels the adapter supports (capped at `max_channel`),
/// spending `channel_interval` on each. Channels are discovered once at
/// start, not re-queried per hop.
pub struct ChannelHopper {
    interface: String,
    max_channel: u8,
    channel_interval: Duration,
    current: Arc<AtomicU8>,
}

impl ChannelHopper {
    pub fn new(interface: String, max_channel: u8, channel_interval: Duration) -> Self {
        ChannelHopper {
            interface,
            max_channel,
            channel_interval,
            current: Arc::new(AtomicU8::new(0)),
        }
    }

    /// The channel currently set, for telemetry.
    pub fn current_channel(&self) -> u8 {
        self.current.load(Ordering::Relaxed)
    }

    /// A clonable handle to the current-channel cell, for callers that need
    /// to read it after the hopper itself has been moved into its own task.
    pub fn current_channel_handle(&self) -> Arc<AtomicU8> {
        self.current.clone()
    }

    pub async fn run(&self, running: Arc<AtomicBool>) -> Result<()> {
        let mut channels = query_supported_channels(&self.interface).unwrap_or_else(|e| {
            warn!("could not query supported channels, falling back to 2.4GHz: {e}");
            get_2ghz_channels()
        });
        channels.retain(|&c| c <= self.max_channel);

        if channels.is_empty() {
            warn!("no channels <= max_channel {}, channel hopper idle", self.max_channel);
            return Ok(());
        }

        info!(
            "starting channel hopper on {} with channels: {:?}, interval: {:?}",
            self.interface, channels, self.channel_interval
        );

        let mut channel_idx = 0;

        while running.load(Ordering::SeqCst) {
            let channel = channels[channel_idx];

            match self.set_channel(channel) {
                Ok(()) => {
                    debug!("switched to channel {channel}");
                    self.current.store(channel, Ordering::Relaxed);
                }
                Err(e) => error!("failed to set channel {channel}: {e}"),
            }

            channel_idx = (channel_idx + 1) % channels.len();
            sleep(self.channel_interval).await;
        }

        info!("channel hopper stopped");
        Ok(())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        let output = Command::new("iw")
            .args(["dev", &self.interface, "set", "channel", &channel.to_string()])
            .output()
            .context("failed to execute iw command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("iw command failed: {}", stderr);
        }

        Ok(())
    }
}

/// Set interface to monitor mode
pub fn set_monitor_mode(interface: &str) -> Result<()> {
    info!("setting {interface} to monitor mode");

    let output = Command::new("ip")
        .args(["link", "set", interface, "down"])
        .output()
        .context("failed to bring interface down")?;
    if !output.status.success() {
        warn!("failed to bring interface down: {:?}", output.stderr);
    }

    let output = Command::new("iw")
        .args(["dev", interface, "set", "type", "monitor"])
        .output()
        .context("failed to set monitor mode")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("failed to set monitor mode: {}", stderr);
    }

    let output = Command::new("ip")
        .args(["link", "set", interface, "up"])
        .output()
        .context("failed to bring interface up")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("failed to bring interface up: {}", stderr);
    }

    info!("interface {interface} is now in monitor mode");
    Ok(())
}

/// Check if interface is in monitor mode
pub fn is_monitor_mode(interface: &str) -> Result<bool> {
    let output = Command::new("iw")
        .args(["dev", interface, "info"])
        .output()
        .context("failed to get interface info")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.contains("type monitor"))
}

/// Find the first wireless interface in monitor mode
pub fn find_monitor_interface() -> Result<Option<String>> {
    let output = Command::new("iw")
        .args(["dev"])
        .output()
        .context("failed to list wireless devices")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut current_interface: Option<String> = None;

    for line in stdout.lines() {
        let line = line.trim();
        if line.starts_with("Interface ") {
            current_interface = Some(line.strip_prefix("Interface ").unwrap_or("").to_string());
        } else if line.starts_with("type ") && line.contains("monitor") {
            if let Some(iface) = current_interface.take() {
                info!("found monitor mode interface: {iface}");
                return Ok(Some(iface));
            }
        }
    }

    Ok(None)
}

/// List all wireless interfaces with their modes
pub fn list_wireless_interfaces() -> Result<Vec<(String, String)>> {
    let output = Command::new("iw")
        .args(["dev"])
        .output()
        .context("failed to list wireless devices")?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    let mut interfaces = Vec::new();
    let mut current_interface: Option<String> = None;
    let mut current_type = String::from("unknown");

    for line in stdout.lines() {
        let line = line.trim();
        if line.starts_with("Interface ") {
            if let Some(iface) = current_interface.take() {
                interfaces.push((iface, current_type.clone()));
            }
            current_interface = Some(line.strip_prefix("Interface ").unwrap_or("").to_string());
            current_type = String::from("unknown");
        } else if line.starts_with("type ") {
            current_type = line.strip_prefix("type ").unwrap_or("unknown").to_string();
        }
    }

    if let Some(iface) = current_interface {
        interfaces.push((iface, current_type));
    }

    Ok(interfaces)
}

/// Finds the physical radio backing `interface` (`iw dev <iface> info`) then
/// queries it for supported channel numbers (`iw phy <phy> channels`).
pub fn query_supported_channels(interface: &str) -> Result<Vec<u8>> {
    let output = Command::new("iw")
        .args(["dev", interface, "info"])
        .output()
        .context("failed to get interface info")?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let phy = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("wiphy "))
        .map(|n| format!("phy{}", n.trim()))
        .context("could not determine phy for interface")?;

    let output = Command::new("iw")
        .args(["phy", &phy, "channels"])
        .output()
        .context("failed to query phy channels")?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    let mut channels: Vec<u8> = stdout
        .lines()
        .filter_map(|line| {
            let start = line.find('[')?;
            let end = line[start..].find(']')? + start;
            line[start + 1..end].parse().ok()
        })
        .collect();
    channels.sort_unstable();
    channels.dedup();
    Ok(channels)
}

/// Get list of available 2.4GHz channels
pub fn get_2ghz_channels() -> Vec<u8> {
    vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]
}

/// Get list of common 5GHz channels
pub fn get_5ghz_channels() -> Vec<u8> {
    vec![
        36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140, 144,
        149, 153, 157, 161, 165,
    ]
}

/// Get all channels (2.4GHz + 5GHz)
pub fn get_all_channels() -> Vec<u8> {
    let mut channels = get_2ghz_channels();
    channels.extend(get_5ghz_channels());
    channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_ghz_channels_are_all_above_fourteen() {
        assert!(get_5ghz_channels().iter().all(|&c| c > 14));
    }
}
