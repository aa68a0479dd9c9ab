use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "default")]
    pub default: DefaultConfig,
    pub dot11: Dot11Config,
    pub store: StoreConfig,
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    pub log_level: String,
    pub log_path: String,
    /// Seconds between periodic frame-count/status log dumps.
    pub log_interval: f64,
    /// Seconds ChannelHopper spends on each channel before hopping.
    pub channel_interval: f64,
    pub frm_queue_max_size: usize,
    pub event_queue_max_size: usize,
    pub num_event_handlers: usize,
    /// Grace period for in-flight events to drain on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Shell command used for the startup NTP sync attempt.
    #[serde(default = "default_ntp_command")]
    pub ntp_command: String,
}

fn default_shutdown_grace_secs() -> u64 {
    2
}

fn default_ntp_command() -> String {
    "ntpdate".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dot11Config {
    /// Subset of {beacon, probe_req, mgmt, ctrl, data} to actually enqueue.
    pub frame_types: Vec<String>,
    pub max_channel: u8,
    pub beacon_sample_rate: f64,
    pub mgmt_sample_rate: f64,
    pub ctrl_sample_rate: f64,
    pub data_sample_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: String,
    pub mac_update_interval: f64,
    pub ap_update_interval: f64,
    pub association_update_interval: f64,
    pub geo_update_interval: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothConfig {
    pub uuid: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn default_config() -> Self {
        Config {
            default: DefaultConfig {
                log_level: "info".to_string(),
                log_path: "./dot11sentinel.log".to_string(),
                log_interval: 60.0,
                channel_interval: 0.3,
                frm_queue_max_size: 1000,
                event_queue_max_size: 2000,
                num_event_handlers: 4,
                shutdown_grace_secs: 2,
                ntp_command: default_ntp_command(),
            },
            dot11: Dot11Config {
                frame_types: vec![
                    "beacon".to_string(),
                    "probe_req".to_string(),
                    "mgmt".to_string(),
                    "ctrl".to_string(),
                    "data".to_string(),
                ],
                max_channel: 14,
                beacon_sample_rate: 0.1,
                mgmt_sample_rate: 1.0,
                ctrl_sample_rate: 1.0,
                data_sample_rate: 1.0,
            },
            store: StoreConfig {
                path: "./dot11sentinel.db".to_string(),
                mac_update_interval: 60.0,
                ap_update_interval: 60.0,
                association_update_interval: 60.0,
                geo_update_interval: 30.0,
            },
            bluetooth: BluetoothConfig {
                uuid: "00001101-0000-1000-8000-00805f9b34fb".to_string(),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Dot11Config {
    /// `None` means "never sampled" (probe_req); `Some(rate)` means enqueue
    /// roughly every `ceil(1/rate)`-th frame of that class.
    pub fn sample_rate(&self, class: crate::frame::FrameClass) -> Option<f64> {
        use crate::frame::FrameClass;
        match class {
            FrameClass::Beacon => Some(self.beacon_sample_rate),
            FrameClass::ProbeReq => None,
            FrameClass::Mgmt => Some(self.mgmt_sample_rate),
            FrameClass::Ctrl => Some(self.ctrl_sample_rate),
            FrameClass::Data => Some(self.data_sample_rate),
        }
    }

    pub fn enabled_classes(&self) -> Vec<crate::frame::FrameClass> {
        crate::frame::FrameClass::ALL
            .into_iter()
            .filter(|c| self.frame_types.iter().any(|t| t == c.config_key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = Config::default_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dot11.max_channel, cfg.dot11.max_channel);
    }

    #[test]
    fn sample_rate_excludes_probe_req() {
        let cfg = Config::default_config();
        assert!(cfg
            .dot11
            .sample_rate(crate::frame::FrameClass::ProbeReq)
            .is_none());
        assert!(cfg
            .dot11
            .sample_rate(crate::frame::FrameClass::Beacon)
            .is_some());
    }
}
