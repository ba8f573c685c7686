use crate::consts;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    Vallox,
    OumanEh203,
}

impl DeviceModel {
    pub fn default_baud_rate(&self) -> u32 {
        match self {
            DeviceModel::Vallox => consts::VALLOX_BAUD_RATE,
            DeviceModel::OumanEh203 => consts::OUMAN_BAUD_RATE,
        }
    }

    pub fn default_root_topic(&self) -> &'static str {
        match self {
            DeviceModel::Vallox => consts::VALLOX_ROOT_TOPIC,
            DeviceModel::OumanEh203 => consts::OUMAN_ROOT_TOPIC,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub model: DeviceModel,
    /// Serial port, eg. /dev/ttyUSB0
    pub port: String,
    pub baud_rate: Option<u32>,
    pub root_topic: Option<String>,
    /// Fixed id used in topics. Allocated from the id store when missing.
    pub device_id: Option<String>,
    pub poll_interval_ms: Option<u64>,
    /// Log every raw frame.
    #[serde(default)]
    pub debug: bool,
}

impl DeviceConfig {
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or_else(|| self.model.default_baud_rate())
    }

    pub fn root_topic(&self) -> &str {
        self.root_topic
            .as_deref()
            .unwrap_or_else(|| self.model.default_root_topic())
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> anyhow::Result<Self> {
        let handle = File::open(filename)?;
        let data: Config = serde_yaml::from_reader(handle)?;

        Ok(data)
    }
}
