use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT_PREFIX: &str = "http://192.168.1.100:5000/rooms/";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub url_prefix: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub fetch_deadline_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url_prefix: DEFAULT_ENDPOINT_PREFIX.to_string(),
            connect_timeout_ms: 1_000,
            read_timeout_ms: 2_000,
            fetch_deadline_ms: 5_000,
            retry_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub connect_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_cooldown_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 8_000,
            poll_interval_ms: 50,
            reconnect_cooldown_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerConfig {
    pub adc_max: u16,
    pub reference_volts: f32,
    pub divider_ratio: f32,
    pub vref_mv: u16,
    pub low_volts: f32,
    pub dead_volts: f32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            adc_max: 4_095,
            reference_volts: 3.3,
            divider_ratio: 2.0,
            vref_mv: 1_100,
            low_volts: 3.4,
            dead_volts: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SleepConfig {
    pub short_ms: u64,
    pub long_ms: u64,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            short_ms: 10_000,
            long_ms: 900_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PanelConfig {
    pub width: u16,
    pub height: u16,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            width: 296,
            height: 128,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    pub endpoint: EndpointConfig,
    pub link: LinkConfig,
    pub power: PowerConfig,
    pub sleep: SleepConfig,
    pub panel: PanelConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.endpoint.sanitize();
        self.link.sanitize();
        self.power.sanitize();
        self.sleep.sanitize();
        self.panel.sanitize();
    }
}

impl EndpointConfig {
    pub fn sanitize(&mut self) {
        if self.url_prefix.trim().is_empty() {
            self.url_prefix = DEFAULT_ENDPOINT_PREFIX.to_string();
        }
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(100, 30_000);
        self.read_timeout_ms = self.read_timeout_ms.clamp(100, 30_000);
        self.fetch_deadline_ms = self.fetch_deadline_ms.clamp(500, 60_000);
        self.retry_delay_ms = self.retry_delay_ms.min(1_000);
    }

    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_millis(self.fetch_deadline_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl LinkConfig {
    pub fn sanitize(&mut self) {
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(500, 60_000);
        self.poll_interval_ms = self.poll_interval_ms.clamp(10, 500);
        self.reconnect_cooldown_ms = self.reconnect_cooldown_ms.max(self.poll_interval_ms);
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl PowerConfig {
    pub fn sanitize(&mut self) {
        if self.adc_max == 0 {
            self.adc_max = 4_095;
        }
        if !self.reference_volts.is_finite() || self.reference_volts <= 0.0 {
            self.reference_volts = 3.3;
        }
        if !self.divider_ratio.is_finite() || self.divider_ratio <= 0.0 {
            self.divider_ratio = 2.0;
        }
        if self.vref_mv == 0 {
            self.vref_mv = 1_100;
        }
        if !(self.dead_volts.is_finite() && self.low_volts.is_finite())
            || self.dead_volts > self.low_volts
        {
            self.low_volts = 3.4;
            self.dead_volts = 3.0;
        }
    }
}

impl SleepConfig {
    pub fn sanitize(&mut self) {
        self.short_ms = self.short_ms.max(1_000);
        self.long_ms = self.long_ms.max(self.short_ms);
    }

    pub fn short(&self) -> Duration {
        Duration::from_millis(self.short_ms)
    }

    pub fn long(&self) -> Duration {
        Duration::from_millis(self.long_ms)
    }
}

impl PanelConfig {
    pub fn sanitize(&mut self) {
        if self.width == 0 || self.height == 0 {
            *self = Self::default();
        }
    }
}
