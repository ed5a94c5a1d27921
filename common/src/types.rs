use serde::{Deserialize, Serialize};

/// Voltage recorded before the first measurement ever happens.
pub const DEFAULT_VOLTAGE: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    ColdOrOther,
}

impl WakeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "TIMER",
            Self::ColdOrOther => "COLD_OR_OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityStatus {
    Free,
    Busy,
    ConnectionLost,
    NoWifi,
    HttpError,
}

impl AvailabilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Busy => "BUSY",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::NoWifi => "NO_WIFI",
            Self::HttpError => "HTTP_ERROR",
        }
    }

    pub fn icon(self) -> Icon {
        match self {
            Self::Free => Icon::Free,
            Self::Busy => Icon::Booked,
            _ => Icon::ConnectionLost,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityResult {
    pub status: AvailabilityStatus,
    pub display_message: String,
    pub raw_http_code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    Free,
    Booked,
    ConnectionLost,
    BatteryLow,
}

impl Icon {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Booked => "BOOKED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::BatteryLow => "BATTERY_LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTier {
    Normal,
    Low,
    Dead,
}

impl PowerTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
            Self::Dead => "DEAD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub voltage: f32,
    pub tier: PowerTier,
}

/// The only memory that crosses a deep-sleep boundary. `last_shown_message`
/// mirrors what is physically on the panel, not what was last fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(rename = "lastShownMessage", default)]
    pub last_shown_message: String,
    #[serde(rename = "lastVoltage", default = "default_voltage")]
    pub last_voltage: f32,
}

fn default_voltage() -> f32 {
    DEFAULT_VOLTAGE
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            last_shown_message: String::new(),
            last_voltage: DEFAULT_VOLTAGE,
        }
    }
}
