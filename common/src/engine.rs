use std::time::Duration;

use crate::{
    config::RuntimeConfig,
    connectivity::LinkReport,
    error::CycleError,
    power::classify,
    render::RenderRequest,
    store::clamp_message,
    types::{
        AvailabilityResult, AvailabilityStatus, Icon, PersistedState, PowerReading, PowerTier,
        WakeReason,
    },
};

pub const CRITICAL_BATTERY_MESSAGE: &str = "battery empty, please recharge";

/// What the cycle must do before suspending.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleAction {
    pub render: Option<RenderRequest>,
    pub sleep: Duration,
    pub tier: PowerTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub wake: WakeReason,
    pub link: LinkReport,
    pub availability: Option<AvailabilityResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub status: AvailabilityStatus,
    pub message: String,
    pub icon: Icon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub resolved: Resolved,
    pub action: CycleAction,
    pub state: PersistedState,
}

impl Decision {
    pub fn redraws(&self) -> bool {
        self.action.render.is_some()
    }
}

/// Folds link and availability into the message the panel should show,
/// before any battery override.
pub fn resolve(link: &LinkReport, availability: Option<AvailabilityResult>) -> Resolved {
    let result = match availability {
        Some(result) if link.is_connected() => result,
        _ => AvailabilityResult {
            status: AvailabilityStatus::NoWifi,
            display_message: CycleError::LinkTimeout.to_string(),
            raw_http_code: 0,
        },
    };

    Resolved {
        status: result.status,
        message: clamp_message(&result.display_message).to_string(),
        icon: result.status.icon(),
    }
}

pub fn needs_redraw(message: &str, prior: &PersistedState, wake: WakeReason) -> bool {
    wake != WakeReason::Timer || message != prior.last_shown_message
}

pub fn sleep_for(tier: PowerTier, config: &RuntimeConfig) -> Duration {
    match tier {
        PowerTier::Dead => config.sleep.long(),
        PowerTier::Normal | PowerTier::Low => config.sleep.short(),
    }
}

/// One wake cycle as a pure function of the prior state and this cycle's
/// observations. `measure` runs only on the redraw path.
pub fn decide(
    prior: &PersistedState,
    observation: Observation,
    config: &RuntimeConfig,
    measure: impl FnOnce() -> PowerReading,
) -> Decision {
    let Observation {
        wake,
        link,
        availability,
    } = observation;
    let resolved = resolve(&link, availability);

    if !needs_redraw(&resolved.message, prior, wake) {
        let tier = classify(prior.last_voltage, &config.power);
        return Decision {
            resolved,
            action: CycleAction {
                render: None,
                sleep: sleep_for(tier, config),
                tier,
            },
            state: prior.clone(),
        };
    }

    let reading = measure();
    let mut message = resolved.message.clone();
    let mut icon = resolved.icon;
    match reading.tier {
        PowerTier::Normal => {}
        // Only the icon changes so room changes stay visible.
        PowerTier::Low => icon = Icon::BatteryLow,
        PowerTier::Dead => {
            message = CRITICAL_BATTERY_MESSAGE.to_string();
            icon = Icon::BatteryLow;
        }
    }

    let show_debug_overlay =
        wake != WakeReason::Timer || !link.is_connected() || reading.tier != PowerTier::Normal;

    let state = PersistedState {
        last_shown_message: message.clone(),
        last_voltage: reading.voltage,
    };

    Decision {
        resolved,
        action: CycleAction {
            render: Some(RenderRequest {
                message,
                icon,
                show_debug_overlay,
                wake_reason: wake,
                voltage: reading.voltage,
                tier: reading.tier,
                link_connected: link.is_connected(),
                rssi: link.rssi,
            }),
            sleep: sleep_for(reading.tier, config),
            tier: reading.tier,
        },
        state,
    }
}
