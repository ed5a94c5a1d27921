use log::{info, warn};

use crate::{
    config::PowerConfig,
    error::PowerError,
    types::{PowerReading, PowerTier},
};

pub trait BatteryAdc {
    fn sample_raw(&mut self) -> Result<u16, PowerError>;
}

/// Converts a raw ADC count to battery volts: the divider halves the cell
/// voltage and `vref_mv` is the per-board reference correction.
pub fn calibrate(raw: u16, config: &PowerConfig) -> f32 {
    f32::from(raw) / f32::from(config.adc_max)
        * config.divider_ratio
        * config.reference_volts
        * (f32::from(config.vref_mv) / 1000.0)
}

pub fn classify(voltage: f32, config: &PowerConfig) -> PowerTier {
    if voltage >= config.low_volts {
        PowerTier::Normal
    } else if voltage >= config.dead_volts {
        PowerTier::Low
    } else {
        PowerTier::Dead
    }
}

/// Samples the battery once. A failed sample keeps `fallback_voltage` so a
/// flaky ADC never invents a tier change.
pub fn read_voltage(
    adc: &mut dyn BatteryAdc,
    config: &PowerConfig,
    fallback_voltage: f32,
) -> PowerReading {
    let voltage = match adc.sample_raw() {
        Ok(raw) => {
            let voltage = calibrate(raw, config);
            info!("battery {voltage:.2} V (raw {raw})");
            voltage
        }
        Err(err) => {
            warn!("battery sample failed ({err}); reusing {fallback_voltage:.2} V");
            fallback_voltage
        }
    };

    PowerReading {
        voltage,
        tier: classify(voltage, config),
    }
}
