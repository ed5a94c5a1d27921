pub mod availability;
pub mod config;
pub mod connectivity;
pub mod cycle;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod power;
pub mod render;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use availability::{HttpResponse, RequestTimeouts, StatusTransport};
pub use config::RuntimeConfig;
pub use connectivity::{LinkReport, LinkStatus, Radio};
pub use cycle::{run_cycle, CyclePhase, CycleReport, Devices};
pub use deadline::{Clock, SystemClock};
pub use engine::{CycleAction, CRITICAL_BATTERY_MESSAGE};
pub use error::{CycleError, PowerError, RenderError, StoreError, TransportError};
pub use power::BatteryAdc;
pub use render::{FrameSurface, RenderRequest, Renderer};
pub use store::StateStore;
pub use types::{Icon, PersistedState, PowerTier, WakeReason};
