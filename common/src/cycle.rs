use log::{debug, info, warn};

use crate::{
    availability::{fetch_status, StatusTransport},
    config::RuntimeConfig,
    connectivity::{await_connection, LinkReport, Radio},
    deadline::Clock,
    engine::{decide, CycleAction, Observation},
    error::{CycleError, RenderError},
    power::{read_voltage, BatteryAdc},
    render::Renderer,
    store::{load_or_default, StateStore},
    types::{PersistedState, WakeReason},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Booting,
    AwaitingLink,
    FetchingStatus,
    Resolved,
    Rendering,
    Persisting,
    Sleeping,
}

/// Hardware the cycle drives. The radio join must already have been started
/// with [`Radio::begin`].
pub struct Devices<'a> {
    pub radio: &'a mut dyn Radio,
    pub transport: &'a mut dyn StatusTransport,
    pub battery: &'a mut dyn BatteryAdc,
    pub store: &'a mut dyn StateStore,
    pub renderer: &'a mut dyn Renderer,
    pub clock: &'a dyn Clock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub phases: Vec<CyclePhase>,
    pub link: LinkReport,
    pub action: CycleAction,
    pub persisted: Option<PersistedState>,
    pub awake_ms: u64,
}

/// Runs one wake cycle up to the point of suspending. Only a render surface
/// allocation failure is returned as an error; every other failure becomes
/// the panel message.
pub fn run_cycle(
    devices: Devices<'_>,
    config: &RuntimeConfig,
    device_id: &str,
    wake: WakeReason,
) -> Result<CycleReport, CycleError> {
    let Devices {
        radio,
        transport,
        battery,
        store,
        renderer,
        clock,
    } = devices;
    let started_ms = clock.now_ms();
    let mut phases = Vec::with_capacity(7);

    enter(&mut phases, CyclePhase::Booting);
    let prior = load_or_default(store);
    debug!(
        "prior state: message '{}', voltage {:.2} V, wake {}",
        prior.last_shown_message,
        prior.last_voltage,
        wake.as_str()
    );

    enter(&mut phases, CyclePhase::AwaitingLink);
    let link = await_connection(radio, clock, &config.link);

    let availability = if link.is_connected() {
        enter(&mut phases, CyclePhase::FetchingStatus);
        // Last cycle's voltage; measuring now would mean powering the panel.
        Some(fetch_status(
            transport,
            clock,
            &config.endpoint,
            device_id,
            prior.last_voltage,
        ))
    } else {
        None
    };

    enter(&mut phases, CyclePhase::Resolved);
    let observation = Observation {
        wake,
        link,
        availability,
    };
    let decision = decide(&prior, observation, config, || {
        read_voltage(battery, &config.power, prior.last_voltage)
    });

    let mut persisted = None;
    if let Some(request) = decision.action.render.as_ref() {
        enter(&mut phases, CyclePhase::Rendering);
        match renderer.render(request) {
            Ok(()) => {
                enter(&mut phases, CyclePhase::Persisting);
                match store.save(&decision.state) {
                    Ok(()) => persisted = Some(decision.state.clone()),
                    Err(err) => warn!("failed to persist panel state: {err}"),
                }
            }
            Err(RenderError::ResourceExhaustion { bytes }) => {
                return Err(CycleError::ResourceExhaustion { bytes });
            }
            Err(err) => warn!("render failed, panel unchanged: {err}"),
        }
    }

    enter(&mut phases, CyclePhase::Sleeping);
    let awake_ms = clock.now_ms().saturating_sub(started_ms);
    info!(
        "cycle done: {} '{}' redraw={} tier={} sleep={}s awake={}ms",
        decision.resolved.status.as_str(),
        decision.resolved.message,
        decision.redraws(),
        decision.action.tier.as_str(),
        decision.action.sleep.as_secs(),
        awake_ms
    );

    Ok(CycleReport {
        phases,
        link,
        action: decision.action,
        persisted,
        awake_ms,
    })
}

fn enter(phases: &mut Vec<CyclePhase>, phase: CyclePhase) {
    debug!("phase -> {phase:?}");
    phases.push(phase);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        availability::HttpResponse,
        connectivity::LinkStatus,
        engine::CRITICAL_BATTERY_MESSAGE,
        error::TransportError,
        test_support::{
            FakeClock, FixedAdc, MemoryStore, RecordingRenderer, ScriptedRadio, ScriptedTransport,
        },
        types::{Icon, PowerTier},
    };

    const DEVICE: &str = "24:6F:28:AA:10:02";

    fn ok(body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            reason: "OK".to_string(),
            body: body.to_string(),
        })
    }

    struct Rig {
        clock: FakeClock,
        radio: ScriptedRadio,
        adc: FixedAdc,
        store: MemoryStore,
        renderer: RecordingRenderer,
    }

    impl Rig {
        fn new(statuses: Vec<LinkStatus>, raw_battery: u16, prior: PersistedState) -> Self {
            Self {
                clock: FakeClock::new(),
                radio: ScriptedRadio::new(statuses),
                adc: FixedAdc::ok(raw_battery),
                store: MemoryStore::with(prior),
                renderer: RecordingRenderer::default(),
            }
        }

        fn run(
            &mut self,
            responses: Vec<Result<HttpResponse, TransportError>>,
            wake: WakeReason,
        ) -> (Result<CycleReport, CycleError>, Vec<String>) {
            let mut transport = ScriptedTransport::new(&self.clock, 150, responses);
            let result = run_cycle(
                Devices {
                    radio: &mut self.radio,
                    transport: &mut transport,
                    battery: &mut self.adc,
                    store: &mut self.store,
                    renderer: &mut self.renderer,
                    clock: &self.clock,
                },
                &RuntimeConfig::default(),
                DEVICE,
                wake,
            );
            (result, transport.urls)
        }
    }

    fn shown(message: &str, voltage: f32) -> PersistedState {
        PersistedState {
            last_shown_message: message.to_string(),
            last_voltage: voltage,
        }
    }

    #[test]
    fn first_boot_renders_and_persists() {
        let mut rig = Rig::new(vec![LinkStatus::Connected], 2_100, PersistedState::default());

        let (result, urls) = rig.run(
            vec![ok("Room A\nfree\nfree for the day\n")],
            WakeReason::ColdOrOther,
        );
        let report = result.unwrap();

        assert_eq!(
            report.phases,
            vec![
                CyclePhase::Booting,
                CyclePhase::AwaitingLink,
                CyclePhase::FetchingStatus,
                CyclePhase::Resolved,
                CyclePhase::Rendering,
                CyclePhase::Persisting,
                CyclePhase::Sleeping,
            ]
        );
        assert_eq!(
            urls,
            vec!["http://192.168.1.100:5000/rooms/24:6F:28:AA:10:02?battery=5.00"]
        );
        assert_eq!(rig.renderer.frames.len(), 1);
        assert_eq!(rig.renderer.frames[0].message, "Room A, free for the day");
        assert!(rig.renderer.frames[0].show_debug_overlay);
        assert_eq!(rig.store.saves, 1);
        assert_eq!(rig.store.state.last_shown_message, "Room A, free for the day");
        assert_eq!(report.persisted, Some(rig.store.state.clone()));
        assert_eq!(report.action.sleep, Duration::from_secs(10));
    }

    #[test]
    fn unchanged_timer_cycle_leaves_panel_and_state_alone() {
        let prior = shown("Room A, booked until 15:00", 3.71);
        let mut rig = Rig::new(vec![LinkStatus::Connected], 2_100, prior.clone());

        let (result, urls) =
            rig.run(vec![ok("Room A\nbusy\nbooked until 15:00")], WakeReason::Timer);
        let report = result.unwrap();

        assert!(rig.renderer.frames.is_empty());
        assert_eq!(rig.adc.samples, 0);
        assert_eq!(rig.store.saves, 0);
        assert_eq!(rig.store.state, prior);
        assert_eq!(report.persisted, None);
        assert!(!report.phases.contains(&CyclePhase::Rendering));
        assert!(urls[0].ends_with("?battery=3.71"));
    }

    #[test]
    fn fetch_uses_prior_voltage_not_fresh_sample() {
        let mut rig = Rig::new(vec![LinkStatus::Connected], 1_800, shown("old", 3.95));

        let (result, urls) = rig.run(vec![ok("Room A\nbusy\nuntil 3pm")], WakeReason::Timer);
        let report = result.unwrap();

        assert!(urls[0].ends_with("?battery=3.95"));
        assert_eq!(rig.renderer.frames.len(), 1);
        assert_eq!(rig.adc.samples, 1);
        assert_eq!(report.action.tier, PowerTier::Low);
        assert_eq!(rig.renderer.frames[0].icon, Icon::BatteryLow);
        assert!(rig.store.state.last_voltage < 3.4);
    }

    #[test]
    fn link_timeout_skips_fetch() {
        let mut rig = Rig::new(vec![LinkStatus::Connecting], 2_100, shown("Room A, all day", 3.9));

        let (result, urls) = rig.run(vec![ok("Room A\nfree\nall day")], WakeReason::Timer);
        let report = result.unwrap();

        assert!(urls.is_empty());
        assert!(!report.phases.contains(&CyclePhase::FetchingStatus));
        assert!(!report.link.is_connected());
        assert_eq!(rig.renderer.frames[0].message, "no wifi connection");
        assert_eq!(rig.renderer.frames[0].icon, Icon::ConnectionLost);
        assert_eq!(rig.store.state.last_shown_message, "no wifi connection");
    }

    #[test]
    fn dead_battery_sleeps_long() {
        let mut rig = Rig::new(vec![LinkStatus::Connected], 1_500, shown("Room A, all day", 3.1));

        let (result, _) = rig.run(vec![ok("Room A\nbusy\nuntil 3pm")], WakeReason::Timer);
        let report = result.unwrap();

        assert_eq!(report.action.sleep, Duration::from_secs(900));
        assert_eq!(rig.store.state.last_shown_message, CRITICAL_BATTERY_MESSAGE);
    }

    #[test]
    fn dead_battery_sleeps_long_without_link() {
        let mut rig = Rig::new(
            vec![LinkStatus::Connecting],
            1_500,
            shown("Room A, all day", 3.1),
        );

        let (result, urls) = rig.run(vec![ok("Room A\nfree\nall day")], WakeReason::Timer);
        let report = result.unwrap();

        assert!(urls.is_empty());
        assert!(!report.link.is_connected());
        assert_eq!(report.action.tier, PowerTier::Dead);
        assert_eq!(report.action.sleep, Duration::from_secs(900));
        assert_eq!(rig.renderer.frames.len(), 1);
        assert_eq!(rig.renderer.frames[0].message, CRITICAL_BATTERY_MESSAGE);
        assert_eq!(rig.renderer.frames[0].icon, Icon::BatteryLow);
        assert_eq!(rig.store.state.last_shown_message, CRITICAL_BATTERY_MESSAGE);
    }

    #[test]
    fn render_surface_exhaustion_is_fatal() {
        let mut rig = Rig::new(vec![LinkStatus::Connected], 2_100, PersistedState::default());
        rig.renderer.exhausted = true;

        let (result, _) = rig.run(vec![ok("Room A\nfree\nall day")], WakeReason::ColdOrOther);

        let err = result.unwrap_err();
        assert_eq!(err, CycleError::ResourceExhaustion { bytes: 4_736 });
        assert!(err.is_fatal());
        assert_eq!(rig.store.saves, 0);
    }

    #[test]
    fn failed_render_is_not_persisted() {
        let prior = shown("Room A, all day", 3.9);
        let mut rig = Rig::new(vec![LinkStatus::Connected], 2_100, prior.clone());
        rig.renderer.driver_fault = true;

        let (result, _) = rig.run(vec![ok("Room A\nbusy\nuntil 3pm")], WakeReason::Timer);
        let report = result.unwrap();

        assert_eq!(report.persisted, None);
        assert_eq!(rig.store.state, prior);
        assert_eq!(report.action.sleep, Duration::from_secs(10));
    }

    #[test]
    fn failed_save_still_sleeps() {
        let mut rig = Rig::new(vec![LinkStatus::Connected], 2_100, PersistedState::default());
        rig.store.fail_saves = true;

        let (result, _) = rig.run(vec![ok("Room A\nfree\nall day")], WakeReason::ColdOrOther);
        let report = result.unwrap();

        assert_eq!(report.persisted, None);
        assert_eq!(report.phases.last(), Some(&CyclePhase::Sleeping));
    }

    #[test]
    fn transport_failure_message_reaches_panel() {
        let mut rig = Rig::new(vec![LinkStatus::Connected], 2_100, shown("Room A, all day", 3.9));

        let (result, urls) =
            rig.run(vec![Err(TransportError::ConnectionRefused)], WakeReason::Timer);
        let report = result.unwrap();

        assert_eq!(rig.renderer.frames[0].message, "http -1 connection refused");
        assert_eq!(rig.renderer.frames[0].icon, Icon::ConnectionLost);
        assert!(urls.len() > 1);
        assert!(report.awake_ms <= 5_000 + 50);
    }
}
