//! Scripted stand-ins for the hardware traits.

use std::{cell::Cell, collections::VecDeque, time::Duration};

use crate::{
    availability::{HttpResponse, RequestTimeouts, StatusTransport},
    config::PanelConfig,
    connectivity::{LinkStatus, Radio},
    deadline::Clock,
    error::{PowerError, RenderError, StoreError, TransportError},
    power::BatteryAdc,
    render::{FrameSurface, RenderRequest, Renderer},
    store::StateStore,
    types::PersistedState,
};

/// Virtual time: only `sleep` and `advance` move it.
#[derive(Debug, Default)]
pub struct FakeClock {
    now_ms: Cell<u64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
    }
}

/// Replays statuses in order, repeating the last one forever.
pub struct ScriptedRadio {
    statuses: VecDeque<LinkStatus>,
    last: LinkStatus,
    pub reconnect_calls: u32,
}

impl ScriptedRadio {
    pub fn new(statuses: Vec<LinkStatus>) -> Self {
        Self {
            statuses: statuses.into(),
            last: LinkStatus::Idle,
            reconnect_calls: 0,
        }
    }
}

impl Radio for ScriptedRadio {
    fn begin(&mut self) {}

    fn status(&mut self) -> LinkStatus {
        if let Some(next) = self.statuses.pop_front() {
            self.last = next;
        }
        self.last
    }

    fn reconnect(&mut self) {
        self.reconnect_calls += 1;
    }

    fn rssi(&mut self) -> Option<i8> {
        (self.last == LinkStatus::Connected).then_some(-61)
    }
}

type Reply = Result<HttpResponse, TransportError>;

/// Replays responses in order, repeating the last one. Each request costs
/// `cost_ms` of virtual time, cut short by its total timeout.
pub struct ScriptedTransport<'a> {
    clock: &'a FakeClock,
    cost_ms: u64,
    replies: VecDeque<Reply>,
    last: Option<Reply>,
    pub urls: Vec<String>,
    pub timeouts: Vec<RequestTimeouts>,
}

impl<'a> ScriptedTransport<'a> {
    pub fn new(clock: &'a FakeClock, cost_ms: u64, replies: Vec<Reply>) -> Self {
        Self {
            clock,
            cost_ms,
            replies: replies.into(),
            last: None,
            urls: Vec::new(),
            timeouts: Vec::new(),
        }
    }
}

impl StatusTransport for ScriptedTransport<'_> {
    fn get(
        &mut self,
        url: &str,
        timeouts: RequestTimeouts,
    ) -> Result<HttpResponse, TransportError> {
        self.urls.push(url.to_string());
        self.timeouts.push(timeouts);

        self.clock
            .advance(self.cost_ms.min(timeouts.total.as_millis() as u64));

        if let Some(next) = self.replies.pop_front() {
            self.last = Some(next);
        }
        self.last.clone().unwrap_or(Err(TransportError::ConnectionRefused))
    }
}

pub struct FixedAdc {
    raw: Option<u16>,
    pub samples: u32,
}

impl FixedAdc {
    pub fn ok(raw: u16) -> Self {
        Self {
            raw: Some(raw),
            samples: 0,
        }
    }

    pub fn failing() -> Self {
        Self {
            raw: None,
            samples: 0,
        }
    }
}

impl BatteryAdc for FixedAdc {
    fn sample_raw(&mut self) -> Result<u16, PowerError> {
        self.samples += 1;
        self.raw
            .ok_or_else(|| PowerError::Adc("channel not configured".to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: PersistedState,
    pub saves: u32,
    pub fail_loads: bool,
    pub fail_saves: bool,
}

impl MemoryStore {
    pub fn with(state: PersistedState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_loads: true,
            ..Self::default()
        }
    }
}

impl StateStore for MemoryStore {
    fn load(&mut self) -> Result<PersistedState, StoreError> {
        if self.fail_loads {
            return Err(StoreError::Corrupt("voltage key has wrong type".to_string()));
        }
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Unavailable("partition full".to_string()));
        }
        self.state = state.clone();
        self.saves += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub frames: Vec<RenderRequest>,
    pub exhausted: bool,
    pub driver_fault: bool,
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, request: &RenderRequest) -> Result<(), RenderError> {
        if self.exhausted {
            return Err(RenderError::ResourceExhaustion {
                bytes: FrameSurface::bytes_for(&PanelConfig::default()),
            });
        }
        if self.driver_fault {
            return Err(RenderError::Driver("busy pin stuck high".to_string()));
        }
        self.frames.push(request.clone());
        Ok(())
    }
}
