use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use tracing::{error, info, warn};

use room_panel_common::{
    config::{PanelConfig, PowerConfig},
    run_cycle, BatteryAdc, CycleError, CycleReport, Devices, FrameSurface, HttpResponse,
    LinkStatus, PersistedState, PowerError, Radio, RenderError, RenderRequest, Renderer,
    RequestTimeouts, RuntimeConfig, StateStore, StatusTransport, StoreError, SystemClock,
    TransportError, WakeReason,
};

const STATE_FILE: &str = "state.json";
/// Status polls a simulated join spends in `Connecting` before it resolves.
const SIM_JOIN_POLLS: u32 = 6;

#[derive(Debug, Clone)]
struct SimOptions {
    data_dir: PathBuf,
    device_id: String,
    link_up: bool,
    battery_mv: u32,
    drain_mv: u32,
    cycles: u64,
    time_scale: u32,
}

impl SimOptions {
    fn from_env() -> Self {
        let data_dir = std::env::var("ROOM_PANEL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".room-panel"));
        let device_id = std::env::var("ROOM_PANEL_DEVICE_ID")
            .unwrap_or_else(|_| "02:00:00:00:00:01".to_string())
            .to_ascii_uppercase();
        let link_up = std::env::var("ROOM_PANEL_SIM_LINK")
            .map(|value| !value.eq_ignore_ascii_case("down"))
            .unwrap_or(true);

        Self {
            data_dir,
            device_id,
            link_up,
            battery_mv: env_number("ROOM_PANEL_SIM_BATTERY_MV").unwrap_or(4_100),
            drain_mv: env_number("ROOM_PANEL_SIM_DRAIN_MV").unwrap_or(5),
            cycles: env_number("ROOM_PANEL_SIM_CYCLES").unwrap_or(0),
            time_scale: env_number("ROOM_PANEL_SIM_TIME_SCALE")
                .unwrap_or(1)
                .max(1),
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    let options = SimOptions::from_env();
    info!(
        "panel simulator {} (link {}, battery {} mV, state in {})",
        options.device_id,
        if options.link_up { "up" } else { "down" },
        options.battery_mv,
        options.data_dir.display()
    );

    let mut battery_mv = options.battery_mv;
    let mut wake = WakeReason::ColdOrOther;
    let mut completed: u64 = 0;

    loop {
        let cycle_config = config.clone();
        let cycle_options = options.clone();
        let result = tokio::task::spawn_blocking(move || {
            simulate_cycle(&cycle_config, &cycle_options, battery_mv, wake)
        })
        .await
        .context("cycle task panicked")?;

        let sleep = match result {
            Ok(report) => {
                log_report(&report);
                report.action.sleep
            }
            Err(err) if err.is_fatal() => {
                error!("fatal: {err}; halting");
                return Err(anyhow!(err));
            }
            Err(err) => {
                warn!("cycle failed: {err}");
                config.sleep.short()
            }
        };

        completed = completed.saturating_add(1);
        battery_mv = battery_mv.saturating_sub(options.drain_mv);
        if options.cycles != 0 && completed >= options.cycles {
            info!("simulated {completed} cycles");
            return Ok(());
        }

        let scaled = sleep / options.time_scale;
        info!(
            "sleeping {}s (simulated {:.1}s)",
            sleep.as_secs(),
            scaled.as_secs_f32()
        );
        tokio::select! {
            _ = tokio::time::sleep(scaled) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("stopping simulator after {completed} cycles");
                return Ok(());
            }
        }
        wake = WakeReason::Timer;
    }
}

fn log_report(report: &CycleReport) {
    let CycleReport {
        phases,
        persisted,
        awake_ms,
        ..
    } = report;
    info!("cycle awake {awake_ms} ms, phases {phases:?}");
    match persisted {
        Some(state) => info!(
            "persisted '{}' at {:.2} V",
            state.last_shown_message,
            state.last_voltage
        ),
        None => info!("panel state unchanged"),
    }
}

fn load_config() -> anyhow::Result<RuntimeConfig> {
    let Ok(path) = std::env::var("ROOM_PANEL_CONFIG") else {
        return Ok(RuntimeConfig::default());
    };
    let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    RuntimeConfig::from_json(&raw).with_context(|| format!("invalid config in {path}"))
}

/// Builds fresh devices the way a cold CPU would after deep sleep; only the
/// state file and the battery level carry over.
fn simulate_cycle(
    config: &RuntimeConfig,
    options: &SimOptions,
    battery_mv: u32,
    wake: WakeReason,
) -> Result<CycleReport, CycleError> {
    let clock = SystemClock::new();
    let mut radio = SimulatedRadio::new(options.link_up);
    let mut battery = SimulatedBattery::new(battery_mv, &config.power);
    let mut store = FileStateStore::new(&options.data_dir);
    let mut renderer = ConsoleRenderer::new(config.panel.clone());
    let mut transport = HttpTransport::default();

    radio.begin();
    run_cycle(
        Devices {
            radio: &mut radio,
            transport: &mut transport,
            battery: &mut battery,
            store: &mut store,
            renderer: &mut renderer,
            clock: &clock,
        },
        config,
        &options.device_id,
        wake,
    )
}

struct SimulatedRadio {
    link_up: bool,
    started: bool,
    polls: u32,
}

impl SimulatedRadio {
    fn new(link_up: bool) -> Self {
        Self {
            link_up,
            started: false,
            polls: 0,
        }
    }
}

impl Radio for SimulatedRadio {
    fn begin(&mut self) {
        self.started = true;
    }

    fn status(&mut self) -> LinkStatus {
        if !self.started {
            return LinkStatus::Idle;
        }
        self.polls = self.polls.saturating_add(1);
        match (self.polls > SIM_JOIN_POLLS, self.link_up) {
            (false, _) => LinkStatus::Connecting,
            (true, true) => LinkStatus::Connected,
            (true, false) => LinkStatus::ConnectFailed,
        }
    }

    fn reconnect(&mut self) {
        self.polls = 0;
    }

    fn rssi(&mut self) -> Option<i8> {
        self.link_up.then_some(-58)
    }
}

/// Blocking reqwest client, built on first use with the connect bound of the
/// first request.
#[derive(Default)]
struct HttpTransport {
    client: Option<reqwest::blocking::Client>,
}

impl HttpTransport {
    fn client(&mut self, connect: Duration) -> Result<&reqwest::blocking::Client, TransportError> {
        if self.client.is_none() {
            let client = reqwest::blocking::Client::builder()
                .connect_timeout(connect)
                .no_proxy()
                .build()
                .map_err(|err| {
                    warn!("http client setup failed: {err}");
                    TransportError::ConnectionRefused
                })?;
            self.client = Some(client);
        }
        self.client.as_ref().ok_or(TransportError::ConnectionRefused)
    }
}

impl StatusTransport for HttpTransport {
    fn get(
        &mut self,
        url: &str,
        timeouts: RequestTimeouts,
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client(timeouts.connect)?
            .get(url)
            .timeout(timeouts.total)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::ReadTimeout
    } else if err.is_connect() {
        TransportError::ConnectionRefused
    } else {
        TransportError::ConnectionLost
    }
}

/// Reports a fixed cell voltage as the raw count the board ADC would read.
struct SimulatedBattery {
    raw: u16,
}

impl SimulatedBattery {
    fn new(millivolts: u32, power: &PowerConfig) -> Self {
        Self {
            raw: raw_for_millivolts(millivolts, power),
        }
    }
}

impl BatteryAdc for SimulatedBattery {
    fn sample_raw(&mut self) -> Result<u16, PowerError> {
        Ok(self.raw)
    }
}

fn raw_for_millivolts(millivolts: u32, power: &PowerConfig) -> u16 {
    let full_scale = power.divider_ratio
        * power.reference_volts
        * (f32::from(power.vref_mv) / 1000.0);
    let counts = millivolts as f32 / 1000.0 / full_scale * f32::from(power.adc_max);
    counts.round().clamp(0.0, f32::from(power.adc_max)) as u16
}

/// JSON state file, replaced through a rename so a crash mid-write keeps the
/// previous record.
struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(STATE_FILE),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&mut self) -> Result<PersistedState, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(PersistedState::default());
            }
            Err(err) => return Err(StoreError::Unavailable(err.to_string())),
        };
        serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt(err.to_string()))
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let unavailable = |err: io::Error| StoreError::Unavailable(err.to_string());
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(unavailable)?;
        }
        let payload =
            serde_json::to_vec_pretty(state).map_err(|err| StoreError::Corrupt(err.to_string()))?;

        let staging = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&staging).map_err(unavailable)?;
        file.write_all(&payload).map_err(unavailable)?;
        file.sync_all().map_err(unavailable)?;
        fs::rename(&staging, &self.path).map_err(unavailable)
    }
}

/// Prints the frame instead of driving a panel.
struct ConsoleRenderer {
    panel: PanelConfig,
}

impl ConsoleRenderer {
    fn new(panel: PanelConfig) -> Self {
        Self { panel }
    }
}

impl Renderer for ConsoleRenderer {
    fn render(&mut self, request: &RenderRequest) -> Result<(), RenderError> {
        let surface = FrameSurface::allocate(&self.panel)?;
        info!(
            "frame {}x{} ({} bytes) [{}] {}",
            surface.width(),
            surface.height(),
            surface.as_bytes().len(),
            request.icon.as_str(),
            request.message
        );
        for line in request.overlay_lines() {
            info!("  {line}");
        }
        Ok(())
    }
}
