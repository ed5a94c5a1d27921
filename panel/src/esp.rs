use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::Read,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::Gpio35,
};
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    io::EspIOError,
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{EspWifi, WifiEvent},
};
use log::{error, info, warn};

use room_panel_common::{
    config::{NetworkConfig, PanelConfig, SleepConfig},
    run_cycle,
    store::{clamp_message, KEY_LAST_MESSAGE, KEY_LAST_VOLTAGE, MAX_MESSAGE_BYTES, STATE_NAMESPACE},
    types::DEFAULT_VOLTAGE,
    BatteryAdc, Devices, FrameSurface, HttpResponse, LinkStatus, PersistedState, PowerError,
    Radio, RenderError, RenderRequest, Renderer, RequestTimeouts, RuntimeConfig, StateStore,
    StatusTransport, StoreError, SystemClock, TransportError, WakeReason,
};

const NVS_RUNTIME_KEY: &str = "runtime_json";
const MAX_HTTP_BODY: usize = 1024;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let wake = wake_reason();
    let clock = SystemClock::new();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let mut store = NvsStore::new(nvs_partition.clone())?;

    let mut runtime = store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_defaults(&mut runtime);

    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let mut radio = EspRadio::new(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi setup failed")?;
    // Join runs in the background while the rest of the board comes up.
    radio.begin();

    let device_id = radio.device_id()?;
    info!("panel {device_id} awake ({})", wake.as_str());

    let mut battery = EspBattery::new(adc1, pins.gpio35).context("battery adc setup failed")?;
    let mut transport = EspTransport;
    let mut renderer = PanelRenderer::new(runtime.panel.clone());

    let result = run_cycle(
        Devices {
            radio: &mut radio,
            transport: &mut transport,
            battery: &mut battery,
            store: &mut store,
            renderer: &mut renderer,
            clock: &clock,
        },
        &runtime,
        &device_id,
        wake,
    );

    radio.shutdown();

    match result {
        Ok(report) => {
            info!(
                "cycle awake {} ms, phases {:?}, persisted {}",
                report.awake_ms,
                report.phases,
                report.persisted.is_some()
            );
            deep_sleep(report.action.sleep)
        }
        Err(err) if err.is_fatal() => {
            error!("fatal: {err}; halting until reset");
            halt()
        }
        Err(err) => {
            warn!("cycle failed: {err}");
            deep_sleep(runtime.sleep.short())
        }
    }
}

/// Setup failed before a cycle could run. Sleeping instead of returning keeps
/// a persistent fault from boot-looping the battery flat.
pub fn back_off(err: anyhow::Error) -> ! {
    error!("panel setup failed: {err:#}");
    deep_sleep(SleepConfig::default().short())
}

fn ensure_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.trim().is_empty() {
        runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }
    if runtime.network.wifi_pass.is_empty() {
        runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    }
    if let Some(prefix) = option_env!("PANEL_ENDPOINT") {
        if runtime.endpoint.url_prefix == RuntimeConfig::default().endpoint.url_prefix {
            runtime.endpoint.url_prefix = prefix.to_string();
        }
    }
}

fn wake_reason() -> WakeReason {
    let cause = unsafe { esp_idf_svc::sys::esp_sleep_get_wakeup_cause() };
    if cause == esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER {
        WakeReason::Timer
    } else {
        WakeReason::ColdOrOther
    }
}

fn deep_sleep(duration: Duration) -> ! {
    info!("deep sleep for {}s", duration.as_secs());
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    unsafe {
        esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(micros);
        esp_idf_svc::sys::esp_deep_sleep_start()
    }
}

/// Sleeps with every wake source disabled; only reset or power-cycle recovers.
fn halt() -> ! {
    unsafe {
        esp_idf_svc::sys::esp_sleep_disable_wakeup_source(
            esp_idf_svc::sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_ALL,
        );
        esp_idf_svc::sys::esp_deep_sleep_start()
    }
}

struct EspRadio {
    wifi: EspWifi<'static>,
    join_failed: Arc<AtomicBool>,
    leaving: Arc<AtomicBool>,
    _disconnects: EspSubscription<'static, System>,
}

impl EspRadio {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> anyhow::Result<Self> {
        let mut wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .wifi_pass
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        let join_failed = Arc::new(AtomicBool::new(false));
        let leaving = Arc::new(AtomicBool::new(false));
        let disconnects = {
            let join_failed = join_failed.clone();
            let leaving = leaving.clone();
            sys_loop.subscribe::<WifiEvent, _>(move |event| {
                if matches!(event, WifiEvent::StaDisconnected { .. })
                    && !leaving.swap(false, Ordering::AcqRel)
                {
                    join_failed.store(true, Ordering::Release);
                }
            })?
        };

        Ok(Self {
            wifi,
            join_failed,
            leaving,
            _disconnects: disconnects,
        })
    }

    fn device_id(&self) -> anyhow::Result<String> {
        let mac = self.wifi.sta_netif().get_mac()?;
        Ok(mac
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(":"))
    }

    fn shutdown(&mut self) {
        self.leaving.store(true, Ordering::Release);
        if let Err(err) = self.wifi.disconnect() {
            warn!("wifi disconnect failed: {err}");
        }
        if let Err(err) = self.wifi.stop() {
            warn!("wifi stop failed: {err}");
        }
    }
}

impl Radio for EspRadio {
    fn begin(&mut self) {
        if let Err(err) = self.wifi.start() {
            warn!("wifi start failed: {err}");
            self.join_failed.store(true, Ordering::Release);
            return;
        }
        if let Err(err) = self.wifi.connect() {
            warn!("wifi connect failed: {err}");
            self.join_failed.store(true, Ordering::Release);
        }
    }

    fn status(&mut self) -> LinkStatus {
        if self.join_failed.load(Ordering::Acquire) {
            return LinkStatus::ConnectFailed;
        }
        match self.wifi.is_started() {
            Ok(true) => {}
            _ => return LinkStatus::Idle,
        }
        match (self.wifi.is_connected(), self.wifi.is_up()) {
            (Ok(true), Ok(true)) => LinkStatus::Connected,
            _ => LinkStatus::Connecting,
        }
    }

    fn reconnect(&mut self) {
        // Only a live association posts StaDisconnected, so `leaving` is armed
        // just for that case.
        if matches!(self.wifi.is_connected(), Ok(true)) {
            self.leaving.store(true, Ordering::Release);
            if let Err(err) = self.wifi.disconnect() {
                self.leaving.store(false, Ordering::Release);
                warn!("wifi disconnect failed: {err}");
            }
        }
        self.join_failed.store(false, Ordering::Release);
        if let Err(err) = self.wifi.connect() {
            warn!("wifi reconnect failed: {err}");
            self.join_failed.store(true, Ordering::Release);
        }
    }

    fn rssi(&mut self) -> Option<i8> {
        let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        (rc == esp_idf_svc::sys::ESP_OK).then_some(ap_info.rssi)
    }
}

/// One HTTP connection per attempt. The IDF client has a single network
/// timeout, so it gets the whole per-request budget.
struct EspTransport;

impl StatusTransport for EspTransport {
    fn get(
        &mut self,
        url: &str,
        timeouts: RequestTimeouts,
    ) -> Result<HttpResponse, TransportError> {
        let http_conf = HttpClientConfiguration {
            timeout: Some(timeouts.total),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&http_conf).map_err(|err| {
            warn!("http client setup failed: {err}");
            TransportError::ConnectionRefused
        })?;
        let mut client = HttpClient::wrap(connection);
        let request = client
            .request(Method::Get, url, &[])
            .map_err(transport_error)?;
        let mut response = request.submit().map_err(transport_error)?;

        let status = response.status();
        let reason = response.status_message().unwrap_or_default().to_string();

        let mut body = Vec::new();
        let mut chunk = [0_u8; 256];
        loop {
            let read = response.read(&mut chunk).map_err(transport_error)?;
            if read == 0 {
                break;
            }
            let room = MAX_HTTP_BODY.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..read.min(room)]);
            if room <= read {
                break;
            }
        }

        Ok(HttpResponse {
            status,
            reason,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn transport_error(err: EspIOError) -> TransportError {
    let code = err.0.code();
    if code == esp_idf_svc::sys::ESP_ERR_HTTP_CONNECT as esp_idf_svc::sys::esp_err_t {
        TransportError::ConnectionRefused
    } else if code == esp_idf_svc::sys::ESP_ERR_HTTP_EAGAIN as esp_idf_svc::sys::esp_err_t {
        TransportError::ReadTimeout
    } else {
        TransportError::ConnectionLost
    }
}

struct EspBattery {
    channel: AdcChannelDriver<'static, Gpio35, AdcDriver<'static, ADC1>>,
}

impl EspBattery {
    fn new(adc: ADC1, pin: Gpio35) -> anyhow::Result<Self> {
        let driver = AdcDriver::new(adc)?;
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        Ok(Self {
            channel: AdcChannelDriver::new(driver, pin, &config)?,
        })
    }
}

impl BatteryAdc for EspBattery {
    fn sample_raw(&mut self) -> Result<u16, PowerError> {
        self.channel
            .read_raw()
            .map_err(|err| PowerError::Adc(err.to_string()))
    }
}

/// Panel state and runtime config share one NVS namespace. Each key write is
/// atomic on its own, so the voltage goes first and the message last: a
/// torn save leaves the old message and forces a redraw next cycle at worst.
struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, STATE_NAMESPACE, true)?,
        })
    }

    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let mut buffer = vec![0_u8; 4096];
        match self.nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(RuntimeConfig::from_json(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

impl StateStore for NvsStore {
    fn load(&mut self) -> Result<PersistedState, StoreError> {
        let mut buffer = [0_u8; MAX_MESSAGE_BYTES + 1];
        let message = self
            .nvs
            .get_str(KEY_LAST_MESSAGE, &mut buffer)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?
            .unwrap_or_default()
            .to_string();
        let voltage = self
            .nvs
            .get_u32(KEY_LAST_VOLTAGE)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?
            .map(f32::from_bits)
            .filter(|volts| volts.is_finite())
            .unwrap_or(DEFAULT_VOLTAGE);

        Ok(PersistedState {
            last_shown_message: message,
            last_voltage: voltage,
        })
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        self.nvs
            .set_u32(KEY_LAST_VOLTAGE, state.last_voltage.to_bits())
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        self.nvs
            .set_str(KEY_LAST_MESSAGE, clamp_message(&state.last_shown_message))
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(())
    }
}

/// Composes the frame buffer and logs it; the e-paper driver is not wired in.
struct PanelRenderer {
    panel: PanelConfig,
}

impl PanelRenderer {
    fn new(panel: PanelConfig) -> Self {
        Self { panel }
    }
}

impl Renderer for PanelRenderer {
    fn render(&mut self, request: &RenderRequest) -> Result<(), RenderError> {
        let surface = FrameSurface::allocate(&self.panel)?;
        info!(
            "frame {}x{} [{}] {}",
            surface.width(),
            surface.height(),
            request.icon.as_str(),
            request.message
        );
        for line in request.overlay_lines() {
            info!("  {line}");
        }
        Ok(())
    }
}
