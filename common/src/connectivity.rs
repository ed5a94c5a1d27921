use log::{debug, info, warn};

use crate::{
    config::LinkConfig,
    deadline::{poll_until, Clock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
    /// Radio-specific terminal failure of the current join attempt.
    ConnectFailed,
}

pub trait Radio {
    /// Kicks off the join without waiting for it.
    fn begin(&mut self);
    fn status(&mut self) -> LinkStatus;
    /// Drops the current association and starts a fresh join.
    fn reconnect(&mut self);
    fn rssi(&mut self) -> Option<i8>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Connected,
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    pub outcome: LinkOutcome,
    pub elapsed_ms: u64,
    pub reconnects: u32,
    pub rssi: Option<i8>,
}

impl LinkReport {
    pub fn is_connected(&self) -> bool {
        self.outcome == LinkOutcome::Connected
    }
}

/// Polls the radio until it reports a link or `config.connect_timeout`
/// elapses. A `ConnectFailed` status restarts the join, at most once per
/// reconnect cooldown.
pub fn await_connection(
    radio: &mut dyn Radio,
    clock: &dyn Clock,
    config: &LinkConfig,
) -> LinkReport {
    let start_ms = clock.now_ms();
    let mut last_reconnect_ms: Option<u64> = None;
    let mut reconnects: u32 = 0;

    let result = poll_until(
        clock,
        config.connect_timeout(),
        config.poll_interval(),
        |_| match radio.status() {
            LinkStatus::Connected => Some(()),
            LinkStatus::ConnectFailed => {
                let now_ms = clock.now_ms();
                let cooled_down = last_reconnect_ms
                    .map(|last| now_ms.saturating_sub(last) >= config.reconnect_cooldown_ms)
                    .unwrap_or(true);
                if cooled_down {
                    warn!("wifi join failed; restarting join");
                    radio.reconnect();
                    last_reconnect_ms = Some(now_ms);
                    reconnects = reconnects.saturating_add(1);
                }
                None
            }
            LinkStatus::Idle | LinkStatus::Connecting => None,
        },
    );

    let elapsed_ms = clock.now_ms().saturating_sub(start_ms);
    match result {
        Ok(()) => {
            let rssi = radio.rssi();
            info!("wifi connected after {elapsed_ms} ms (rssi {rssi:?})");
            LinkReport {
                outcome: LinkOutcome::Connected,
                elapsed_ms,
                reconnects,
                rssi,
            }
        }
        Err(timed_out) => {
            debug!("link wait gave up after {} polls", timed_out.attempts);
            warn!("wifi not connected within {} ms", config.connect_timeout_ms);
            LinkReport {
                outcome: LinkOutcome::NotConnected,
                elapsed_ms,
                reconnects,
                rssi: None,
            }
        }
    }
}
