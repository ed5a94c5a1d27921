use std::time::Duration;

use log::{info, warn};

use crate::{
    config::EndpointConfig,
    deadline::{poll_until, Clock},
    error::{CycleError, TransportError},
    types::{AvailabilityResult, AvailabilityStatus},
};

/// Per-request bounds handed to the transport. `total` covers connect, send
/// and body read together and never exceeds what is left of the fetch
/// deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeouts {
    pub connect: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait StatusTransport {
    fn get(&mut self, url: &str, timeouts: RequestTimeouts) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatus {
    pub status: AvailabilityStatus,
    pub message: String,
}

pub fn request_url(prefix: &str, device_id: &str, voltage: f32) -> String {
    format!("{prefix}{device_id}?battery={voltage:.2}")
}

/// Body format is `label\nstatusWord\ndetail`; anything after the second
/// newline belongs to `detail`.
pub fn parse_response(body: &str) -> Result<ParsedStatus, CycleError> {
    let malformed = || CycleError::MalformedPayload {
        raw: body.to_string(),
    };
    let (label, rest) = body.split_once('\n').ok_or_else(malformed)?;
    let (status_word, detail) = rest.split_once('\n').ok_or_else(malformed)?;

    let status = if status_word == "busy" {
        AvailabilityStatus::Busy
    } else {
        AvailabilityStatus::Free
    };

    Ok(ParsedStatus {
        status,
        message: format!("{label}, {detail}").trim().to_string(),
    })
}

/// Requests the room status, retrying non-success answers back to back
/// until the fetch deadline runs out.
pub fn fetch_status(
    transport: &mut dyn StatusTransport,
    clock: &dyn Clock,
    config: &EndpointConfig,
    device_id: &str,
    battery_voltage: f32,
) -> AvailabilityResult {
    let url = request_url(&config.url_prefix, device_id, battery_voltage);
    let connect = Duration::from_millis(config.connect_timeout_ms);
    let per_request = connect + Duration::from_millis(config.read_timeout_ms);
    let mut last_observed = (
        TransportError::ConnectionRefused.code(),
        TransportError::ConnectionRefused.to_string(),
    );

    info!("GET {url}");
    let result = poll_until(
        clock,
        config.fetch_deadline(),
        config.retry_delay(),
        |remaining| {
            let total = per_request.min(remaining);
            let timeouts = RequestTimeouts {
                connect: connect.min(total),
                total,
            };
            match transport.get(&url, timeouts) {
                Ok(response) if response.is_success() => Some(response),
                Ok(response) => {
                    warn!("status request answered {} {}", response.status, response.reason);
                    last_observed = (i32::from(response.status), response.reason);
                    None
                }
                Err(err) => {
                    warn!("status request failed: {err}");
                    last_observed = (err.code(), err.to_string());
                    None
                }
            }
        },
    );

    match result {
        Ok(response) => {
            let code = i32::from(response.status);
            match parse_response(&response.body) {
                Ok(parsed) => AvailabilityResult {
                    status: parsed.status,
                    display_message: parsed.message,
                    raw_http_code: code,
                },
                Err(err) => {
                    warn!("{err}");
                    AvailabilityResult {
                        status: AvailabilityStatus::HttpError,
                        display_message: err.to_string(),
                        raw_http_code: code,
                    }
                }
            }
        }
        Err(timed_out) => {
            warn!(
                "status fetch gave up after {} attempts in {} ms",
                timed_out.attempts, timed_out.elapsed_ms
            );
            let (code, reason) = last_observed;
            let err = CycleError::TransportFailure { code, reason };
            AvailabilityResult {
                status: AvailabilityStatus::HttpError,
                display_message: err.to_string().trim_end().to_string(),
                raw_http_code: code,
            }
        }
    }
}
