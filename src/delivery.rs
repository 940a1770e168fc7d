use crate::constants::{MAX_BACKOFF_SECS, USER_AGENT};
use crate::{error, status, ui, warning};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to read payload {path}: {source}")]
    Payload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("payload {path} is not valid JSON: {source}")]
    InvalidPayload {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid CA bundle {path}: {reason}")]
    InvalidCaBundle { path: PathBuf, reason: String },
}

/// a request that never produced an HTTP response
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NetworkError(pub String);

/// the parts of an HTTP response we consume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// sends a single JSON POST
pub trait Transport {
    fn post_json(
        &self,
        url: &str,
        payload: &JsonValue,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, NetworkError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post_json(
        &self,
        url: &str,
        payload: &JsonValue,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, NetworkError> {
        (**self).post_json(url, payload, headers)
    }
}

/// TLS certificate verification mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerify {
    Enabled,
    Disabled,
    CaBundle(PathBuf),
}

impl TlsVerify {
    /// `true`/`1`/`yes`, `false`/`0`/`no`, anything else is a CA bundle path
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Self::Enabled,
            "false" | "0" | "no" => Self::Disabled,
            _ => Self::CaBundle(PathBuf::from(value.trim())),
        }
    }
}

/// production transport backed by a ureq agent
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(verify: &TlsVerify, timeout: Duration) -> Result<Self, DeliveryError> {
        use ureq::tls::{PemItem, RootCerts, TlsConfig, parse_pem};

        let tls = match verify {
            TlsVerify::Enabled => TlsConfig::builder().build(),
            TlsVerify::Disabled => {
                warning!("TLS verification disabled, use only on trusted networks");
                TlsConfig::builder().disable_verification(true).build()
            }
            TlsVerify::CaBundle(path) => {
                let pem = fs::read(path).map_err(|e| DeliveryError::InvalidCaBundle {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                let certs: Vec<_> = parse_pem(&pem)
                    .filter_map(|item| match item {
                        Ok(PemItem::Certificate(cert)) => Some(cert.to_owned()),
                        _ => None,
                    })
                    .collect();
                if certs.is_empty() {
                    return Err(DeliveryError::InvalidCaBundle {
                        path: path.clone(),
                        reason: "no PEM certificates found".to_string(),
                    });
                }
                TlsConfig::builder()
                    .root_certs(RootCerts::new_with_certs(&certs))
                    .build()
            }
        };

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .tls_config(tls)
            .build()
            .into();

        Ok(Self { agent })
    }
}

impl Transport for UreqTransport {
    fn post_json(
        &self,
        url: &str,
        payload: &JsonValue,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, NetworkError> {
        let mut request = self.agent.post(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = request
            .send_json(payload)
            .map_err(|e| NetworkError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));

        Ok(HttpResponse { status, body })
    }
}

/// bounded retries with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// wait after failed attempt `attempt` (1-based): `backoff_factor ^ attempt` seconds
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_factor.powi(exponent).min(MAX_BACKOFF_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

/// result of delivering one payload
///
/// `status` is None when the last attempt failed without an HTTP response,
/// in which case `body` holds the error text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: Option<u16>,
    pub body: String,
    pub attempts: u32,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(is_success)
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// posts payload files with retries
pub struct DeliveryClient<T> {
    transport: T,
    policy: RetryPolicy,
    headers: Vec<(String, String)>,
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, extra_headers: &[(String, String)]) -> Self {
        // a user-supplied User-Agent replaces the built-in one
        let overridden = extra_headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"));
        let mut headers = Vec::with_capacity(extra_headers.len() + 1);
        if !overridden {
            headers.push(("User-Agent".to_string(), USER_AGENT.to_string()));
        }
        headers.extend(extra_headers.iter().cloned());
        Self {
            transport,
            policy,
            headers,
        }
    }

    /// post the JSON file at `payload_path` to `url`
    ///
    /// the payload is re-read from disk for every attempt
    pub fn post(&self, url: &str, payload_path: &Path) -> Result<DeliveryOutcome, DeliveryError> {
        let max = self.policy.max_attempts.max(1);
        let name = payload_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut last = DeliveryOutcome {
            status: None,
            body: String::new(),
            attempts: 0,
        };

        for attempt in 1..=max {
            let payload = read_payload(payload_path)?;
            status!("[attempt {}/{}] POST {} ({})", attempt, max, url, name);

            let spinner = ui::spinner();
            let result = self.transport.post_json(url, &payload, &self.headers);
            spinner.finish_and_clear();

            let final_attempt = attempt == max;
            match result {
                Ok(response) if is_success(response.status) => {
                    status!("HTTP {}", response.status);
                    return Ok(DeliveryOutcome {
                        status: Some(response.status),
                        body: response.body,
                        attempts: attempt,
                    });
                }
                Ok(response) => {
                    if final_attempt {
                        error!("failed with HTTP {}", response.status);
                    } else {
                        warning!("received HTTP {}, will retry...", response.status);
                    }
                    last = DeliveryOutcome {
                        status: Some(response.status),
                        body: response.body,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    if final_attempt {
                        error!("network error: {}", e);
                    } else {
                        warning!("network error: {}, will retry...", e);
                    }
                    last = DeliveryOutcome {
                        status: None,
                        body: e.to_string(),
                        attempts: attempt,
                    };
                }
            }

            if !final_attempt {
                std::thread::sleep(self.policy.delay(attempt));
            }
        }

        Ok(last)
    }
}

fn read_payload(path: &Path) -> Result<JsonValue, DeliveryError> {
    let text = fs::read_to_string(path).map_err(|source| DeliveryError::Payload {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DeliveryError::InvalidPayload {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests;
