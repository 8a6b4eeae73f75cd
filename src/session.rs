//! Authenticated HTTP session with one Pi-hole appliance.
//!
//! The token and its expiry live behind a short `parking_lot` lock that is never held
//! across I/O. A separate async mutex serializes authentication, so at most one login
//! is in flight per host while readers keep seeing the current token.

use parking_lot::RwLock;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::{AuthRequest, AuthResponse};
use crate::config::HostConfig;
use crate::error::ExporterError;

/// Upper bound on any response body read from an appliance.
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "X-FTL-SID";

const AUTH_PATH: &str = "/api/auth";

/// Cached session token.
#[derive(Debug, Clone)]
struct Session {
    sid: String,
    expires_at: Instant,
}

impl Session {
    fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// HTTP client bound to one appliance, holding its session.
pub struct SessionClient {
    host: HostConfig,
    base_url: String,
    http: RwLock<Option<Client>>,
    timeout: Duration,
    session: RwLock<Option<Session>>,
    auth_lock: Mutex<()>,
}

impl SessionClient {
    /// Build a client for `host` with the given per-request timeout.
    ///
    /// TLS verification is configured on this client's own transport.
    pub fn new(host: HostConfig, timeout: Duration) -> Result<Self, ExporterError> {
        let base_url = host.base_url();
        let http = build_http_client(&host, timeout).map_err(|source| {
            ExporterError::Transport {
                url: base_url.clone(),
                source,
            }
        })?;

        Ok(Self {
            host,
            base_url,
            http: RwLock::new(Some(http)),
            timeout,
            session: RwLock::new(None),
            auth_lock: Mutex::new(()),
        })
    }

    /// Host this client talks to.
    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// Base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current session token, if one was obtained and has not expired.
    pub fn current_sid(&self) -> Option<String> {
        let now = Instant::now();
        self.session
            .read()
            .as_ref()
            .filter(|s| s.is_valid_at(now))
            .map(|s| s.sid.clone())
    }

    /// Log in and store a fresh session.
    ///
    /// Overlapping calls are serialized; each one performs its own login.
    pub async fn authenticate(&self) -> Result<String, ExporterError> {
        let _guard = self.auth_lock.lock().await;
        self.login().await
    }

    /// Make sure a valid session exists, logging in when it is missing or expired.
    ///
    /// Returns the token to send, or `None` for hosts without a password.
    pub async fn ensure_authenticated(&self) -> Result<Option<String>, ExporterError> {
        if !self.host.requires_auth() {
            return Ok(None);
        }
        if let Some(sid) = self.current_sid() {
            return Ok(Some(sid));
        }

        let _guard = self.auth_lock.lock().await;
        // Another caller may have logged in while we waited.
        if let Some(sid) = self.current_sid() {
            return Ok(Some(sid));
        }
        debug!(host = %self.base_url, "session missing or expired, authenticating");
        self.login().await.map(Some)
    }

    /// GET `path` with the session attached and decode the JSON body.
    ///
    /// A 401 on an authenticated request drops the session that was sent and retries
    /// once with a fresh login.
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExporterError> {
        let url = format!("{}{}", self.base_url, path);

        let sid = self.ensure_authenticated().await?;
        let mut response = self.get(&url, sid.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(rejected) = sid {
                warn!(host = %self.base_url, %url, "session rejected, re-authenticating");
                self.invalidate(&rejected);
                let sid = self.ensure_authenticated().await?;
                response = self.get(&url, sid.as_deref()).await?;
            }
        }

        if response.status() != StatusCode::OK {
            return Err(ExporterError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        let body = read_limited(response, &url).await?;
        let parsed = serde_json::from_slice(&body).map_err(|e| ExporterError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        debug!(%url, "fetched");
        Ok(parsed)
    }

    async fn get(&self, url: &str, sid: Option<&str>) -> Result<Response, ExporterError> {
        debug!(%url, "fetching");
        let mut request = self
            .http()?
            .get(url)
            .header("X-Content-Type-Options", "nosniff");
        if let Some(sid) = sid {
            request = request.header(SESSION_HEADER, sid);
        }

        request
            .send()
            .await
            .map_err(|source| ExporterError::Transport {
                url: url.to_string(),
                source,
            })
    }

    /// Forget the session if it is still `sid`; a newer login is kept.
    fn invalidate(&self, sid: &str) {
        let mut session = self.session.write();
        if session.as_ref().is_some_and(|s| s.sid == sid) {
            *session = None;
        }
    }

    /// Release pooled connections. Safe to call more than once.
    pub fn close(&self) {
        if self.http.write().take().is_some() {
            debug!(host = %self.base_url, "closed HTTP client");
        }
        self.session.write().take();
    }

    /// Whether [`SessionClient::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.http.read().is_none()
    }

    /// Per-request timeout of this client.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn http(&self) -> Result<Client, ExporterError> {
        // reqwest::Client is a cheap handle around a shared pool.
        self.http
            .read()
            .clone()
            .ok_or_else(|| ExporterError::Closed(self.base_url.clone()))
    }

    /// Perform the login request. Caller holds `auth_lock`.
    async fn login(&self) -> Result<String, ExporterError> {
        let url = format!("{}{}", self.base_url, AUTH_PATH);
        let auth_error = |reason: String| ExporterError::Authentication {
            host: self.base_url.clone(),
            reason,
        };

        debug!(host = %self.base_url, "authenticating");
        let response = self
            .http()?
            .post(&url)
            .json(&AuthRequest {
                password: &self.host.password,
            })
            .send()
            .await
            .map_err(|source| ExporterError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(host = %self.base_url, status = status.as_u16(), "authentication rejected");
            return Err(auth_error(format!("status code {}", status.as_u16())));
        }

        let body = read_limited(response, &url).await?;
        let auth: AuthResponse = serde_json::from_slice(&body).map_err(|e| {
            ExporterError::Decode {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;

        let sid = match (auth.session.valid, auth.session.sid) {
            (true, Some(sid)) if !sid.is_empty() => sid,
            _ => return Err(auth_error("session is not valid".to_string())),
        };

        let validity = Duration::from_secs(auth.session.validity.max(0) as u64);
        *self.session.write() = Some(Session {
            sid: sid.clone(),
            expires_at: Instant::now() + validity,
        });
        debug!(host = %self.base_url, validity_secs = validity.as_secs(), "authenticated");
        Ok(sid)
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_http_client(host: &HostConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .redirect(Policy::none())
        .danger_accept_invalid_certs(host.skip_tls_verify)
        .build()
}

/// Read at most [`MAX_RESPONSE_SIZE`] bytes of a body.
async fn read_limited(mut response: Response, url: &str) -> Result<Vec<u8>, ExporterError> {
    let too_large = || ExporterError::Decode {
        url: url.to_string(),
        reason: format!("response body exceeds {MAX_RESPONSE_SIZE} bytes"),
    };

    if response
        .content_length()
        .is_some_and(|len| len > MAX_RESPONSE_SIZE as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| ExporterError::Transport {
            url: url.to_string(),
            source,
        })?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_SIZE {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
