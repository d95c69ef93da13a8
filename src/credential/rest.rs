//! Reference [`TokenIssuer`] backed by a signed HTTP call, generalized from
//! the teacher's `exchanges::poloniex::client::Client` (HMAC-SHA256 request
//! signing, rate-limit gate, structured error parsing). §1 treats "REST
//! clients used for token issuance" as an external collaborator; this is
//! the one reference implementation this crate ships so the Credential
//! Service has something real to exercise in integration tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::CoreError;

use super::{Token, TokenIssuer, DEFAULT_TOKEN_LIFETIME};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RATE_LIMIT: i64 = 200;

/// Endpoint + credentials for one venue's token-issuance call.
#[derive(Debug, Clone)]
pub struct RestTokenIssuerConfig {
    pub base_url: String,
    pub token_endpoint: String,
    pub api_key: String,
    pub api_secret: String,
    pub rate_limit_per_window: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expires_in_s: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    code: Option<i32>,
    message: Option<String>,
}

struct RateLimitState {
    window_start: Instant,
}

/// Issues session tokens over a signed HTTP request, the same
/// shape as the Poloniex client's `request()`/`sign()` pair, generalized
/// to return a [`Token`] instead of a venue-specific body.
pub struct RestTokenIssuer {
    config: RestTokenIssuerConfig,
    http_client: HttpClient,
    request_count: AtomicI64,
    rate_limit_state: Mutex<RateLimitState>,
}

impl RestTokenIssuer {
    pub fn new(config: RestTokenIssuerConfig) -> Self {
        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build http client");
        Self {
            config,
            http_client,
            request_count: AtomicI64::new(0),
            rate_limit_state: Mutex::new(RateLimitState {
                window_start: Instant::now(),
            }),
        }
    }

    fn sign(&self, timestamp: i64) -> String {
        let payload = format!("POST\n{}\nsignTimestamp={}", self.config.token_endpoint, timestamp);
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(payload.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn check_rate_limit(&self) -> Result<(), CoreError> {
        let mut state = self.rate_limit_state.lock().unwrap();
        if state.window_start.elapsed() > Duration::from_secs(60) {
            self.request_count.store(0, Ordering::SeqCst);
            state.window_start = Instant::now();
        }
        let limit = if self.config.rate_limit_per_window > 0 {
            self.config.rate_limit_per_window
        } else {
            DEFAULT_RATE_LIMIT
        };
        if self.request_count.load(Ordering::SeqCst) >= limit {
            return Err(CoreError::Auth("token issuer rate limit exceeded".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenIssuer for RestTokenIssuer {
    async fn issue_token(&self) -> Result<Token, CoreError> {
        self.check_rate_limit()?;

        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp);
        let url = format!("{}{}", self.config.base_url, self.config.token_endpoint);

        debug!(url, "requesting session token");
        let response = self
            .http_client
            .post(&url)
            .header("key", &self.config.api_key)
            .header("signTimestamp", timestamp.to_string())
            .header("signature", signature)
            .header("signatureMethod", "hmacSHA256")
            .send()
            .await
            .map_err(|e| CoreError::Transport(format!("token request failed: {e}")))?;

        self.request_count.fetch_add(1, Ordering::SeqCst);

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::Transport(format!("reading token response failed: {e}")))?;

        if status.is_client_error() || status.is_server_error() {
            return Err(parse_error_response(status, &body));
        }

        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| CoreError::Auth(format!("malformed token response: {e}")))?;
        let lifetime = parsed
            .expires_in_s
            .map(chrono::Duration::seconds)
            .unwrap_or_else(|| chrono::Duration::from_std(DEFAULT_TOKEN_LIFETIME).unwrap());

        Ok(Token {
            value: parsed.token,
            expires_at: Utc::now() + lifetime,
        })
    }
}

fn parse_error_response(status: StatusCode, body: &[u8]) -> CoreError {
    let (code, message) = match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(resp) => (
            resp.code.unwrap_or(status.as_u16() as i32),
            resp.message
                .unwrap_or_else(|| String::from_utf8_lossy(body).to_string()),
        ),
        Err(_) => (status.as_u16() as i32, String::from_utf8_lossy(body).to_string()),
    };
    warn!(code, %message, "token issuer returned an error response");
    CoreError::Auth(format!("token issuer error {code}: {message}"))
}
