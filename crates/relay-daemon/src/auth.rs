//! Two-stage auth handshake with the upstream, plus optional premium login.
//!
//! Protocol: AUTH1 returns a token + a byte offset/length into `AUTH_KEY`;
//! the client slices and base64-encodes that span and presents it to AUTH2,
//! which resolves the caller's `areaId`. Concurrent refreshers are coalesced
//! onto a single in-flight handshake via `handshake_lock` — the first caller
//! to acquire it performs the handshake, everyone else just waits for the
//! same lock and then reads the snapshot it produced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::cookie::Jar;
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use relay_proto::config::AccountConfig;
use relay_proto::model::{AuthSession, PremiumState};
use relay_proto::RelayError;

use crate::endpoints::Endpoints;

const AUTH_KEY: &str = "bcd151073c03b352e1ef2fd66c32209742dc312e";
const MAX_RETRIES: u32 = 2;

/// Cheaply cloneable handle shared by `CatalogFetcher`, `StreamSession` and
/// the HTTP handlers; all of them ask this for a current token rather than
/// touching the handshake machinery directly.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    endpoints: Endpoints,
    session: RwLock<AuthSession>,
    handshake_lock: Mutex<()>,
    /// Bumped once per completed handshake (success or failure), so a
    /// caller that was waiting on `handshake_lock` can tell whether someone
    /// else already refreshed on its behalf and coalesce onto that result
    /// instead of re-handshaking.
    generation: AtomicU64,
    /// The error from the most recently completed handshake, if it failed.
    /// `None` means the most recent handshake succeeded.
    last_error: RwLock<Option<String>>,
}

impl AuthClient {
    pub fn new() -> Self {
        Self::with_endpoints(Endpoints::default())
    }

    /// Construct against an arbitrary upstream base (used by integration
    /// tests to point the handshake at a local `wiremock` server).
    pub fn with_endpoints(endpoints: Endpoints) -> Self {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client for auth");

        Self {
            inner: Arc::new(Inner {
                http,
                endpoints,
                session: RwLock::new(AuthSession::default()),
                handshake_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                last_error: RwLock::new(None),
            }),
        }
    }

    /// Optional premium login, then a guaranteed token acquisition. Login
    /// failure does not prevent acquiring a non-premium token.
    pub async fn init(&self, account: &AccountConfig) -> Result<(), RelayError> {
        let mut login_error = None;
        if let Some((mail, pass)) = account.login_credentials() {
            if let Err(e) = self.login(mail, pass).await {
                warn!("premium login failed, continuing non-premium: {e}");
                login_error = Some(e);
            }
        }

        self.refresh().await?;

        match login_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn login(&self, mail: &str, pass: &str) -> Result<(), RelayError> {
        let resp = self
            .inner
            .http
            .post(self.inner.endpoints.login())
            .form(&[("mail", mail), ("pass", pass)])
            .send()
            .await
            .map_err(|e| RelayError::Login(e.to_string()))?;

        let status = resp.status();
        if !(status.is_success() || status.as_u16() == 302) {
            return Err(RelayError::Login(format!(
                "login endpoint returned {status}"
            )));
        }

        match self.check_premium_state().await {
            Ok(state) => {
                let mut session = self.inner.session.write().await;
                session.premium_state = state;
            }
            Err(e) => warn!("member check failed after login: {e}"),
        }

        Ok(())
    }

    async fn check_premium_state(&self) -> Result<PremiumState, RelayError> {
        #[derive(serde::Deserialize)]
        struct MemberType {
            #[serde(rename = "type")]
            kind: String,
        }
        #[derive(serde::Deserialize)]
        struct CheckResponse {
            member_type: MemberType,
        }

        let resp = self
            .inner
            .http
            .get(self.inner.endpoints.check())
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        let parsed: CheckResponse = resp
            .json()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        Ok(if parsed.member_type.kind == "areafree" {
            PremiumState::Areafree
        } else {
            PremiumState::None
        })
    }

    /// A never-blocking snapshot of the current session.
    pub async fn token(&self) -> Option<String> {
        self.inner.session.read().await.token.clone()
    }

    pub async fn snapshot(&self) -> AuthSession {
        self.inner.session.read().await.clone()
    }

    pub async fn premium_active(&self) -> bool {
        self.inner.session.read().await.premium_active()
    }

    /// Force a fresh handshake. Concurrent callers coalesce onto the same
    /// handshake via `handshake_lock`: the first caller to acquire the lock
    /// performs it; everyone else, once the lock is free again, finds the
    /// `generation` counter has moved and returns that same result rather
    /// than starting a second handshake of its own.
    pub async fn refresh(&self) -> Result<(), RelayError> {
        let observed_generation = self.inner.generation.load(Ordering::SeqCst);
        let _guard = self.inner.handshake_lock.lock().await;

        if self.inner.generation.load(Ordering::SeqCst) != observed_generation {
            return match self.inner.last_error.read().await.clone() {
                Some(msg) => Err(RelayError::Auth(msg)),
                None => Ok(()),
            };
        }

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            match self.handshake_once().await {
                Ok((token, area_id)) => {
                    let mut session = self.inner.session.write().await;
                    session.token = Some(token);
                    session.area_id = Some(area_id);
                    info!("auth: handshake succeeded on attempt {attempt}");
                    *self.inner.last_error.write().await = None;
                    self.inner.generation.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) => {
                    warn!("auth: handshake attempt {attempt} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| RelayError::Auth("handshake failed".into()));
        *self.inner.last_error.write().await = Some(err.to_string());
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        Err(err)
    }

    async fn handshake_once(&self) -> Result<(String, String), RelayError> {
        let resp = self
            .inner
            .http
            .get(self.inner.endpoints.auth1())
            .header("X-Radiko-App", "pc_html5")
            .header("X-Radiko-App-Version", "0.0.1")
            .header("X-Radiko-User", "dummy_user")
            .header("X-Radiko-Device", "pc")
            .send()
            .await
            .map_err(|e| RelayError::Auth(format!("AUTH1 request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(RelayError::Auth(format!(
                "AUTH1 returned {}",
                resp.status()
            )));
        }

        let auth_token = header_str(&resp, "x-radiko-authtoken")?;
        let offset: usize = header_str(&resp, "x-radiko-keyoffset")?
            .parse()
            .map_err(|_| RelayError::Auth("AUTH1 keyoffset not an integer".into()))?;
        let length: usize = header_str(&resp, "x-radiko-keylength")?
            .parse()
            .map_err(|_| RelayError::Auth("AUTH1 keylength not an integer".into()))?;

        let key_bytes = AUTH_KEY.as_bytes();
        let end = (offset + length).min(key_bytes.len());
        let slice = key_bytes
            .get(offset..end)
            .ok_or_else(|| RelayError::Auth("AUTH_KEY offset/length out of range".into()))?;
        let partial_key = BASE64.encode(slice);

        let resp = self
            .inner
            .http
            .get(self.inner.endpoints.auth2())
            .header("X-Radiko-AuthToken", &auth_token)
            .header("X-Radiko-Partialkey", &partial_key)
            .header("X-Radiko-App", "pc_html5")
            .header("X-Radiko-App-Version", "0.0.1")
            .header("X-Radiko-User", "dummy_user")
            .header("X-Radiko-Device", "pc")
            .send()
            .await
            .map_err(|e| RelayError::Auth(format!("AUTH2 request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(RelayError::Auth(format!(
                "AUTH2 returned {}",
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| RelayError::Auth(format!("AUTH2 body read failed: {e}")))?;
        let area_id = body
            .split(',')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RelayError::Auth("AUTH2 body missing areaId field".into()))?
            .to_string();

        Ok((auth_token, area_id))
    }
}

fn header_str(resp: &reqwest::Response, name: &str) -> Result<String, RelayError> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| RelayError::Auth(format!("missing {name} header")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_key_is_forty_characters() {
        assert_eq!(AUTH_KEY.len(), 40);
    }

    #[tokio::test]
    async fn fresh_client_has_no_token() {
        let client = AuthClient::new();
        assert_eq!(client.token().await, None);
        assert!(!client.premium_active().await);
    }
}
