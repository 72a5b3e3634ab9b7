use thiserror::Error;

/// Every failure mode the relay can produce, named per the error-kind
/// catalogue rather than left as ad-hoc strings.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Stage-1 or stage-2 auth handshake failed after retries.
    #[error("auth handshake failed: {0}")]
    Auth(String),

    /// Premium login failed; caller may continue in non-premium mode.
    #[error("login failed: {0}")]
    Login(String),

    /// Transient upstream fetch failure; caller may retry.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    /// Unknown stationId at the relay, or no program at the requested instant.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed query (date not 8 digits, ft/to not 14 digits, negative seek).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `to <= ft`, or the interval spans more than 24h.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// No playable `.m3u8` URL found in the top-level playlist.
    #[error("could not resolve playlist: {0}")]
    ResolvePlaylist(String),

    /// The transcoder process could not be launched.
    #[error("failed to spawn transcoder: {0}")]
    Spawn(String),

    /// Bind-time failure — address already in use.
    #[error("port already in use: {0}")]
    PortInUse(String),

    /// Operation was cancelled by shutdown.
    #[error("cancelled by shutdown")]
    Shutdown,
}

impl RelayError {
    /// Short diagnostic string suitable for a 5xx response body.
    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}
