//! One HTTP audio-stream request: resolve a playlist URL, spawn the
//! external transcoder, and pipe its stdout to the response writer with a
//! process-group kill sequence on cancellation.

use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use futures_util::Stream;
use reqwest::Client;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use relay_proto::config::StreamConfig;
use relay_proto::model::Station;
use relay_proto::platform;
use relay_proto::time::{self, WallClock};
use relay_proto::RelayError;

use crate::auth::AuthClient;
use crate::endpoints::Endpoints;

const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Default)]
pub struct PlayQuery {
    pub ft: Option<String>,
    pub to: Option<String>,
    pub seek: Option<i64>,
}

enum ResolvedMode {
    Live,
    Timefree { ft: WallClock, to: WallClock },
}

/// A spawned transcoder, ready to have its stdout piped into a response.
pub struct TranscoderProcess {
    child: Child,
}

/// Holds the child process alongside its stdout stream so that dropping the
/// stream — which axum does the moment a client disconnects — triggers the
/// process-group kill sequence. The child is never left to leak past the
/// response future that owns it.
struct GuardedChildStream {
    inner: ReaderStream<ChildStdout>,
    child: Option<Child>,
}

impl Stream for GuardedChildStream {
    type Item = std::io::Result<bytes::Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

impl Drop for GuardedChildStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tokio::spawn(async move {
                kill_group(&mut child).await;
            });
        }
    }
}

impl TranscoderProcess {
    /// Build the axum response body. The returned body owns the child
    /// process; when the body is dropped (client disconnect, child exit,
    /// or writer error) the process group is killed.
    pub fn into_body(mut self) -> Body {
        let stdout = self.child.stdout.take().expect("stdout was piped at spawn");
        let guarded = GuardedChildStream {
            inner: ReaderStream::new(stdout),
            child: Some(self.child),
        };
        Body::from_stream(guarded)
    }
}

/// Resolve a playlist URL for `station`/`query`, retrying via
/// `AuthClient::refresh` up to `MAX_RETRIES` times if no playable URL is
/// found, then spawn the transcoder against it.
pub async fn start(
    http: &Client,
    auth: &AuthClient,
    endpoints: &Endpoints,
    config: &StreamConfig,
    station: &Station,
    query: PlayQuery,
) -> Result<TranscoderProcess, RelayError> {
    let mode = resolve_mode(config, &query)?;
    let playlist_url =
        resolve_playlist_with_retry(http, auth, endpoints, station, &mode, query.seek.unwrap_or(0)).await?;
    spawn_transcoder(&playlist_url, &auth.token().await.unwrap_or_default()).await
}

fn resolve_mode(config: &StreamConfig, query: &PlayQuery) -> Result<ResolvedMode, RelayError> {
    let (Some(ft_raw), Some(to_raw)) = (&query.ft, &query.to) else {
        return Ok(ResolvedMode::Live);
    };

    let ft = time::parse(ft_raw)?;
    let to = time::parse(to_raw)?;
    time::validate_interval(ft, to)?;

    let now = time::broadcast_now(config.delay_sec);

    if ft <= now && now < to {
        // Currently on-air: serve live instead of time-shifted.
        return Ok(ResolvedMode::Live);
    }

    let future_cutoff = now + chrono::Duration::days(config.timeshift_future_days);
    if ft > future_cutoff {
        return Err(RelayError::InvalidRequest(format!(
            "requested interval {ft_raw}..{to_raw} is entirely in the future"
        )));
    }

    let past_cutoff = now - chrono::Duration::days(config.timeshift_past_days);
    if to < past_cutoff {
        return Err(RelayError::InvalidRequest(format!(
            "requested interval {ft_raw}..{to_raw} is older than the {}-day time-shift window",
            config.timeshift_past_days
        )));
    }

    Ok(ResolvedMode::Timefree { ft, to })
}

async fn resolve_playlist_with_retry(
    http: &Client,
    auth: &AuthClient,
    endpoints: &Endpoints,
    station: &Station,
    mode: &ResolvedMode,
    seek_sec: i64,
) -> Result<String, RelayError> {
    let mut last_err = None;
    for attempt in 0..=MAX_RETRIES {
        let token = auth
            .token()
            .await
            .ok_or_else(|| RelayError::Auth("no token available".into()))?;

        match fetch_and_pick_playlist(http, endpoints, station, mode, seek_sec, &token).await {
            Ok(url) => return Ok(url),
            Err(e) => {
                warn!("stream: playlist resolve attempt {attempt} failed: {e}");
                last_err = Some(e);
                if attempt < MAX_RETRIES {
                    auth.refresh().await?;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| RelayError::ResolvePlaylist("no attempts made".into())))
}

async fn fetch_and_pick_playlist(
    http: &Client,
    endpoints: &Endpoints,
    station: &Station,
    mode: &ResolvedMode,
    seek_sec: i64,
    token: &str,
) -> Result<String, RelayError> {
    let url = match mode {
        ResolvedMode::Live => endpoints.play_live(&station.station_id),
        ResolvedMode::Timefree { ft, to } => {
            let ft = if seek_sec > 0 { *ft + chrono::Duration::seconds(seek_sec) } else { *ft };
            endpoints.play_timefree(&station.station_id, &time::format_14(ft), &time::format_14(*to))
        }
    };

    let resp = http
        .get(&url)
        .header("X-Radiko-AuthToken", token)
        .send()
        .await
        .map_err(|e| RelayError::Upstream(format!("playlist fetch failed: {e}")))?;

    let body = resp
        .text()
        .await
        .map_err(|e| RelayError::Upstream(format!("playlist body read failed: {e}")))?;

    body.lines()
        .map(str::trim)
        .find(|line| line.starts_with("https://") && line.ends_with(".m3u8"))
        .map(str::to_string)
        .ok_or_else(|| RelayError::ResolvePlaylist("no playable .m3u8 URL in top-level playlist".into()))
}

async fn spawn_transcoder(playlist_url: &str, token: &str) -> Result<TranscoderProcess, RelayError> {
    let ffmpeg = platform::find_ffmpeg_binary()
        .ok_or_else(|| RelayError::Spawn("ffmpeg binary not found".into()))?;

    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-headers")
        .arg(format!("X-Radiko-AuthToken: {token}\r\n"))
        .arg("-i")
        .arg(playlist_url)
        .arg("-acodec")
        .arg("copy")
        .arg("-f")
        .arg("adts")
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| RelayError::Spawn(e.to_string()))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(stderr));
    }

    Ok(TranscoderProcess { child })
}

async fn drain_stderr(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!("ffmpeg: {line}");
    }
}

/// Send SIGTERM to the whole process group, wait up to 1s, then escalate to
/// SIGKILL if the child is still alive. Missing process (`ESRCH`) is not an
/// error — it means the process is already gone.
#[cfg(unix)]
pub async fn kill_group(child: &mut Child) {
    let Some(pid) = child.id() else { return };
    let pgid = -(pid as i32);

    unsafe {
        libc::kill(pgid, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(_) => return,
        }
    }

    unsafe {
        libc::kill(pgid, libc::SIGKILL);
    }
    let _ = child.wait().await;
}

#[cfg(not(unix))]
pub async fn kill_group(child: &mut Child) {
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_proto::config::StreamConfig;

    fn config() -> StreamConfig {
        StreamConfig {
            delay_sec: 20,
            aa_type: relay_proto::config::AlbumArtType::ProgramThenLogo,
            timeshift_past_days: 7,
            timeshift_future_days: 0,
        }
    }

    #[test]
    fn no_ft_to_resolves_to_live() {
        let mode = resolve_mode(&config(), &PlayQuery::default()).unwrap();
        assert!(matches!(mode, ResolvedMode::Live));
    }

    #[test]
    fn entirely_future_interval_is_rejected() {
        let now = time::now();
        let ft = now + chrono::Duration::days(1);
        let to = ft + chrono::Duration::hours(1);
        let query = PlayQuery {
            ft: Some(time::format_14(ft)),
            to: Some(time::format_14(to)),
            seek: None,
        };
        let err = resolve_mode(&config(), &query).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[test]
    fn interval_older_than_window_is_rejected() {
        let now = time::now();
        let ft = now - chrono::Duration::days(10);
        let to = ft + chrono::Duration::hours(1);
        let query = PlayQuery {
            ft: Some(time::format_14(ft)),
            to: Some(time::format_14(to)),
            seek: None,
        };
        let err = resolve_mode(&config(), &query).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[test]
    fn on_air_interval_resolves_to_live_not_timefree() {
        let now = time::now();
        let ft = now - chrono::Duration::minutes(10);
        let to = now + chrono::Duration::minutes(10);
        let query = PlayQuery {
            ft: Some(time::format_14(ft)),
            to: Some(time::format_14(to)),
            seek: None,
        };
        let mode = resolve_mode(&config(), &query).unwrap();
        assert!(matches!(mode, ResolvedMode::Live));
    }

    #[test]
    fn past_interval_within_window_resolves_to_timefree() {
        let now = time::now();
        let ft = now - chrono::Duration::days(2);
        let to = ft + chrono::Duration::hours(1);
        let query = PlayQuery {
            ft: Some(time::format_14(ft)),
            to: Some(time::format_14(to)),
            seek: None,
        };
        let mode = resolve_mode(&config(), &query).unwrap();
        assert!(matches!(mode, ResolvedMode::Timefree { .. }));
    }
}
