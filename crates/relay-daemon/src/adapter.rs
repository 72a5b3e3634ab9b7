//! The narrow surface toward the host-player collaborator. This is the
//! ONLY module that understands host-player vocabulary (browse lists,
//! queue items, toast messages) — core logic elsewhere never imports it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use relay_proto::config::{AlbumArtType, Config};
use relay_proto::model::{PlaybackMode, Program, Station};
use relay_proto::time::{self, WallClock};
use relay_proto::RelayError;

use crate::catalog::CatalogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// Pushed to the collaborator at most once a minute while a live stream is
/// active, or exactly once when a time-shift stream starts.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub albumart: Option<String>,
    pub duration_sec: i64,
    pub seek_ms: i64,
}

/// Inbound surface: everything the core consumes from the collaborator.
pub trait HostCallbacks: Send + Sync {
    fn i18n(&self, key: &str) -> String;
    fn toast(&self, level: ToastLevel, title: &str, body: &str);
    fn push_now_playing(&self, state: NowPlaying);
}

#[derive(Debug, Clone)]
pub struct BrowseItem {
    pub uri: String,
    pub label: String,
    pub sublabel: Option<String>,
    pub albumart: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BrowseGroup {
    pub region: String,
    pub items: Vec<BrowseItem>,
}

#[derive(Debug, Clone)]
pub struct ExplodedUri {
    pub station_id: String,
    pub ft: Option<String>,
    pub to: Option<String>,
    pub seek: Option<i64>,
    pub label: String,
}

pub struct ExternalAdapter {
    store: CatalogStore,
    config: Arc<Config>,
    callbacks: Arc<dyn HostCallbacks>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    /// Set by `force_now_playing_refresh` and consumed by the live ticker's
    /// next tick, bypassing the "has the program elapsed" gate.
    force_refresh: Arc<AtomicBool>,
}

impl ExternalAdapter {
    pub fn new(store: CatalogStore, config: Arc<Config>, callbacks: Arc<dyn HostCallbacks>) -> Self {
        Self {
            store,
            config,
            callbacks,
            ticker: Mutex::new(None),
            force_refresh: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Force the next live-ticker tick to recompute and push now-playing
    /// state even if the current program interval hasn't elapsed yet (e.g.
    /// the collaborator's host player seeked or switched stations).
    pub fn force_now_playing_refresh(&self) {
        self.force_refresh.store(true, Ordering::SeqCst);
    }

    /// Stations grouped by region, each carrying its current program's
    /// album art (per the configured `aaType` policy).
    pub async fn browse_live(&self) -> Vec<BrowseGroup> {
        let stations = self.store.stations().await;
        let now = time::broadcast_now(self.config.stream.delay_sec);

        let mut groups: Vec<BrowseGroup> = Vec::new();
        for station in &stations {
            let program = self.store.find_current(&station.station_id, now).await;
            let item = BrowseItem {
                uri: format!("live:{}", station.station_id),
                label: station.display_name.clone(),
                sublabel: program.as_ref().filter(|p| !p.is_filler()).map(|p| p.title.clone()),
                albumart: pick_albumart(self.config.stream.aa_type, station, program.as_ref()),
            };
            push_into_region(&mut groups, &station.region_name, item);
        }
        groups
    }

    /// Stations that support time-shift playback, grouped by region; each
    /// item points at `browse_station_day` for the current broadcast day.
    pub async fn browse_timefree(&self) -> Vec<BrowseGroup> {
        let stations = self.store.stations().await;
        let today = time::broadcast_date();

        let mut groups: Vec<BrowseGroup> = Vec::new();
        for station in stations.iter().filter(|s| s.timefree_flag) {
            let item = BrowseItem {
                uri: format!("timefree-day:{}:{}", station.station_id, time::format_8(time::broadcast_day_bounds(today).0)),
                label: station.display_name.clone(),
                sublabel: None,
                albumart: pick_albumart(self.config.stream.aa_type, station, None),
            };
            push_into_region(&mut groups, &station.region_name, item);
        }
        groups
    }

    /// The program list for one station/day as browsable time-shift items.
    pub async fn browse_station_day(&self, station_id: &str, broadcast_date: NaiveDate) -> Vec<BrowseItem> {
        let programs = self.store.list_for_day(station_id, broadcast_date).await;
        programs
            .into_iter()
            .filter(|p| !p.is_filler())
            .map(|p| BrowseItem {
                uri: format!("timefree:{station_id}:{}:{}", p.ft, p.to),
                label: p.title.clone(),
                sublabel: Some(p.pfm.clone()),
                albumart: p.img.clone(),
            })
            .collect()
    }

    /// Translate an internal browse URI back to `{stationId, ft?, to?, seek?}`.
    pub fn explode_uri(&self, uri: &str) -> Result<ExplodedUri, RelayError> {
        let invalid = || RelayError::InvalidRequest(format!("unrecognized browse uri: {uri}"));

        if let Some(rest) = uri.strip_prefix("live:") {
            return Ok(ExplodedUri {
                station_id: rest.to_string(),
                ft: None,
                to: None,
                seek: None,
                label: rest.to_string(),
            });
        }

        if let Some(rest) = uri.strip_prefix("timefree:") {
            let mut parts = rest.splitn(3, ':');
            let station_id = parts.next().ok_or_else(invalid)?.to_string();
            let ft = parts.next().ok_or_else(invalid)?.to_string();
            let to = parts.next().ok_or_else(invalid)?.to_string();
            return Ok(ExplodedUri {
                label: format!("{station_id} {ft}-{to}"),
                station_id,
                ft: Some(ft),
                to: Some(to),
                seek: None,
            });
        }

        Err(invalid())
    }

    /// Gate the once-per-minute (live) / once-ever (time-shift) now-playing
    /// push behind a single ticker task.
    pub async fn start_now_playing_ticker(
        &self,
        station_id: String,
        mode: PlaybackMode,
        ft: Option<WallClock>,
        to: Option<WallClock>,
        seek_sec: i64,
    ) {
        self.stop_ticker().await;

        match mode {
            PlaybackMode::Live => {
                let store = self.store.clone();
                let callbacks = self.callbacks.clone();
                let aa_type = self.config.stream.aa_type;
                let delay_sec = self.config.stream.delay_sec;
                let force_refresh = self.force_refresh.clone();

                let handle = tokio::spawn(async move {
                    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
                    // Tracks the currently-pushed program's end, so a tick
                    // only recomputes/pushes once that interval has elapsed
                    // or a forced refresh was requested, per the spec's
                    // "elapsed OR forced" gate — not on every tick.
                    let mut current_to_ts: Option<i64> = None;
                    loop {
                        interval.tick().await;
                        let now = time::broadcast_now(delay_sec);
                        let forced = force_refresh.swap(false, Ordering::SeqCst);
                        let elapsed = current_to_ts.map_or(true, |to_ts| now.timestamp() >= to_ts);
                        if !elapsed && !forced {
                            continue;
                        }

                        let Some(program) = store.find_current(&station_id, now).await else {
                            continue;
                        };
                        if program.is_filler() {
                            continue;
                        }
                        let Ok(ft) = time::parse(&program.ft) else { continue };
                        let Ok(to) = time::parse(&program.to) else { continue };
                        current_to_ts = Some(to.timestamp());

                        let seek_ms = (now - ft).num_milliseconds().max(0);
                        let duration_sec = time::span_sec(ft, to).unwrap_or(0);
                        let station = store.station(&station_id).await;
                        callbacks.push_now_playing(NowPlaying {
                            title: program.title.clone(),
                            artist: program.pfm.clone(),
                            albumart: station.as_ref().and_then(|s| pick_albumart(aa_type, s, Some(&program))),
                            duration_sec,
                            seek_ms,
                        });
                    }
                });
                *self.ticker.lock().await = Some(handle);
            }
            PlaybackMode::Timefree => {
                if let (Some(ft), Some(to)) = (ft, to) {
                    let station = self.store.station(&station_id).await;
                    let program = self.store.find_at(&station_id, ft).await;
                    let duration_sec = time::span_sec(ft, to).unwrap_or(0);
                    self.callbacks.push_now_playing(NowPlaying {
                        title: program.as_ref().map(|p| p.title.clone()).unwrap_or_default(),
                        artist: program.as_ref().map(|p| p.pfm.clone()).unwrap_or_default(),
                        albumart: station
                            .as_ref()
                            .and_then(|s| pick_albumart(self.config.stream.aa_type, s, program.as_ref())),
                        duration_sec,
                        seek_ms: seek_sec * 1000,
                    });
                }
                debug!("adapter: time-shift now-playing pushed once for {station_id}, ticker stays stopped");
            }
        }
    }

    pub async fn stop_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}

fn pick_albumart(aa_type: AlbumArtType, station: &Station, program: Option<&Program>) -> Option<String> {
    match aa_type {
        AlbumArtType::Banner => station.banner_url.clone(),
        AlbumArtType::Logo => station.logo_url.clone(),
        AlbumArtType::ProgramThenLogo => program
            .and_then(|p| p.img.clone())
            .or_else(|| station.logo_url.clone()),
    }
}

fn push_into_region(groups: &mut Vec<BrowseGroup>, region: &str, item: BrowseItem) {
    if let Some(group) = groups.iter_mut().find(|g| g.region == region) {
        group.items.push(item);
    } else {
        groups.push(BrowseGroup {
            region: region.to_string(),
            items: vec![item],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCallbacks;
    impl HostCallbacks for NoopCallbacks {
        fn i18n(&self, key: &str) -> String {
            key.to_string()
        }
        fn toast(&self, _level: ToastLevel, _title: &str, _body: &str) {}
        fn push_now_playing(&self, _state: NowPlaying) {}
    }

    fn adapter() -> ExternalAdapter {
        ExternalAdapter::new(CatalogStore::new(), Arc::new(Config::default()), Arc::new(NoopCallbacks))
    }

    #[test]
    fn explode_live_uri() {
        let a = adapter();
        let exploded = a.explode_uri("live:TBS").unwrap();
        assert_eq!(exploded.station_id, "TBS");
        assert!(exploded.ft.is_none());
    }

    #[test]
    fn explode_timefree_uri() {
        let a = adapter();
        let exploded = a.explode_uri("timefree:TBS:20250110050000:20250110060000").unwrap();
        assert_eq!(exploded.station_id, "TBS");
        assert_eq!(exploded.ft.as_deref(), Some("20250110050000"));
        assert_eq!(exploded.to.as_deref(), Some("20250110060000"));
    }

    #[test]
    fn explode_rejects_unknown_scheme() {
        let a = adapter();
        assert!(a.explode_uri("bogus:TBS").is_err());
    }

    #[test]
    fn albumart_policy_prefers_program_image_for_program_then_logo() {
        let station = Station {
            station_id: "TBS".into(),
            ascii_name: "TBS".into(),
            display_name: "TBS".into(),
            region_name: "Kanto".into(),
            area_id: "JP13".into(),
            area_display: "Tokyo".into(),
            banner_url: Some("banner.png".into()),
            logo_url: Some("logo.png".into()),
            areafree_flag: false,
            timefree_flag: true,
        };
        let program = Program {
            prog_id: "TBS_1".into(),
            station_id: "TBS".into(),
            ft: "20250110050000".into(),
            to: "20250110060000".into(),
            title: "Morning".into(),
            info: String::new(),
            pfm: String::new(),
            img: Some("program.png".into()),
        };
        assert_eq!(
            pick_albumart(AlbumArtType::ProgramThenLogo, &station, Some(&program)),
            Some("program.png".into())
        );
        assert_eq!(
            pick_albumart(AlbumArtType::Banner, &station, Some(&program)),
            Some("banner.png".into())
        );
    }
}
