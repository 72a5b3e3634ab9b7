//! Parallel XML fetch for regions/areas/dates, normalization (broadcast-day
//! folding + gap-fill), and insertion into `CatalogStore`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use relay_proto::model::{Area, Program, Station};
use relay_proto::time::{self, WallClock};
use relay_proto::RelayError;

use super::store::CatalogStore;
use super::xml;
use crate::endpoints::Endpoints;

/// Programs in a broadcast day leave no gap wider than this without a
/// synthetic filler being inserted.
const GAP_FILL_THRESHOLD_SEC: i64 = 60;

pub struct CatalogFetcher {
    http: Client,
    store: CatalogStore,
    endpoints: Endpoints,
    concurrency: usize,
}

impl CatalogFetcher {
    pub fn new(store: CatalogStore, concurrency: usize) -> Self {
        Self::with_endpoints(store, concurrency, Endpoints::default())
    }

    /// Construct against an arbitrary upstream base (used by integration
    /// tests to point fetches at a local `wiremock` server).
    pub fn with_endpoints(store: CatalogStore, concurrency: usize, endpoints: Endpoints) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client for catalog fetcher");
        Self {
            http,
            store,
            endpoints,
            concurrency: concurrency.max(1),
        }
    }

    /// Startup: fetch region + all areas, then today's program feed per
    /// area, with a concurrency cap. Per-URL failures are logged and
    /// skipped; the batch result is the union of what succeeded.
    pub async fn bootstrap(&self, area_ids: &[String]) -> Result<(), RelayError> {
        let (stations, areas) = self.fetch_stations_and_areas(area_ids).await?;
        self.store.set_catalog(stations, areas).await;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::new();
        for area_id in area_ids {
            let permit = semaphore.clone();
            let http = self.http.clone();
            let store = self.store.clone();
            let endpoints = self.endpoints.clone();
            let area_id = area_id.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                if let Err(e) = fetch_today_area(&http, &store, &endpoints, &area_id).await {
                    warn!("catalog: bootstrap fetch failed for area {area_id}: {e}");
                }
            }));
        }
        for t in tasks {
            let _ = t.await;
        }

        info!("catalog: bootstrap complete, {} programs loaded", self.store.count().await);
        Ok(())
    }

    /// The 04:59 JST daily refresh: fetch by explicit `yyyymmdd` so the new
    /// broadcast day is queryable immediately after rollover, then purge
    /// anything that ended before the new day's start.
    pub async fn refresh_daily(&self, area_ids: &[String]) -> Result<(), RelayError> {
        let date = time::broadcast_date();
        let date_str = time::format_8(time::broadcast_day_bounds(date).0);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::new();
        for area_id in area_ids {
            let permit = semaphore.clone();
            let http = self.http.clone();
            let store = self.store.clone();
            let endpoints = self.endpoints.clone();
            let area_id = area_id.clone();
            let date_str = date_str.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                if let Err(e) = fetch_date_area(&http, &store, &endpoints, &area_id, &date_str).await {
                    warn!("catalog: daily refresh failed for area {area_id}: {e}");
                }
            }));
        }
        for t in tasks {
            let _ = t.await;
        }

        let (start, _) = time::broadcast_day_bounds(date);
        let removed = self.store.purge_before(start).await;
        info!("catalog: daily refresh complete, purged {removed} stale programs");
        Ok(())
    }

    /// Lazy single-station fetch used when `findAt` misses and the
    /// requested time falls within the allowed time-shift window.
    pub async fn fetch_station(&self, station_id: &str, broadcast_date: NaiveDate) -> Result<(), RelayError> {
        let station = self
            .store
            .station(station_id)
            .await
            .ok_or_else(|| RelayError::NotFound(format!("{station_id} not in available stations")))?;

        let date_str = time::format_8(time::broadcast_day_bounds(broadcast_date).0);
        let url = self.endpoints.prog_date_area(&date_str, &station.area_id);

        let xml = fetch_text(&self.http, &url).await?;
        let per_station = xml::parse_program_doc(&xml)?;
        for (sid, programs) in per_station {
            if sid != station_id {
                continue;
            }
            insert_with_gap_fill(&self.store, broadcast_date, programs).await?;
        }
        Ok(())
    }

    async fn fetch_stations_and_areas(
        &self,
        area_ids: &[String],
    ) -> Result<(HashMap<String, Station>, HashMap<String, Area>), RelayError> {
        let mut areas = HashMap::new();
        for area_id in area_ids {
            let url = self.endpoints.station_area(area_id);
            match fetch_text(&self.http, &url).await {
                Ok(xml) => match xml::parse_area_doc(&xml) {
                    Ok(area) => {
                        areas.insert(area.area_id.clone(), area);
                    }
                    Err(e) => warn!("catalog: area doc parse failed for {area_id}: {e}"),
                },
                Err(e) => warn!("catalog: area fetch failed for {area_id}: {e}"),
            }
        }

        let region_xml = fetch_text(&self.http, &self.endpoints.station_full()).await?;
        let areas_ref = &areas;
        let all_stations = xml::parse_region_doc(&region_xml, |area_id| {
            areas_ref
                .get(area_id)
                .map(|a| a.area_name.clone())
                .unwrap_or_else(|| area_id.to_string())
        })?;

        let allowed: std::collections::HashSet<&str> = areas
            .values()
            .flat_map(|a| a.station_ids.iter().map(|s| s.as_str()))
            .collect();

        let stations: HashMap<String, Station> = all_stations
            .into_iter()
            .filter(|s| allowed.contains(s.station_id.as_str()) || area_ids.contains(&s.area_id))
            .map(|s| (s.station_id.clone(), s))
            .collect();

        Ok((stations, areas))
    }
}

async fn fetch_today_area(
    http: &Client,
    store: &CatalogStore,
    endpoints: &Endpoints,
    area_id: &str,
) -> Result<(), RelayError> {
    let url = endpoints.prog_today_area(area_id);
    let xml = fetch_text(http, &url).await?;
    let per_station = xml::parse_program_doc(&xml)?;
    let date = time::broadcast_date();
    for (_station_id, programs) in per_station {
        insert_with_gap_fill(store, date, programs).await?;
    }
    Ok(())
}

async fn fetch_date_area(
    http: &Client,
    store: &CatalogStore,
    endpoints: &Endpoints,
    area_id: &str,
    date_str: &str,
) -> Result<(), RelayError> {
    let url = endpoints.prog_date_area(date_str, area_id);
    let xml = fetch_text(http, &url).await?;
    let per_station = xml::parse_program_doc(&xml)?;
    let date = NaiveDate::parse_from_str(date_str, "%Y%m%d")
        .map_err(|e| RelayError::Upstream(format!("bad date {date_str}: {e}")))?;
    for (_station_id, programs) in per_station {
        insert_with_gap_fill(store, date, programs).await?;
    }
    Ok(())
}

async fn fetch_text(http: &Client, url: &str) -> Result<String, RelayError> {
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| RelayError::Upstream(format!("GET {url} failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(RelayError::Upstream(format!(
            "GET {url} returned {}",
            resp.status()
        )));
    }
    resp.text()
        .await
        .map_err(|e| RelayError::Upstream(format!("GET {url} body read failed: {e}")))
}

/// Gap-fill a parsed program list for one broadcast day, then upsert every
/// resulting record (real and synthetic) into the store.
async fn insert_with_gap_fill(
    store: &CatalogStore,
    broadcast_date: NaiveDate,
    mut programs: Vec<Program>,
) -> Result<(), RelayError> {
    if programs.is_empty() {
        return Ok(());
    }
    programs.sort_by(|a, b| a.ft.cmp(&b.ft));

    let filled = gap_fill(&programs, broadcast_date)?;
    for p in filled {
        store.upsert_program(p).await?;
    }
    Ok(())
}

/// Insert synthetic filler programs (empty title) into any gap >= 60s
/// between successive programs, so every instant within the broadcast day
/// resolves to exactly one record.
fn gap_fill(programs: &[Program], broadcast_date: NaiveDate) -> Result<Vec<Program>, RelayError> {
    let (day_start, day_end) = time::broadcast_day_bounds(broadcast_date);
    let station_id = programs[0].station_id.clone();

    let mut out = Vec::with_capacity(programs.len() + 2);
    let mut cursor = day_start;

    for p in programs {
        let ft = time::parse(&p.ft)?;
        let to = time::parse(&p.to)?;

        if time::span_sec(cursor, ft)? >= GAP_FILL_THRESHOLD_SEC {
            out.push(filler(&station_id, cursor, ft));
        }
        out.push(p.clone());
        if to > cursor {
            cursor = to;
        }
    }

    if time::span_sec(cursor, day_end)? >= GAP_FILL_THRESHOLD_SEC {
        out.push(filler(&station_id, cursor, day_end));
    }

    Ok(out)
}

fn filler(station_id: &str, ft: WallClock, to: WallClock) -> Program {
    Program {
        prog_id: format!("{station_id}_filler_{}", time::format_14(ft)),
        station_id: station_id.to_string(),
        ft: time::format_14(ft),
        to: time::format_14(to),
        title: String::new(),
        info: String::new(),
        pfm: String::new(),
        img: None,
    }
}
