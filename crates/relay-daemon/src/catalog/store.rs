//! Indexed, concurrency-safe in-memory store of programs plus the static
//! station/area maps built once at bootstrap.
//!
//! Single-writer/multi-reader: only `CatalogFetcher` ever calls
//! `upsert_program`/`purge_before`/`set_catalog`. The `findCurrent` minute
//! cache lives behind its own small mutex so cache bookkeeping never forces
//! readers of the main index to take a write lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use relay_proto::model::{Area, Program, Station};
use relay_proto::time::{self, WallClock};

struct StoredProgram {
    program: Program,
    ft_ts: i64,
    to_ts: i64,
}

#[derive(Default)]
struct CatalogInner {
    programs: HashMap<String, StoredProgram>,
    /// `stationId -> (ft_ts -> progId)`, ordered for range scans.
    by_station: HashMap<String, BTreeMap<i64, String>>,
    stations: HashMap<String, Station>,
    areas: HashMap<String, Area>,
}

struct CacheEntry {
    station_id: String,
    minute: i64,
    prog_id: String,
}

#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<RwLock<CatalogInner>>,
    cache: Arc<Mutex<Option<CacheEntry>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CatalogInner::default())),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the station/area maps wholesale. Called only during
    /// bootstrap and daily refresh, never concurrently with itself.
    pub async fn set_catalog(&self, stations: HashMap<String, Station>, areas: HashMap<String, Area>) {
        let mut inner = self.inner.write().await;
        inner.stations = stations;
        inner.areas = areas;
    }

    pub async fn stations(&self) -> Vec<Station> {
        self.inner.read().await.stations.values().cloned().collect()
    }

    pub async fn station(&self, station_id: &str) -> Option<Station> {
        self.inner.read().await.stations.get(station_id).cloned()
    }

    pub async fn areas(&self) -> Vec<Area> {
        self.inner.read().await.areas.values().cloned().collect()
    }

    /// Insert one program. Returns `false` without mutating state if
    /// `progId` is already present (duplicate inserts are a no-op, not an
    /// error). An overlapping interval for the same station triggers a
    /// warning and "later wins": the newly inserted program replaces any
    /// program(s) whose interval it overlaps.
    pub async fn upsert_program(&self, p: Program) -> Result<bool, relay_proto::RelayError> {
        let ft_ts = time::parse(&p.ft)?.timestamp();
        let to_ts = time::parse(&p.to)?.timestamp();

        let mut inner = self.inner.write().await;
        if inner.programs.contains_key(&p.prog_id) {
            return Ok(false);
        }

        let station_id = p.station_id.clone();

        // Candidates starting before the new program ends; a real overlap
        // also needs the candidate to end after the new program starts.
        let to_remove: Vec<(i64, String)> = inner
            .by_station
            .get(&station_id)
            .into_iter()
            .flat_map(|index| index.range(..to_ts))
            .filter(|(_, other_id)| **other_id != p.prog_id)
            .filter_map(|(&other_ft, other_id)| {
                inner
                    .programs
                    .get(other_id)
                    .filter(|existing| existing.to_ts > ft_ts)
                    .map(|_| (other_ft, other_id.clone()))
            })
            .collect();

        if !to_remove.is_empty() {
            warn!(
                "catalog: program {} overlaps {} existing record(s) on station {}; later insert wins",
                p.prog_id,
                to_remove.len(),
                station_id
            );
            let station_index = inner.by_station.entry(station_id.clone()).or_default();
            for (other_ft, other_id) in &to_remove {
                station_index.remove(other_ft);
                inner.programs.remove(other_id);
            }
        }

        let station_index = inner.by_station.entry(station_id.clone()).or_default();
        station_index.insert(ft_ts, p.prog_id.clone());
        inner.programs.insert(
            p.prog_id.clone(),
            StoredProgram {
                program: p,
                ft_ts,
                to_ts,
            },
        );

        Ok(true)
    }

    /// The unique program with `ft <= now < to`, using the minute-bucketed
    /// cache when possible.
    pub async fn find_current(&self, station_id: &str, now: WallClock) -> Option<Program> {
        let now_ts = now.timestamp();
        let minute = now_ts.div_euclid(60);

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.as_ref() {
                if entry.station_id == station_id && entry.minute == minute {
                    let inner = self.inner.read().await;
                    if let Some(stored) = inner.programs.get(&entry.prog_id) {
                        if stored.ft_ts <= now_ts && now_ts < stored.to_ts {
                            return Some(stored.program.clone());
                        }
                    }
                }
            }
        }

        let found = self.find_at_ts(station_id, now_ts).await;
        if let Some(p) = &found {
            let mut cache = self.cache.lock().await;
            *cache = Some(CacheEntry {
                station_id: station_id.to_string(),
                minute,
                prog_id: p.prog_id.clone(),
            });
        }
        found
    }

    /// Same semantics as `find_current`, at an arbitrary instant, never
    /// touching the cache.
    pub async fn find_at(&self, station_id: &str, t: WallClock) -> Option<Program> {
        self.find_at_ts(station_id, t.timestamp()).await
    }

    async fn find_at_ts(&self, station_id: &str, ts: i64) -> Option<Program> {
        let inner = self.inner.read().await;
        let index = inner.by_station.get(station_id)?;
        let (_, prog_id) = index.range(..=ts).next_back()?;
        let stored = inner.programs.get(prog_id)?;
        if stored.to_ts > ts {
            Some(stored.program.clone())
        } else {
            None
        }
    }

    /// All programs for one station whose interval intersects the given
    /// broadcast day, sorted ascending by `(ft, to)`.
    pub async fn list_for_day(&self, station_id: &str, broadcast_date: NaiveDate) -> Vec<Program> {
        let (start, end) = time::broadcast_day_bounds(broadcast_date);
        let start_ts = start.timestamp();
        let end_ts = end.timestamp();

        let inner = self.inner.read().await;
        let Some(index) = inner.by_station.get(station_id) else {
            return Vec::new();
        };

        let mut out: Vec<Program> = index
            .iter()
            .filter_map(|(_, prog_id)| inner.programs.get(prog_id))
            .filter(|stored| stored.ft_ts < end_ts && stored.to_ts > start_ts)
            .map(|stored| stored.program.clone())
            .collect();

        out.sort_by(|a, b| a.ft.cmp(&b.ft).then_with(|| a.to.cmp(&b.to)));
        out
    }

    /// Remove every program whose `to < t`. Returns the count removed.
    pub async fn purge_before(&self, t: WallClock) -> usize {
        let cutoff = t.timestamp();
        let mut inner = self.inner.write().await;

        let stale: Vec<String> = inner
            .programs
            .iter()
            .filter(|(_, stored)| stored.to_ts < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            if let Some(stored) = inner.programs.remove(id) {
                if let Some(index) = inner.by_station.get_mut(&stored.program.station_id) {
                    index.remove(&stored.ft_ts);
                }
            }
        }

        stale.len()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.programs.len()
    }
}
