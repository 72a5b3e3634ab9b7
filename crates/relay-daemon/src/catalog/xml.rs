//! Upstream XML document shapes and their mapping into `relay_proto::model`
//! types. Every document gets an explicit `#[derive(Deserialize)]` struct so
//! downstream code never branches on whether a field is "one or many" — that
//! normalization happens once, here, via `OneOrMany`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use relay_proto::model::{Area, Program, Station};
use relay_proto::time;
use relay_proto::RelayError;

/// Some upstream documents render a child element as a bare scalar when
/// there is exactly one of it, and as a repeated element otherwise. This
/// collapses both shapes into a `Vec<T>` at the parse boundary.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(v) => v,
        }
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(OneOrMany::<T>::deserialize(deserializer)?.into_vec())
}

fn default_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    one_or_many(deserializer)
}

// ── region document (STATION_FULL) ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegionDoc {
    pub stations: RegionStations,
}

#[derive(Debug, Deserialize)]
pub struct RegionStations {
    #[serde(rename = "station", deserialize_with = "one_or_many")]
    pub station: Vec<RegionStation>,
}

#[derive(Debug, Deserialize)]
pub struct RegionStation {
    pub id: String,
    pub name: String,
    pub ascii_name: String,
    pub area_id: String,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default, deserialize_with = "default_vec")]
    pub logo: Vec<String>,
    #[serde(default)]
    pub areafree: u8,
    #[serde(default)]
    pub timefree: u8,
}

impl RegionStation {
    fn into_station(self, area_display: String) -> Station {
        Station {
            station_id: self.id,
            ascii_name: self.ascii_name,
            display_name: self.name,
            region_name: area_display.clone(),
            area_id: self.area_id,
            area_display,
            banner_url: self.banner,
            logo_url: self.logo.into_iter().next(),
            areafree_flag: self.areafree != 0,
            timefree_flag: self.timefree != 0,
        }
    }
}

/// Parse a region document. `area_display_of` resolves an `area_id` (e.g.
/// `"JP13"`) to its display name, filled in from a previously fetched
/// `AreaDoc` set (or the area_id itself if unknown yet).
pub fn parse_region_doc(
    xml: &str,
    area_display_of: impl Fn(&str) -> String,
) -> Result<Vec<Station>, RelayError> {
    let doc: RegionDoc =
        quick_xml::de::from_str(xml).map_err(|e| RelayError::Upstream(format!("region xml: {e}")))?;
    Ok(doc
        .stations
        .station
        .into_iter()
        .map(|s| {
            let display = area_display_of(&s.area_id);
            s.into_station(display)
        })
        .collect())
}

// ── area document (STATION_AREA) ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AreaDoc {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@name")]
    pub name: String,
    pub stations: AreaStations,
}

#[derive(Debug, Deserialize)]
pub struct AreaStations {
    #[serde(rename = "station", deserialize_with = "one_or_many")]
    pub station: Vec<AreaStationRef>,
}

#[derive(Debug, Deserialize)]
pub struct AreaStationRef {
    pub id: String,
}

pub fn parse_area_doc(xml: &str) -> Result<Area, RelayError> {
    let doc: AreaDoc =
        quick_xml::de::from_str(xml).map_err(|e| RelayError::Upstream(format!("area xml: {e}")))?;
    Ok(Area {
        area_id: doc.id,
        area_name: doc.name,
        station_ids: doc.stations.station.into_iter().map(|s| s.id).collect(),
    })
}

// ── program document (PROG_*) ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProgramDoc {
    pub stations: ProgramStations,
}

#[derive(Debug, Deserialize)]
pub struct ProgramStations {
    #[serde(rename = "station", deserialize_with = "one_or_many")]
    pub station: Vec<ProgramStationBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ProgramStationBlock {
    #[serde(rename = "@id")]
    pub id: String,
    pub progs: ProgsBlock,
}

#[derive(Debug, Deserialize)]
pub struct ProgsBlock {
    #[serde(rename = "prog", default, deserialize_with = "default_vec")]
    pub prog: Vec<RawProg>,
}

#[derive(Debug, Deserialize)]
pub struct RawProg {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@ft")]
    pub ft: String,
    #[serde(rename = "@to")]
    pub to: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub pfm: String,
    #[serde(default)]
    pub img: Option<String>,
}

/// Parse a program document into raw, per-station program lists keyed by
/// `stationId`. Wall-clock folding and gap-fill are applied by the caller
/// (`CatalogFetcher`) since they operate per broadcast day, not per parse.
pub fn parse_program_doc(xml: &str) -> Result<Vec<(String, Vec<Program>)>, RelayError> {
    let doc: ProgramDoc = quick_xml::de::from_str(xml)
        .map_err(|e| RelayError::Upstream(format!("program xml: {e}")))?;

    doc.stations
        .station
        .into_iter()
        .map(|block| {
            let station_id = block.id.clone();
            let programs = block
                .progs
                .prog
                .into_iter()
                .map(|raw| raw_prog_to_program(&station_id, raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((station_id, programs))
        })
        .collect()
}

fn raw_prog_to_program(station_id: &str, raw: RawProg) -> Result<Program, RelayError> {
    let ft = time::parse(&raw.ft)?;
    let to = time::parse(&raw.to)?;
    time::validate_interval(ft, to)?;

    Ok(Program {
        prog_id: format!("{station_id}_{}", raw.id),
        station_id: station_id.to_string(),
        ft: time::format_14(ft),
        to: time::format_14(to),
        title: raw.title,
        info: raw.info,
        pfm: raw.pfm,
        img: raw.img,
    })
}
