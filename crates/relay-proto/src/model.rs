//! Core data model: stations, areas, programs, and the auth/playback
//! session types. These are plain records — ownership discipline (who may
//! mutate what) is documented per-field in the spec and enforced by the
//! owning components (`CatalogStore`, `AuthClient`, `StreamSession`), not
//! by the types themselves.

use serde::{Deserialize, Serialize};

/// One broadcast station, as resolved during catalog bootstrap. Immutable
/// for the process lifetime once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Station {
    pub station_id: String,
    pub ascii_name: String,
    pub display_name: String,
    pub region_name: String,
    pub area_id: String,
    pub area_display: String,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub areafree_flag: bool,
    #[serde(default)]
    pub timefree_flag: bool,
}

/// One geographic region (`JP1..JP47`). Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Area {
    pub area_id: String,
    pub area_name: String,
    pub station_ids: Vec<String>,
}

/// One program airing on one station during one broadcast day.
///
/// Invariants (enforced by `CatalogStore`/`CatalogFetcher`, not here):
/// `ft < to`; `to - ft <= 24h`; for a given `station_id` the set of
/// `[ft, to)` intervals is non-overlapping and, after gap-fill, contiguous
/// across one broadcast day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Program {
    /// Unique key: `format!("{station_id}_{raw_id}")`.
    pub prog_id: String,
    pub station_id: String,
    /// 14-digit wall-clock start, already folded out of the 24-29h form.
    pub ft: String,
    /// 14-digit wall-clock end, already folded out of the 24-29h form.
    pub to: String,
    pub title: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub pfm: String,
    #[serde(default)]
    pub img: Option<String>,
}

impl Program {
    /// `true` for the synthetic filler records `CatalogFetcher` inserts to
    /// close gaps of >= 60s between real programs.
    pub fn is_filler(&self) -> bool {
        self.title.is_empty()
    }
}

/// Cross-area / premium membership state as reported by the upstream
/// account-check endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PremiumState {
    #[default]
    None,
    Areafree,
}

/// Snapshot of the auth session. Mutated only by `AuthClient`; every other
/// component receives a read-only clone.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    pub token: Option<String>,
    pub area_id: Option<String>,
    pub premium_state: PremiumState,
}

impl AuthSession {
    pub fn is_ready(&self) -> bool {
        self.token.is_some() && self.area_id.is_some()
    }

    pub fn premium_active(&self) -> bool {
        self.premium_state == PremiumState::Areafree
    }
}

/// Playback mode for one active `StreamSession`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackMode {
    Live,
    Timefree,
}

/// State of one active listener session, destroyed when the session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayingState {
    pub station_id: String,
    pub mode: PlaybackMode,
    #[serde(default)]
    pub ft: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub seek_sec: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filler_program_has_empty_title() {
        let p = Program {
            prog_id: "TBS_filler".into(),
            station_id: "TBS".into(),
            ft: "20250101050000".into(),
            to: "20250101060000".into(),
            title: String::new(),
            info: String::new(),
            pfm: String::new(),
            img: None,
        };
        assert!(p.is_filler());
    }

    #[test]
    fn auth_session_not_ready_without_token_and_area() {
        let s = AuthSession::default();
        assert!(!s.is_ready());
        let s = AuthSession {
            token: Some("tok".into()),
            area_id: Some("JP13".into()),
            premium_state: PremiumState::None,
        };
        assert!(s.is_ready());
        assert!(!s.premium_active());
    }
}
