//! Upstream URL templates, gathered behind one small struct so tests can
//! point the whole daemon at a local `wiremock` server instead of
//! `https://radiko.jp`. Production code always uses `Endpoints::default()`.

#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new("https://radiko.jp")
    }
}

impl Endpoints {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    pub fn login(&self) -> String {
        format!("{}/ap/member/login/login", self.base)
    }

    pub fn check(&self) -> String {
        format!("{}/ap/member/webapi/member/login/check", self.base)
    }

    pub fn auth1(&self) -> String {
        format!("{}/v2/api/auth1", self.base)
    }

    pub fn auth2(&self) -> String {
        format!("{}/v2/api/auth2", self.base)
    }

    pub fn station_full(&self) -> String {
        format!("{}/v3/station/region/full.xml", self.base)
    }

    pub fn station_area(&self, area_id: &str) -> String {
        format!("{}/v3/station/area/{area_id}.xml", self.base)
    }

    pub fn prog_date_area(&self, date: &str, area_id: &str) -> String {
        format!("{}/v3/program/date/{date}/{area_id}.xml", self.base)
    }

    pub fn prog_today_area(&self, area_id: &str) -> String {
        format!("{}/v3/program/today/{area_id}.xml", self.base)
    }

    pub fn play_live(&self, station_id: &str) -> String {
        format!(
            "{}/v2/api/ts/playlist.m3u8?station_id={station_id}&l=15&type=b",
            self.base
        )
    }

    pub fn play_timefree(&self, station_id: &str, ft: &str, to: &str) -> String {
        format!(
            "{}/v2/api/ts/playlist.m3u8?station_id={station_id}&start_at={ft}&end_at={to}&l=15&type=b",
            self.base
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_radiko() {
        let e = Endpoints::default();
        assert_eq!(e.auth1(), "https://radiko.jp/v2/api/auth1");
    }

    #[test]
    fn custom_base_strips_trailing_slash() {
        let e = Endpoints::new("http://127.0.0.1:8080/");
        assert_eq!(e.auth2(), "http://127.0.0.1:8080/v2/api/auth2");
        assert_eq!(
            e.station_area("JP13"),
            "http://127.0.0.1:8080/v3/station/area/JP13.xml"
        );
    }
}
