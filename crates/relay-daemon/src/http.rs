//! HTTP surface: `/radiko/play/{stationId}` audio relay plus the JSON
//! catalog endpoints. Routing and error-to-response mapping only; the real
//! work happens in `stream`, `catalog`, and `auth`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use relay_proto::config::Config;
use relay_proto::model::{Program, Station};
use relay_proto::time;
use relay_proto::RelayError;

use crate::auth::AuthClient;
use crate::catalog::CatalogStore;
use crate::endpoints::Endpoints;
use crate::stream::{self, PlayQuery};

#[derive(Clone)]
pub struct RelayState {
    pub store: CatalogStore,
    pub auth: AuthClient,
    pub http: Client,
    pub endpoints: Endpoints,
    pub config: Arc<Config>,
}

/// Wraps `RelayError` so `relay-proto` doesn't need an `axum` dependency
/// just to describe how its errors render over HTTP.
struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.diagnostic()).into_response()
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/radiko/play/:station_id", get(play_station))
        .route("/api/radiko/stations", get(list_stations))
        .route("/api/radiko/stations/with-program", get(list_stations_with_program))
        .route("/api/radiko/stations/:station_id/programs", get(station_programs))
        .with_state(state)
}

pub async fn start_server(bind_address: &str, port: u16, state: RelayState) -> Result<(), RelayError> {
    let app = router(state);
    let addr = format!("{bind_address}:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            RelayError::PortInUse(addr.clone())
        } else {
            RelayError::Spawn(format!("failed to bind {addr}: {e}"))
        }
    })?;

    info!("relay HTTP server listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayError::Spawn(format!("HTTP server error: {e}")))
}

#[derive(Debug, Deserialize)]
struct PlayQueryParams {
    ft: Option<String>,
    to: Option<String>,
    seek: Option<i64>,
}

async fn play_station(
    State(state): State<RelayState>,
    Path(station_id): Path<String>,
    Query(params): Query<PlayQueryParams>,
) -> Result<Response, ApiError> {
    let station = state
        .store
        .station(&station_id)
        .await
        .ok_or_else(|| RelayError::NotFound(format!("{station_id} not in available stations")))?;

    if let Some(seek) = params.seek {
        if seek < 0 {
            return Err(RelayError::InvalidRequest("seek must not be negative".into()).into());
        }
    }

    let query = PlayQuery {
        ft: params.ft,
        to: params.to,
        seek: params.seek,
    };

    let process = stream::start(
        &state.http,
        &state.auth,
        &state.endpoints,
        &state.config.stream,
        &station,
        query,
    )
    .await?;
    let body = process.into_body();

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/aac")
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .map_err(|e| RelayError::Spawn(format!("failed to build response: {e}")))?;

    Ok(response)
}

#[derive(Serialize)]
struct StationsResponse {
    stations: Vec<StationJson>,
}

#[derive(Serialize)]
struct StationJson {
    #[serde(rename = "stationId")]
    station_id: String,
    name: String,
    region: String,
    area: String,
}

impl From<&Station> for StationJson {
    fn from(s: &Station) -> Self {
        Self {
            station_id: s.station_id.clone(),
            name: s.display_name.clone(),
            region: s.region_name.clone(),
            area: s.area_display.clone(),
        }
    }
}

async fn list_stations(State(state): State<RelayState>) -> axum::Json<StationsResponse> {
    let stations = state.store.stations().await;
    axum::Json(StationsResponse {
        stations: stations.iter().map(StationJson::from).collect(),
    })
}

#[derive(Serialize)]
struct StationsWithProgramResponse {
    stations: Vec<StationWithProgramJson>,
}

#[derive(Serialize)]
struct StationWithProgramJson {
    #[serde(rename = "stationId")]
    station_id: String,
    name: String,
    region: String,
    area: String,
    program: Option<ProgramJson>,
}

#[derive(Serialize)]
struct ProgramJson {
    #[serde(rename = "progId")]
    prog_id: String,
    title: String,
    pfm: String,
    ft: String,
    to: String,
    img: Option<String>,
}

impl From<&Program> for ProgramJson {
    fn from(p: &Program) -> Self {
        Self {
            prog_id: p.prog_id.clone(),
            title: p.title.clone(),
            pfm: p.pfm.clone(),
            ft: p.ft.clone(),
            to: p.to.clone(),
            img: p.img.clone(),
        }
    }
}

async fn list_stations_with_program(
    State(state): State<RelayState>,
) -> axum::Json<StationsWithProgramResponse> {
    let stations = state.store.stations().await;
    let now = time::broadcast_now(state.config.stream.delay_sec);

    let mut out = Vec::with_capacity(stations.len());
    for s in &stations {
        let program = state.store.find_current(&s.station_id, now).await;
        out.push(StationWithProgramJson {
            station_id: s.station_id.clone(),
            name: s.display_name.clone(),
            region: s.region_name.clone(),
            area: s.area_display.clone(),
            program: program.as_ref().map(ProgramJson::from),
        });
    }

    axum::Json(StationsWithProgramResponse { stations: out })
}

#[derive(Debug, Deserialize)]
struct ProgramsQueryParams {
    date: String,
}

#[derive(Serialize)]
struct ProgramsResponse {
    #[serde(rename = "stationId")]
    station_id: String,
    date: String,
    programs: Vec<ProgramJson>,
}

async fn station_programs(
    State(state): State<RelayState>,
    Path(station_id): Path<String>,
    Query(params): Query<ProgramsQueryParams>,
) -> Result<axum::Json<ProgramsResponse>, ApiError> {
    if params.date.len() != 8 || !params.date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RelayError::InvalidRequest(format!(
            "date must be 8 digits (yyyymmdd), got {:?}",
            params.date
        ))
        .into());
    }

    if state.store.station(&station_id).await.is_none() {
        return Err(RelayError::NotFound(format!("{station_id} not in available stations")).into());
    }

    // `date` names the broadcast day directly; it must not be round-tripped
    // through `time::parse`/`broadcast_date_of`, which would reinterpret
    // midnight as belonging to the *previous* broadcast day.
    let broadcast_date = chrono::NaiveDate::parse_from_str(&params.date, "%Y%m%d")
        .map_err(|e| RelayError::InvalidRequest(format!("invalid date {:?}: {e}", params.date)))?;
    let programs = state.store.list_for_day(&station_id, broadcast_date).await;

    Ok(axum::Json(ProgramsResponse {
        station_id,
        date: params.date,
        programs: programs.iter().map(ProgramJson::from).collect(),
    }))
}
