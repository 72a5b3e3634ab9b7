use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use relay_daemon::{auth, catalog, endpoints, http, scheduler};
use relay_proto::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = relay_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,relay_daemon=debug")),
        )
        .init();

    info!("log file: {:?}", log_path);

    let config = Arc::new(Config::load()?);
    info!("config loaded from: {:?}", Config::config_path());

    let endpoints = endpoints::Endpoints::default();

    let auth = auth::AuthClient::new();
    if let Err(e) = auth.init(&config.account).await {
        warn!("auth bootstrap failed, continuing in non-premium mode: {e}");
    }

    let store = catalog::CatalogStore::new();
    let fetcher = Arc::new(catalog::CatalogFetcher::new(store.clone(), config.catalog.fetch_concurrency));

    let area_ids: Vec<String> = config.catalog.enabled_areas.iter().cloned().collect();
    fetcher.bootstrap(&area_ids).await?;
    info!("catalog bootstrap complete: {} programs loaded", store.count().await);

    let sched = scheduler::Scheduler::new();
    let refresh_handle = sched.spawn_daily_refresh(fetcher.clone(), area_ids);

    let state = http::RelayState {
        store,
        auth,
        http: reqwest::Client::new(),
        endpoints,
        config: config.clone(),
    };

    tokio::select! {
        result = http::start_server(&config.http.bind_address, config.http.port, state) => {
            refresh_handle.abort();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, stopping scheduler and server");
            refresh_handle.abort();
        }
    }

    Ok(())
}
