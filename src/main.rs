use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use davshard::config::FileConfigStore;
use davshard::dav::{self, AppState};
use davshard::meta::MetadataIndex;
use davshard::store::LocalStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port: u16 = std::env::var("DAVSHARD_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(7878);
    let data_root = std::env::var("DAVSHARD_DATA_FOLDER").unwrap_or_else(|_| "data".to_string());
    let config_root = std::env::var("DAVSHARD_CONFIG_FOLDER").unwrap_or_else(|_| "config".to_string());
    let meta_db = std::env::var("DAVSHARD_META_DB").unwrap_or_else(|_| "davshard.db".to_string());
    info!(
        target: "davshard",
        "davshard starting: RUST_LOG='{}', http_port={}, data_root='{}', config_root='{}', meta_db='{}'",
        rust_log, http_port, data_root, config_root, meta_db
    );

    std::fs::create_dir_all(&data_root)?;
    let config = Arc::new(FileConfigStore::new(&config_root)?);
    let meta = Arc::new(MetadataIndex::open(&meta_db).map_err(anyhow::Error::new)?);
    let store = Arc::new(LocalStore::new(&data_root));

    let state = AppState {
        config,
        meta,
        store,
        client: reqwest::Client::new(),
    };

    dav::run_with_port(http_port, state).await
}
