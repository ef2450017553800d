mod app;
mod views;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use microlearn_core::{
    ApiMode, ApplicationState, Connectivity, HashLocation, HttpLessonApi, LessonApi, LessonSync,
    LocalCache, MockLessonApi, PortalConfig, StateStore,
};
use reqwest::{redirect, Client, ClientBuilder};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::{AppInit, PortalShell};

#[derive(Debug, Parser)]
#[command(name = "microlearn", version, about = "Micro-learning portal in the terminal")]
struct Cli {
    /// Configuration file [default: <config dir>/microlearn/config.json]
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the local lesson database
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Keep the local database in memory only
    #[arg(long, conflicts_with = "data_dir")]
    ephemeral: bool,

    /// Start offline and serve cached lessons only
    #[arg(long)]
    offline: bool,

    /// Use the lesson server at this base URL instead of the built-in catalogue
    #[arg(long, value_name = "URL")]
    http: Option<String>,

    /// Route to open first, e.g. `#/lesson/2` or a full portal address
    #[arg(value_name = "ROUTE")]
    route: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PortalConfig::load_or_default(path),
        None => PortalConfig::load(),
    };
    if let Some(dir) = cli.data_dir.clone() {
        config.storage.data_dir = Some(dir);
    }
    if let Some(base_url) = cli.http.clone() {
        config.api.mode = ApiMode::Http;
        config.api.base_url = base_url;
    }

    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent("MicroLearn/0.1")
        .build()?;
    let api = build_api(&config, client)?;
    let cache = if cli.ephemeral {
        LocalCache::in_memory()
    } else {
        match config.cache_dir() {
            Some(dir) => LocalCache::open_dir(dir),
            None => LocalCache::unsupported(),
        }
    };
    info!(location = ?cache.location(), mode = ?config.api.mode, "starting portal");

    let location = match cli.route.as_deref() {
        Some(route) if route.contains("://") => HashLocation::from_url(route)?,
        Some(route) => HashLocation::with_hash(route),
        None => HashLocation::new(),
    };

    let store = StateStore::new(ApplicationState::default());
    let connectivity = Connectivity::new(!cli.offline);
    let (event_tx, event_rx) = mpsc::channel(64);
    let sync = Arc::new(LessonSync::new(
        cache,
        api,
        store,
        connectivity,
        event_tx,
    ));

    let init = AppInit {
        sync,
        location: Arc::new(location),
        default_route: config.router.default_route.clone(),
        events: event_rx,
    };
    PortalShell::new(init).run().await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_api(config: &PortalConfig, client: Client) -> Result<Arc<dyn LessonApi>, url::ParseError> {
    Ok(match config.api.mode {
        ApiMode::Mock => Arc::new(MockLessonApi::from_config(&config.api)),
        ApiMode::Http => Arc::new(HttpLessonApi::new(client, &config.api)?),
    })
}
