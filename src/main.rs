use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apiwatch::{api, Config, Database, Detector, ModelSet};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load_or_default()?;

    let models = ModelSet::from_config(&config.models);
    let status = models.status();
    info!(
        isolation_forest = status.isolation_forest,
        failure_classifier = status.failure_classifier,
        clustering = status.clustering,
        next_window_predictor = status.next_window_predictor,
        "scoring artifacts loaded"
    );

    let db = match Database::open(&config.database.path) {
        Ok(db) => Some(db),
        Err(e) => {
            warn!(error = %e, "database unavailable, running without persistence");
            None
        }
    };

    let detector = Detector::new(&config, models, db);
    let app = api::router(Arc::clone(&detector));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    info!("detector API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
