use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing::info;

mod config;
use config::Config;
mod error;
mod logging;
mod model;
use model::Classifier;
mod nutrition;
use nutrition::FdcClient;
mod routes;
use routes::AppState;
mod storage;
use storage::ImageStore;
mod utils;
use utils::ensure_files_exist;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let config = Config::from_env().context("invalid configuration")?;
    ensure_files_exist(&config).await?;

    let classifier = load_classifier(&config)?;
    let nutrition = FdcClient::new(
        config.fdc_base_url.as_str(),
        config.fdc_api_key.as_str(),
        config.http_timeout,
    )
    .context("failed to build nutrition client")?;

    let store = ImageStore::new(&config.image_dir);
    tokio::fs::create_dir_all(store.dir())
        .await
        .with_context(|| format!("failed to create {}", store.dir().display()))?;

    let shared_state = Arc::new(AppState {
        store,
        classifier,
        nutrition: Arc::new(nutrition),
    });
    let app = routes::router(shared_state, config.body_limit_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);
    axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

#[cfg(feature = "tensorflow")]
fn load_classifier(config: &Config) -> anyhow::Result<Arc<dyn Classifier>> {
    let model = model::Model::new(
        &config.model_path,
        &config.class_list_path,
        &config.model_input_op,
        &config.model_output_op,
    )
    .map_err(|err| anyhow::anyhow!("failed to load model: {err}"))?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "tensorflow"))]
fn load_classifier(_config: &Config) -> anyhow::Result<Arc<dyn Classifier>> {
    anyhow::bail!("built without the `tensorflow` feature; no classifier backend available")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
