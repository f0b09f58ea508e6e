use anyhow::{Context, Result};
use attendance_core::{FaceRegionDetector, IdentityClassifier, LbphClassifier, ModelStore, ScrfdDetector};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod corpus;
mod dbus_interface;
mod engine;
mod ledger;
#[cfg(test)]
mod test_support;

use config::{BusKind, Config};
use corpus::TrainingCorpus;
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use engine::{AttendanceEngine, EngineSettings};
use ledger::Ledger;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("attendanced starting");

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        classifier = %config.classifier_path.display(),
        threshold = config.threshold,
        selection = %config.selection,
        retrain_on_delete = config.retrain_on_delete,
        "configuration loaded"
    );

    let ledger = Ledger::open(&config.db_path)
        .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?;
    let models = Arc::new(ModelStore::open(&config.classifier_path));

    let scrfd_path = config.scrfd_model_path();
    let detector: Arc<dyn FaceRegionDetector> = Arc::new(
        ScrfdDetector::load(&scrfd_path)
            .with_context(|| format!("failed to load detector from {}", scrfd_path.display()))?,
    );
    let classifier: Arc<dyn IdentityClassifier> = Arc::new(LbphClassifier::default());

    let settings = EngineSettings {
        threshold: config.threshold,
        selection: config.selection,
    };
    let engine = Arc::new(AttendanceEngine::new(
        detector.clone(),
        classifier.clone(),
        models.clone(),
        ledger.clone(),
        settings,
    ));
    let corpus = Arc::new(TrainingCorpus::new(
        detector,
        classifier,
        models,
        ledger.clone(),
        settings,
        config.retrain_on_delete,
    ));

    let status = corpus.status()?;
    if status.stale {
        tracing::warn!(
            model_corpus_version = ?status.model_corpus_version,
            corpus_version = status.corpus_version,
            "classifier is older than the training corpus; run Train to refresh it"
        );
    }

    let service = AttendanceService::new(engine, corpus, ledger);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "attendanced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("attendanced shutting down");

    Ok(())
}
