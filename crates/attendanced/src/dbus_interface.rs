use crate::corpus::TrainingCorpus;
use crate::engine::{AttendanceEngine, EngineError};
use crate::ledger::{Ledger, DATE_FORMAT, TIME_FORMAT};
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.freedesktop.Attendance1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.freedesktop.Attendance1
/// Object path: /org/freedesktop/Attendance1
///
/// Outcomes are JSON objects carrying a stable `code`. Rejected input maps to
/// `InvalidArgs`; storage and model failures map to `Failed`.
pub struct AttendanceService {
    engine: Arc<AttendanceEngine>,
    corpus: Arc<TrainingCorpus>,
    ledger: Ledger,
}

impl AttendanceService {
    pub fn new(engine: Arc<AttendanceEngine>, corpus: Arc<TrainingCorpus>, ledger: Ledger) -> Self {
        Self { engine, corpus, ledger }
    }
}

fn to_fdo(err: EngineError) -> fdo::Error {
    if err.is_input_error() {
        fdo::Error::InvalidArgs(err.to_string())
    } else {
        tracing::error!(error = %err, "request failed");
        fdo::Error::Failed(err.to_string())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serialization: {e}")))
}

/// Run CPU- or storage-bound work off the async executor.
async fn blocking<T, F>(work: F) -> fdo::Result<T>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| fdo::Error::Failed(format!("worker task failed: {e}")))?
        .map_err(to_fdo)
}

#[interface(name = "org.freedesktop.Attendance1")]
impl AttendanceService {
    /// Register a person. Returns the new identity id.
    async fn create_identity(&self, name: &str) -> fdo::Result<i64> {
        tracing::info!(name, "create_identity requested");
        let corpus = self.corpus.clone();
        let name = name.to_string();
        let identity = blocking(move || corpus.create_identity(&name)).await?;
        Ok(identity.id)
    }

    /// Store one face from an encoded image for an identity.
    async fn enroll_image(&self, identity_id: i64, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(identity_id, bytes = image.len(), "enroll_image requested");
        let corpus = self.corpus.clone();
        let outcome = blocking(move || corpus.enroll_image(identity_id, &image)).await?;
        to_json(&outcome)
    }

    /// Rebuild the classifier from the full corpus.
    async fn train(&self) -> fdo::Result<String> {
        tracing::info!("train requested");
        let corpus = self.corpus.clone();
        let outcome = blocking(move || corpus.rebuild_model()).await?;
        to_json(&outcome)
    }

    /// Evaluate a capture and record attendance for the recognized person.
    async fn mark_attendance(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::debug!(bytes = image.len(), "mark_attendance requested");
        let engine = self.engine.clone();
        let result = blocking(move || engine.evaluate(&image)).await?;
        to_json(&result)
    }

    /// Whether the identity already has an event for today's date.
    async fn is_marked_today(&self, identity_id: i64) -> fdo::Result<bool> {
        let ledger = self.ledger.clone();
        blocking(move || Ok(ledger.has_event_today(identity_id)?)).await
    }

    /// Record attendance by hand, bypassing recognition. `date` is
    /// `YYYY-MM-DD` and `time` is `HH:MM:SS`.
    async fn record_attendance(&self, identity_id: i64, date: &str, time: &str) -> fdo::Result<String> {
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|e| fdo::Error::InvalidArgs(format!("date {date:?}: {e}")))?;
        let time = NaiveTime::parse_from_str(time, TIME_FORMAT)
            .map_err(|e| fdo::Error::InvalidArgs(format!("time {time:?}: {e}")))?;
        tracing::info!(identity_id, %date, %time, "record_attendance requested");
        let ledger = self.ledger.clone();
        let outcome = blocking(move || Ok(ledger.record_event(identity_id, date, time)?)).await?;
        to_json(&outcome)
    }

    /// All attendance events, newest first.
    async fn list_attendance(&self) -> fdo::Result<String> {
        let ledger = self.ledger.clone();
        let records = blocking(move || Ok(ledger.list_all()?)).await?;
        to_json(&records)
    }

    async fn list_identities(&self) -> fdo::Result<String> {
        let ledger = self.ledger.clone();
        let people = blocking(move || Ok(ledger.list_identities()?)).await?;
        to_json(&people)
    }

    /// Delete an identity with its events and images. Returns `null` when the
    /// identity does not exist.
    async fn delete_identity(&self, identity_id: i64) -> fdo::Result<String> {
        tracing::info!(identity_id, "delete_identity requested");
        let corpus = self.corpus.clone();
        let outcome = blocking(move || corpus.delete_identity(identity_id)).await?;
        to_json(&outcome)
    }

    async fn delete_training_image(&self, image_id: i64) -> fdo::Result<bool> {
        tracing::info!(image_id, "delete_training_image requested");
        let corpus = self.corpus.clone();
        blocking(move || corpus.delete_training_image(image_id)).await
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let corpus = self.corpus.clone();
        let ledger = self.ledger.clone();
        let (model, events) = blocking(move || Ok((corpus.status()?, ledger.event_count()?))).await?;
        let settings = self.engine.settings();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "threshold": settings.threshold,
            "selection": settings.selection,
            "events": events,
            "model": model,
        })
        .to_string())
    }
}
