use attendance_core::classifier::DEFAULT_THRESHOLD;
use attendance_core::SelectionPolicy;
use std::path::PathBuf;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the SCRFD detector model.
    pub model_dir: PathBuf,
    /// Path to the SQLite ledger.
    pub db_path: PathBuf,
    /// Path to the persisted classifier artifact.
    pub classifier_path: PathBuf,
    /// LBPH distance at or above which a face is not recognized.
    pub threshold: f64,
    /// Face picked when a capture holds several.
    pub selection: SelectionPolicy,
    /// Rebuild the model right after an identity is deleted.
    pub retrain_on_delete: bool,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("ATTEND_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(attendance_core::default_model_dir);

        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("attendance");

        let db_path = var("ATTEND_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("attendance.db"));
        let classifier_path = var("ATTEND_CLASSIFIER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("classifier.json"));

        let selection = match var("ATTEND_SELECTION").map(|v| v.parse::<SelectionPolicy>()) {
            Some(Ok(policy)) => policy,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "ignoring ATTEND_SELECTION; using first");
                SelectionPolicy::First
            }
            None => SelectionPolicy::First,
        };

        let threshold = match var("ATTEND_THRESHOLD").map(|v| v.trim().parse::<f64>()) {
            Some(Ok(t)) if t.is_finite() && t > 0.0 => t,
            Some(_) => {
                tracing::warn!(
                    default = DEFAULT_THRESHOLD,
                    "ATTEND_THRESHOLD must be a positive finite number; using default"
                );
                DEFAULT_THRESHOLD
            }
            None => DEFAULT_THRESHOLD,
        };

        let bus = match var("ATTEND_BUS").as_deref() {
            Some("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            model_dir,
            db_path,
            classifier_path,
            threshold,
            selection,
            retrain_on_delete: var("ATTEND_RETRAIN_ON_DELETE")
                .map(|v| v != "0")
                .unwrap_or(true),
            bus,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/kim")]);
        assert_eq!(c.threshold, DEFAULT_THRESHOLD);
        assert_eq!(c.selection, SelectionPolicy::First);
        assert!(c.retrain_on_delete);
        assert_eq!(c.bus, BusKind::Session);
        assert_eq!(c.db_path, PathBuf::from("/home/kim/.local/share/attendance/attendance.db"));
        assert_eq!(
            c.classifier_path,
            PathBuf::from("/home/kim/.local/share/attendance/classifier.json")
        );
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("XDG_DATA_HOME", "/data"),
            ("ATTEND_THRESHOLD", "55.5"),
            ("ATTEND_SELECTION", "largest"),
            ("ATTEND_RETRAIN_ON_DELETE", "0"),
            ("ATTEND_BUS", "system"),
            ("ATTEND_MODEL_DIR", "/opt/models"),
        ]);
        assert_eq!(c.threshold, 55.5);
        assert_eq!(c.selection, SelectionPolicy::Largest);
        assert!(!c.retrain_on_delete);
        assert_eq!(c.bus, BusKind::System);
        assert_eq!(c.db_path, PathBuf::from("/data/attendance/attendance.db"));
        assert_eq!(c.scrfd_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let c = config(&[("ATTEND_THRESHOLD", "abc"), ("ATTEND_SELECTION", "biggest")]);
        assert_eq!(c.threshold, DEFAULT_THRESHOLD);
        assert_eq!(c.selection, SelectionPolicy::First);

        for bad in ["NaN", "-1", "0", "inf", "-inf"] {
            let c = config(&[("ATTEND_THRESHOLD", bad)]);
            assert_eq!(c.threshold, DEFAULT_THRESHOLD, "ATTEND_THRESHOLD={bad}");
        }
    }
}
