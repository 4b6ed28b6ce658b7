//! Structured logging init and low-cardinality error counters shared by
//! every crate via [`sync_core::SyncError::kind`].

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Initializes JSON-structured logging with an env filter.
/// Set `RUST_LOG`, e.g. `"info,reconciliation_engine=debug"`.
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Counts `SyncError`s by `{component, kind}`, where `kind` is
/// [`sync_core::SyncError::kind`]'s stable label. Low cardinality: a
/// handful of components times a dozen-ish error kinds.
#[derive(Default)]
pub struct ErrorMetrics {
    inner: Mutex<HashMap<(&'static str, &'static str), u64>>,
}

impl ErrorMetrics {
    pub fn record(&self, component: &'static str, error: &sync_core::SyncError) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner.entry((component, error.kind())).or_insert(0) += 1;
    }

    pub fn count(&self, component: &'static str, kind: &'static str) -> u64 {
        self.inner.lock().expect("metrics lock poisoned").get(&(component, kind)).copied().unwrap_or(0)
    }
}

static ERROR_METRICS: OnceLock<ErrorMetrics> = OnceLock::new();

pub fn error_metrics() -> &'static ErrorMetrics {
    ERROR_METRICS.get_or_init(ErrorMetrics::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::SyncError;

    #[test]
    fn records_are_scoped_by_component_and_kind() {
        let metrics = ErrorMetrics::default();
        metrics.record("reconciliation_engine", &SyncError::NotAuthenticated);
        metrics.record("reconciliation_engine", &SyncError::NotAuthenticated);
        metrics.record("token_store", &SyncError::NotAuthenticated);

        assert_eq!(metrics.count("reconciliation_engine", "not_authenticated"), 2);
        assert_eq!(metrics.count("token_store", "not_authenticated"), 1);
        assert_eq!(metrics.count("reconciliation_engine", "wrong_password"), 0);
    }

    #[test]
    fn global_accessor_is_a_singleton() {
        error_metrics().record("upload_queue", &SyncError::SyncTransient("timeout".into()));
        let before = error_metrics().count("upload_queue", "sync_transient");
        error_metrics().record("upload_queue", &SyncError::SyncTransient("timeout".into()));
        assert_eq!(error_metrics().count("upload_queue", "sync_transient"), before + 1);
    }
}
