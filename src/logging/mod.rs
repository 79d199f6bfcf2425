//! Structured logging for the classification engine
//!
//! Sets up the `tracing` subscriber, keeps a per-thread correlation ID so that
//! every log line of one training run or one inference request can be joined,
//! and provides the spans used by the model manager.

pub mod config;
pub mod spans;

use std::sync::OnceLock;

use anyhow::Result;
use tracing::{dispatcher, Dispatch, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub use config::LoggingConfig;
pub use spans::{InferenceSpan, TrainingSpan};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

thread_local! {
    static CORRELATION_ID: std::cell::RefCell<Option<Uuid>> = const { std::cell::RefCell::new(None) };
}

/// Components with their own configurable level, paired with their module path.
const COMPONENTS: [(&str, &str); 5] = [
    ("data", "data"),
    ("model", "model"),
    ("service", "service"),
    ("visualization", "visualization"),
    ("storage", "storage"),
];

fn crate_target() -> String {
    env!("CARGO_PKG_NAME").replace('-', "_")
}

/// Build the filter directives from the configuration
pub fn filter_directives(config: &LoggingConfig) -> String {
    let target = crate_target();
    let mut directives = vec![format!("{}={}", target, config.global_level)];
    for (component, module) in COMPONENTS {
        directives.push(format!(
            "{}::{}={}",
            target,
            module,
            config.get_component_level(component)
        ));
    }
    directives.join(",")
}

/// Initialize the logging system with the provided configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let mut layers = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(config.include_file_location)
            .with_file(config.include_file_location);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_dir) = config.log_directory {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "medscan.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // The guard must outlive the subscriber or buffered lines are lost.
        let _ = LOG_GUARD.set(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json();
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::info!("Logging system initialized with config: {:?}", config);
    Ok(())
}

/// Set a correlation ID for the current thread
pub fn set_correlation_id(id: Uuid) {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = Some(id);
    });
}

/// Get the current correlation ID for this thread
pub fn get_correlation_id() -> Option<Uuid> {
    CORRELATION_ID.with(|correlation_id| *correlation_id.borrow())
}

/// Generate a new correlation ID and set it for the current thread
pub fn new_correlation_id() -> Uuid {
    let id = Uuid::new_v4();
    set_correlation_id(id);
    id
}

/// Clear the correlation ID for the current thread
pub fn clear_correlation_id() {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = None;
    });
}

/// Span, subscriber and correlation ID of the calling thread.
///
/// Captured before handing work to rayon and re-entered on each worker so the
/// worker's events nest under the caller's training or inference span.
#[derive(Clone)]
pub struct LogContext {
    dispatch: Dispatch,
    span: Span,
    correlation_id: Option<Uuid>,
}

impl LogContext {
    pub fn capture() -> Self {
        Self {
            dispatch: dispatcher::get_default(Dispatch::clone),
            span: Span::current(),
            correlation_id: get_correlation_id(),
        }
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Run `f` inside the captured context, restoring the thread's own
    /// correlation ID afterwards.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = get_correlation_id();
        if let Some(id) = self.correlation_id {
            set_correlation_id(id);
        }
        let result = dispatcher::with_default(&self.dispatch, || self.span.in_scope(f));
        match previous {
            Some(id) => set_correlation_id(id),
            None => clear_correlation_id(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_correlation_id_management() {
        clear_correlation_id();
        assert!(get_correlation_id().is_none());

        let id = new_correlation_id();
        assert_eq!(get_correlation_id(), Some(id));

        clear_correlation_id();
        assert!(get_correlation_id().is_none());
    }

    #[test]
    fn test_filter_directives_cover_components() {
        let config = LoggingConfig::development();
        let directives = filter_directives(&config);
        assert!(directives.starts_with("medscan_svm=debug"));
        assert!(directives.contains("medscan_svm::model=debug"));
        assert!(directives.contains("medscan_svm::service=trace"));
        assert!(directives.contains("medscan_svm::storage=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_worker_threads_inherit_span_and_correlation_id() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let id = new_correlation_id();
            let span = tracing::info_span!("svm_training");
            let _enter = span.enter();
            let context = LogContext::capture();
            assert_eq!(context.correlation_id(), Some(id));

            let seen: Vec<_> = (0..64)
                .into_par_iter()
                .map(|_| context.scope(|| (Span::current().id(), get_correlation_id())))
                .collect();

            assert!(seen.iter().all(|(span_id, _)| *span_id == span.id()));
            assert!(seen.iter().all(|(_, worker_id)| *worker_id == Some(id)));
            assert_eq!(get_correlation_id(), Some(id));
        });
        clear_correlation_id();
    }

    #[test]
    fn test_scope_restores_previous_correlation_id() {
        clear_correlation_id();
        let caller = Uuid::new_v4();
        set_correlation_id(caller);
        let context = LogContext::capture();

        let other = Uuid::new_v4();
        set_correlation_id(other);
        assert_eq!(context.scope(get_correlation_id), Some(caller));
        assert_eq!(get_correlation_id(), Some(other));

        clear_correlation_id();
        context.scope(|| ());
        assert!(get_correlation_id().is_none());
    }
}
