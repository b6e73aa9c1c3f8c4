//! Explicit logging context.
//!
//! A `LogContext` owns a `tracing::Dispatch` (filter, stdout formatter and a
//! bounded history for the editor console). Nothing is installed globally:
//! callers scope the dispatch to a thread with [`LogContext::install`] and
//! tear it down by dropping the guard. Worker threads run their jobs under
//! [`LogContext::in_scope`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::Level;
use tracing::dispatcher::{self, DefaultGuard, Dispatch};
use tracing::field::{Field, Visit};
use tracing_subscriber::filter::{EnvFilter, LevelFilter, ParseError};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

use crate::config::LogConfig;

/// Which side of the engine produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Engine crates (`orrery_*` targets).
    Core,
    /// Everything else, including applications built on the engine.
    Client,
}

impl LogSource {
    fn from_target(target: &str) -> Self {
        if target.starts_with("orrery_") && !target.starts_with("orrery_cli") {
            Self::Core
        } else {
            Self::Client
        }
    }
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub source: LogSource,
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.target, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: ParseError,
    },
}

struct History {
    records: VecDeque<LogRecord>,
    capacity: usize,
}

impl History {
    fn push(&mut self, record: LogRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

/// `tracing` layer appending every enabled event to the shared history.
struct HistoryLayer {
    history: Arc<Mutex<History>>,
}

impl<S: tracing::Subscriber> Layer<S> for HistoryLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        let record = LogRecord {
            level: *meta.level(),
            source: LogSource::from_target(meta.target()),
            target: meta.target().to_string(),
            message: visitor.finish(),
        };
        self.history.lock().push(record);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Handle to a logging setup. Cheap to clone; clones share the history.
#[derive(Clone)]
pub struct LogContext {
    dispatch: Dispatch,
    history: Arc<Mutex<History>>,
}

impl LogContext {
    /// Build a context with stdout output filtered by `config.filter`.
    pub fn init(config: &LogConfig) -> Result<Self, LogError> {
        let filter = EnvFilter::try_new(&config.filter).map_err(|source| LogError::Filter {
            filter: config.filter.clone(),
            source,
        })?;
        let history = new_history(config.history_capacity);
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(HistoryLayer {
                history: history.clone(),
            });
        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            history,
        })
    }

    /// Build a context that only records history. Used by tests and tools
    /// that render the console themselves.
    pub fn detached(capacity: usize) -> Self {
        let history = new_history(capacity);
        let subscriber = Registry::default().with(LevelFilter::TRACE).with(HistoryLayer {
            history: history.clone(),
        });
        Self {
            dispatch: Dispatch::new(subscriber),
            history,
        }
    }

    /// Make this context the current thread's dispatcher until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        dispatcher::set_default(&self.dispatch)
    }

    /// Run `f` with this context as the dispatcher.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        dispatcher::with_default(&self.dispatch, f)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Snapshot of the captured records, oldest first.
    pub fn history(&self) -> Vec<LogRecord> {
        self.history.lock().records.iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().records.clear();
    }

    pub fn history_capacity(&self) -> usize {
        self.history.lock().capacity
    }
}

impl fmt::Debug for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = self.history.lock();
        f.debug_struct("LogContext")
            .field("records", &history.records.len())
            .field("capacity", &history.capacity)
            .finish()
    }
}

fn new_history(capacity: usize) -> Arc<Mutex<History>> {
    Arc::new(Mutex::new(History {
        records: VecDeque::with_capacity(capacity.min(4096)),
        capacity,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_events_in_scope() {
        let log = LogContext::detached(16);
        log.in_scope(|| {
            tracing::info!(target: "orrery_scene", "scene created");
            tracing::warn!(target: "editor", entities = 3, "slow frame");
        });

        let history = log.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "scene created");
        assert_eq!(history[0].source, LogSource::Core);
        assert_eq!(history[1].level, Level::WARN);
        assert_eq!(history[1].source, LogSource::Client);
        assert!(history[1].message.contains("entities=3"));
    }

    #[test]
    fn events_outside_scope_are_not_captured() {
        let log = LogContext::detached(16);
        tracing::info!("not captured");
        assert!(log.history().is_empty());
    }

    #[test]
    fn guard_teardown_stops_capture() {
        let log = LogContext::detached(16);
        {
            let _guard = log.install();
            tracing::info!("inside");
        }
        tracing::info!("outside");
        assert_eq!(log.history().len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let log = LogContext::detached(3);
        log.in_scope(|| {
            for i in 0..5 {
                tracing::info!("line {i}");
            }
        });
        let history = log.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "line 2");
        log.clear_history();
        assert!(log.history().is_empty());
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let config = LogConfig {
            filter: "orrery=notalevel".into(),
            history_capacity: 4,
        };
        assert!(matches!(
            LogContext::init(&config),
            Err(LogError::Filter { .. })
        ));
    }

    #[test]
    fn init_filters_below_level() {
        let config = LogConfig {
            filter: "warn".into(),
            history_capacity: 8,
        };
        let log = LogContext::init(&config).unwrap();
        log.in_scope(|| {
            tracing::info!("dropped");
            tracing::error!("kept");
        });
        let history = log.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "kept");
    }
}
