//! Logger sink
//!
//! Network components log through an injected [`LogSink`] rather than a
//! process-wide logger, so tests can capture or silence output. Each level is
//! an optional hook; a missing hook drops the event.

use std::fmt;
use std::sync::Arc;

/// A single log hook
pub type LogHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional info/warn/error hooks
#[derive(Clone, Default)]
pub struct LogSink {
    info: Option<LogHook>,
    warn: Option<LogHook>,
    error: Option<LogHook>,
}

impl LogSink {
    /// Sink that forwards every level to `tracing`
    pub fn tracing() -> Self {
        Self {
            info: Some(Arc::new(|m: &str| tracing::info!(target: "gamewire", "{}", m))),
            warn: Some(Arc::new(|m: &str| tracing::warn!(target: "gamewire", "{}", m))),
            error: Some(Arc::new(|m: &str| tracing::error!(target: "gamewire", "{}", m))),
        }
    }

    /// Sink with no hooks; every event is dropped
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn builder() -> LogSinkBuilder {
        LogSinkBuilder::default()
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        Self::emit(&self.info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        Self::emit(&self.warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        Self::emit(&self.error, args);
    }

    fn emit(hook: &Option<LogHook>, args: fmt::Arguments<'_>) {
        if let Some(hook) = hook {
            match args.as_str() {
                Some(s) => hook(s),
                None => hook(&args.to_string()),
            }
        }
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("info", &self.info.is_some())
            .field("warn", &self.warn.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Builder for LogSink
#[derive(Default)]
pub struct LogSinkBuilder {
    sink: LogSink,
}

impl LogSinkBuilder {
    pub fn info(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.sink.info = Some(Arc::new(hook));
        self
    }

    pub fn warn(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.sink.warn = Some(Arc::new(hook));
        self
    }

    pub fn error(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.sink.error = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> LogSink {
        self.sink
    }
}
