//! Per-call progress reporting
//!
//! The gateway reports what it is doing through a [`ProgressSink`]. Events are
//! advisory: implementations swallow their own delivery failures.

use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProgressLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for ProgressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProgressLevel::Debug => "debug",
            ProgressLevel::Info => "info",
            ProgressLevel::Warn => "warn",
            ProgressLevel::Error => "error",
        })
    }
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, level: ProgressLevel, message: &str);

    async fn debug(&self, message: &str) {
        self.emit(ProgressLevel::Debug, message).await
    }

    async fn info(&self, message: &str) {
        self.emit(ProgressLevel::Info, message).await
    }

    async fn warn(&self, message: &str) {
        self.emit(ProgressLevel::Warn, message).await
    }

    async fn error(&self, message: &str) {
        self.emit(ProgressLevel::Error, message).await
    }
}

/// Used when the caller supplies no progress channel
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn emit(&self, _level: ProgressLevel, _message: &str) {}
}
