//! Append-only audit trail.
//!
//! One line per significant action (creation, send, receive, encryption,
//! key agreement, routing). The trail is a diagnostic side effect: write
//! failures are logged and never reach simulation logic.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use qkdnet_core::NetworkResult;

enum AuditTarget {
    Memory(Vec<String>),
    Writer(Box<dyn Write + Send>),
}

/// Shared handle to the audit trail. Clones append to the same target.
#[derive(Clone, Default)]
pub struct AuditLog {
    target: Option<Arc<Mutex<AuditTarget>>>,
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.target {
            None => "disabled",
            Some(target) => match &*target.lock().unwrap_or_else(PoisonError::into_inner) {
                AuditTarget::Memory(_) => "memory",
                AuditTarget::Writer(_) => "writer",
            },
        };
        f.debug_struct("AuditLog").field("target", &kind).finish()
    }
}

impl AuditLog {
    /// A trail that drops every line.
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// A trail kept in memory, readable through [`AuditLog::lines`].
    pub fn memory() -> Self {
        Self::with_target(AuditTarget::Memory(Vec::new()))
    }

    /// A trail appended to a file, created if missing.
    pub fn to_file(path: impl AsRef<Path>) -> NetworkResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(file))
    }

    /// A trail written to an arbitrary writer.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self::with_target(AuditTarget::Writer(Box::new(writer)))
    }

    fn with_target(target: AuditTarget) -> Self {
        Self {
            target: Some(Arc::new(Mutex::new(target))),
        }
    }

    /// Append one line.
    pub fn append(&self, line: impl AsRef<str>) {
        let Some(target) = &self.target else {
            return;
        };
        let mut target = target.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *target {
            AuditTarget::Memory(lines) => lines.push(line.as_ref().to_string()),
            AuditTarget::Writer(writer) => {
                if let Err(err) = writeln!(writer, "{}", line.as_ref()) {
                    tracing::warn!(error = %err, "audit log write failed");
                }
            }
        }
    }

    /// Lines recorded so far. Empty unless the trail is in memory.
    pub fn lines(&self) -> Vec<String> {
        match &self.target {
            Some(target) => match &*target.lock().unwrap_or_else(PoisonError::into_inner) {
                AuditTarget::Memory(lines) => lines.clone(),
                AuditTarget::Writer(_) => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Flush a writer-backed trail.
    pub fn flush(&self) {
        if let Some(target) = &self.target {
            if let AuditTarget::Writer(writer) =
                &mut *target.lock().unwrap_or_else(PoisonError::into_inner)
            {
                if let Err(err) = writer.flush() {
                    tracing::warn!(error = %err, "audit log flush failed");
                }
            }
        }
    }
}
