//! Kernel event log - in-memory operator journal

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::application::format::escape_html;
use crate::domain::entities::Page;

/// Event severity, from routine to fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Stable,
    Warning,
    Error,
    Panic,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Stable => "KERNEL STABLE",
            Severity::Warning => "KERNEL WARNING",
            Severity::Error => "KERNEL ERROR",
            Severity::Panic => "KERNEL PANIC",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Stable => "✅",
            Severity::Warning => "⚠️",
            Severity::Error => "❌",
            Severity::Panic => "‼️",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub action: String,
    pub outcome: String,
}

impl KernelEvent {
    /// One-line HTML rendering used in the admin panel and notifications
    pub fn to_html(&self) -> String {
        format!(
            "{} <b>{}</b> <code>{}</code>\n<i>{}</i>: {}",
            self.severity.icon(),
            self.severity.label(),
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            escape_html(&self.action),
            escape_html(&self.outcome)
        )
    }
}

/// Append-only event list for the lifetime of the process
#[derive(Debug, Default)]
pub struct KernelLog {
    events: Mutex<Vec<KernelEvent>>,
}

impl KernelLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, severity: Severity, action: impl Into<String>, outcome: impl Into<String>) -> KernelEvent {
        let event = KernelEvent {
            timestamp: Utc::now(),
            severity,
            action: action.into(),
            outcome: outcome.into(),
        };

        match severity {
            Severity::Stable => tracing::info!(action = %event.action, "{}", event.outcome),
            Severity::Warning => tracing::warn!(action = %event.action, "{}", event.outcome),
            Severity::Error | Severity::Panic => {
                tracing::error!(action = %event.action, severity = %severity, "{}", event.outcome)
            }
        }

        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        event
    }

    /// Newest events first
    pub fn page(&self, page: usize, page_size: usize) -> Page<KernelEvent> {
        let newest_first: Vec<KernelEvent> = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect();
        Page::slice(&newest_first, page, page_size)
    }

    pub fn latest(&self) -> Option<KernelEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    pub fn compact(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_newest_first() {
        let log = KernelLog::new();
        for i in 0..7 {
            log.append(Severity::Stable, format!("step {}", i), "ok");
        }

        let first = log.page(0, 5);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.items[0].action, "step 6");
        assert_eq!(first.items[4].action, "step 2");

        let second = log.page(1, 5);
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].action, "step 0");
    }

    #[test]
    fn counts_by_severity() {
        let log = KernelLog::new();
        log.append(Severity::Stable, "boot", "ok");
        log.append(Severity::Error, "reload", "failed");
        log.append(Severity::Error, "reload", "failed again");
        assert_eq!(log.count(Severity::Error), 2);
        assert_eq!(log.latest().unwrap().outcome, "failed again");
    }

    #[test]
    fn renders_label_and_icon() {
        let log = KernelLog::new();
        let event = log.append(Severity::Panic, "startup", "no transport");
        let html = event.to_html();
        assert!(html.starts_with("‼️ <b>KERNEL PANIC</b>"));
        assert!(html.contains("startup"));
    }
}
