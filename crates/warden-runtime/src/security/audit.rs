//! Security audit logging
//!
//! Structured record of security events (grants, revocations, denials,
//! sandbox lifecycle) kept separately from diagnostic logging.

use crate::security::types::{CapabilityType, Severity};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Security audit event types
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// Token installed into a context
    CapabilityGranted {
        token_id: String,
        capability: CapabilityType,
        pattern: String,
        context: String,
    },
    /// Token removed from a context
    CapabilityRevoked { token_id: String, context: String },
    /// No token satisfied a lookup
    CapabilityDenied {
        capability: CapabilityType,
        resource: String,
        operation: String,
    },
    /// Authorization scope pushed
    ContextEntered { name: String, depth: usize },
    /// Authorization scope popped
    ContextExited { name: String, depth: usize },
    /// Validator returned DENIED
    ValidationDenied {
        capability: CapabilityType,
        resource: String,
        severity: Severity,
        reason: String,
    },
    /// Validator returned SUSPICIOUS
    ValidationSuspicious {
        capability: CapabilityType,
        resource: String,
        score: f64,
    },
    /// Sandboxed child started
    SandboxSpawned { pid: u32, interpreter: String },
    /// Sandboxed child ended
    SandboxTerminated { pid: u32, reason: String },
    /// Resource quota exceeded
    QuotaViolation {
        resource: String,
        limit: u64,
        attempted: u64,
    },
    /// Static analysis blocked execution
    AnalysisBlocked {
        source_hash: String,
        risk: String,
        violations: usize,
    },
}

impl AuditEvent {
    /// Whether this event records a refusal
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AuditEvent::CapabilityDenied { .. }
                | AuditEvent::ValidationDenied { .. }
                | AuditEvent::ValidationSuspicious { .. }
                | AuditEvent::QuotaViolation { .. }
                | AuditEvent::AnalysisBlocked { .. }
        )
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::CapabilityGranted {
                token_id,
                capability,
                pattern,
                context,
            } => write!(
                f,
                "Capability granted: {} {} on {} in {}",
                token_id, capability, pattern, context
            ),
            AuditEvent::CapabilityRevoked { token_id, context } => {
                write!(f, "Capability revoked: {} from {}", token_id, context)
            }
            AuditEvent::CapabilityDenied {
                capability,
                resource,
                operation,
            } => write!(
                f,
                "Capability not found: {} {} on {}",
                capability, operation, resource
            ),
            AuditEvent::ContextEntered { name, depth } => {
                write!(f, "Context entered: {} (depth {})", name, depth)
            }
            AuditEvent::ContextExited { name, depth } => {
                write!(f, "Context exited: {} (depth {})", name, depth)
            }
            AuditEvent::ValidationDenied {
                capability,
                resource,
                severity,
                reason,
            } => write!(
                f,
                "Validation DENIED [{}]: {} on {} - {}",
                severity, capability, resource, reason
            ),
            AuditEvent::ValidationSuspicious {
                capability,
                resource,
                score,
            } => write!(
                f,
                "Validation SUSPICIOUS: {} on {} (score {:.2})",
                capability, resource, score
            ),
            AuditEvent::SandboxSpawned { pid, interpreter } => {
                write!(f, "Sandbox spawned: pid {} ({})", pid, interpreter)
            }
            AuditEvent::SandboxTerminated { pid, reason } => {
                write!(f, "Sandbox terminated: pid {} ({})", pid, reason)
            }
            AuditEvent::QuotaViolation {
                resource,
                limit,
                attempted,
            } => write!(
                f,
                "Quota violation: {} (limit: {}, attempted: {})",
                resource, limit, attempted
            ),
            AuditEvent::AnalysisBlocked {
                source_hash,
                risk,
                violations,
            } => write!(
                f,
                "Analysis blocked: {} ({} risk, {} violations)",
                source_hash, risk, violations
            ),
        }
    }
}

/// Audit log entry with timestamp
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.event
        )
    }
}

/// Audit logger trait for customizable logging backends
pub trait AuditLogger: Send + Sync {
    fn log(&self, event: AuditEvent);

    /// Retained entries; empty for loggers that do not retain
    fn entries(&self) -> Vec<AuditEntry>;

    fn clear(&self);
}

/// In-memory audit logger
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLogger {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, event: AuditEvent) {
        let entry = AuditEntry::new(event);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Null audit logger (no-op)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditLogger;

impl NullAuditLogger {
    pub fn new() -> Self {
        Self
    }
}

impl AuditLogger for NullAuditLogger {
    fn log(&self, _event: AuditEvent) {}

    fn entries(&self) -> Vec<AuditEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}

/// Forwards events to the `log` facade under the `warden::audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditLogger;

impl AuditLogger for LogAuditLogger {
    fn log(&self, event: AuditEvent) {
        if event.is_denial() {
            log::warn!(target: "warden::audit", "{}", event);
        } else {
            log::info!(target: "warden::audit", "{}", event);
        }
    }

    fn entries(&self) -> Vec<AuditEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_display() {
        let event = AuditEvent::CapabilityDenied {
            capability: CapabilityType::FileRead,
            resource: "/etc/passwd".to_string(),
            operation: "read".to_string(),
        };
        assert_eq!(
            event.to_string(),
            "Capability not found: file.read read on /etc/passwd"
        );
    }

    #[test]
    fn test_audit_entry_log_line_format() {
        let entry = AuditEntry::new(AuditEvent::SandboxTerminated {
            pid: 42,
            reason: "timed out".to_string(),
        });
        let line = entry.to_log_line();
        assert!(line.starts_with('['));
        assert!(line.contains("Z]"));
        assert!(line.contains("Sandbox terminated: pid 42 (timed out)"));
    }

    #[test]
    fn test_memory_logger_stores_and_clears() {
        let logger = MemoryAuditLogger::new();
        logger.log(AuditEvent::ContextEntered {
            name: "job".to_string(),
            depth: 0,
        });
        logger.log(AuditEvent::ContextExited {
            name: "job".to_string(),
            depth: 0,
        });
        assert_eq!(logger.entries().len(), 2);
        logger.clear();
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_null_and_log_loggers_retain_nothing() {
        let event = AuditEvent::QuotaViolation {
            resource: "memory".to_string(),
            limit: 10,
            attempted: 20,
        };
        NullAuditLogger::new().log(event.clone());
        LogAuditLogger.log(event);
        assert!(NullAuditLogger::new().entries().is_empty());
        assert!(LogAuditLogger.entries().is_empty());
    }

    #[test]
    fn test_denial_classification() {
        assert!(AuditEvent::ValidationSuspicious {
            capability: CapabilityType::NetworkConnect,
            resource: "x.onion".to_string(),
            score: 0.5,
        }
        .is_denial());
        assert!(!AuditEvent::CapabilityRevoked {
            token_id: "t".to_string(),
            context: "root".to_string(),
        }
        .is_denial());
    }
}
