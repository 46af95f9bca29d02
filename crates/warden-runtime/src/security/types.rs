//! Shared vocabulary for the security core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Finding / decision severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Class of sensitive operation a capability token can grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CapabilityType {
    #[serde(rename = "file.read")]
    FileRead,
    #[serde(rename = "file.write")]
    FileWrite,
    #[serde(rename = "file.delete")]
    FileDelete,
    #[serde(rename = "network.connect")]
    NetworkConnect,
    #[serde(rename = "network.listen")]
    NetworkListen,
    #[serde(rename = "process.spawn")]
    ProcessSpawn,
    #[serde(rename = "env.read")]
    EnvRead,
    #[serde(rename = "env.write")]
    EnvWrite,
    #[serde(rename = "code.eval")]
    CodeEval,
    #[serde(rename = "reflection")]
    Reflection,
    #[serde(rename = "system.info")]
    SystemInfo,
}

impl CapabilityType {
    pub const ALL: [CapabilityType; 11] = [
        CapabilityType::FileRead,
        CapabilityType::FileWrite,
        CapabilityType::FileDelete,
        CapabilityType::NetworkConnect,
        CapabilityType::NetworkListen,
        CapabilityType::ProcessSpawn,
        CapabilityType::EnvRead,
        CapabilityType::EnvWrite,
        CapabilityType::CodeEval,
        CapabilityType::Reflection,
        CapabilityType::SystemInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityType::FileRead => "file.read",
            CapabilityType::FileWrite => "file.write",
            CapabilityType::FileDelete => "file.delete",
            CapabilityType::NetworkConnect => "network.connect",
            CapabilityType::NetworkListen => "network.listen",
            CapabilityType::ProcessSpawn => "process.spawn",
            CapabilityType::EnvRead => "env.read",
            CapabilityType::EnvWrite => "env.write",
            CapabilityType::CodeEval => "code.eval",
            CapabilityType::Reflection => "reflection",
            CapabilityType::SystemInfo => "system.info",
        }
    }

    /// Resource segment separator used by glob matching
    ///
    /// Paths split on `/`, hosts on `.`; other resources are a single segment.
    pub fn segment_separator(self) -> Option<char> {
        match self {
            CapabilityType::FileRead | CapabilityType::FileWrite | CapabilityType::FileDelete => {
                Some('/')
            }
            CapabilityType::NetworkConnect | CapabilityType::NetworkListen => Some('.'),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityType::ALL
            .into_iter()
            .find(|cap| cap.as_str() == s.trim())
            .ok_or_else(|| format!("unknown capability type '{}'", s))
    }
}

/// Category of a security finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    DynamicExecution,
    DangerousImport,
    ReflectionAbuse,
    InjectionShapedString,
    ShellInjection,
    UnsafeDeserialization,
    CredentialExposure,
    SuspiciousNetwork,
    PathTraversal,
    TaintedDataFlow,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::DynamicExecution => "dynamic-execution",
            ViolationKind::DangerousImport => "dangerous-import",
            ViolationKind::ReflectionAbuse => "reflection-abuse",
            ViolationKind::InjectionShapedString => "injection-shaped-string",
            ViolationKind::ShellInjection => "shell-injection",
            ViolationKind::UnsafeDeserialization => "unsafe-deserialization",
            ViolationKind::CredentialExposure => "credential-exposure",
            ViolationKind::SuspiciousNetwork => "suspicious-network",
            ViolationKind::PathTraversal => "path-traversal",
            ViolationKind::TaintedDataFlow => "tainted-data-flow",
        };
        f.write_str(s)
    }
}

/// 1-based source location
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl From<crate::span::Span> for Location {
    fn from(span: crate::span::Span) -> Self {
        Self::new(span.line as usize, span.column as usize)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
