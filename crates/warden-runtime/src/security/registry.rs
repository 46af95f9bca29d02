//! Operation registry
//!
//! Immutable table describing what the analyzers know about library
//! operations: which capabilities a call requires, which modules are
//! dangerous to import, which primitives execute code dynamically, which
//! attributes reach into interpreter internals, and the taint sources, sinks
//! and sanitizers used by data-flow tracking.
//!
//! The built-in registry is constructed once on first use and shared by
//! reference. Hosts that need different knowledge build their own with
//! [`OperationRegistry::builder`].

use crate::security::types::{CapabilityType, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

static BUILTIN: OnceLock<Arc<OperationRegistry>> = OnceLock::new();

/// Risk attached to importing a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRisk {
    pub severity: Severity,
    pub capabilities: Vec<CapabilityType>,
    /// No grant can make this import legitimate
    pub unconditionally_denied: bool,
}

/// Provenance of untrusted data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    UserInput,
    CommandLine,
    Environment,
    Network,
    FileRead,
}

/// Operation that is dangerous with untrusted input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    DynamicExecution,
    ShellInvocation,
    Deserialization,
    SqlExecute,
    FileWrite,
    NetworkSend,
}

impl SinkKind {
    /// Inherent danger weight in `0.0..=1.0`
    pub fn danger(self) -> f64 {
        match self {
            SinkKind::DynamicExecution => 1.0,
            SinkKind::ShellInvocation => 0.95,
            SinkKind::Deserialization => 0.9,
            SinkKind::SqlExecute => 0.8,
            SinkKind::FileWrite => 0.6,
            SinkKind::NetworkSend => 0.6,
        }
    }

    /// Capability that would make reaching this sink legitimate
    pub fn capability(self) -> Option<CapabilityType> {
        match self {
            SinkKind::DynamicExecution | SinkKind::Deserialization => Some(CapabilityType::CodeEval),
            SinkKind::ShellInvocation => Some(CapabilityType::ProcessSpawn),
            SinkKind::FileWrite => Some(CapabilityType::FileWrite),
            SinkKind::NetworkSend => Some(CapabilityType::NetworkConnect),
            SinkKind::SqlExecute => None,
        }
    }
}

/// Role of an attribute in a reflective access chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionRole {
    /// Reaches interpreter internals on its own (`__globals__`, `__subclasses__`)
    Internal,
    /// Harmless alone but used to walk toward internals (`__class__`, `__init__`)
    Traversal,
}

/// Immutable lookup table shared by all analyzers
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    calls: HashMap<String, Vec<CapabilityType>>,
    modules: HashMap<String, ModuleRisk>,
    dynamic_execution: HashSet<String>,
    reflection: HashMap<String, ReflectionRole>,
    reflective_namespaces: HashSet<String>,
    sources: HashMap<String, SourceKind>,
    sinks: HashMap<String, SinkKind>,
    sanitizers: HashSet<String>,
}

impl OperationRegistry {
    /// Handle to the built-in registry, constructed on first use
    pub fn builtin() -> Arc<OperationRegistry> {
        Arc::clone(BUILTIN.get_or_init(|| Arc::new(Self::builtin_builder().build())))
    }

    /// Empty builder
    pub fn builder() -> OperationRegistryBuilder {
        OperationRegistryBuilder::default()
    }

    /// Builder pre-populated with the built-in knowledge
    pub fn builtin_builder() -> OperationRegistryBuilder {
        use CapabilityType::*;

        let mut b = OperationRegistryBuilder::default();

        for name in ["open", "read_file", "os.listdir", "os.scandir", "io.open"] {
            b = b.call(name, &[FileRead]);
        }
        for name in ["write_file", "shutil.copy", "shutil.move", "os.rename", "os.mkdir"] {
            b = b.call(name, &[FileWrite]);
        }
        for name in ["os.remove", "os.unlink", "os.rmdir", "shutil.rmtree"] {
            b = b.call(name, &[FileDelete]);
        }
        for name in [
            "os.system",
            "os.popen",
            "os.execv",
            "os.execve",
            "os.spawnv",
            "subprocess.run",
            "subprocess.call",
            "subprocess.Popen",
            "subprocess.check_call",
            "subprocess.check_output",
            "pty.spawn",
        ] {
            b = b.call(name, &[ProcessSpawn]);
        }
        for name in [
            "requests.get",
            "requests.post",
            "requests.put",
            "requests.delete",
            "requests.request",
            "urlopen",
            "urllib.request.urlopen",
            "socket.create_connection",
            "http.client.HTTPConnection",
        ] {
            b = b.call(name, &[NetworkConnect]);
        }
        b = b.call("socket.bind", &[NetworkListen]);
        for name in ["os.getenv", "os.environ.get"] {
            b = b.call(name, &[EnvRead]);
        }
        for name in ["os.putenv", "os.environ.update", "os.unsetenv"] {
            b = b.call(name, &[EnvWrite]);
        }
        for name in [
            "eval",
            "exec",
            "compile",
            "execfile",
            "__import__",
            "importlib.import_module",
        ] {
            b = b.call(name, &[CodeEval]);
        }
        for name in ["getattr", "setattr", "delattr", "globals", "vars", "locals"] {
            b = b.call(name, &[Reflection]);
        }
        for name in ["platform.uname", "platform.system", "os.uname", "os.getpid"] {
            b = b.call(name, &[SystemInfo]);
        }

        b = b
            .module("os", Severity::High, &[ProcessSpawn, FileWrite, EnvRead])
            .module("subprocess", Severity::High, &[ProcessSpawn])
            .module("pty", Severity::Critical, &[ProcessSpawn])
            .module("shutil", Severity::Medium, &[FileWrite, FileDelete])
            .module("socket", Severity::Medium, &[NetworkConnect, NetworkListen])
            .module("requests", Severity::Medium, &[NetworkConnect])
            .module("urllib", Severity::Medium, &[NetworkConnect])
            .module("http", Severity::Medium, &[NetworkConnect])
            .module("sys", Severity::Low, &[SystemInfo])
            .module("platform", Severity::Low, &[SystemInfo])
            .module("pickle", Severity::High, &[CodeEval])
            .module("marshal", Severity::High, &[CodeEval])
            .module("shelve", Severity::High, &[CodeEval])
            .module("importlib", Severity::High, &[CodeEval])
            .module("builtins", Severity::High, &[Reflection])
            .module("inspect", Severity::Medium, &[Reflection])
            .denied_module("ctypes", Severity::Critical)
            .denied_module("cffi", Severity::Critical);

        for name in ["eval", "exec", "compile", "execfile", "__import__"] {
            b = b.dynamic_execution(name);
        }

        for attr in [
            "__bases__",
            "__base__",
            "__subclasses__",
            "__globals__",
            "__closure__",
            "__code__",
            "__builtins__",
            "__mro__",
            "__dict__",
            "__getattribute__",
            "__func__",
            "__loader__",
        ] {
            b = b.reflection(attr, ReflectionRole::Internal);
        }
        for attr in ["__class__", "__init__", "__self__", "__module__", "__objclass__"] {
            b = b.reflection(attr, ReflectionRole::Traversal);
        }
        for ns in ["__builtins__", "globals", "vars", "locals", "builtins.__dict__"] {
            b = b.reflective_namespace(ns);
        }

        b = b
            .source("input", SourceKind::UserInput)
            .source("raw_input", SourceKind::UserInput)
            .source("sys.stdin.read", SourceKind::UserInput)
            .source("sys.stdin.readline", SourceKind::UserInput)
            .source("sys.argv", SourceKind::CommandLine)
            .source("os.getenv", SourceKind::Environment)
            .source("os.environ", SourceKind::Environment)
            .source("os.environ.get", SourceKind::Environment)
            .source("requests.get", SourceKind::Network)
            .source("urlopen", SourceKind::Network)
            .source("urllib.request.urlopen", SourceKind::Network)
            .source(".recv", SourceKind::Network)
            .source(".recvfrom", SourceKind::Network)
            .source("open", SourceKind::FileRead)
            .source("read_file", SourceKind::FileRead);

        for name in ["eval", "exec", "compile", "execfile", "__import__"] {
            b = b.sink(name, SinkKind::DynamicExecution);
        }
        for name in [
            "os.system",
            "os.popen",
            "subprocess.run",
            "subprocess.call",
            "subprocess.Popen",
            "subprocess.check_call",
            "subprocess.check_output",
        ] {
            b = b.sink(name, SinkKind::ShellInvocation);
        }
        for name in [
            "pickle.loads",
            "pickle.load",
            "marshal.loads",
            "yaml.load",
            "shelve.open",
        ] {
            b = b.sink(name, SinkKind::Deserialization);
        }
        b = b
            .sink(".execute", SinkKind::SqlExecute)
            .sink(".executemany", SinkKind::SqlExecute)
            .sink(".executescript", SinkKind::SqlExecute)
            .sink("write_file", SinkKind::FileWrite)
            .sink(".write", SinkKind::FileWrite)
            .sink(".writelines", SinkKind::FileWrite)
            .sink("requests.post", SinkKind::NetworkSend)
            .sink("requests.put", SinkKind::NetworkSend)
            .sink(".send", SinkKind::NetworkSend)
            .sink(".sendall", SinkKind::NetworkSend);

        for name in [
            "shlex.quote",
            "html.escape",
            "re.escape",
            "urllib.parse.quote",
            "os.path.basename",
            "sanitize",
            "escape",
            "quote",
            "int",
            "float",
            "bool",
            "len",
        ] {
            b = b.sanitizer(name);
        }

        b
    }

    /// Capabilities required by a call, by its resolved dotted name
    pub fn required_capabilities(&self, call: &str) -> &[CapabilityType] {
        self.calls.get(call).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Risk of importing `module`; submodules inherit their root's risk
    pub fn module_risk(&self, module: &str) -> Option<&ModuleRisk> {
        if let Some(risk) = self.modules.get(module) {
            return Some(risk);
        }
        let mut prefix = module;
        while let Some((head, _)) = prefix.rsplit_once('.') {
            if let Some(risk) = self.modules.get(head) {
                return Some(risk);
            }
            prefix = head;
        }
        None
    }

    pub fn is_dynamic_execution(&self, name: &str) -> bool {
        self.dynamic_execution.contains(name)
    }

    pub fn reflection_role(&self, attr: &str) -> Option<ReflectionRole> {
        self.reflection.get(attr).copied()
    }

    pub fn is_reflective_namespace(&self, name: &str) -> bool {
        self.reflective_namespaces.contains(name)
    }

    /// Taint source for a dotted name, or for a method (`.recv`) on any receiver
    pub fn source_kind(&self, dotted: Option<&str>, method: Option<&str>) -> Option<SourceKind> {
        Self::lookup(&self.sources, dotted, method)
    }

    /// Sink for a dotted name, or for a method (`.write`) on any receiver
    pub fn sink_kind(&self, dotted: Option<&str>, method: Option<&str>) -> Option<SinkKind> {
        Self::lookup(&self.sinks, dotted, method)
    }

    /// Sanitizers match on the full name or on the final segment
    pub fn is_sanitizer(&self, dotted: Option<&str>, terminal: Option<&str>) -> bool {
        dotted.is_some_and(|d| self.sanitizers.contains(d))
            || terminal.is_some_and(|t| self.sanitizers.contains(t))
    }

    fn lookup<T: Copy>(
        map: &HashMap<String, T>,
        dotted: Option<&str>,
        method: Option<&str>,
    ) -> Option<T> {
        dotted
            .and_then(|d| map.get(d).copied())
            .or_else(|| method.and_then(|m| map.get(&format!(".{}", m)).copied()))
    }
}

/// Builder for [`OperationRegistry`]; the built registry is immutable
#[derive(Debug, Clone, Default)]
pub struct OperationRegistryBuilder {
    inner: OperationRegistry,
}

impl OperationRegistryBuilder {
    pub fn call(mut self, name: &str, capabilities: &[CapabilityType]) -> Self {
        let entry = self.inner.calls.entry(name.to_string()).or_default();
        for cap in capabilities {
            if !entry.contains(cap) {
                entry.push(*cap);
            }
        }
        self
    }

    pub fn module(mut self, name: &str, severity: Severity, capabilities: &[CapabilityType]) -> Self {
        self.inner.modules.insert(
            name.to_string(),
            ModuleRisk {
                severity,
                capabilities: capabilities.to_vec(),
                unconditionally_denied: false,
            },
        );
        self
    }

    /// A module no capability grant can justify
    pub fn denied_module(mut self, name: &str, severity: Severity) -> Self {
        self.inner.modules.insert(
            name.to_string(),
            ModuleRisk {
                severity,
                capabilities: Vec::new(),
                unconditionally_denied: true,
            },
        );
        self
    }

    pub fn dynamic_execution(mut self, name: &str) -> Self {
        self.inner.dynamic_execution.insert(name.to_string());
        self
    }

    pub fn reflection(mut self, attr: &str, role: ReflectionRole) -> Self {
        self.inner.reflection.insert(attr.to_string(), role);
        self
    }

    pub fn reflective_namespace(mut self, name: &str) -> Self {
        self.inner.reflective_namespaces.insert(name.to_string());
        self
    }

    /// Register a source; prefix with `.` to match a method on any receiver
    pub fn source(mut self, name: &str, kind: SourceKind) -> Self {
        self.inner.sources.insert(name.to_string(), kind);
        self
    }

    /// Register a sink; prefix with `.` to match a method on any receiver
    pub fn sink(mut self, name: &str, kind: SinkKind) -> Self {
        self.inner.sinks.insert(name.to_string(), kind);
        self
    }

    pub fn sanitizer(mut self, name: &str) -> Self {
        self.inner.sanitizers.insert(name.to_string());
        self
    }

    pub fn build(self) -> OperationRegistry {
        self.inner
    }
}
