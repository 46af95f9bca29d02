//! Aggregation and batch analysis
//!
//! [`SecurityAnalyzer`] runs the pattern, structural and taint passes over
//! one source and merges their findings into a [`SecurityReport`].
//! [`AnalysisRunner`] fans a batch out over a rayon pool, gives each worker
//! its own analyzer, caches reports by content hash and turns a failed item
//! into a degraded report instead of failing the batch.

use crate::parser::parse_source;
use crate::security::ast_analyzer::AstAnalyzer;
use crate::security::capability::declaration::capability_for_operation;
use crate::security::patterns::{PatternDetector, PatternRegistry, SUSPICIOUS_CONFIDENCE_THRESHOLD};
use crate::security::pipeline::PipelineError;
use crate::security::registry::OperationRegistry;
use crate::security::report::{SecurityReport, SecurityViolation};
use crate::security::taint::TaintTracker;
use crate::security::types::{CapabilityType, Severity, ViolationKind};
use lru::LruCache;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use warden_config::AnalysisSettings;

/// Default number of cached reports
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Analysis and blocking knobs
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOptions {
    /// Pattern matches below this confidence are dropped
    pub confidence_floor: f64,
    /// Violations at or above this severity block execution
    pub block_severity: Severity,
    /// Worker threads for batch analysis; 0 uses the rayon default
    pub workers: usize,
    /// Cached reports; 0 disables the cache
    pub cache_size: usize,
    /// Block sources whose analysis is incomplete
    pub block_incomplete: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            confidence_floor: SUSPICIOUS_CONFIDENCE_THRESHOLD,
            block_severity: Severity::High,
            workers: 0,
            cache_size: DEFAULT_CACHE_SIZE,
            block_incomplete: true,
        }
    }
}

impl AnalysisOptions {
    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        let block_severity = settings.block_severity.parse().unwrap_or_else(|e| {
            log::warn!("{}, blocking at high", e);
            Severity::High
        });
        Self {
            confidence_floor: settings.confidence_floor,
            block_severity,
            workers: settings.workers,
            cache_size: settings.cache_size,
            block_incomplete: settings.block_incomplete,
        }
    }
}

/// Hex-encoded SHA-256 of a source text
pub fn source_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Capability that legitimizes a pattern finding of this kind
fn pattern_capabilities(kind: ViolationKind) -> Vec<CapabilityType> {
    match kind {
        ViolationKind::DynamicExecution
        | ViolationKind::UnsafeDeserialization
        | ViolationKind::DangerousImport => vec![CapabilityType::CodeEval],
        ViolationKind::ShellInjection => vec![CapabilityType::ProcessSpawn],
        ViolationKind::SuspiciousNetwork => vec![CapabilityType::NetworkConnect],
        ViolationKind::PathTraversal => vec![CapabilityType::FileRead],
        ViolationKind::ReflectionAbuse => vec![CapabilityType::Reflection],
        ViolationKind::CredentialExposure
        | ViolationKind::InjectionShapedString
        | ViolationKind::TaintedDataFlow => Vec::new(),
    }
}

/// Runs all three passes over one source
///
/// Holds no mutable state; one instance per worker thread.
#[derive(Debug, Clone)]
pub struct SecurityAnalyzer {
    detector: PatternDetector,
    ast: AstAnalyzer,
    taint: TaintTracker,
}

impl Default for SecurityAnalyzer {
    fn default() -> Self {
        Self::new(
            OperationRegistry::builtin(),
            PatternRegistry::builtin(),
            SUSPICIOUS_CONFIDENCE_THRESHOLD,
        )
    }
}

impl SecurityAnalyzer {
    pub fn new(
        registry: Arc<OperationRegistry>,
        patterns: Arc<PatternRegistry>,
        confidence_floor: f64,
    ) -> Self {
        Self {
            detector: PatternDetector::new(patterns).with_confidence_floor(confidence_floor),
            ast: AstAnalyzer::new(Arc::clone(&registry)),
            taint: TaintTracker::new(registry),
        }
    }

    pub fn analyze(&self, source: &str) -> SecurityReport {
        let pattern_matches = self.detector.scan(source);
        let parsed = parse_source(source);
        let ast = self.ast.analyze(&parsed);
        let data_flows = self.taint.analyze(&parsed.program);

        let mut violations = ast.violations;
        let mut required_capabilities = ast.required_capabilities;

        // Structural findings win over textual ones on the same line
        for m in &pattern_matches {
            let duplicate = violations
                .iter()
                .any(|v| v.location().line == m.location.line && v.kind() == m.kind);
            if !duplicate {
                violations.push(SecurityViolation::from_pattern(m, pattern_capabilities(m.kind)));
            }
        }
        violations.extend(data_flows.iter().filter_map(|f| f.to_violation()));

        for violation in &violations {
            if violation.kind() != ViolationKind::DangerousImport {
                required_capabilities.extend(violation.required_capabilities().iter().copied());
            }
        }

        violations.sort_by(|a, b| {
            a.location()
                .cmp(&b.location())
                .then(b.severity().cmp(&a.severity()))
                .then(a.kind().cmp(&b.kind()))
        });

        let declared_capabilities = parsed
            .program
            .capability_decls()
            .iter()
            .flat_map(|decl| &decl.grants)
            .flat_map(|grant| &grant.operations)
            .filter_map(|op| capability_for_operation(op))
            .collect();

        let mut report = SecurityReport {
            violations,
            pattern_matches,
            data_flows,
            risk: Default::default(),
            required_capabilities,
            declared_capabilities,
            incomplete: ast.unparsable,
            diagnostics: ast.diagnostics,
            source_hash: source_hash(source),
        };
        report.recompute_risk();
        report
    }
}

/// Batch analysis with per-item isolation and a content-hash cache
pub struct AnalysisRunner {
    options: AnalysisOptions,
    registry: Arc<OperationRegistry>,
    patterns: Arc<PatternRegistry>,
    cache: Option<Mutex<LruCache<String, SecurityReport>>>,
    pool: Option<rayon::ThreadPool>,
}

impl Default for AnalysisRunner {
    fn default() -> Self {
        Self::new(AnalysisOptions::default())
    }
}

impl AnalysisRunner {
    pub fn new(options: AnalysisOptions) -> Self {
        Self::with_registries(options, OperationRegistry::builtin(), PatternRegistry::builtin())
    }

    pub fn with_registries(
        options: AnalysisOptions,
        registry: Arc<OperationRegistry>,
        patterns: Arc<PatternRegistry>,
    ) -> Self {
        let cache = NonZeroUsize::new(options.cache_size).map(|n| Mutex::new(LruCache::new(n)));
        let pool = if options.workers > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(options.workers)
                .thread_name(|i| format!("warden-analysis-{}", i))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("failed to build analysis pool, using global pool: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self {
            options,
            registry,
            patterns,
            cache,
            pool,
        }
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    fn new_analyzer(&self) -> SecurityAnalyzer {
        SecurityAnalyzer::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.patterns),
            self.options.confidence_floor,
        )
    }

    /// Analyze one source, consulting the cache
    pub fn analyze(&self, source: &str) -> SecurityReport {
        self.analyze_with(&self.new_analyzer(), source)
    }

    /// Analyze a batch in parallel; results are in input order
    pub fn analyze_batch<S>(&self, sources: &[S]) -> Vec<SecurityReport>
    where
        S: AsRef<str> + Sync,
    {
        let run = || -> Vec<SecurityReport> {
            sources
                .par_iter()
                .map_init(
                    || self.new_analyzer(),
                    |analyzer, source| self.analyze_with(analyzer, source.as_ref()),
                )
                .collect()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Analyze a batch on the calling thread
    pub fn analyze_sequential<S: AsRef<str>>(&self, sources: &[S]) -> Vec<SecurityReport> {
        let analyzer = self.new_analyzer();
        sources
            .iter()
            .map(|source| self.analyze_with(&analyzer, source.as_ref()))
            .collect()
    }

    fn analyze_with(&self, analyzer: &SecurityAnalyzer, source: &str) -> SecurityReport {
        let hash = source_hash(source);
        if let Some(report) = self.cached(&hash) {
            return report;
        }
        match isolate(|| analyzer.analyze(source)) {
            Ok(report) => {
                self.store(&hash, &report);
                report
            }
            // Degraded reports stay out of the cache
            Err(reason) => {
                log::warn!("analysis of {} degraded: {}", hash, reason);
                SecurityReport::degraded(hash, reason)
            }
        }
    }

    fn cached(&self, hash: &str) -> Option<SecurityReport> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
        let hit = cache.get(hash).cloned();
        if hit.is_some() {
            log::debug!("analysis cache hit for {}", hash);
        }
        hit
    }

    fn store(&self, hash: &str, report: &SecurityReport) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.put(hash.to_string(), report.clone());
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    /// Whether a report blocks execution under this runner's options
    pub fn gate(&self, report: &SecurityReport) -> Result<(), PipelineError> {
        gate(report, &self.options)
    }
}

/// Run `f`, catching a panic as its message
fn isolate<F>(f: F) -> Result<SecurityReport, String>
where
    F: FnOnce() -> SecurityReport,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "analyzer panicked".to_string())
    })
}

/// Abort before execution when a report reaches the blocking severity
pub fn gate(report: &SecurityReport, options: &AnalysisOptions) -> Result<(), PipelineError> {
    if report.should_block(options.block_severity) || (options.block_incomplete && report.incomplete) {
        log::info!(
            "blocking source {}: risk {}, {} violation(s)",
            report.source_hash,
            report.risk,
            report.violations.len()
        );
        return Err(PipelineError::Blocked {
            report: Box::new(report.clone()),
        });
    }
    Ok(())
}
