//! Sandbox executor
//!
//! The child is started in its own process group with a cleared environment.
//! A supervisory thread owns the child: it polls the monitor, decides the
//! outcome and runs the SIGTERM → grace → SIGKILL sequence. Once the leader is
//! reaped the rest of its group is killed, so background descendants never
//! outlive a run. Output is drained on two reader threads. Every join is
//! bounded by a channel `recv_timeout`.

use super::monitor::{ResourceMonitor, ResourceUsageSnapshot};
use super::{
    ExecutionResult, ExecutionState, LimitKind, SandboxConfig, SandboxError, TerminationReason,
    CAPABILITIES_ENV,
};
use crate::security::audit::{AuditEvent, AuditLogger, NullAuditLogger};
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const REAP_POLL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 8192;

/// What the supervisory thread reports back
struct Supervision {
    reason: TerminationReason,
    status: Option<ExitStatus>,
    states: Vec<ExecutionState>,
    peak: ResourceUsageSnapshot,
    elapsed: Duration,
}

struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

pub struct SandboxExecutor {
    audit: Arc<dyn AuditLogger>,
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor").finish_non_exhaustive()
    }
}

impl SandboxExecutor {
    pub fn new() -> Self {
        Self {
            audit: Arc::new(NullAuditLogger::new()),
        }
    }

    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = logger;
        self
    }

    /// Run `code` with the configured interpreter and wait for the outcome
    ///
    /// Limit breaches and kill failures are reported in the result; only a
    /// failure to start or supervise the child is an error.
    pub fn run(&self, code: &str, config: &SandboxConfig) -> Result<ExecutionResult, SandboxError> {
        config.validate()?;
        let mut command = self.command(code, config)?;

        // The supervisor exists before the child so no child is ever left unowned
        let (child_tx, child_rx) = mpsc::channel::<(Child, Instant)>();
        let (done_tx, done_rx) = mpsc::channel();
        let supervisor_config = config.clone();
        let supervisor = thread::Builder::new()
            .name("warden-sandbox-supervisor".to_string())
            .spawn(move || {
                if let Ok((child, started)) = child_rx.recv() {
                    let _ = done_tx.send(supervise(child, started, &supervisor_config));
                }
            })
            .map_err(|e| SandboxError::Io(e.to_string()))?;

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| SandboxError::SpawnFailed {
            command: config.interpreter.join(" "),
            message: e.to_string(),
        })?;
        let pid = child.id();
        log::debug!("sandbox spawned pid {} ({})", pid, config.interpreter[0]);
        self.audit.log(AuditEvent::SandboxSpawned {
            pid,
            interpreter: config.interpreter[0].clone(),
        });

        let readers = match self.spawn_readers(&mut child, config.max_output_bytes) {
            Ok(readers) => readers,
            Err(e) => {
                kill_and_reap(child, config);
                return Err(e);
            }
        };
        hand_off(&child_tx, child, started, config)?;

        let bound = config.supervision_bound() + config.join_timeout;
        let supervision = match done_rx.recv_timeout(bound) {
            Ok(supervision) => {
                if supervisor.join().is_err() {
                    log::error!("sandbox supervisor for pid {} panicked after reporting", pid);
                }
                supervision
            }
            Err(_) => {
                log::error!(
                    "sandbox supervisor for pid {} overran {:?}; detaching it",
                    pid,
                    bound
                );
                return Err(SandboxError::ForceKillFailed { pid });
            }
        };

        let (stdout, stderr) = readers;
        let stdout = collect(stdout, config.join_timeout, "stdout");
        let stderr = collect(stderr, config.join_timeout, "stderr");
        let mut states = supervision.states;
        states.push(ExecutionState::Collected);

        self.audit.log(AuditEvent::SandboxTerminated {
            pid,
            reason: supervision.reason.to_string(),
        });
        if let TerminationReason::ResourceExceeded(kind) = supervision.reason {
            let (limit, attempted) = match kind {
                LimitKind::Memory => (config.memory_limit, supervision.peak.memory_bytes),
                LimitKind::CpuTime => (
                    config.cpu_time_limit.as_millis() as u64,
                    supervision.peak.cpu_time.as_millis() as u64,
                ),
            };
            self.audit.log(AuditEvent::QuotaViolation {
                resource: kind.to_string(),
                limit,
                attempted,
            });
        }

        let outcome = match (supervision.reason, supervision.status) {
            (TerminationReason::Completed, Some(status)) => Ok(exit_code(status)),
            (reason, _) => Err(format!("process {}: {}", pid, reason)),
        };
        log::debug!(
            "sandbox pid {} finished: {} after {:?}",
            pid,
            supervision.reason,
            supervision.elapsed
        );

        Ok(ExecutionResult {
            output_truncated: stdout.truncated || stderr.truncated,
            stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
            outcome,
            resource_usage: supervision.peak,
            termination_reason: supervision.reason,
            states,
            elapsed: supervision.elapsed,
        })
    }

    fn command(&self, code: &str, config: &SandboxConfig) -> Result<Command, SandboxError> {
        let capabilities = serde_json::to_string(&config.capabilities)
            .map_err(|e| SandboxError::InvalidConfig(e.to_string()))?;

        let mut command = Command::new(&config.interpreter[0]);
        command
            .args(&config.interpreter[1..])
            .arg(code)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }
        command.envs(&config.env).env(CAPABILITIES_ENV, capabilities);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        Ok(command)
    }

    #[allow(clippy::type_complexity)]
    fn spawn_readers(
        &self,
        child: &mut Child,
        cap: usize,
    ) -> Result<(mpsc::Receiver<Captured>, mpsc::Receiver<Captured>), SandboxError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Io("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Io("child stderr not captured".to_string()))?;
        Ok((spawn_reader(stdout, cap)?, spawn_reader(stderr, cap)?))
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    cap: usize,
) -> Result<mpsc::Receiver<Captured>, SandboxError> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("warden-sandbox-reader".to_string())
        .spawn(move || {
            let mut bytes = Vec::new();
            let mut truncated = false;
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let room = cap.saturating_sub(bytes.len());
                        if n > room {
                            truncated = true;
                        }
                        bytes.extend_from_slice(&chunk[..n.min(room)]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(Captured { bytes, truncated });
        })
        .map_err(|e| SandboxError::Io(e.to_string()))?;
    Ok(rx)
}

fn collect(rx: mpsc::Receiver<Captured>, timeout: Duration, stream: &str) -> Captured {
    rx.recv_timeout(timeout).unwrap_or_else(|_| {
        log::warn!("sandbox {} reader did not finish within {:?}", stream, timeout);
        Captured {
            bytes: Vec::new(),
            truncated: true,
        }
    })
}

/// Pass the child to the supervisor, killing it if the supervisor is gone
fn hand_off(
    tx: &mpsc::Sender<(Child, Instant)>,
    child: Child,
    started: Instant,
    config: &SandboxConfig,
) -> Result<(), SandboxError> {
    match tx.send((child, started)) {
        Ok(()) => Ok(()),
        Err(mpsc::SendError((child, _))) => {
            let pid = child.id();
            kill_and_reap(child, config);
            Err(SandboxError::Io(format!(
                "supervisor exited before taking over pid {}",
                pid
            )))
        }
    }
}

fn kill_and_reap(mut child: Child, config: &SandboxConfig) {
    if let Err(e) = send_signal(&mut child, Signal::Kill) {
        log::error!("SIGKILL to sandbox pid {} failed: {}", child.id(), e);
    }
    if wait_for(&mut child, config.signal_wait()).is_none() {
        log::error!("sandbox pid {} was not reaped after SIGKILL", child.id());
    }
}

/// SIGKILL whatever is left of the group once the leader has been reaped
#[cfg(unix)]
fn sweep_group(child: &mut Child) {
    if let Err(e) = send_signal(child, Signal::Kill) {
        log::error!("sweeping process group {} failed: {}", child.id(), e);
    }
}

#[cfg(not(unix))]
fn sweep_group(_child: &mut Child) {}

/// Body of the supervisory thread
fn supervise(mut child: Child, started: Instant, config: &SandboxConfig) -> Supervision {
    let monitor = ResourceMonitor::new(child.id(), started);
    let mut states = vec![ExecutionState::Spawned, ExecutionState::Running];
    let mut peak = ResourceUsageSnapshot::default();

    let breach = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                sweep_group(&mut child);
                states.push(ExecutionState::Completed);
                return Supervision {
                    reason: TerminationReason::Completed,
                    status: Some(status),
                    states,
                    peak,
                    elapsed: started.elapsed(),
                };
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("sandbox pid {} could not be polled: {}", child.id(), e);
                break TerminationReason::KillFailed;
            }
        }

        let sample = monitor.sample();
        peak.absorb(&sample);
        if sample.memory_bytes > config.memory_limit {
            break TerminationReason::ResourceExceeded(LimitKind::Memory);
        }
        if sample.cpu_time > config.cpu_time_limit {
            break TerminationReason::ResourceExceeded(LimitKind::CpuTime);
        }
        let elapsed = sample.elapsed;
        if elapsed >= config.wall_clock_timeout {
            break TerminationReason::TimedOut;
        }
        thread::sleep(config.poll_interval.min(config.wall_clock_timeout - elapsed));
    };

    match breach {
        TerminationReason::TimedOut => states.push(ExecutionState::TimedOut),
        TerminationReason::ResourceExceeded(_) => states.push(ExecutionState::ResourceExceeded),
        _ => {}
    }
    log::info!("sandbox pid {}: {}, terminating", child.id(), breach);

    let (reason, status) = match terminate(&mut child, config) {
        Some(status) => {
            sweep_group(&mut child);
            states.push(ExecutionState::Terminated);
            (breach, Some(status))
        }
        None => {
            log::error!("sandbox pid {} survived SIGKILL", child.id());
            (TerminationReason::KillFailed, None)
        }
    };
    Supervision {
        reason,
        status,
        states,
        peak,
        elapsed: started.elapsed(),
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL and a bounded reap
fn terminate(child: &mut Child, config: &SandboxConfig) -> Option<ExitStatus> {
    if let Err(e) = send_signal(child, Signal::Terminate) {
        log::warn!("SIGTERM to sandbox pid {} failed: {}", child.id(), e);
    }
    let grace_deadline = Instant::now() + config.grace_period.max(config.signal_wait());
    while Instant::now() < grace_deadline {
        let slice = config.signal_wait().min(grace_deadline - Instant::now());
        if let Some(status) = wait_for(child, slice) {
            return Some(status);
        }
    }

    log::warn!("sandbox pid {} ignored SIGTERM, killing", child.id());
    if let Err(e) = send_signal(child, Signal::Kill) {
        log::error!("SIGKILL to sandbox pid {} failed: {}", child.id(), e);
    }
    wait_for(child, config.signal_wait())
}

fn wait_for(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(REAP_POLL.min(deadline - now));
    }
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: Signal) -> io::Result<()> {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill has no memory preconditions; the child leads its own group
    let rc = unsafe { libc::kill(-pgid, signo) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: Signal) -> io::Result<()> {
    child.kill()
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::security::audit::MemoryAuditLogger;
    use crate::security::capability::token::CapabilityToken;
    use crate::security::types::CapabilityType;

    fn quick() -> SandboxConfig {
        SandboxConfig::default().with_wall_clock_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_completed_run_captures_output() {
        let result = SandboxExecutor::new()
            .run("echo hello; echo oops >&2; exit 3", &quick())
            .unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(result.outcome, Ok(3));
        assert_eq!(result.termination_reason, TerminationReason::Completed);
        assert_eq!(
            result.states,
            vec![
                ExecutionState::Spawned,
                ExecutionState::Running,
                ExecutionState::Completed,
                ExecutionState::Collected
            ]
        );
    }

    #[test]
    fn test_environment_is_cleared() {
        std::env::set_var("WARDEN_SANDBOX_LEAK_CHECK", "visible");
        let config = quick().with_env("GRANTED", "yes");
        let result = SandboxExecutor::new()
            .run("echo \"[$WARDEN_SANDBOX_LEAK_CHECK][$GRANTED]\"", &config)
            .unwrap();
        assert_eq!(result.stdout.trim(), "[][yes]");
    }

    #[test]
    fn test_capabilities_passed_as_json() {
        let token = CapabilityToken::new(CapabilityType::FileRead, "/data/**", ["read"]).unwrap();
        let config = quick().grant(&token);
        let result = SandboxExecutor::new()
            .run("printf '%s' \"$WARDEN_CAPABILITIES\"", &config)
            .unwrap();
        let tokens: Vec<crate::security::capability::TokenSnapshot> =
            serde_json::from_str(&result.stdout).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].id, token.id());
    }

    #[test]
    fn test_output_is_capped() {
        let config = SandboxConfig {
            max_output_bytes: 16,
            ..quick()
        };
        let result = SandboxExecutor::new()
            .run("i=0; while [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done", &config)
            .unwrap();
        assert_eq!(result.stdout.len(), 16);
        assert!(result.output_truncated);
        assert_eq!(result.outcome, Ok(0));
    }

    #[test]
    fn test_trapped_sigterm_escalates_to_kill() {
        let config = SandboxConfig {
            wall_clock_timeout: Duration::from_millis(200),
            grace_period: Duration::from_millis(200),
            ..SandboxConfig::default()
        };
        let logger = Arc::new(MemoryAuditLogger::new());
        let result = SandboxExecutor::new()
            .with_audit_logger(logger.clone())
            .run("trap '' TERM; while :; do :; done", &config)
            .unwrap();
        assert_eq!(result.termination_reason, TerminationReason::TimedOut);
        assert!(result.states.contains(&ExecutionState::Terminated));
        assert!(result.outcome.is_err());
        assert!(result.elapsed < config.supervision_bound() + Duration::from_millis(250));
        assert_eq!(logger.entries().len(), 2);
    }

    #[test]
    fn test_missing_interpreter_is_spawn_error() {
        let config = SandboxConfig {
            interpreter: vec!["/nonexistent/warden-interpreter".to_string()],
            ..SandboxConfig::default()
        };
        assert!(matches!(
            SandboxExecutor::new().run("true", &config),
            Err(SandboxError::SpawnFailed { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    fn is_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat[stat.rfind(')').unwrap_or(0)..].starts_with(") Z"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_background_descendants_do_not_outlive_the_run() {
        let started = Instant::now();
        let result = SandboxExecutor::new()
            .run("sleep 60 & echo $!; echo hello", &quick())
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.termination_reason, TerminationReason::Completed);
        assert!(!result.output_truncated);

        let mut lines = result.stdout.lines();
        let background: u32 = lines.next().unwrap().trim().parse().unwrap();
        assert_eq!(lines.next(), Some("hello"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !is_gone(background) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(is_gone(background), "pid {} still running", background);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_child_is_killed_when_supervisor_is_gone() {
        use std::os::unix::process::CommandExt;

        let child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id();
        let (tx, rx) = mpsc::channel();
        drop(rx);

        let err = hand_off(&tx, child, Instant::now(), &quick()).unwrap_err();
        assert!(matches!(err, SandboxError::Io(_)));
        assert!(is_gone(pid));
    }
}
