//! Privileged host operation catalog and the enforcement broker that gates
//! every invocation on the caller's session and records it to the audit
//! trail.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use opsgate_audit::{AuditSink, AuditStatus};
use opsgate_auth::Session;
use tracing::warn;

/// Transient result of one privileged operation. Produced by the gateway,
/// consumed by the caller for display; only the success flag reaches the
/// audit trail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationOutcome {
    pub ok: bool,
    pub detail: String,
}

impl OperationOutcome {
    fn success(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    fn failure(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> AuditStatus {
        if self.ok {
            AuditStatus::Success
        } else {
            AuditStatus::Failed
        }
    }
}

/// Fixed catalog of mediated host operations. Every operation is stateless
/// request/response; no operation depends on a prior operation's result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrivilegedOperation {
    ReadFile { path: String },
    WriteFile { path: String, text: String },
    ListProcesses,
    SpawnProcess { command: String },
    PingHost { host: String },
    SystemInfo,
}

impl PrivilegedOperation {
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "read_file",
            Self::WriteFile { .. } => "write_file",
            Self::ListProcesses => "list_processes",
            Self::SpawnProcess { .. } => "spawn_process",
            Self::PingHost { .. } => "ping_host",
            Self::SystemInfo => "system_info",
        }
    }

    /// Permission gating this operation, or `None` for operations available
    /// to every authenticated session.
    pub fn permission(&self) -> Option<&'static str> {
        match self {
            Self::SystemInfo => None,
            _ => Some(self.action_name()),
        }
    }

    /// Executes the host-level action. All faults are captured here and
    /// returned as failure outcomes; nothing propagates past this boundary.
    pub fn execute(&self) -> OperationOutcome {
        match self {
            Self::ReadFile { path } => read_file(path),
            Self::WriteFile { path, text } => write_file(path, text),
            Self::ListProcesses => list_processes(),
            Self::SpawnProcess { command } => spawn_process(command),
            Self::PingHost { host } => ping_host(host),
            Self::SystemInfo => system_info(),
        }
    }
}

fn read_file(path: &str) -> OperationOutcome {
    if !Path::new(path).exists() {
        return OperationOutcome::failure("File does not exist.");
    }
    match fs::read_to_string(path) {
        Ok(contents) => OperationOutcome::success(contents),
        Err(e) => OperationOutcome::failure(e.to_string()),
    }
}

fn write_file(path: &str, text: &str) -> OperationOutcome {
    match fs::write(path, text) {
        Ok(()) => OperationOutcome::success("File written successfully."),
        Err(e) => OperationOutcome::failure(e.to_string()),
    }
}

fn list_processes() -> OperationOutcome {
    match collect_processes() {
        Ok(rows) => OperationOutcome::success(rows.join("\n")),
        Err(e) => OperationOutcome::failure(e.to_string()),
    }
}

/// Enumeration order is whatever the host yields; callers must not assume
/// stable ordering across calls.
fn collect_processes() -> std::io::Result<Vec<String>> {
    let mut rows = Vec::new();
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // A process may exit between readdir and the comm read.
        let comm = fs::read_to_string(entry.path().join("comm")).unwrap_or_default();
        rows.push(format!("{pid} — {}", comm.trim_end()));
    }
    Ok(rows)
}

/// Fire-and-forget: the child is never awaited, its output is not captured,
/// and there is no cancellation path.
fn spawn_process(command: &str) -> OperationOutcome {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return OperationOutcome::failure("empty command line");
    };
    match Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_child) => {
            OperationOutcome::success(format!("Process '{command}' started successfully."))
        }
        Err(e) => OperationOutcome::failure(e.to_string()),
    }
}

/// Blocks for one probe, bounded only by the ping utility's own timeout.
fn ping_host(host: &str) -> OperationOutcome {
    let count_flag = if cfg!(windows) { "-n" } else { "-c" };
    match Command::new("ping").args([count_flag, "1", host]).output() {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if text.trim().is_empty() {
                text = String::from_utf8_lossy(&output.stderr).into_owned();
            }
            OperationOutcome::success(text)
        }
        Err(e) => OperationOutcome::failure(e.to_string()),
    }
}

fn system_info() -> OperationOutcome {
    match gather_system_info() {
        Ok(summary) => OperationOutcome::success(summary),
        Err(e) => OperationOutcome::failure(e.to_string()),
    }
}

fn gather_system_info() -> std::io::Result<String> {
    let release = read_proc_line("/proc/sys/kernel/osrelease")?;
    let version = read_proc_line("/proc/sys/kernel/version")?;
    let cpu_count = std::thread::available_parallelism()?.get();
    let memory_mb = total_memory_mb()?;
    Ok(format!(
        "OS: {}\nRelease: {}\nVersion: {}\nMachine: {}\nCPU Cores: {}\nMemory: {} MB",
        std::env::consts::OS,
        release,
        version,
        std::env::consts::ARCH,
        cpu_count,
        memory_mb
    ))
}

fn read_proc_line(path: &str) -> std::io::Result<String> {
    Ok(fs::read_to_string(path)?.trim_end().to_string())
}

fn total_memory_mb() -> std::io::Result<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo")?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, format!("MemTotal: {e}"))
                })?;
            return Ok(kb / 1024);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "MemTotal not present in /proc/meminfo",
    ))
}

/// Single enforcement point between sessions and the operation catalog.
/// Permission checking lives here, not in the operations, so soundness does
/// not depend on any particular front end gating its own buttons.
pub struct OperationBroker<A: AuditSink> {
    audit: A,
}

impl<A: AuditSink> OperationBroker<A> {
    pub fn new(audit: A) -> Self {
        Self { audit }
    }

    /// Checks the session's permission set, executes when permitted, and
    /// attempts exactly one audit record either way. A denied request is
    /// recorded as failed without executing. An audit write failure is
    /// surfaced to the operator log but never alters the operation's own
    /// outcome.
    pub fn dispatch(
        &self,
        session: &Session,
        operation: &PrivilegedOperation,
    ) -> OperationOutcome {
        let outcome = match operation.permission() {
            Some(permission) if !session.has_permission(permission) => {
                OperationOutcome::failure("Permission denied.")
            }
            _ => operation.execute(),
        };

        if let Err(e) = self
            .audit
            .record(&session.username, operation.action_name(), outcome.status())
        {
            warn!(
                username = %session.username,
                action = operation.action_name(),
                error = %e,
                "audit write failed"
            );
        }
        outcome
    }

    /// Records a login attempt. Authentication itself stays audit-free; the
    /// caller reports its result through here.
    pub fn record_login(&self, username: &str, ok: bool) {
        let status = if ok {
            AuditStatus::Success
        } else {
            AuditStatus::Failed
        };
        if let Err(e) = self.audit.record(username, "login", status) {
            warn!(username, error = %e, "audit write failed");
        }
    }
}
