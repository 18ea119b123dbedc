//! Process execution.
//!
//! Spawns the target with the resolved command line, environment, working
//! directory and stdin, captures both streams up to a bounded size, and
//! enforces the timeout by killing the whole process group. Resource
//! limits apply at spawn time on hosts that support them (POSIX rlimits)
//! and are a best-effort no-op elsewhere.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::schema::Limits;

/// Marker appended to a stream cut off at the capture bound.
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Default capture bound per stream, in bytes.
pub const DEFAULT_MAX_CAPTURE: usize = 1024 * 1024;

/// A fully resolved process invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Run through `sh -c` instead of a direct spawn.
    pub shell: bool,
    /// Additions over the parent environment; same-name keys override the
    /// inherited value of that key only.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
    pub limits: Limits,
    pub max_capture: usize,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            shell: false,
            env: Vec::new(),
            cwd: None,
            stdin: None,
            timeout: None,
            limits: Limits::default(),
            max_capture: DEFAULT_MAX_CAPTURE,
        }
    }

    /// The command line for reporting.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// One captured stream, possibly cut off at the bound.
#[derive(Debug, Clone, Default)]
pub struct CapturedStream {
    pub text: String,
    pub truncated: bool,
}

/// What happened to one spawn.
#[derive(Debug)]
pub enum ExecOutcome {
    /// The process ran to completion (any exit code).
    Completed {
        exit_code: Option<i32>,
        signal: Option<i32>,
        stdout: CapturedStream,
        stderr: CapturedStream,
        duration: Duration,
    },
    /// The timeout (or a CPU limit) expired; the whole process group was
    /// killed and stream content is undefined.
    TimedOut { duration: Duration },
    /// The process never started (missing binary, permission denied).
    SpawnFailed { message: String },
}

fn build_command(invocation: &Invocation) -> Command {
    let mut cmd = if invocation.shell {
        let mut shell = Command::new("sh");
        shell.arg("-c").arg(invocation.command_line());
        shell
    } else {
        let mut direct = Command::new(&invocation.program);
        direct.args(&invocation.args);
        direct
    };

    for (key, value) in &invocation.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &invocation.cwd {
        cmd.current_dir(cwd);
    }

    cmd.stdin(if invocation.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    configure_unix(&mut cmd, &invocation.limits);

    cmd
}

#[cfg(unix)]
fn configure_unix(cmd: &mut Command, limits: &Limits) {
    use std::os::unix::process::CommandExt;

    // Own process group so a timeout can take the whole tree down.
    cmd.process_group(0);

    if limits.is_empty() {
        return;
    }
    let limits = limits.clone();
    // Best-effort: a limit the host refuses is silently skipped rather
    // than failing the spawn.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(cpu) = limits.cpu {
                libc::setrlimit(libc::RLIMIT_CPU, &rlimit_value(cpu));
            }
            if let Some(memory) = limits.memory {
                libc::setrlimit(libc::RLIMIT_AS, &rlimit_value(memory));
            }
            if let Some(nofile) = limits.nofile {
                libc::setrlimit(libc::RLIMIT_NOFILE, &rlimit_value(nofile));
            }
            Ok(())
        });
    }
}

#[cfg(unix)]
fn rlimit_value(value: u64) -> libc::rlimit {
    libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let pgid = child.id() as libc::pid_t;
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &Child) {
    // No process groups here; killing the direct child is the best we can do.
    let _ = child;
}

/// Drain a pipe on its own thread, keeping at most `cap` bytes. The pipe
/// is read to EOF either way so the child never blocks on a full buffer.
fn drain(mut reader: impl Read + Send + 'static, cap: usize) -> thread::JoinHandle<CapturedStream> {
    thread::spawn(move || {
        let mut kept: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if kept.len() < cap {
                        let take = n.min(cap - kept.len());
                        kept.extend_from_slice(&chunk[..take]);
                        if take < n {
                            truncated = true;
                        }
                    } else {
                        truncated = true;
                    }
                }
            }
        }
        let mut text = String::from_utf8_lossy(&kept).into_owned();
        if truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        CapturedStream { text, truncated }
    })
}

/// Spawn and supervise one invocation.
pub fn run(invocation: &Invocation) -> ExecOutcome {
    let started = Instant::now();
    let mut child = match build_command(invocation).spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecOutcome::SpawnFailed {
                message: e.to_string(),
            }
        }
    };

    let stdout_handle = child
        .stdout
        .take()
        .map(|pipe| drain(pipe, invocation.max_capture));
    let stderr_handle = child
        .stderr
        .take()
        .map(|pipe| drain(pipe, invocation.max_capture));

    let stdin_handle = match (child.stdin.take(), invocation.stdin.clone()) {
        (Some(mut pipe), Some(input)) => Some(thread::spawn(move || {
            // A child that exits early closes the pipe; that is not an error.
            let _ = pipe.write_all(input.as_bytes());
        })),
        _ => None,
    };

    let deadline = invocation.timeout.map(|t| started + t);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        kill_process_group(&child);
                        let _ = child.kill();
                        let _ = child.wait();
                        if let Some(handle) = stdin_handle {
                            let _ = handle.join();
                        }
                        if let Some(handle) = stdout_handle {
                            let _ = handle.join();
                        }
                        if let Some(handle) = stderr_handle {
                            let _ = handle.join();
                        }
                        return ExecOutcome::TimedOut {
                            duration: started.elapsed(),
                        };
                    }
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                return ExecOutcome::SpawnFailed {
                    message: e.to_string(),
                }
            }
        }
    };

    if let Some(handle) = stdin_handle {
        let _ = handle.join();
    }
    let stdout = stdout_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    let signal = exit_signal(&status);

    // A CPU-limit kill is a timeout in disguise: same cause, same channel.
    #[cfg(unix)]
    if invocation.limits.cpu.is_some() && signal == Some(libc::SIGXCPU) {
        return ExecOutcome::TimedOut {
            duration: started.elapsed(),
        };
    }

    // Any other signal death under configured limits is a limit violation
    // and reports through the exec-error channel, not a fault.
    if !invocation.limits.is_empty() {
        if let Some(signal) = signal {
            return ExecOutcome::SpawnFailed {
                message: format!("killed by signal {} under configured resource limits", signal),
            };
        }
    }

    ExecOutcome::Completed {
        exit_code: status.code(),
        signal,
        stdout,
        stderr,
        duration: started.elapsed(),
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
