//! Launching one perf_analyzer attempt.
//!
//! The child gets its own process group so a timeout can take down anything
//! it spawned. stdout and stderr share a single pipe, so the captured text is
//! the combined stream in the order the tool wrote it.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::errors::{PerfError, Result};
use crate::types::{Attempt, AttemptStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Longest wait for output before checking whether the child has exited.
const READ_SLICE: Duration = Duration::from_millis(100);
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Runs a rendered command and reports how it ended.
///
/// Implementations must only return `Err` when the command could not be
/// run at all. A non-zero exit or a timeout is an `Attempt`.
pub trait Executor {
    fn execute(&mut self, command: &[String], timeout: Duration, stream: bool) -> Result<Attempt>;
}

/// Executes commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn execute(&mut self, command: &[String], timeout: Duration, stream: bool) -> Result<Attempt> {
        let Some((program, args)) = command.split_first() else {
            return Err(PerfError::Spawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let (reader, writer) = std::io::pipe()?;

        // The Command holds the write ends until it is dropped, so it must not
        // outlive the spawn or the reader never sees EOF.
        let child = {
            let mut cmd = Command::new(program);
            cmd.args(args)
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer);
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                cmd.process_group(0);
            }
            cmd.spawn().map_err(|source| PerfError::Spawn {
                program: program.clone(),
                source,
            })?
        };
        let mut guard = ChildGuard::new(child);

        let (tx, rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // A timeout too large to add to now means no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        let mut output = String::new();

        loop {
            let slice = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()).min(READ_SLICE),
                None => READ_SLICE,
            };
            match rx.recv_timeout(slice) {
                Ok(line) => forward(line, stream, &mut output),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            // A background child can keep the pipe open after the tool itself
            // has exited. Its exit status is the result.
            if let Some(status) = guard.try_wait()? {
                drain(&rx, stream, &mut output);
                return Ok(Attempt {
                    command: command.to_vec(),
                    output,
                    status: status_of(status),
                });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(timed_out(&mut guard, command, timeout, output));
            }
        }

        let status = match guard.wait_until(deadline)? {
            Some(status) => status,
            None => return Ok(timed_out(&mut guard, command, timeout, output)),
        };

        Ok(Attempt {
            command: command.to_vec(),
            output,
            status: status_of(status),
        })
    }
}

fn forward(line: String, stream: bool, output: &mut String) {
    if stream {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }
    output.push_str(&line);
}

/// Collect lines still in flight after the child exited, for at most
/// `DRAIN_GRACE`.
fn drain(rx: &Receiver<String>, stream: bool, output: &mut String) {
    let until = Instant::now() + DRAIN_GRACE;
    loop {
        let remaining = until.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(line) => forward(line, stream, output),
            Err(_) => break,
        }
    }
}

fn timed_out(guard: &mut ChildGuard, command: &[String], timeout: Duration, output: String) -> Attempt {
    warn!(
        timeout_secs = timeout.as_secs(),
        "perf_analyzer did not finish in time, killing its process group"
    );
    guard.terminate();
    Attempt {
        command: command.to_vec(),
        output,
        status: AttemptStatus::TimedOut,
    }
}

fn status_of(status: ExitStatus) -> AttemptStatus {
    if status.success() {
        AttemptStatus::Success
    } else {
        AttemptStatus::Failed(status.code())
    }
}

/// Owns a running child. Dropping it before the child was reaped kills the
/// child's process group and reaps it.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        ChildGuard {
            child,
            reaped: false,
        }
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Wait for exit until `deadline`, or indefinitely without one.
    fn wait_until(&mut self, deadline: Option<Instant>) -> std::io::Result<Option<ExitStatus>> {
        let Some(deadline) = deadline else {
            let status = self.child.wait()?;
            self.reaped = true;
            return Ok(Some(status));
        };
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        kill_group(&mut self.child);
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // process_group(0) made the child's pid its group id.
    if killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}
