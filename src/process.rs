//! Centralized command execution with consistent error handling.
//!
//! Every external tool (mksquashfs, mke2fs, debugfs, mount, ...) goes through
//! [`Cmd`]. Stdout is streamed to the log line by line while the tool runs
//! and is also captured, so callers can both watch progress and parse output.

use anyhow::{bail, Context, Result};
use log::{debug, error, info};
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout, byte for byte. debugfs prints file names unescaped.
    pub stdout_bytes: Vec<u8>,
    /// Captured stdout as a string (lossy).
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// Stderr if the tool wrote any, otherwise stdout.
    fn diagnostic(&self) -> &str {
        let stderr = self.stderr_trimmed();
        if stderr.is_empty() {
            self.stdout_trimmed()
        } else {
            stderr
        }
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    /// If true, stdout lines are captured but not logged.
    quiet: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            quiet: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_os_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    /// Capture stdout without echoing it to the log.
    ///
    /// Used for listing commands whose output is parsed, not read by a human.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// The command line as it would be typed, for logs and errors.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push_str(&format!("\"{}\"", arg));
            } else {
                line.push_str(&arg);
            }
        }
        line
    }

    /// Run the command, streaming stdout to the log and capturing output.
    pub fn run(self) -> Result<CommandResult> {
        let command_line = self.command_line();
        debug!("Running: {}", command_line);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            error!("Command {} failed to start", command_line);
            format!("Failed to execute '{}'. Is it installed?", self.program)
        })?;

        // Drain stderr on a helper thread so a chatty tool can't block on a full pipe
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut stdout_bytes = Vec::new();
        let mut read_error = None;
        if let Some(pipe) = child.stdout.take() {
            let mut reader = BufReader::new(pipe);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if !self.quiet {
                            let text = String::from_utf8_lossy(&line);
                            info!(target: "process", "{}", text.trim_end_matches('\n'));
                        }
                        stdout_bytes.extend_from_slice(&line);
                    }
                    Err(e) => {
                        read_error = Some(e);
                        break;
                    }
                }
            }
            // Reader dropped here: a tool still writing gets EPIPE instead of blocking
        }

        // Always reap the child, even when its output could not be read
        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        let stderr = match stderr_reader {
            Some(handle) => handle.join().unwrap_or_default(),
            None => String::new(),
        };

        if let Some(e) = read_error {
            return Err(e).with_context(|| format!("Failed to read output of '{}'", self.program));
        }

        let result = CommandResult {
            status,
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stdout_bytes,
            stderr,
        };

        if !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            error!(
                "Command exited with error code {}: {}",
                result.code(),
                command_line
            );
            let diagnostic = result.diagnostic();
            if diagnostic.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            }
            error!("{}", diagnostic);
            bail!("{} (exit code {}):\n{}", prefix, result.code(), diagnostic);
        }

        debug!("Ran command: {}", command_line);
        Ok(result)
    }

    /// Start the command without waiting for it. Output is discarded.
    pub fn spawn(self) -> Result<Child> {
        let command_line = self.command_line();
        debug!("Spawning: {}", command_line);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        cmd.spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Resolve a program on PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

// =============================================================================
// Tests
// =============================================================================
