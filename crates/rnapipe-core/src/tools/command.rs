use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Characters of stderr kept in failure messages.
pub const STDERR_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("'{program}' exceeded the {}s timeout and was killed", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The leading part of stderr, for failure messages.
    pub fn stderr_excerpt(&self) -> String {
        self.stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect()
    }
}

/// A blocking external command with captured output and a hard timeout.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    log_files: Option<(PathBuf, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            log_files: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Mirrors captured output to `<dir>/<stem>.stdout` and `<dir>/<stem>.stderr`.
    pub fn log_to(mut self, dir: Option<&Path>, stem: impl Into<String>) -> Self {
        self.log_files = dir.map(|d| (d.to_path_buf(), stem.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The command line as it would be typed in a shell, for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the command to completion, killing it once `timeout` has elapsed.
    ///
    /// A non-zero exit status is not an error; callers inspect [`CommandOutput::success`].
    pub fn run(&self, timeout: Duration) -> Result<CommandOutput, CommandError> {
        info!("Running: {}", self.display());
        let start = Instant::now();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let status = match self.wait_with_timeout(&mut child, timeout, start) {
            Ok(status) => status,
            Err(e) => {
                // Surviving descendants may still hold the pipes; the readers are detached.
                drop(stdout_reader);
                drop(stderr_reader);
                return Err(e);
            }
        };

        let output = CommandOutput {
            status,
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
            elapsed: start.elapsed(),
        };
        debug!(
            "Finished in {:.1}s ({})",
            output.elapsed.as_secs_f64(),
            output.status
        );
        if !output.success() {
            warn!(
                "Command failed ({}): {}",
                output.status,
                output.stderr_excerpt()
            );
        }
        self.write_logs(&output);
        Ok(output)
    }

    fn wait_with_timeout(
        &self,
        child: &mut Child,
        timeout: Duration,
        start: Instant,
    ) -> Result<ExitStatus, CommandError> {
        let io_err = |source: io::Error| CommandError::Io {
            program: self.program.clone(),
            source,
        };
        loop {
            if let Some(status) = child.try_wait().map_err(io_err)? {
                return Ok(status);
            }
            if start.elapsed() >= timeout {
                warn!(
                    "'{}' exceeded {}s, killing it.",
                    self.program,
                    timeout.as_secs()
                );
                kill_process_group(child);
                child.kill().map_err(io_err)?;
                child.wait().map_err(io_err)?;
                return Err(CommandError::Timeout {
                    program: self.program.clone(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn write_logs(&self, output: &CommandOutput) {
        let Some((dir, stem)) = &self.log_files else {
            return;
        };
        let result = fs::create_dir_all(dir)
            .and_then(|_| fs::write(dir.join(format!("{}.stdout", stem)), &output.stdout))
            .and_then(|_| fs::write(dir.join(format!("{}.stderr", stem)), &output.stderr));
        if let Err(e) = result {
            warn!("Could not write logs for '{}': {}", self.program, e);
        }
    }
}

/// Kills every process in the child's group, so launchers do not leave workers behind.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = killed {
        debug!("Could not signal process group {}: {}", group, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

/// Resolves a program name the way a shell would.
///
/// Names containing a path separator are checked directly; bare names are searched for in
/// every `PATH` entry.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
