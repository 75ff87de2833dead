use crate::core::{DataContext, Engine, EngineError};
use serde_json::Value;
use std::{
    io::{Read, Write},
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{trace, warn};

/// The default bound on a single `cue` invocation.
#[cfg(test)]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Evaluates rule programs with the `cue` command-line tool.
///
/// Programs are fed on stdin. Each data context entry is appended as a
/// top-level field, unifying with the program's `key: _` declaration.
/// Invocations that outlive the timeout are killed.
#[derive(Clone, Debug)]
pub struct CueCli {
    binary: PathBuf,
    timeout: Duration,
}

// === impl CueCli ===

impl CueCli {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn run(&self, args: &[&str], stdin: &str) -> Result<Result<String, String>, EngineError> {
        trace!(binary = %self.binary.display(), ?args, "Running");
        let unavailable = |e: std::io::Error| EngineError::Unavailable(e.to_string());
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EngineError::Unavailable(format!("{}: {e}", self.binary.display()))
            })?;

        // Pipes are drained on their own threads so a chatty child never
        // blocks on a full pipe while we wait on it.
        if let Some(mut input) = child.stdin.take() {
            let input_bytes = stdin.as_bytes().to_vec();
            thread::spawn(move || input.write_all(&input_bytes));
        }
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = self.wait(&mut child)?;
        let collect = |handle: Option<thread::JoinHandle<std::io::Result<Vec<u8>>>>| {
            match handle.map(thread::JoinHandle::join) {
                Some(Ok(read)) => read.map_err(unavailable),
                Some(Err(_)) => Err(EngineError::Unavailable("pipe reader panicked".to_string())),
                None => Ok(vec![]),
            }
        };
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if status.success() {
            Ok(Ok(String::from_utf8_lossy(&stdout).into_owned()))
        } else {
            Ok(Err(String::from_utf8_lossy(&stderr).trim().to_string()))
        }
    }

    /// Waits for the child to exit, killing it once the timeout elapses.
    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus, EngineError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    warn!(binary = %self.binary.display(), timeout = ?self.timeout, "Killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(EngineError::Unavailable(format!(
                        "{} timed out after {:?}",
                        self.binary.display(),
                        self.timeout
                    )));
                }
                Err(e) => return Err(EngineError::Unavailable(e.to_string())),
            }
        }
    }

    fn blocking<T>(f: impl FnOnce() -> T) -> T {
        match tokio::runtime::Handle::try_current() {
            Ok(rt) if rt.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(f)
            }
            _ => f(),
        }
    }
}

impl Engine for CueCli {
    fn format(&self, program: &str) -> Result<String, EngineError> {
        Self::blocking(|| self.run(&["fmt", "-"], program))?.map_err(EngineError::Syntax)
    }

    fn validate(&self, program: &str) -> Result<(), EngineError> {
        Self::blocking(|| self.run(&["vet", "-c=false", "-"], program))?
            .map(|_| ())
            .map_err(EngineError::Syntax)
    }

    fn execute(
        &self,
        program: &str,
        data: &DataContext,
        output: &str,
    ) -> Result<Value, EngineError> {
        let input = with_data(program, data)?;
        let stdout = Self::blocking(|| {
            self.run(&["export", "-e", output, "--out", "json", "-"], &input)
        })?
        .map_err(|message| classify(output, message))?;

        serde_json::from_str(&stdout).map_err(|source| EngineError::Decode {
            path: output.to_string(),
            source,
        })
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

/// Appends each context entry to `program` as `key: <json>`.
fn with_data(program: &str, data: &DataContext) -> Result<String, EngineError> {
    let mut input = String::with_capacity(program.len());
    input.push_str(program);
    input.push('\n');
    for key in data.keys() {
        let value = data.get(key).cloned().unwrap_or(Value::Null);
        let json = serde_json::to_string(&value).map_err(|source| EngineError::Decode {
            path: key.to_string(),
            source,
        })?;
        input.push_str(&format!("{key}: {json}\n"));
    }
    Ok(input)
}

fn classify(output: &str, message: String) -> EngineError {
    let unresolved = ["incomplete value", "undefined field", "reference", "not found"];
    if unresolved.iter().any(|m| message.contains(m)) {
        EngineError::UnresolvedPath {
            path: output.to_string(),
            message,
        }
    } else {
        EngineError::Syntax(message)
    }
}
