//! Sandboxed snippet executor
//!
//! One run:
//! 1. claim the target name so no other run can write or remove it
//! 2. rewrite `<ident>.save('...')` calls to the store's path for the target
//! 3. write the snippet to a scratch file guarded for removal
//! 4. spawn the interpreter with cwd pinned to the store root and a deadline
//! 5. classify the outcome and verify the artifact
//!
//! Expected failures come back as an [`ExecutionResult`]; only setup
//! problems (scratch file, spawn errors other than a missing interpreter)
//! are returned as errors.

use regex::{Captures, Regex};
use shorui_core::config::SandboxConfig;
use shorui_core::fail_open::fail_open_sync;
use shorui_core::python::string_literal;
use shorui_core::{ExecutionFailure, ExitKind, ParsedSnippet, Result, ShoruiError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::store::ArtifactStore;

/// How long output readers may keep draining after the process is gone
const READER_GRACE: Duration = Duration::from_millis(500);

/// Deadline for the interpreter probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Outcome of one snippet run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Where the artifact was expected; only exists when `exit_kind` is Success
    pub artifact_path: PathBuf,
    /// Artifact size; zero unless Success
    pub size_bytes: u64,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub exit_kind: ExitKind,
    pub exit_code: Option<i32>,
    pub failure: Option<ExecutionFailure>,
    pub duration_ms: u64,
    /// Scratch file used for the run; removed before `execute` returns
    pub scratch_path: PathBuf,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_kind == ExitKind::Success
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        self.failure.as_ref()
    }
}

/// Result of probing the interpreter for python-docx
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentStatus {
    Ready,
    InterpreterMissing,
    /// Interpreter runs but the import failed; carries its stderr
    LibraryMissing(String),
}

/// Scratch file removed on drop, on every path out of `execute`
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new(dir: &Path) -> Self {
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let millis = chrono::Utc::now().timestamp_millis();
        let name = format!("snippet-{}-{}-{}.py", std::process::id(), seq, millis);
        Self {
            path: dir.join(name),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                fail_open_sync::<(), _>(
                    &format!("remove scratch file {}", self.path.display()),
                    Err(e),
                );
            }
        }
    }
}

/// Exclusive hold on a target path for one run.
///
/// Created with `create_new`, so a second run for the same name fails
/// instead of sharing the file. Removed on drop unless kept.
struct ArtifactClaim {
    path: PathBuf,
    kept: bool,
}

impl ArtifactClaim {
    async fn acquire(path: &Path) -> Result<Self> {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(_) => Ok(Self {
                path: path.to_path_buf(),
                kept: false,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(ShoruiError::Storage(
                format!("artifact {} already exists", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for ArtifactClaim {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed partial artifact {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                fail_open_sync::<(), _>("remove partial artifact", Err(e));
            }
        }
    }
}

/// Runs parsed snippets against an [`ArtifactStore`]
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    store: Arc<ArtifactStore>,
    interpreter: String,
    interpreter_args: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl SandboxExecutor {
    /// Executor with a 30s deadline and 1 MiB output cap per stream
    pub fn new(store: Arc<ArtifactStore>, interpreter: impl Into<String>) -> Self {
        let defaults = SandboxConfig::default();
        Self {
            store,
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
            timeout: Duration::from_secs(defaults.execution_timeout_secs),
            max_output_bytes: defaults.max_output_bytes,
        }
    }

    pub fn from_config(store: Arc<ArtifactStore>, config: &SandboxConfig) -> Self {
        Self::new(store, config.interpreter.clone())
            .with_interpreter_args(config.interpreter_args.clone())
            .with_timeout(Duration::from_secs(config.execution_timeout_secs))
            .with_max_output_bytes(config.max_output_bytes)
    }

    pub fn with_interpreter_args(mut self, args: Vec<String>) -> Self {
        self.interpreter_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Run `snippet` and report what happened
    #[instrument(skip(self, snippet), fields(filename = %snippet.target_filename))]
    pub async fn execute(&self, snippet: &ParsedSnippet) -> Result<ExecutionResult> {
        let filename = snippet.target_filename.as_str();
        let artifact_path = self.store.resolve_safe_path(filename)?;

        let claim = ArtifactClaim::acquire(&artifact_path).await?;
        let source = inject_output_path(&snippet.source_code, &artifact_path);

        tokio::fs::create_dir_all(self.store.scratch_dir()).await?;
        let scratch = ScratchFile::new(&self.store.scratch_dir());
        tokio::fs::write(scratch.path(), source.as_bytes()).await?;

        let started = Instant::now();
        let spawned = Command::new(&self.interpreter)
            .args(&self.interpreter_args)
            .arg(scratch.path())
            .current_dir(self.store.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Interpreter {} not found", self.interpreter);
                return Ok(ExecutionResult {
                    artifact_path,
                    size_bytes: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                    exit_kind: ExitKind::InterpreterMissing,
                    exit_code: None,
                    failure: Some(ExecutionFailure::InterpreterMissing),
                    duration_ms: started.elapsed().as_millis() as u64,
                    scratch_path: scratch.path().to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let stdout_reader = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_capped(out, self.max_output_bytes)));
        let stderr_reader = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_capped(err, self.max_output_bytes)));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                tracing::warn!("Snippet exceeded {:?}, killing interpreter", self.timeout);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill interpreter: {}", e);
                }
                None
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (stdout, stdout_truncated) = collect_output(stdout_reader).await;
        let (stderr, stderr_truncated) = collect_output(stderr_reader).await;

        let exit_code = status.as_ref().and_then(|s| s.code());
        let failure = match status {
            None => Some(ExecutionFailure::Timeout),
            Some(status) => match status.code() {
                Some(0) => match artifact_size(&artifact_path).await {
                    Some(_) => None,
                    None => Some(ExecutionFailure::ArtifactMissing),
                },
                Some(code) => Some(ExecutionFailure::NonZeroExit { code }),
                None => Some(ExecutionFailure::Crashed),
            },
        };

        let size_bytes = match &failure {
            None => artifact_size(&artifact_path).await.unwrap_or(0),
            Some(kind) => {
                tracing::warn!(
                    exit_code = ?exit_code,
                    "Snippet failed ({}); stderr: {}",
                    kind,
                    stderr.trim()
                );
                0
            }
        };
        if failure.is_none() {
            claim.keep();
        }

        let exit_kind = failure
            .as_ref()
            .map(ExecutionFailure::exit_kind)
            .unwrap_or(ExitKind::Success);

        tracing::info!(
            "Snippet finished: {} in {}ms ({} bytes)",
            exit_kind,
            duration_ms,
            size_bytes
        );

        Ok(ExecutionResult {
            artifact_path,
            size_bytes,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            exit_kind,
            exit_code,
            failure,
            duration_ms,
            scratch_path: scratch.path().to_path_buf(),
        })
    }

    /// Check that the interpreter runs and can import python-docx
    pub async fn check_environment(&self) -> Result<EnvironmentStatus> {
        let spawned = Command::new(&self.interpreter)
            .args(&self.interpreter_args)
            .arg("-c")
            .arg("import docx")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EnvironmentStatus::InterpreterMissing)
            }
            Err(e) => return Err(e.into()),
        };

        let output = tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                ShoruiError::Execution(ExecutionFailure::Timeout)
            })??;

        if output.status.success() {
            Ok(EnvironmentStatus::Ready)
        } else {
            Ok(EnvironmentStatus::LibraryMissing(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn save_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?P<call>\b[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*\.save\(\s*)(?:'[^'\n]*'|"[^"\n]*")"#)
            .expect("save call regex is valid")
    })
}

fn document_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:from\s+docx\s+import\s+[^\n]*\bDocument\b|import\s+docx\b)")
            .expect("docx import regex is valid")
    })
}

/// Point every literal save call at `target` and add a missing
/// `Document` import.
pub(crate) fn inject_output_path(source: &str, target: &Path) -> String {
    let literal = string_literal(&target.to_string_lossy());

    let rewritten = save_call_re().replace_all(source, |caps: &Captures| {
        format!("{}{}", &caps["call"], literal)
    });
    if !save_call_re().is_match(source) {
        tracing::warn!("Snippet has no literal save call; artifact will likely be missing");
    }

    if rewritten.contains("Document(") && !document_import_re().is_match(&rewritten) {
        format!("from docx import Document\n{}", rewritten)
    } else {
        rewritten.into_owned()
    }
}

/// Read to EOF keeping at most `cap` bytes; the flag reports discarded output
async fn read_capped<R>(mut reader: R, cap: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
                if n > room {
                    truncated = true;
                }
            }
            Err(e) => {
                tracing::debug!("Output stream closed with error: {}", e);
                break;
            }
        }
    }

    (kept, truncated)
}

/// Join a reader task, giving up after a short grace period.
///
/// A grandchild that inherited the pipe can keep it open after the
/// interpreter is killed.
async fn collect_output(handle: Option<JoinHandle<(Vec<u8>, bool)>>) -> (String, bool) {
    let Some(mut handle) = handle else {
        return (String::new(), false);
    };

    match tokio::time::timeout(READER_GRACE, &mut handle).await {
        Ok(Ok((bytes, truncated))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Ok(Err(e)) => {
            tracing::debug!("Output reader task failed: {}", e);
            (String::new(), false)
        }
        Err(_) => {
            handle.abort();
            (String::new(), true)
        }
    }
}

async fn artifact_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() && m.len() > 0 => Some(m.len()),
        _ => None,
    }
}
