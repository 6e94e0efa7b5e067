//! Execution of a single plotting script in an isolated subprocess.
//!
//! The interpreter runs behind the configured isolation wrapper (by default
//! a fresh network namespace) and under `prlimit`. Without a wrapper the
//! runner refuses to start scripts unless unisolated runs were explicitly
//! allowed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use walkdir::WalkDir;

use super::sandbox::{
    build_program, check_script, SandboxLimits, IMAGE_EXTENSIONS, SCRIPT_FILE, TABLES_FILE,
};
use super::{FigureArtifact, FigureOutcome};
use crate::extract::ExtractedTable;
use crate::synth::FigureRequest;

/// Longest stderr tail kept in a failure reason.
const MAX_STDERR_CHARS: usize = 2000;

/// Runs one figure request and always yields an artifact.
///
/// Implementations must absorb every failure into
/// [`FigureOutcome::Failed`]; the plotting stage never errors.
#[async_trait]
pub trait FigureRunner: Send + Sync {
    async fn run(
        &self,
        request: &FigureRequest,
        tables: &[ExtractedTable],
        workdir: &Path,
    ) -> FigureArtifact;
}

/// Runs plotting scripts with the system Python interpreter.
#[derive(Debug, Clone)]
pub struct SubprocessFigureRunner {
    python: String,
    wrapper: Vec<String>,
    limits: SandboxLimits,
    allow_unisolated: bool,
    timeout: Duration,
    allowed_imports: Vec<String>,
}

impl SubprocessFigureRunner {
    pub fn new(python: impl Into<String>, timeout: Duration, allowed_imports: Vec<String>) -> Self {
        Self {
            python: python.into(),
            wrapper: Vec::new(),
            limits: SandboxLimits::default(),
            allow_unisolated: false,
            timeout,
            allowed_imports,
        }
    }

    /// Prefix command (e.g. `unshare --net --map-root-user`) placed before the interpreter.
    pub fn with_wrapper(mut self, wrapper: Vec<String>) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Lets scripts run with no wrapper at all.
    pub fn allow_unisolated(mut self, allow: bool) -> Self {
        self.allow_unisolated = allow;
        self
    }

    /// Wrapper, then the `prlimit` prefix, then the interpreter.
    fn command(&self, workdir: &Path) -> Command {
        let mut argv = self
            .wrapper
            .iter()
            .cloned()
            .chain(self.limits.prlimit_args())
            .chain(std::iter::once(self.python.clone()));
        let program = argv.next().unwrap_or_else(|| self.python.clone());

        let mut cmd = Command::new(program);
        cmd.args(argv)
            .arg("-I")
            .arg(SCRIPT_FILE)
            .current_dir(workdir)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", workdir)
            .env("MPLBACKEND", "Agg")
            .env("MPLCONFIGDIR", workdir.join(".mplconfig"))
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("OMP_NUM_THREADS", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn execute(
        &self,
        request: &FigureRequest,
        tables: &[ExtractedTable],
        workdir: &Path,
    ) -> Result<PathBuf, String> {
        check_script(&request.script, &self.allowed_imports)?;
        if self.wrapper.is_empty() && !self.allow_unisolated {
            return Err(
                "no isolation wrapper is configured for plotting scripts".to_string(),
            );
        }

        if workdir.exists() {
            tokio::fs::remove_dir_all(workdir)
                .await
                .map_err(|e| format!("failed to reset figure directory: {}", e))?;
        }
        tokio::fs::create_dir_all(workdir)
            .await
            .map_err(|e| format!("failed to create figure directory: {}", e))?;

        let tables_json = serde_json::to_vec(tables)
            .map_err(|e| format!("failed to serialize tables: {}", e))?;
        tokio::fs::write(workdir.join(TABLES_FILE), tables_json)
            .await
            .map_err(|e| format!("failed to write tables: {}", e))?;
        tokio::fs::write(workdir.join(SCRIPT_FILE), build_program(&request.script))
            .await
            .map_err(|e| format!("failed to write script: {}", e))?;

        let mut command = self.command(workdir);
        let child = command.spawn().map_err(|e| {
            format!(
                "failed to start '{}': {}",
                command.as_std().get_program().to_string_lossy(),
                e
            )
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("plotting script timed out after {:?}", self.timeout))?
            .map_err(|e| format!("failed to wait for plotting script: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "plotting script exited with {}: {}",
                output.status,
                tail_chars(stderr.trim(), MAX_STDERR_CHARS)
            ));
        }

        let images = find_images(workdir);
        match images.len() {
            1 => Ok(images.into_iter().next().unwrap_or_default()),
            0 => Err("plotting script produced no image".to_string()),
            n => Err(format!(
                "plotting script produced {} images, expected exactly one",
                n
            )),
        }
    }
}

#[async_trait]
impl FigureRunner for SubprocessFigureRunner {
    async fn run(
        &self,
        request: &FigureRequest,
        tables: &[ExtractedTable],
        workdir: &Path,
    ) -> FigureArtifact {
        let started = Instant::now();
        let outcome = match self.execute(request, tables, workdir).await {
            Ok(path) => FigureOutcome::Image { path },
            Err(reason) => {
                tracing::warn!(figure_id = %request.id, %reason, "Figure failed");
                FigureOutcome::Failed { reason }
            }
        };
        FigureArtifact::new(request.id.clone(), outcome, started.elapsed())
    }
}

/// Image files directly inside `dir`, sorted by name.
pub fn find_images(dir: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    images
}

fn tail_chars(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    text.chars().skip(count - limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(script: &str) -> FigureRequest {
        FigureRequest {
            id: "fig1".into(),
            tables: vec![0],
            script: script.into(),
            caption: "test".into(),
        }
    }

    fn runner() -> SubprocessFigureRunner {
        SubprocessFigureRunner::new(
            "python3",
            Duration::from_secs(30),
            vec!["numpy".into(), "matplotlib".into()],
        )
    }

    #[test]
    fn test_find_images_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(dir.path().join("b.SVG"), b"x").unwrap();
        std::fs::write(dir.path().join("tables.json"), b"[]").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.png"), b"x").unwrap();

        let images = find_images(dir.path());
        assert_eq!(images.len(), 2);
        assert!(images[0].ends_with("a.png"));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[tokio::test]
    async fn test_disallowed_import_fails_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("Fig").join("fig1");
        let artifact = runner()
            .run(&request("import os\n"), &[], &workdir)
            .await;

        match artifact.outcome {
            FigureOutcome::Failed { reason } => assert!(reason.contains("'os'")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!workdir.exists());
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SubprocessFigureRunner::new(
            "labforge-no-such-python",
            Duration::from_secs(5),
            vec!["numpy".into()],
        )
        .with_limits(SandboxLimits::unlimited())
        .allow_unisolated(true);
        let artifact = runner
            .run(&request("x = 1\n"), &[], &dir.path().join("fig1"))
            .await;
        match artifact.outcome {
            FigureOutcome::Failed { reason } => {
                assert!(reason.contains("labforge-no-such-python"), "{reason}")
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(artifact.request_id, "fig1");
    }

    #[tokio::test]
    async fn test_refuses_to_run_without_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("fig1");
        let artifact = runner().run(&request("x = 1\n"), &[], &workdir).await;

        match artifact.outcome {
            FigureOutcome::Failed { reason } => assert!(reason.contains("isolation"), "{reason}"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!workdir.exists());
    }

    /// A runner whose "wrapper" is a shell snippet standing in for the
    /// interpreter. The interpreter command line arrives as `$@`.
    #[cfg(unix)]
    fn shell_runner(snippet: &str, timeout: Duration) -> SubprocessFigureRunner {
        SubprocessFigureRunner::new("python3", timeout, vec!["numpy".into()]).with_wrapper(vec![
            "/bin/sh".into(),
            "-c".into(),
            snippet.into(),
            "sh".into(),
        ])
    }

    #[cfg(unix)]
    fn table() -> ExtractedTable {
        use crate::extract::Cell;
        ExtractedTable {
            index: 0,
            source: "ohm.csv".into(),
            header: Some(vec!["U".into(), "I".into()]),
            rows: vec![vec![Cell::Numeric(1.0), Cell::Numeric(2.0)]],
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_single_image_is_the_figure() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("fig1");
        let snippet = "test -s tables.json && grep -q TABLES plot.py && printf x > figure.png";
        let artifact = shell_runner(snippet, Duration::from_secs(10))
            .run(&request("plt.savefig('figure.png')\n"), &[table()], &workdir)
            .await;

        match artifact.outcome {
            FigureOutcome::Image { path } => assert_eq!(path, workdir.join("figure.png")),
            other => panic!("expected image, got {:?}", other),
        }
        let tables = std::fs::read_to_string(workdir.join(TABLES_FILE)).unwrap();
        assert!(tables.contains("rows"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interpreter_runs_under_limits() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("fig1");
        let snippet = "printf '%s\\n' \"$@\" > argv.txt; printf x > figure.png";
        let limits = SandboxLimits {
            memory_limit: 1024,
            ..SandboxLimits::unlimited()
        };
        let artifact = shell_runner(snippet, Duration::from_secs(10))
            .with_limits(limits)
            .run(&request("x = 1\n"), &[], &workdir)
            .await;
        assert!(!artifact.is_failed());

        let argv = std::fs::read_to_string(workdir.join("argv.txt")).unwrap();
        let argv: Vec<&str> = argv.lines().collect();
        assert_eq!(argv, vec!["prlimit", "--as=1024", "python3", "-I", "plot.py"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_image_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = shell_runner("true", Duration::from_secs(10))
            .run(&request("x = 1\n"), &[], &dir.path().join("fig1"))
            .await;
        match artifact.outcome {
            FigureOutcome::Failed { reason } => assert!(reason.contains("no image"), "{reason}"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_two_images_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = shell_runner("printf x > a.png; printf x > b.svg", Duration::from_secs(10))
            .run(&request("x = 1\n"), &[], &dir.path().join("fig1"))
            .await;
        match artifact.outcome {
            FigureOutcome::Failed { reason } => {
                assert!(reason.contains("2 images"), "{reason}")
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let snippet = "printf x > figure.png; echo 'ValueError: bad fit' >&2; exit 3";
        let artifact = shell_runner(snippet, Duration::from_secs(10))
            .run(&request("x = 1\n"), &[], &dir.path().join("fig1"))
            .await;
        match artifact.outcome {
            FigureOutcome::Failed { reason } => {
                assert!(reason.contains("exited"), "{reason}");
                assert!(reason.contains("ValueError: bad fit"), "{reason}");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_script_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let artifact = shell_runner("exec sleep 10", Duration::from_millis(200))
            .run(&request("x = 1\n"), &[], &dir.path().join("fig1"))
            .await;
        match artifact.outcome {
            FigureOutcome::Failed { reason } => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rerun_clears_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("fig1");
        std::fs::create_dir_all(&workdir).unwrap();
        std::fs::write(workdir.join("stale.png"), b"x").unwrap();

        let artifact = shell_runner("printf x > figure.png", Duration::from_secs(10))
            .run(&request("x = 1\n"), &[], &workdir)
            .await;
        assert!(!artifact.is_failed());
        assert!(!workdir.join("stale.png").exists());
    }
}
