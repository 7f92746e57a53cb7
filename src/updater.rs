//! Self-update: `git pull` and re-exec.

use std::path::PathBuf;

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Errors while updating the bot.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Could not run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git pull failed: {0}")]
    Pull(String),
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    /// Combined git output.
    pub output: String,

    /// Whether new commits arrived.
    pub changed: bool,
}

/// Updates the checkout the bot runs from.
#[derive(Debug, Clone)]
pub struct SelfUpdater {
    repo_dir: PathBuf,
}

impl SelfUpdater {
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    /// Fast-forwards the checkout.
    pub async fn pull(&self) -> Result<PullOutcome, UpdateError> {
        info!("Pulling latest code in {}", self.repo_dir.display());

        let output = Command::new("git")
            .arg("pull")
            .arg("--ff-only")
            .current_dir(&self.repo_dir)
            .output()
            .await?;

        let text = combine_output(&output.stdout, &output.stderr);
        if !output.status.success() {
            warn!("git pull exited with {}", output.status);
            return Err(UpdateError::Pull(text));
        }

        Ok(PullOutcome {
            changed: !is_up_to_date(&text),
            output: text,
        })
    }

    /// Replaces the running process with a fresh copy of itself.
    ///
    /// Only returns on failure.
    pub fn restart(&self) -> std::io::Error {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => return e,
        };
        let args: Vec<_> = std::env::args_os().skip(1).collect();
        info!("Restarting {}", exe.display());
        exec(std::process::Command::new(exe).args(args))
    }
}

#[cfg(unix)]
fn exec(command: &mut std::process::Command) -> std::io::Error {
    use std::os::unix::process::CommandExt;
    command.exec()
}

#[cfg(not(unix))]
fn exec(command: &mut std::process::Command) -> std::io::Error {
    match command.spawn() {
        Ok(_) => std::process::exit(0),
        Err(e) => e,
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_up_to_date(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("already up to date") || lower.contains("already up-to-date")
}
