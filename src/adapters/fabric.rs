//! Fabric drafter for AI post generation.
//!
//! Uses subprocess mode, calling the `fabric` CLI directly with a writing
//! pattern and piping the prompt to stdin.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::domain::{ContentKind, Platform};

use super::Drafter;

/// Default pattern used to write posts
pub const DEFAULT_PATTERN: &str = "write_social_post";

/// Drafter backed by the Fabric CLI
pub struct FabricDrafter {
    /// Path to the fabric binary (default: "fabric")
    binary_path: String,

    /// Pattern to run
    pattern: String,

    /// Per-draft timeout
    draft_timeout: Duration,
}

impl Default for FabricDrafter {
    fn default() -> Self {
        Self::new("fabric", DEFAULT_PATTERN)
    }
}

impl FabricDrafter {
    pub fn new(binary_path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            pattern: pattern.into(),
            draft_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, draft_timeout: Duration) -> Self {
        self.draft_timeout = draft_timeout;
        self
    }

    /// Input handed to the pattern on stdin
    fn render_input(prompt: &str, platform: Platform, kind: ContentKind) -> String {
        format!(
            "Platform: {}\nPost type: {}\n\n{}\n",
            platform,
            kind,
            prompt.trim()
        )
    }

    async fn run_pattern(&self, input: &str) -> Result<String> {
        let mut child = Command::new(&self.binary_path)
            .args(["-p", &self.pattern])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn fabric process for pattern '{}'", self.pattern))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write to fabric stdin")?;
            // Drop stdin to signal EOF
        }

        let output = timeout(self.draft_timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "Fabric pattern '{}' timed out after {:?}",
                    self.pattern, self.draft_timeout
                )
            })?
            .with_context(|| format!("Failed to wait for fabric process for pattern '{}'", self.pattern))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Fabric pattern '{}' failed with exit code {}: {}",
                self.pattern,
                exit_code,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).context("Fabric output is not valid UTF-8")
    }
}

#[async_trait]
impl Drafter for FabricDrafter {
    fn name(&self) -> &str {
        "fabric"
    }

    async fn draft(&self, prompt: &str, platform: Platform, kind: ContentKind) -> Result<String> {
        debug!(pattern = %self.pattern, %platform, %kind, "Drafting via fabric");
        let input = Self::render_input(prompt, platform, kind);
        self.run_pattern(&input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_input_includes_platform_and_kind() {
        let input = FabricDrafter::render_input("  launch day  ", Platform::Instagram, ContentKind::Video);
        assert!(input.starts_with("Platform: instagram\nPost type: video\n"));
        assert!(input.contains("\nlaunch day\n"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let drafter = FabricDrafter::new("/nonexistent/fabric-binary", DEFAULT_PATTERN);
        let result = drafter.draft("hello", Platform::Twitter, ContentKind::Text).await;
        assert!(result.is_err());
    }
}
