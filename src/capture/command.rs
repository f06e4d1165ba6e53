use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{Frame, FrameSource};

/// Captures the screen by running an external screenshot tool that writes an encoded image to
/// stdout. This keeps the platform specific capture code out of the process.
pub struct CommandFrameSource {
    program: String,
    args: Vec<String>,
}

impl CommandFrameSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line on whitespace, e.g. `"grim -"`.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("capture command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Command line used when none was configured. `None` means the platform has no sensible
    /// default and the user has to provide one.
    pub fn default_command_line() -> Option<&'static str> {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "macos")] {
                Some("screencapture -x -t png /dev/stdout")
            } else if #[cfg(target_os = "linux")] {
                Some("import -silent -window root png:-")
            } else {
                None
            }
        }
    }
}

#[async_trait]
impl FrameSource for CommandFrameSource {
    async fn capture(&self) -> Result<Frame> {
        debug!("Running capture command {} {:?}", self.program, self.args);
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn capture command '{}'", self.program))?;

        if !output.status.success() {
            bail!(
                "capture command '{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        if output.stdout.is_empty() {
            bail!("capture command '{}' produced no image data", self.program);
        }

        Ok(Frame::from_encoded(output.stdout))
    }
}
