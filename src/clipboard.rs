use async_trait::async_trait;
use parking_lot::Mutex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// How long a clipboard command may run before it is killed
pub const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(2);

/// Source of the current clipboard text; empty when unavailable
#[async_trait]
pub trait ClipboardSource: Send + Sync {
    async fn read(&self) -> String;
}

/// Reads the clipboard by running a platform command (`pbpaste`, `xclip`, ...)
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClipboard {
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: CLIPBOARD_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn platform_default() -> Self {
        let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
            ("pbpaste", &[])
        } else if cfg!(target_os = "windows") {
            ("powershell", &["-NoProfile", "-Command", "Get-Clipboard"])
        } else {
            ("xclip", &["-selection", "clipboard", "-o"])
        };
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout: CLIPBOARD_TIMEOUT,
        }
    }
}

#[async_trait]
impl ClipboardSource for CommandClipboard {
    async fn read(&self) -> String {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            Ok(Ok(out)) => {
                tracing::debug!(program = %self.program, status = %out.status, "Clipboard command failed");
                String::new()
            }
            Ok(Err(e)) => {
                tracing::debug!(program = %self.program, error = %e, "Clipboard command unavailable");
                String::new()
            }
            Err(_) => {
                tracing::warn!(program = %self.program, timeout_ms = self.timeout.as_millis() as u64, "Clipboard command timed out");
                String::new()
            }
        }
    }
}

/// Clipboard with fixed, settable contents
#[derive(Default)]
pub struct StaticClipboard {
    text: Mutex<String>,
}

impl StaticClipboard {
    pub fn set(&self, text: &str) {
        *self.text.lock() = text.to_string();
    }
}

#[async_trait]
impl ClipboardSource for StaticClipboard {
    async fn read(&self) -> String {
        self.text.lock().clone()
    }
}
