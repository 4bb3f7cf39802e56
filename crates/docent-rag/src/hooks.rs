//! Built-in completion hooks.

use docent_core::error::{DocentError, Result};
use docent_core::traits::{Completion, CompletionHook, CompletionOutcome};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Logs each completion through `tracing`. The answer text goes to debug only.
pub struct LogHook;

impl CompletionHook for LogHook {
    fn name(&self) -> &str {
        "log"
    }

    fn on_complete(&self, c: &Completion) -> Result<()> {
        match &c.outcome {
            CompletionOutcome::Finished => tracing::info!(
                "✅ Answer complete: {} fragments, {} chars in {}ms",
                c.fragments,
                c.text.chars().count(),
                c.elapsed.as_millis()
            ),
            CompletionOutcome::Interrupted { reason } => tracing::warn!(
                "⚠️ Answer interrupted after {} fragments: {reason}",
                c.fragments
            ),
            CompletionOutcome::Cancelled => {
                tracing::info!("Answer cancelled by caller after {} fragments", c.fragments)
            }
            CompletionOutcome::TimedOut => tracing::warn!(
                "⏱️ Answer timed out after {} fragments ({}ms)",
                c.fragments,
                c.elapsed.as_millis()
            ),
        }
        tracing::debug!("Answer text: {}", c.text);
        Ok(())
    }
}

#[derive(Serialize)]
struct AuditLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    completion: &'a Completion,
}

/// Appends one JSON object per completion to a file.
pub struct JsonlAuditHook {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditHook {
    /// Open (creating if needed) the audit file in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CompletionHook for JsonlAuditHook {
    fn name(&self) -> &str {
        "jsonl-audit"
    }

    fn on_complete(&self, completion: &Completion) -> Result<()> {
        let line = serde_json::to_string(&AuditLine {
            timestamp: chrono::Utc::now().to_rfc3339(),
            completion,
        })?;
        let mut file = self
            .file
            .lock()
            .map_err(|e| DocentError::Other(format!("audit log lock poisoned: {e}")))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn completion(outcome: CompletionOutcome) -> Completion {
        Completion {
            request_id: "req-1".into(),
            model: "openai/gpt-4o-mini".into(),
            text: "Paris is the capital.".into(),
            outcome,
            fragments: 3,
            elapsed: Duration::from_millis(120),
        }
    }

    #[test]
    fn test_log_hook_never_fails() {
        let hook = LogHook;
        for outcome in [
            CompletionOutcome::Finished,
            CompletionOutcome::Cancelled,
            CompletionOutcome::TimedOut,
            CompletionOutcome::Interrupted {
                reason: "reset".into(),
            },
        ] {
            assert!(hook.on_complete(&completion(outcome)).is_ok());
        }
    }

    #[test]
    fn test_audit_appends_lines() {
        let path = std::env::temp_dir().join(format!("docent-audit-{}.jsonl", std::process::id()));
        std::fs::remove_file(&path).ok();

        let hook = JsonlAuditHook::open(&path).unwrap();
        hook.on_complete(&completion(CompletionOutcome::Finished)).unwrap();
        hook.on_complete(&completion(CompletionOutcome::Cancelled)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["text"], "Paris is the capital.");
        assert_eq!(lines[0]["outcome"]["kind"], "finished");
        assert_eq!(lines[0]["elapsed"], 120);
        assert!(lines[1]["timestamp"].is_string());
        std::fs::remove_file(&path).ok();
    }
}
