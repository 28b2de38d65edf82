//! Run telemetry sinks
//!
//! The supervisor reports every delivered line and the final outcome to an
//! injected [`RunRecorder`]. Recording failures are logged and never change
//! the outcome of a run.

use super::summary::RunSummary;
use crate::subprocess::streaming::{ChannelId, LineEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn record_line(&self, line: &LineEvent) -> Result<()>;

    async fn record_outcome(&self, summary: &RunSummary) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

#[async_trait]
impl RunRecorder for NullRecorder {
    async fn record_line(&self, _line: &LineEvent) -> Result<()> {
        Ok(())
    }

    async fn record_outcome(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Line {
        ts: DateTime<Utc>,
        channel: ChannelId,
        number: u64,
        text: &'a str,
    },
    Outcome {
        ts: DateTime<Utc>,
        #[serde(flatten)]
        summary: &'a RunSummary,
    },
}

/// Appends one JSON object per line to a file
pub struct JsonlRecorder {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlRecorder {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        debug!("Recording run to {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &Record<'_>) -> Result<()> {
        let mut json = serde_json::to_string(record)?;
        json.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl RunRecorder for JsonlRecorder {
    async fn record_line(&self, line: &LineEvent) -> Result<()> {
        self.append(&Record::Line {
            ts: Utc::now(),
            channel: line.channel,
            number: line.number,
            text: &line.text,
        })
        .await
    }

    async fn record_outcome(&self, summary: &RunSummary) -> Result<()> {
        self.append(&Record::Outcome {
            ts: Utc::now(),
            summary,
        })
        .await?;
        self.writer
            .lock()
            .await
            .flush()
            .await
            .context("Failed to flush run log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::termination::{FinalAction, TerminationCause};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn outcome() -> RunSummary {
        RunSummary {
            cause: TerminationCause::NaturalExit,
            action: FinalAction::None,
            exit_code: 1,
            matched: None,
            match_count: 0,
            stuck: None,
            lines: 1,
            elapsed: Duration::from_millis(1500),
            pid: None,
            child_exit: None,
            timeout_limit: None,
        }
    }

    #[tokio::test]
    async fn test_jsonl_records_lines_then_outcome() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs").join("run.jsonl");
        let recorder = JsonlRecorder::open(&path).await.unwrap();

        recorder
            .record_line(&LineEvent {
                channel: ChannelId::Fd(3),
                text: "progress 50%".to_string(),
                number: 1,
                at: Instant::now(),
            })
            .await
            .unwrap();
        recorder.record_outcome(&outcome()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["type"], "line");
        assert_eq!(records[0]["channel"], "fd3");
        assert_eq!(records[0]["text"], "progress 50%");
        assert_eq!(records[1]["type"], "outcome");
        assert_eq!(records[1]["cause"], "naturalExit");
        assert_eq!(records[1]["exitCode"], 1);
    }

    #[tokio::test]
    async fn test_null_recorder_accepts_everything() {
        let recorder = NullRecorder;
        assert!(recorder.record_outcome(&outcome()).await.is_ok());
    }
}
