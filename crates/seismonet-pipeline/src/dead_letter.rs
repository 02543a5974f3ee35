//! Dead-letter stream: a JSONL diagnostic sink for records and candidates
//! that failed validation or a downstream stage. Nothing is dropped
//! silently; every rejection carries a machine-readable reason.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use seismonet_models::{CandidateEvent, SeismoError, SeismoResult};

/// One dead-letter entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub ts: DateTime<Utc>,
    /// Pipeline stage that rejected the record
    pub stage: String,
    /// Machine-readable reason slug (e.g. "below_min_duration")
    pub reason: String,
    /// Human-oriented detail
    pub detail: String,
    /// The rejected candidate, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateEvent>,
}

/// Append-only JSONL writer for rejections.
pub struct DeadLetter {
    file: Mutex<tokio::fs::File>,
}

impl DeadLetter {
    pub async fn open(dir: &Path) -> SeismoResult<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SeismoError::Internal(format!("create dead-letter dir: {}", e)))?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("dead_letter.jsonl"))
            .await
            .map_err(|e| SeismoError::Internal(format!("open dead-letter stream: {}", e)))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub async fn record(
        &self,
        stage: &str,
        reason: &str,
        detail: impl Into<String>,
        candidate: Option<CandidateEvent>,
    ) {
        let record = DeadLetterRecord {
            ts: Utc::now(),
            stage: stage.to_string(),
            reason: reason.to_string(),
            detail: detail.into(),
            candidate,
        };
        metrics::counter!("pipeline_dead_letter_total", "stage" => record.stage.clone())
            .increment(1);

        // A failed diagnostic write must not take the pipeline down; it is
        // logged and the event itself was already accounted for.
        if let Ok(mut line) = serde_json::to_vec(&record) {
            line.push(b'\n');
            let mut file = self.file.lock().await;
            if let Err(e) = file.write_all(&line).await {
                tracing::error!("dead-letter append failed: {}", e);
            }
            let _ = file.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let dl = DeadLetter::open(dir.path()).await.unwrap();
        dl.record("detect", "below_min_duration", "0.4 s < 1 s", None)
            .await;
        dl.record("classify", "schema_mismatch", "model wants v1", None)
            .await;

        let content =
            std::fs::read_to_string(dir.path().join("dead_letter.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: DeadLetterRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.reason, "below_min_duration");
    }
}
