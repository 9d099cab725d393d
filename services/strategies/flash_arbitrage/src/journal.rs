//! Append-only pipeline journal
//!
//! Every pipeline stage emits a [`PipelineRecord`] on the `pipeline` tracing
//! target. With a journal path configured, the same record is appended to that file
//! as one JSON object per line.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum PipelineRecord {
    OpportunityFound {
        path: String,
        provider: String,
        mode: String,
        notional_usd: String,
        net_profit_usd: String,
        gas_cost_usd: String,
    },
    OpportunitySkipped {
        paths: usize,
        rejections: BTreeMap<String, usize>,
    },
    BundleSubmitted {
        path: String,
        identifier: Option<String>,
        channel: String,
    },
    BundleConfirmed {
        path: String,
        identifier: String,
        block: u64,
        gas_used: String,
        atomic: bool,
    },
    BundleFailed {
        path: String,
        reason: String,
        broadcast: bool,
        call_index: Option<usize>,
    },
    TriggerDropped {
        trigger: String,
        state: String,
    },
    TriggerCoalesced {
        trigger: String,
        replaced: Option<String>,
    },
    ModeSwitched {
        from: String,
        to: String,
        reason: String,
    },
    HealthCheckFailed {
        reason: String,
    },
    Resubscribed {
        ok: bool,
    },
}

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    #[serde(flatten)]
    record: &'a PipelineRecord,
}

#[derive(Debug, Default)]
pub struct PipelineJournal {
    file: Option<Mutex<File>>,
}

impl PipelineJournal {
    /// Tracing only
    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    pub fn record(&self, record: PipelineRecord) {
        let line = Line {
            ts: chrono::Utc::now().to_rfc3339(),
            record: &record,
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize pipeline record: {}", e);
                return;
            }
        };
        info!(target: "pipeline", "{}", json);

        if let Some(file) = &self.file {
            let mut file = file.lock();
            if let Err(e) = writeln!(file, "{}", json) {
                warn!("Failed to append to pipeline journal: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/pipeline.jsonl");
        let journal = PipelineJournal::open(&path).unwrap();

        journal.record(PipelineRecord::TriggerDropped {
            trigger: "block 10".into(),
            state: "EXECUTING".into(),
        });
        journal.record(PipelineRecord::Resubscribed { ok: true });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stage"], "trigger_dropped");
        assert_eq!(lines[0]["state"], "EXECUTING");
        assert_eq!(lines[1]["stage"], "resubscribed");
        assert!(lines[1]["ts"].is_string());
    }
}
