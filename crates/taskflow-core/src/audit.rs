//! Durable, greppable trail of terminal graph transitions, independent of
//! broker retention. The entity store remains the source of truth; this is
//! an append-only side channel for operators.

use std::collections::HashSet;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::model::GraphId;

static REDACTION_PATTERNS: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key".to_string(),
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret".to_string(),
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer".to_string(),
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token".to_string(),
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// The two terminal transitions worth auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    TaskGraphBlocked,
    TaskGraphFinished,
}

impl AuditEventKind {
    fn as_str(self) -> &'static str {
        match self {
            AuditEventKind::TaskGraphBlocked => "taskGraphBlocked",
            AuditEventKind::TaskGraphFinished => "taskGraphFinished",
        }
    }
}

#[derive(Serialize)]
struct AuditRecord {
    timestamp: String,
    kind: &'static str,
    task_graph_id: String,
    routing: String,
    redactions: Vec<String>,
}

fn sanitize_text(input: &str, redactions: &mut HashSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 1 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name.clone());
        }
    }
    output
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create audit directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open audit log {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")
        .with_context(|| format!("failed to append audit entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Append a redacted audit record for a terminal graph transition. One
/// JSONL file per UTC day under `audit_log_dir`.
pub fn record_terminal_transition(
    audit_log_dir: &Path,
    kind: AuditEventKind,
    task_graph_id: &GraphId,
    routing: &str,
) -> Result<()> {
    let now = Utc::now();
    let mut redactions = HashSet::new();
    let routing = sanitize_text(routing, &mut redactions);

    let record = AuditRecord {
        timestamp: now.to_rfc3339(),
        kind: kind.as_str(),
        task_graph_id: task_graph_id.to_string(),
        routing,
        redactions: redactions.into_iter().collect(),
    };

    let path = day_log_path(audit_log_dir, now);
    append_json_line(&path, &record)
}

fn day_log_path(audit_log_dir: &Path, now: chrono::DateTime<Utc>) -> PathBuf {
    audit_log_dir.join(format!("{}.jsonl", now.format("%Y-%m-%d")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn audit_record_is_appended_and_redacted() {
        let temp = TempDir::new().expect("temp dir");
        record_terminal_transition(
            temp.path(),
            AuditEventKind::TaskGraphFinished,
            &GraphId::new("g1"),
            "sched.g1 with secret=topsecret",
        )
        .expect("record audit event");

        let mut entries = std::fs::read_dir(temp.path()).expect("read temp dir");
        let entry = entries.next().expect("one log file").expect("dir entry");
        let contents = std::fs::read_to_string(entry.path()).expect("read log file");
        assert!(contents.contains("taskGraphFinished"));
        assert!(contents.contains("[REDACTED]"));
        assert!(!contents.contains("topsecret"));
    }
}
