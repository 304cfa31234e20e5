//! Per-run reports: `actions.json` and `run_summary.md` under `<reports>/<run_id>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use devbot_core::{Action, ActionKind, RecordKind};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::config::RunMode;

const ACTION_ORDER: [ActionKind; 4] = [ActionKind::Create, ActionKind::Update, ActionKind::Close, ActionKind::Skip];

/// What one record kind went through during a run.
#[derive(Debug, Clone, Serialize)]
pub struct KindOutcome {
    pub kind: RecordKind,
    pub source: String,
    pub fetched: usize,
    pub stored: usize,
    pub manual_closures: usize,
    pub actions: Vec<Action>,
    /// Snapshot written for the next run; `None` for dry runs.
    pub snapshot: Option<String>,
}

impl KindOutcome {
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub runmode: RunMode,
    pub neighborhood: String,
    pub sinks: Vec<String>,
    pub kinds: Vec<KindOutcome>,
    pub reports_dir: Option<String>,
}

impl SyncRunSummary {
    pub fn total(&self, kind: ActionKind) -> usize {
        self.kinds.iter().map(|k| k.count(kind)).sum()
    }
}

pub fn render_summary_markdown(summary: &SyncRunSummary) -> String {
    let mut md = format!(
        "# Devbot Run Summary\n\n- Run ID: `{}`\n- Neighborhood: {}\n- Run mode: {}\n- Started: {}\n- Finished: {}\n- Sinks: {}\n",
        summary.run_id,
        summary.neighborhood,
        summary.runmode.as_str(),
        summary.started_at,
        summary.finished_at,
        if summary.sinks.is_empty() { "none".to_string() } else { summary.sinks.join(", ") },
    );

    md.push_str("\n## Action Counts\n");
    for outcome in &summary.kinds {
        let counts = ACTION_ORDER
            .iter()
            .map(|kind| format!("{kind} {}", outcome.count(*kind)))
            .collect::<Vec<_>>()
            .join(", ");
        md.push_str(&format!(
            "- {} (fetched {}, stored {}, closed by hand {}): {counts}\n",
            outcome.kind.display_name(),
            outcome.fetched,
            outcome.stored,
            outcome.manual_closures
        ));
    }

    for outcome in &summary.kinds {
        let changed: Vec<_> = outcome.actions.iter().filter(|a| a.kind != ActionKind::Skip).collect();
        if changed.is_empty() {
            continue;
        }
        md.push_str(&format!("\n## {}s\n", outcome.kind.display_name()));
        for action in changed {
            let headline = action.message.lines().next().unwrap_or_default();
            md.push_str(&format!("- `{}` {}: {headline}\n", action.kind, action.key));
        }
    }
    md
}

pub async fn write_reports(reports_root: &Path, summary: &SyncRunSummary) -> Result<PathBuf> {
    let reports_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    fs::write(reports_dir.join("run_summary.md"), render_summary_markdown(summary))
        .await
        .context("writing run_summary.md")?;

    let actions_json = serde_json::to_vec_pretty(&serde_json::json!({
        "run_id": summary.run_id,
        "started_at": summary.started_at,
        "finished_at": summary.finished_at,
        "runmode": summary.runmode,
        "kinds": summary.kinds,
    }))
    .context("serializing actions")?;
    fs::write(reports_dir.join("actions.json"), actions_json)
        .await
        .context("writing actions.json")?;

    Ok(reports_dir)
}
