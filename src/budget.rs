//! Budget ledger: persistent, indexed, append-only usage log.
//!
//! Backed by a single-file SQLite database. Every query and mutation runs
//! synchronously under one connection mutex, so ledger calls never suspend
//! the request task.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::models::{BudgetRule, RuleAction};

/// Approximate pricing per 1K tokens (input/output averaged).
fn price_per_1k(model: &str) -> f64 {
    match model {
        "gpt-4o" => 0.005,
        "gpt-4o-mini" => 0.00015,
        "gpt-4-turbo" => 0.01,
        "gpt-4" => 0.03,
        "gpt-3.5-turbo" => 0.0005,
        "claude-3-opus" => 0.015,
        "claude-3-sonnet" => 0.003,
        "claude-3-haiku" => 0.00025,
        "claude-3.5-sonnet" => 0.003,
        "claude-3.5-haiku" => 0.001,
        "gemini-1.5-pro" => 0.00125,
        "gemini-1.5-flash" => 0.000075,
        "gemini-2.0-flash" => 0.0001,
        "llama3" | "mistral" | "codellama" | "deepseek-r1" => 0.0,
        _ => 0.002,
    }
}

/// Aggregation window for spend/token queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Daily,
    Weekly,
    Monthly,
}

impl Window {
    fn cutoff(self) -> String {
        let delta = match self {
            Window::Daily => Duration::days(1),
            Window::Weekly => Duration::days(7),
            Window::Monthly => Duration::days(30),
        };
        (Utc::now() - delta).to_rfc3339()
    }
}

/// Ledger stats for the dashboard budget panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStats {
    pub daily_spend: f64,
    pub weekly_spend: f64,
    pub monthly_spend: f64,
    pub daily_tokens: i64,
    pub weekly_tokens: i64,
}

pub struct BudgetLedger {
    conn: Mutex<Connection>,
}

impl BudgetLedger {
    /// Open (or create) the ledger at `db_path`, then run the one-time
    /// migration from a legacy `budget.json` sitting next to it.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating ledger dir {}", dir.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening ledger db {}", db_path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 model TEXT NOT NULL,
                 tokens INTEGER NOT NULL,
                 cost REAL NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_usage_timestamp ON usage(timestamp);",
        )?;

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate_legacy_json(&legacy_json_path(db_path))?;
        Ok(ledger)
    }

    /// Bulk-import a legacy JSON usage file, then rename it to `*.migrated`
    /// so the import never runs twice. A non-empty table also suppresses it.
    fn migrate_legacy_json(&self, legacy: &Path) -> anyhow::Result<()> {
        if !legacy.exists() {
            return Ok(());
        }

        #[derive(Deserialize)]
        struct LegacyRow {
            timestamp: String,
            model: String,
            tokens: i64,
            cost: f64,
        }

        let rows: Vec<LegacyRow> = match std::fs::read_to_string(legacy)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
        {
            Some(rows) => rows,
            None => {
                tracing::warn!(path = %legacy.display(), "legacy budget file unreadable, skipping migration");
                return Ok(());
            }
        };
        if rows.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM usage", [], |r| r.get(0))?;
        if existing > 0 {
            return Ok(());
        }

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO usage (timestamp, model, tokens, cost) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in &rows {
                stmt.execute(params![row.timestamp, row.model, row.tokens, row.cost])?;
            }
        }
        tx.commit()?;
        drop(conn);

        let migrated = legacy.with_extension("json.migrated");
        if let Err(e) = std::fs::rename(legacy, &migrated) {
            tracing::warn!(error = %e, "failed to rename migrated budget file");
        } else {
            tracing::info!(rows = rows.len(), "migrated legacy budget entries into sqlite");
        }
        Ok(())
    }

    /// Append a usage row. When `cost` is omitted it is derived from the
    /// static pricing table.
    pub fn record(&self, model: &str, tokens: i64, cost: Option<f64>) -> anyhow::Result<()> {
        let cost = cost.unwrap_or_else(|| self.estimate(model, tokens));
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO usage (timestamp, model, tokens, cost) VALUES (?1, ?2, ?3, ?4)",
            params![Utc::now().to_rfc3339(), model, tokens, cost],
        )?;
        Ok(())
    }

    /// Estimated cost for a prospective call.
    pub fn estimate(&self, model: &str, tokens: i64) -> f64 {
        (tokens as f64 / 1000.0) * price_per_1k(model)
    }

    /// Total spend inside the window, via the timestamp index.
    pub fn spend(&self, window: Window) -> anyhow::Result<f64> {
        let conn = self.conn.lock().unwrap();
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(cost), 0) FROM usage WHERE timestamp >= ?1",
            params![window.cutoff()],
            |r| r.get(0),
        )?;
        Ok(round6(total))
    }

    /// Total tokens inside the window.
    pub fn tokens(&self, window: Window) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(tokens), 0) FROM usage WHERE timestamp >= ?1",
            params![window.cutoff()],
            |r| r.get(0),
        )?;
        Ok(total)
    }

    /// Evaluate daily, weekly, monthly caps in that order; the first breach
    /// wins. `None` means the charge fits.
    pub fn would_exceed(
        &self,
        rule: &BudgetRule,
        additional_cost: f64,
    ) -> anyhow::Result<Option<String>> {
        if !rule.enabled {
            return Ok(None);
        }

        let checks = [
            ("Daily", Window::Daily, rule.daily_limit),
            ("Weekly", Window::Weekly, rule.weekly_limit),
            ("Monthly", Window::Monthly, rule.monthly_limit),
        ];
        for (label, window, limit) in checks {
            let current = self.spend(window)?;
            if current + additional_cost > limit {
                return Ok(Some(format!(
                    "{} limit ${:.2} would be exceeded (current: ${:.2})",
                    label, limit, current
                )));
            }
        }
        Ok(None)
    }

    /// Block decision for a prospective request. Disabled rules and non-block
    /// actions never block.
    pub fn should_block(
        &self,
        rule: &BudgetRule,
        model: &str,
        estimated_tokens: i64,
    ) -> anyhow::Result<Option<String>> {
        if !rule.enabled || rule.action != RuleAction::Block {
            return Ok(None);
        }
        self.would_exceed(rule, self.estimate(model, estimated_tokens))
    }

    pub fn stats(&self) -> anyhow::Result<BudgetStats> {
        Ok(BudgetStats {
            daily_spend: self.spend(Window::Daily)?,
            weekly_spend: self.spend(Window::Weekly)?,
            monthly_spend: self.spend(Window::Monthly)?,
            daily_tokens: self.tokens(Window::Daily)?,
            weekly_tokens: self.tokens(Window::Weekly)?,
        })
    }
}

fn legacy_json_path(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("budget.json")
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}
