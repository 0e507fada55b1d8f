//! AUTO_INCREMENT planning for integer auto primary keys.
//!
//! Seeds are sized from the exported row counts so imported ids and ids
//! generated afterwards cannot collide. The planner never lowers a seed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::schema::{ModelMeta, SchemaRegistry};
use crate::core::traits::SqlExecutor;
use crate::core::value::as_i64;
use crate::corpus::{discover_nested, read_payload, AutoIncrementReport, InputCorpus};
use crate::drivers::mysql::MysqlDialect;
use crate::error::{MigrateError, Result};

/// Smallest step seed above `total_rows`; 1.5x rounded up past five million.
pub fn recommended_seed(total_rows: u64) -> u64 {
    match total_rows {
        0..=50_000 => 100_000,
        50_001..=100_000 => 200_000,
        100_001..=500_000 => 1_000_000,
        500_001..=1_000_000 => 2_000_000,
        1_000_001..=5_000_000 => 10_000_000,
        t => t.saturating_add(t.div_ceil(2)),
    }
}

/// Where the row totals came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalsSource {
    /// `auto_increment_report.json`
    Sidecar,
    /// `stats.total` of every payload file.
    Payloads,
}

/// What the planner did for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// The ALTER ran.
    Applied,
    /// The ALTER would run (dry run).
    Planned,
    /// The current seed is already high enough.
    Unchanged,
    /// The table does not exist in the target.
    MissingTable,
    /// The target reports no AUTO_INCREMENT for the table.
    NoAutoIncrement,
}

/// One model's seed plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoIncrementPlan {
    pub model: String,
    pub table: String,
    pub total_rows: u64,
    pub recommended: u64,
    pub current: Option<u64>,
    pub target: Option<u64>,
    pub action: PlanAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

impl AutoIncrementPlan {
    pub fn applied(&self) -> bool {
        self.action == PlanAction::Applied
    }
}

/// set-auto-increment command options.
#[derive(Debug, Clone, Default)]
pub struct AutoIncrementOptions {
    /// Corpus directory or `.zip`.
    pub input: PathBuf,
    pub dry_run: bool,
}

/// Result of a planning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoIncrementResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub input: PathBuf,
    pub dry_run: bool,
    pub source: TotalsSource,
    pub plans: Vec<AutoIncrementPlan>,
}

impl AutoIncrementResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// AUTO_INCREMENT planner.
pub struct AutoIncrementPlanner<'a> {
    schema: &'a dyn SchemaRegistry,
    dialect: MysqlDialect,
}

impl<'a> AutoIncrementPlanner<'a> {
    pub fn new(schema: &'a dyn SchemaRegistry) -> Self {
        Self {
            schema,
            dialect: MysqlDialect::new(),
        }
    }

    /// Row totals per model, from the sidecar when present.
    pub fn totals(&self, root: &std::path::Path) -> Result<(Vec<(String, u64)>, TotalsSource)> {
        if let Some(report) = AutoIncrementReport::load(root)? {
            let totals = report
                .items
                .into_iter()
                .map(|item| (item.model, item.total_rows))
                .collect();
            return Ok((totals, TotalsSource::Sidecar));
        }

        debug!("No auto-increment sidecar, counting payload rows");
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for file in discover_nested(root)? {
            let payload = read_payload(&file.path)?;
            *totals.entry(file.model).or_default() += payload.data.len() as u64;
        }
        Ok((totals.into_iter().collect(), TotalsSource::Payloads))
    }

    /// Plan (and unless dry-run, apply) seeds for every auto-increment model
    /// of the corpus.
    pub async fn run(
        &self,
        executor: &mut dyn SqlExecutor,
        options: &AutoIncrementOptions,
    ) -> Result<AutoIncrementResult> {
        if executor.dialect() != MysqlDialect::NAME {
            return Err(MigrateError::UnsupportedDialect(executor.dialect().to_string()));
        }
        let started_at = Utc::now();

        let input = InputCorpus::open(&options.input)?;
        let (totals, source) = self.totals(input.root())?;
        let targets = totals
            .into_iter()
            .map(|(model, total)| Ok((self.schema.require_model(&model)?, total)))
            .collect::<Result<Vec<_>>>()?;

        let mut plans = Vec::new();
        for (meta, total_rows) in targets {
            if !meta.has_auto_increment_pk() {
                debug!("{}: primary key is not auto-increment, skipping", meta.label);
                continue;
            }
            let plan = self.plan_model(executor, meta, total_rows, options.dry_run).await?;
            match plan.action {
                PlanAction::MissingTable | PlanAction::NoAutoIncrement => {
                    warn!("{}: {:?}, skipped", plan.model, plan.action)
                }
                _ => info!(
                    "{}: rows={} current={:?} target={:?} ({:?})",
                    plan.model, plan.total_rows, plan.current, plan.target, plan.action
                ),
            }
            plans.push(plan);
        }

        Ok(AutoIncrementResult {
            started_at,
            completed_at: Utc::now(),
            input: options.input.clone(),
            dry_run: options.dry_run,
            source,
            plans,
        })
    }

    async fn plan_model(
        &self,
        executor: &mut dyn SqlExecutor,
        meta: &ModelMeta,
        total_rows: u64,
        dry_run: bool,
    ) -> Result<AutoIncrementPlan> {
        let recommended = recommended_seed(total_rows);
        let mut plan = AutoIncrementPlan {
            model: meta.label.clone(),
            table: meta.table.clone(),
            total_rows,
            recommended,
            current: None,
            target: None,
            action: PlanAction::MissingTable,
            statement: None,
        };

        let found = executor
            .query(self.dialect.build_auto_increment_query(), vec![json!(meta.table)])
            .await?;
        let Some(row) = found.rows.first() else {
            return Ok(plan);
        };
        let Some(current) = row
            .first()
            .and_then(as_i64)
            .and_then(|v| u64::try_from(v).ok())
        else {
            plan.action = PlanAction::NoAutoIncrement;
            return Ok(plan);
        };

        let target = current.max(recommended);
        plan.current = Some(current);
        plan.target = Some(target);
        if target == current {
            plan.action = PlanAction::Unchanged;
            return Ok(plan);
        }

        let sql = self.dialect.build_set_auto_increment(&meta.table, target)?;
        if dry_run {
            plan.action = PlanAction::Planned;
        } else {
            executor.execute(&sql, Vec::new()).await?;
            plan.action = PlanAction::Applied;
        }
        plan.statement = Some(sql);
        Ok(plan)
    }
}
