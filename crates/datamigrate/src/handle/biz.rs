//! Business (tenant) partitioning for `--split-by-biz`.
//!
//! The business list comes from the space model's rows. `bkcc` spaces use
//! their space id as business id; every other space type uses the negative
//! of the space row's primary key.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::{BizRule, HandleConfig};
use crate::core::value::{as_i64, RowDict};
use crate::pipeline::RelationCache;

/// Bucket for rows that belong to no business.
pub const GLOBAL_BUCKET: &str = "global";

const BKCC: &str = "bkcc";

/// One business derived from a space row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BizInfo {
    pub bk_biz_id: i64,
    pub name: String,
    pub space_type_id: String,
    pub space_id: String,
    /// `<space_type_id>__<space_id>`
    pub space_uid: String,
}

impl BizInfo {
    /// Build from a space row (`id`, `space_type_id`, `space_id`,
    /// `space_name`).
    pub fn from_space_row(row: &RowDict) -> Option<Self> {
        let space_type_id = text(row.get("space_type_id")?)?;
        let space_id = text(row.get("space_id")?)?;
        let bk_biz_id = if space_type_id == BKCC {
            space_id.trim().parse().ok()?
        } else {
            -as_i64(row.get("id")?)?
        };
        let name = row
            .get("space_name")
            .and_then(text)
            .unwrap_or_else(|| space_id.clone());
        Some(Self {
            bk_biz_id,
            space_uid: format!("{}__{}", space_type_id, space_id),
            name,
            space_type_id,
            space_id,
        })
    }

    /// Directory name of this business: `<sanitised name>(<biz id>)`.
    pub fn bucket(&self) -> String {
        format!("{}({})", sanitize_bucket_name(&self.name), self.bk_biz_id)
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Make a business name safe as a single path component.
pub fn sanitize_bucket_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Businesses known to one handle run.
#[derive(Debug, Clone, Default)]
pub struct BizDirectory {
    by_id: BTreeMap<i64, BizInfo>,
    by_uid: HashMap<String, i64>,
}

impl BizDirectory {
    pub fn from_space_rows(rows: &[RowDict]) -> Self {
        let mut directory = Self::default();
        for row in rows {
            match BizInfo::from_space_row(row) {
                Some(info) => {
                    directory.by_uid.insert(info.space_uid.clone(), info.bk_biz_id);
                    directory.by_id.insert(info.bk_biz_id, info);
                }
                None => warn!("Ignoring space row without a usable business id: {:?}", row),
            }
        }
        directory
    }

    pub fn get(&self, bk_biz_id: i64) -> Option<&BizInfo> {
        self.by_id.get(&bk_biz_id)
    }

    /// Business id of a space uid. `bkcc__<n>` resolves to `n` even when the
    /// space is unknown.
    pub fn biz_for_uid(&self, space_uid: &str) -> Option<i64> {
        if let Some(id) = self.by_uid.get(space_uid) {
            return Some(*id);
        }
        match space_uid.split_once("__") {
            Some((BKCC, id)) => id.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Where a row goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Write under this bucket; `None` is the corpus root.
    Keep(Option<String>),
    /// The row belongs to an excluded business.
    Drop,
}

/// Routes rows to business buckets.
#[derive(Debug)]
pub struct BizRouter<'a> {
    config: &'a HandleConfig,
    directory: &'a BizDirectory,
    exclude: &'a BTreeSet<i64>,
    split: bool,
}

impl<'a> BizRouter<'a> {
    pub fn new(
        config: &'a HandleConfig,
        directory: &'a BizDirectory,
        exclude: &'a BTreeSet<i64>,
        split: bool,
    ) -> Self {
        Self {
            config,
            directory,
            exclude,
            split,
        }
    }

    /// Whether routing can change anything for this run.
    pub fn is_active(&self) -> bool {
        self.split || !self.exclude.is_empty()
    }

    fn rule_for(&self, model: &str, row: &RowDict) -> Option<BizRule> {
        if let Some(rule) = self.config.biz_rules.get(model) {
            return Some(rule.clone());
        }
        if model == self.config.space_model {
            Some(BizRule::Space)
        } else if row.contains_key("bk_biz_id") {
            Some(BizRule::Field {
                field: "bk_biz_id".to_string(),
            })
        } else if row.contains_key("space_uid") {
            Some(BizRule::SpaceUid {
                field: "space_uid".to_string(),
            })
        } else {
            None
        }
    }

    /// Business id of a row, if one can be derived.
    pub fn biz_id(&self, model: &str, row: &RowDict, cache: &RelationCache) -> Option<i64> {
        if self.config.global_tables.iter().any(|t| t == model) {
            return None;
        }
        match self.rule_for(model, row)? {
            BizRule::Field { field } => row.get(&field).and_then(as_i64),
            BizRule::SpaceUid { field } => row
                .get(&field)
                .and_then(Value::as_str)
                .and_then(|uid| self.directory.biz_for_uid(uid)),
            BizRule::Relation {
                field,
                model,
                attribute,
            } => row
                .get(&field)
                .and_then(|key| cache.attribute(&model, key, &attribute))
                .and_then(as_i64),
            BizRule::Space => BizInfo::from_space_row(row).map(|info| info.bk_biz_id),
        }
    }

    pub fn route(&self, model: &str, row: &RowDict, cache: &RelationCache) -> Route {
        if !self.is_active() {
            return Route::Keep(None);
        }
        let biz_id = self.biz_id(model, row, cache);
        if biz_id.is_some_and(|id| self.exclude.contains(&id)) {
            return Route::Drop;
        }
        if !self.split {
            return Route::Keep(None);
        }
        let bucket = biz_id
            .filter(|id| *id != 0)
            .and_then(|id| self.directory.get(id))
            .map(BizInfo::bucket)
            .unwrap_or_else(|| GLOBAL_BUCKET.to_string());
        Route::Keep(Some(bucket))
    }
}
