//! Schema compatibility classification for uploaded backups.
//!
//! Compares a foreign snapshot against the expected (live) schema and
//! assigns a tier. Classification only checks table/column presence, not
//! referential integrity of the data inside the backup: a structurally
//! valid file with dangling foreign keys will still classify as
//! compatible. That limitation is intentional and documented.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::inspect::SchemaSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityTier {
    /// No expected table or column is missing; restore needs no follow-up.
    Compatible,
    /// Gaps exist but the schema-heal step can recreate them after restore.
    NeedsMigration,
    /// A critical table/column is absent; restoring would leave the
    /// application unable to authenticate or configure itself.
    Incompatible,
}

impl CompatibilityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityTier::Compatible => "compatible",
            CompatibilityTier::NeedsMigration => "needs_migration",
            CompatibilityTier::Incompatible => "incompatible",
        }
    }
}

/// Structural diff between a backup and the expected schema. Derived per
/// analysis call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub tier: CompatibilityTier,
    pub summary: String,
    pub missing_tables: BTreeSet<String>,
    pub extra_tables: BTreeSet<String>,
    pub missing_columns: BTreeMap<String, BTreeSet<String>>,
    pub row_counts: BTreeMap<String, i64>,
    pub total_rows: i64,
}

/// Classify a foreign schema snapshot against the expected one.
///
/// Pure: identical inputs always produce identical reports. The critical
/// requirements override every other finding.
pub fn classify(
    foreign: &SchemaSnapshot,
    expected: &SchemaSnapshot,
    critical: &[(&str, &[&str])],
) -> CompatibilityReport {
    let foreign_tables = foreign.table_names();
    let expected_tables = expected.table_names();

    let missing_tables: BTreeSet<String> =
        expected_tables.difference(&foreign_tables).cloned().collect();
    let extra_tables: BTreeSet<String> =
        foreign_tables.difference(&expected_tables).cloned().collect();

    let mut missing_columns: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for name in expected_tables.intersection(&foreign_tables) {
        let expected_cols = expected.table(name).map(|t| t.column_names()).unwrap_or_default();
        let foreign_cols = foreign.table(name).map(|t| t.column_names()).unwrap_or_default();
        let gap: BTreeSet<String> = expected_cols.difference(&foreign_cols).cloned().collect();
        if !gap.is_empty() {
            missing_columns.insert(name.clone(), gap);
        }
    }

    let critical_gaps = critical_gaps(foreign, critical);

    let tier = if !critical_gaps.is_empty() {
        CompatibilityTier::Incompatible
    } else if missing_tables.is_empty() && missing_columns.is_empty() {
        CompatibilityTier::Compatible
    } else {
        CompatibilityTier::NeedsMigration
    };

    let summary = match tier {
        CompatibilityTier::Incompatible => format!(
            "Backup is missing critical structure required to run the application: {}. It cannot be restored.",
            critical_gaps.join(", ")
        ),
        CompatibilityTier::Compatible => {
            if extra_tables.is_empty() {
                "Backup matches the expected schema.".to_string()
            } else {
                format!(
                    "Backup matches the expected schema and carries {} additional table(s).",
                    extra_tables.len()
                )
            }
        }
        CompatibilityTier::NeedsMigration => format!(
            "Backup is missing {} table(s) and {} column(s); they will be recreated after restore.",
            missing_tables.len(),
            missing_columns.values().map(|c| c.len()).sum::<usize>()
        ),
    };

    CompatibilityReport {
        tier,
        summary,
        missing_tables,
        extra_tables,
        missing_columns,
        row_counts: foreign.row_counts().clone(),
        total_rows: foreign.total_rows(),
    }
}

/// Human-readable list of critical requirements the foreign snapshot fails:
/// `"users"` for an absent table, `"users.password_hash"` for an absent column.
fn critical_gaps(foreign: &SchemaSnapshot, critical: &[(&str, &[&str])]) -> Vec<String> {
    let mut gaps = Vec::new();
    for (table, required_columns) in critical {
        match foreign.table(table) {
            None => gaps.push((*table).to_string()),
            Some(descriptor) => {
                for column in *required_columns {
                    if !descriptor.has_column(column) {
                        gaps.push(format!("{}.{}", table, column));
                    }
                }
            }
        }
    }
    gaps
}
