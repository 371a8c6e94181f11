// ✅ Dataset Quality Check - validate the reference data before any write
//
// Critical issues stop the run; warnings are fixed up (trim, drop duplicate)
// and reported; info is reported only.

use crate::dataset::ReferenceDataset;
use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Dataset cannot be loaded as-is
    Warning,  // Fixed up automatically, worth a look
    Info,     // Harmless
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub category: String,
    /// Leaf name, when the issue is about a single record
    pub record: Option<String>,
    pub issue: String,
}

impl QualityIssue {
    fn new(severity: Severity, category: &str, record: Option<&str>, issue: impl Into<String>) -> Self {
        QualityIssue {
            severity,
            category: category.to_string(),
            record: record.map(str::to_string),
            issue: issue.into(),
        }
    }
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.record {
            Some(record) => write!(f, "[{:?}] {} / {}: {}", self.severity, self.category, record, self.issue),
            None => write!(f, "[{:?}] {}: {}", self.severity, self.category, self.issue),
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityReport {
    pub issues: Vec<QualityIssue>,
    pub records_checked: usize,
    pub duplicates_dropped: usize,
    pub names_trimmed: usize,
}

impl QualityReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records checked, {} issues ({} critical), {} duplicates dropped, {} names trimmed",
            self.records_checked,
            self.issues.len(),
            self.count(Severity::Critical),
            self.duplicates_dropped,
            self.names_trimmed,
        )
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.count(Severity::Critical) > 0
    }

    /// Turn critical issues into a dataset error
    pub fn into_result(self) -> Result<QualityReport, LoadError> {
        if !self.has_critical_issues() {
            return Ok(self);
        }

        let critical: Vec<String> = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .map(ToString::to_string)
            .collect();

        Err(LoadError::dataset(format!(
            "{} critical issue(s): {}",
            critical.len(),
            critical.join("; ")
        )))
    }
}

// ============================================================================
// CHECK
// ============================================================================

/// Check and normalise `dataset` in place
pub fn check_dataset(dataset: &mut ReferenceDataset) -> QualityReport {
    let mut report = QualityReport::default();

    // Creation set: trim, drop empties
    let mut declared_seen = HashSet::new();
    dataset.declared_mut().retain_mut(|category| {
        let trimmed = category.trim();
        if trimmed.len() != category.len() {
            *category = trimmed.to_string();
        }
        !category.is_empty() && declared_seen.insert(category.clone())
    });

    // Category keys with stray whitespace get merged into the trimmed key
    let keys: Vec<String> = dataset.groups().keys().cloned().collect();
    for key in keys {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            let count = dataset.groups()[&key].len();
            report.issues.push(QualityIssue::new(
                Severity::Critical,
                &key,
                None,
                format!("empty category name on {} record(s)", count),
            ));
            continue;
        }
        if trimmed != key {
            let trimmed = trimmed.to_string();
            if let Some(leaves) = dataset.groups_mut().remove(&key) {
                dataset.groups_mut().entry(trimmed.clone()).or_default().extend(leaves);
            }
            report.names_trimmed += 1;
            report.issues.push(QualityIssue::new(
                Severity::Warning,
                &trimmed,
                None,
                format!("category name {:?} had surrounding whitespace", key),
            ));
        }
    }

    for (category, leaves) in dataset.groups_mut().iter_mut() {
        if category.trim().is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(leaves.len());

        for mut leaf in leaves.drain(..) {
            report.records_checked += 1;

            let trimmed = leaf.name.trim();
            if trimmed.is_empty() {
                report.issues.push(QualityIssue::new(
                    Severity::Critical,
                    category,
                    None,
                    "record with empty name",
                ));
                continue;
            }
            if trimmed.len() != leaf.name.len() {
                report.issues.push(QualityIssue::new(
                    Severity::Warning,
                    category,
                    Some(trimmed),
                    "name had surrounding whitespace",
                ));
                leaf.name = trimmed.to_string();
                report.names_trimmed += 1;
            }

            if !seen.insert(leaf.name.clone()) {
                report.issues.push(QualityIssue::new(
                    Severity::Warning,
                    category,
                    Some(&leaf.name),
                    "duplicate record in dataset, keeping the first",
                ));
                report.duplicates_dropped += 1;
                continue;
            }

            kept.push(leaf);
        }

        *leaves = kept;
    }

    let referenced = dataset.referenced_categories();
    for category in dataset.declared_categories() {
        if !referenced.contains(category) {
            report.issues.push(QualityIssue::new(
                Severity::Info,
                category,
                None,
                "declared category has no records",
            ));
        }
    }

    report
}
