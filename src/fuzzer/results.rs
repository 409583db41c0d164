//! Campaign result collection and analysis

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{FuzzerErrorListener, TaskErrorReport};

const BODY_EXCERPT_LIMIT: usize = 4096;

const ERROR_FINGERPRINT_PATTERN: &str =
    r"(?i)(sql syntax|sqlstate|odbc|stack trace|traceback|fatal error|unhandled exception)";

/// Result of a single fuzzed send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzResult {
    /// Task id within the campaign
    pub task_id: u64,
    /// Payload(s) used
    pub payloads: Vec<String>,
    /// HTTP status code (0 when the send failed)
    pub status_code: u16,
    /// Response length in bytes
    pub response_length: usize,
    /// Response time in milliseconds
    pub duration_ms: u64,
    /// Leading part of the response body
    pub body_excerpt: String,
    /// Whether this result is flagged as interesting
    pub interesting: bool,
    /// Reason for being interesting
    pub interesting_reason: Option<String>,
    /// Error message if the task failed
    pub error: Option<String>,
}

impl FuzzResult {
    pub fn new(task_id: u64, payloads: Vec<String>) -> Self {
        Self {
            task_id,
            payloads,
            status_code: 0,
            response_length: 0,
            duration_ms: 0,
            body_excerpt: String::new(),
            interesting: false,
            interesting_reason: None,
            error: None,
        }
    }

    pub fn with_response(
        mut self,
        status_code: u16,
        response_length: usize,
        duration_ms: u64,
        body: &str,
    ) -> Self {
        self.status_code = status_code;
        self.response_length = response_length;
        self.duration_ms = duration_ms;

        let mut end = body.len().min(BODY_EXCERPT_LIMIT);
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        self.body_excerpt = body[..end].to_string();

        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn mark_interesting(&mut self, reason: &str) {
        self.interesting = true;
        self.interesting_reason = Some(reason.to_string());
    }
}

/// Collection of campaign results with baseline analysis
#[derive(Debug, Clone)]
pub struct FuzzResultSet {
    /// All results, in completion order
    pub results: Vec<FuzzResult>,
    /// Baseline status code
    pub baseline_status: Option<u16>,
    /// Baseline response length
    pub baseline_length: Option<usize>,
    /// Status code distribution
    pub status_distribution: BTreeMap<u16, usize>,
    /// Length variance threshold for marking interesting (percentage)
    pub length_variance_threshold: f64,

    fingerprint: Option<Regex>,
}

impl Default for FuzzResultSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzResultSet {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            baseline_status: None,
            baseline_length: None,
            status_distribution: BTreeMap::new(),
            length_variance_threshold: 10.0,
            fingerprint: Regex::new(ERROR_FINGERPRINT_PATTERN).ok(),
        }
    }

    /// Set baseline from an unfuzzed request
    pub fn set_baseline(&mut self, status: u16, length: usize) {
        self.baseline_status = Some(status);
        self.baseline_length = Some(length);
    }

    /// Add a result and analyze it
    pub fn add_result(&mut self, mut result: FuzzResult) {
        *self
            .status_distribution
            .entry(result.status_code)
            .or_insert(0) += 1;

        if result.error.is_none() {
            self.analyze_result(&mut result);
        }

        self.results.push(result);
    }

    fn analyze_result(&self, result: &mut FuzzResult) {
        if let Some(baseline) = self.baseline_status {
            if result.status_code != baseline {
                result.mark_interesting(&format!(
                    "Status code changed from {} to {}",
                    baseline, result.status_code
                ));
                return;
            }
        }

        if let Some(baseline_len) = self.baseline_length {
            if baseline_len > 0 {
                let variance = ((result.response_length as f64 - baseline_len as f64).abs()
                    / baseline_len as f64)
                    * 100.0;
                if variance > self.length_variance_threshold {
                    result.mark_interesting(&format!(
                        "Response length changed by {:.1}% ({} -> {})",
                        variance, baseline_len, result.response_length
                    ));
                    return;
                }
            }
        }

        if let Some(fingerprint) = &self.fingerprint {
            if let Some(found) = fingerprint.find(&result.body_excerpt) {
                result.mark_interesting(&format!("Response contains '{}'", found.as_str()));
                return;
            }
        }

        if (500..600).contains(&result.status_code) {
            result.mark_interesting("Server error response");
        }
    }

    pub fn interesting_results(&self) -> Vec<&FuzzResult> {
        self.results.iter().filter(|r| r.interesting).collect()
    }

    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

/// Exportable campaign summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub campaign: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_results: usize,
    pub error_count: usize,
    pub interesting_count: usize,
    pub status_distribution: BTreeMap<u16, usize>,
    pub results: Vec<FuzzResult>,
}

/// Thread-safe sink for campaign results.
///
/// The HTTP task runner records successful sends here; engine-level task
/// failures (craft errors, send errors, abnormal terminations) arrive
/// through the `FuzzerErrorListener` implementation.
pub struct ResultCollector {
    campaign: String,
    set: RwLock<FuzzResultSet>,
    started_at: DateTime<Utc>,
}

impl ResultCollector {
    pub fn new(campaign: impl Into<String>) -> Self {
        Self {
            campaign: campaign.into(),
            set: RwLock::new(FuzzResultSet::new()),
            started_at: Utc::now(),
        }
    }

    pub fn set_baseline(&self, status: u16, length: usize) {
        self.set.write().set_baseline(status, length);
    }

    pub fn record(&self, result: FuzzResult) {
        self.set.write().add_result(result);
    }

    pub fn snapshot(&self) -> FuzzResultSet {
        self.set.read().clone()
    }

    /// Build the exportable summary
    pub fn report(&self) -> CampaignReport {
        let set = self.set.read();
        CampaignReport {
            campaign: self.campaign.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            total_results: set.results.len(),
            error_count: set.error_count(),
            interesting_count: set.results.iter().filter(|r| r.interesting).count(),
            status_distribution: set.status_distribution.clone(),
            results: set.results.clone(),
        }
    }

    /// Write the campaign report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let report = self.report();
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Wrote campaign report");
        Ok(())
    }
}

impl FuzzerErrorListener for ResultCollector {
    fn task_error(&self, report: &TaskErrorReport<'_>) {
        let payloads = report
            .replacements
            .iter()
            .map(|r| r.payload.clone())
            .collect();
        let result = FuzzResult::new(report.task_id, payloads)
            .with_error(format!("{}: {}", report.source, report.reason));
        self.record(result);
    }
}
