//! # Feedback
//!
//! Structured issues discovered by an iteration's agents, the append-only
//! accumulator that carries them between iterations, and the acceptance
//! policy that decides when refinement can stop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How serious an issue is. Ordering is ascending, so `High > Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

/// Which kind of finding an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Review,
    Security,
    Performance,
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Review => "review",
            Self::Security => "security",
            Self::Performance => "performance",
        })
    }
}

/// One structured finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
    /// Artifact or area the issue refers to, when known.
    pub target: Option<String>,
    pub recommendation: Option<String>,
}

impl Issue {
    pub fn new(category: IssueCategory, severity: Severity, description: &str) -> Self {
        Self {
            category,
            severity,
            description: description.to_string(),
            target: None,
            recommendation: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_recommendation(mut self, recommendation: &str) -> Self {
        self.recommendation = Some(recommendation.to_string());
        self
    }
}

/// All feedback produced by one iteration: issues grouped by category (each
/// group in discovery order) plus the reviewer's free-form summary and
/// suggestions. Frozen once the iteration closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSet {
    pub issues: BTreeMap<IssueCategory, Vec<Issue>>,
    pub summary: Option<String>,
    pub suggestions: Vec<String>,
}

impl FeedbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.entry(issue.category).or_default().push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        for issue in issues {
            self.push(issue);
        }
    }

    /// Fold another set in, keeping per-category discovery order. The latest
    /// non-empty summary wins.
    pub fn merge(&mut self, other: FeedbackSet) {
        for (_, issues) in other.issues {
            self.extend(issues);
        }
        if other.summary.is_some() {
            self.summary = other.summary;
        }
        self.suggestions.extend(other.suggestions);
    }

    /// All issues, category-major, discovery order within a category.
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values().flatten()
    }

    pub fn of_category(&self, category: IssueCategory) -> &[Issue] {
        self.issues.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn issue_count(&self) -> usize {
        self.issues.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.issue_count() == 0
    }

    /// Whether any issue at or above `threshold` remains.
    pub fn has_blocking(&self, threshold: Severity) -> bool {
        self.iter().any(|issue| issue.severity >= threshold)
    }
}

/// Append-only record of per-iteration feedback.
///
/// Only the most recent completed iteration's set feeds the next iteration;
/// older sets stay recorded but are considered superseded.
#[derive(Debug, Default)]
pub struct FeedbackAccumulator {
    history: Vec<(u32, FeedbackSet)>,
}

impl FeedbackAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed iteration's feedback.
    pub fn accumulate(&mut self, iteration_number: u32, feedback: FeedbackSet) {
        self.history.push((iteration_number, feedback));
    }

    /// Feedback context for the given upcoming iteration: the most recent
    /// recorded set from an earlier iteration, or an empty set for the first.
    pub fn context_for(&self, next_iteration_number: u32) -> FeedbackSet {
        self.history
            .iter()
            .rev()
            .find(|(n, _)| *n < next_iteration_number)
            .map(|(_, feedback)| feedback.clone())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<&FeedbackSet> {
        self.history.last().map(|(_, feedback)| feedback)
    }

    pub fn history(&self) -> &[(u32, FeedbackSet)] {
        &self.history
    }
}

/// Decides whether a completed iteration's feedback is good enough to stop
/// refining. Injectable so termination policy is testable on its own.
pub trait AcceptancePolicy: Send + Sync {
    fn accept(&self, feedback: &FeedbackSet) -> bool;
}

/// Default policy: accept once no issue at or above the severity threshold
/// remains.
#[derive(Debug, Clone)]
pub struct NoBlockingIssues {
    pub threshold: Severity,
}

impl Default for NoBlockingIssues {
    fn default() -> Self {
        Self {
            threshold: Severity::High,
        }
    }
}

impl AcceptancePolicy for NoBlockingIssues {
    fn accept(&self, feedback: &FeedbackSet) -> bool {
        !feedback.has_blocking(self.threshold)
    }
}
