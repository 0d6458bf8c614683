//! Non-fatal population issues.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Information,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    /// An initial expression or population context failed to evaluate
    Expression,
    /// A value set could not be expanded or an answer was not in it
    ValueSet,
    /// A declared launch context was not supplied
    LaunchContext,
    /// A questionnaire variable failed to evaluate
    Variable,
    /// Population contexts of one repeat group disagree on length
    RepeatCardinality,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expression => "expression",
            Self::ValueSet => "value-set",
            Self::LaunchContext => "launch-context",
            Self::Variable => "variable",
            Self::RepeatCardinality => "repeat-cardinality",
        }
    }
}

/// Something that went wrong for one item without failing population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationIssue {
    pub severity: IssueSeverity,
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    pub message: String,
}

impl PopulationIssue {
    pub fn warning(kind: IssueKind, link_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            kind,
            link_id: link_id.map(String::from),
            message: message.into(),
        }
    }

    pub fn expression(link_id: &str, message: impl Into<String>) -> Self {
        Self::warning(IssueKind::Expression, Some(link_id), message)
    }

    pub fn value_set(link_id: &str, message: impl Into<String>) -> Self {
        Self::warning(IssueKind::ValueSet, Some(link_id), message)
    }

    /// Build the `OperationOutcome.issue` entry for this issue.
    pub fn to_outcome_issue(&self) -> serde_json::Value {
        let mut issue = serde_json::json!({
            "severity": match self.severity {
                IssueSeverity::Warning => "warning",
                IssueSeverity::Information => "information",
            },
            "code": "processing",
            "diagnostics": self.message,
        });
        if let Some(link_id) = &self.link_id {
            issue["expression"] = serde_json::json!([format!("item.where(linkId='{link_id}')")]);
        }
        issue
    }
}

impl fmt::Display for PopulationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link_id {
            Some(link_id) => write!(f, "[{}] {}: {}", self.kind.as_str(), link_id, self.message),
            None => write!(f, "[{}] {}", self.kind.as_str(), self.message),
        }
    }
}
