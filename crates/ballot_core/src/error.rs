use std::fmt;

use shared::{
    domain::{CategoryId, ProjectId},
    error::ApiError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiRequestError {
    #[error("ballot api rejected credentials: {0}")]
    Unauthorized(String),
    #[error("ballot api returned {status}: {}", .error.message)]
    Status { status: u16, error: ApiError },
    #[error("ballot api transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid ballot api url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("unknown category {0}")]
    UnknownEntry(CategoryId),
    #[error("at least one category must stay unlocked")]
    LastUnlockedEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReorderError {
    #[error("projects can only be reordered with a ranking distribution method")]
    NotMovable,
    #[error("finish editing the focused field before reordering")]
    InputFocused,
    #[error("position {index} is outside a list of {len} projects")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A reason the ballot cannot be submitted yet. Rendered inline next to the
/// disabled submit action.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    CategoryTotal { total: f64 },
    ProjectTotal { total: f64 },
    AllocationOutOfRange { project_id: ProjectId, allocation: f64 },
    UnscoredProjects { remaining: u32 },
    MissingBudget,
    AlreadySubmitted,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CategoryTotal { total } => {
                write!(f, "category allocations add up to {total:.2}%, expected 100%")
            }
            Self::ProjectTotal { total } => {
                write!(f, "project allocations add up to {total:.2}%, expected 100%")
            }
            Self::AllocationOutOfRange {
                project_id,
                allocation,
            } => write!(
                f,
                "project {project_id} has allocation {allocation}, expected 0-100"
            ),
            Self::UnscoredProjects { remaining } => {
                write!(f, "{remaining} project(s) still need an impact score")
            }
            Self::MissingBudget => f.write_str("set a budget before submitting"),
            Self::AlreadySubmitted => f.write_str("this ballot has already been submitted"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("ballot is not ready to submit: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
    #[error("wallet declined to sign the ballot: {0}")]
    Signature(anyhow::Error),
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Returns the HTTP status behind an error chain, if any.
pub fn status_of(err: &anyhow::Error) -> Option<u16> {
    err.chain().find_map(|cause| match cause.downcast_ref::<ApiRequestError>() {
        Some(ApiRequestError::Status { status, .. }) => Some(*status),
        Some(ApiRequestError::Unauthorized(_)) => Some(401),
        _ => None,
    })
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
