//! Ballot records as exchanged with the ballot API.
//!
//! The server has shipped several shapes for the same fields over time
//! (numbers as strings, images as strings, lists or objects, project refs as
//! ids or objects). Every such field is normalized once here, on
//! deserialization, so nothing downstream re-checks it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    clamp_allocation, round_allocation, BallotStatus, CategoryId, DistributionMethod, ImpactScore,
    ProjectId, WalletAddress,
};

pub const UNTITLED_PROJECT: &str = "Untitled project";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse::<f64>().ok(),
        }
        .filter(|value| value.is_finite())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImageField {
    Url(String),
    List(Vec<String>),
    Object { url: String },
}

impl ImageField {
    fn into_url(self) -> Option<String> {
        let url = match self {
            Self::Url(url) => url,
            Self::List(urls) => urls.into_iter().next()?,
            Self::Object { url } => url,
        };
        if url.trim().is_empty() {
            None
        } else {
            Some(url)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProjectRef {
    Id(String),
    Object { project_id: String },
}

impl ProjectRef {
    fn into_id(self) -> ProjectId {
        match self {
            Self::Id(id) => ProjectId(id),
            Self::Object { project_id } => ProjectId(project_id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawProjectAllocation {
    project_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image: Option<ImageField>,
    #[serde(default)]
    position: Option<LooseNumber>,
    #[serde(default)]
    allocation: Option<LooseNumber>,
    #[serde(default)]
    impact: Option<LooseNumber>,
}

/// One project entry of a ballot, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawProjectAllocation")]
pub struct ProjectAllocation {
    pub project_id: ProjectId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Zero-based rank; `None` sorts after every ranked project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    pub allocation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactScore>,
}

impl ProjectAllocation {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project_id: ProjectId(project_id.into()),
            name: name.into(),
            image: None,
            position: None,
            allocation: 0.0,
            impact: None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.impact.is_some_and(ImpactScore::is_conflict)
    }
}

impl From<RawProjectAllocation> for ProjectAllocation {
    fn from(raw: RawProjectAllocation) -> Self {
        let name = raw
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNTITLED_PROJECT.to_string());
        let position = raw
            .position
            .and_then(|value| value.to_f64())
            .filter(|value| *value >= 0.0)
            .map(|value| value as u32);
        let allocation = raw
            .allocation
            .and_then(|value| value.to_f64())
            .map(|value| round_allocation(clamp_allocation(value)))
            .unwrap_or_default();
        let impact = raw
            .impact
            .and_then(|value| value.to_f64())
            .filter(|value| *value >= 0.0 && value.fract() == 0.0)
            .and_then(|value| ImpactScore::try_from(value as u16).ok());

        Self {
            project_id: ProjectId(raw.project_id),
            name,
            image: raw.image.and_then(ImageField::into_url),
            position,
            allocation,
            impact,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawCategoryAllocation {
    #[serde(alias = "category")]
    category_slug: String,
    #[serde(default)]
    allocation: Option<LooseNumber>,
    #[serde(default)]
    locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCategoryAllocation")]
pub struct CategoryAllocation {
    pub category_slug: CategoryId,
    pub allocation: f64,
    pub locked: bool,
}

impl From<RawCategoryAllocation> for CategoryAllocation {
    fn from(raw: RawCategoryAllocation) -> Self {
        Self {
            category_slug: CategoryId(raw.category_slug),
            allocation: raw
                .allocation
                .and_then(|value| value.to_f64())
                .map(clamp_allocation)
                .unwrap_or_default(),
            locked: raw.locked,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawBallot {
    address: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    budget: Option<LooseNumber>,
    #[serde(default)]
    category_allocations: Vec<CategoryAllocation>,
    #[serde(default)]
    project_allocations: Vec<ProjectAllocation>,
    #[serde(default)]
    total_projects: Option<u32>,
    #[serde(default)]
    projects_to_be_evaluated: Vec<ProjectRef>,
    #[serde(default)]
    distribution_method: Option<String>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

/// Server snapshot of one voter's ballot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBallot")]
pub struct Ballot {
    pub address: WalletAddress,
    pub status: BallotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u64>,
    pub category_allocations: Vec<CategoryAllocation>,
    pub project_allocations: Vec<ProjectAllocation>,
    pub total_projects: u32,
    pub projects_to_be_evaluated: Vec<ProjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution_method: Option<DistributionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Ballot {
    pub fn empty(address: WalletAddress) -> Self {
        Self {
            address,
            status: BallotStatus::Draft,
            budget: None,
            category_allocations: Vec::new(),
            project_allocations: Vec::new(),
            total_projects: 0,
            projects_to_be_evaluated: Vec::new(),
            distribution_method: None,
            submitted_at: None,
        }
    }

    /// Projects the server already holds an impact score for.
    pub fn voted_count(&self) -> u32 {
        self.total_projects
            .saturating_sub(self.projects_to_be_evaluated.len() as u32)
    }

    pub fn is_submitted(&self) -> bool {
        self.status == BallotStatus::Submitted
    }

    pub fn project(&self, project_id: &ProjectId) -> Option<&ProjectAllocation> {
        self.project_allocations
            .iter()
            .find(|project| &project.project_id == project_id)
    }
}

impl From<RawBallot> for Ballot {
    fn from(raw: RawBallot) -> Self {
        let status = match raw.status.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("SUBMITTED") => BallotStatus::Submitted,
            _ => BallotStatus::Draft,
        };
        let projects_to_be_evaluated: Vec<ProjectId> = raw
            .projects_to_be_evaluated
            .into_iter()
            .map(ProjectRef::into_id)
            .collect();
        let total_projects = raw
            .total_projects
            .unwrap_or(raw.project_allocations.len() as u32);

        Self {
            address: WalletAddress(raw.address),
            status,
            budget: raw
                .budget
                .and_then(|value| value.to_f64())
                .filter(|value| *value >= 0.0)
                .map(|value| value.round() as u64),
            category_allocations: raw.category_allocations,
            project_allocations: raw.project_allocations,
            total_projects,
            projects_to_be_evaluated,
            distribution_method: raw
                .distribution_method
                .and_then(|method| method.parse().ok()),
            submitted_at: raw.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetUpdate {
    pub budget: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAllocationUpdate {
    pub category_slug: CategoryId,
    pub allocation: f64,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectAllocationUpdate {
    pub allocation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPositionUpdate {
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedProjectAllocation {
    pub project_id: ProjectId,
    pub allocation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactScore>,
}

/// The document a voter signs when finalizing a ballot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotSubmission {
    pub address: WalletAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution_method: Option<DistributionMethod>,
    pub category_allocations: Vec<CategoryAllocation>,
    pub project_allocations: Vec<SubmittedProjectAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBallotRequest {
    pub address: WalletAddress,
    pub signature: String,
    pub payload: BallotSubmission,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
