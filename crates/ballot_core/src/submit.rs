//! Submission gate, canonical payload and signing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{WalletAddress, ALLOCATION_EPSILON, MAX_ALLOCATION, MIN_ALLOCATION},
    protocol::{Ballot, BallotSubmission, SubmitBallotRequest, SubmittedProjectAllocation},
};
use tracing::info;

use crate::{
    api::BallotApi,
    error::{SubmitError, ValidationIssue},
};

/// Signs the canonical ballot message with the voter's wallet.
#[async_trait]
pub trait BallotSigner: Send + Sync {
    async fn sign(&self, address: &WalletAddress, message: &str) -> Result<String>;
}

/// A signature produced out of band, e.g. pasted from a wallet.
pub struct PresignedSignature(pub String);

#[async_trait]
impl BallotSigner for PresignedSignature {
    async fn sign(&self, _address: &WalletAddress, _message: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Every reason the ballot cannot be submitted, in display order. Empty when
/// submission is allowed.
pub fn validate_submission(ballot: &Ballot) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if ballot.is_submitted() {
        issues.push(ValidationIssue::AlreadySubmitted);
    }

    if !ballot.category_allocations.is_empty() {
        if ballot.budget.is_none() {
            issues.push(ValidationIssue::MissingBudget);
        }
        let total: f64 = ballot
            .category_allocations
            .iter()
            .map(|category| category.allocation)
            .sum();
        if (total - MAX_ALLOCATION).abs() > ALLOCATION_EPSILON {
            issues.push(ValidationIssue::CategoryTotal { total });
        }
    }

    let scoreable: Vec<_> = ballot
        .project_allocations
        .iter()
        .filter(|project| !project.is_conflict())
        .collect();
    for project in &scoreable {
        if !(MIN_ALLOCATION..=MAX_ALLOCATION).contains(&project.allocation) {
            issues.push(ValidationIssue::AllocationOutOfRange {
                project_id: project.project_id.clone(),
                allocation: project.allocation,
            });
        }
    }
    if !scoreable.is_empty() {
        let total: f64 = scoreable.iter().map(|project| project.allocation).sum();
        if (total - MAX_ALLOCATION).abs() > ALLOCATION_EPSILON {
            issues.push(ValidationIssue::ProjectTotal { total });
        }
    }

    let remaining = ballot.projects_to_be_evaluated.len() as u32;
    if remaining > 0 {
        issues.push(ValidationIssue::UnscoredProjects { remaining });
    }
    issues
}

/// Payload with categories and projects in id order; conflicts are left out.
pub fn build_submission(ballot: &Ballot) -> BallotSubmission {
    let mut category_allocations = ballot.category_allocations.clone();
    category_allocations.sort_by(|a, b| a.category_slug.cmp(&b.category_slug));

    let mut project_allocations: Vec<_> = ballot
        .project_allocations
        .iter()
        .filter(|project| !project.is_conflict())
        .map(|project| SubmittedProjectAllocation {
            project_id: project.project_id.clone(),
            allocation: project.allocation,
            impact: project.impact,
        })
        .collect();
    project_allocations.sort_by(|a, b| a.project_id.cmp(&b.project_id));

    BallotSubmission {
        address: ballot.address.clone(),
        budget: ballot.budget,
        distribution_method: ballot.distribution_method,
        category_allocations,
        project_allocations,
    }
}

/// The exact text the wallet signs.
pub fn signing_message(submission: &BallotSubmission) -> Result<String> {
    serde_json::to_string(submission).context("failed to encode ballot submission")
}

/// Validates, signs and posts `ballot`, returning the server's submitted ballot.
pub async fn submit_ballot(
    api: &dyn BallotApi,
    signer: &dyn BallotSigner,
    ballot: &Ballot,
) -> Result<Ballot, SubmitError> {
    let issues = validate_submission(ballot);
    if !issues.is_empty() {
        return Err(SubmitError::Validation(issues));
    }

    let payload = build_submission(ballot);
    let message = signing_message(&payload)?;
    let signature = signer
        .sign(&ballot.address, &message)
        .await
        .map_err(SubmitError::Signature)?;

    let request = SubmitBallotRequest {
        address: ballot.address.clone(),
        signature,
        payload,
    };
    let submitted = api.submit_ballot(&ballot.address, request).await?;
    info!(
        "submit: ballot submitted address={} submitted_at={:?}",
        submitted.address, submitted.submitted_at
    );
    Ok(submitted)
}

#[cfg(test)]
#[path = "tests/submit_tests.rs"]
mod tests;
