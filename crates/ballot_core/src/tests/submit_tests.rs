use super::*;

use std::sync::Mutex;

use anyhow::anyhow;
use shared::{
    domain::{BallotStatus, CategoryId, DistributionMethod, ImpactScore, ProjectId},
    protocol::CategoryAllocation,
};

use crate::test_support::{project, sample_ballot, scored, ApiCall, RecordingApi};

fn ready_ballot() -> Ballot {
    let mut ballot = sample_ballot(vec![
        scored(project("p2", "Beta", Some(1), 40.0), ImpactScore::Medium),
        scored(project("p1", "Alpha", Some(0), 60.0), ImpactScore::High),
        scored(project("p3", "Gamma", None, 0.0), ImpactScore::ConflictOfInterest),
    ]);
    ballot.budget = Some(2_000_000);
    ballot.distribution_method = Some(DistributionMethod::Custom);
    ballot.category_allocations = vec![
        CategoryAllocation {
            category_slug: CategoryId::new("infra"),
            allocation: 70.0,
            locked: false,
        },
        CategoryAllocation {
            category_slug: CategoryId::new("governance"),
            allocation: 30.0,
            locked: true,
        },
    ];
    ballot
}

#[derive(Default)]
struct RecordingSigner {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl BallotSigner for RecordingSigner {
    async fn sign(&self, _address: &WalletAddress, message: &str) -> Result<String> {
        self.messages.lock().expect("messages").push(message.to_string());
        Ok("0xsigned".into())
    }
}

struct DecliningSigner;

#[async_trait]
impl BallotSigner for DecliningSigner {
    async fn sign(&self, _address: &WalletAddress, _message: &str) -> Result<String> {
        Err(anyhow!("user rejected the request"))
    }
}

#[test]
fn ready_ballot_has_no_issues() {
    assert!(validate_submission(&ready_ballot()).is_empty());
}

#[test]
fn every_blocking_issue_is_listed() {
    let mut ballot = ready_ballot();
    ballot.status = BallotStatus::Submitted;
    ballot.budget = None;
    ballot.category_allocations[0].allocation = 50.0;
    ballot.project_allocations[0].allocation = 10.0;
    ballot.projects_to_be_evaluated = vec![ProjectId::new("p1")];

    let issues = validate_submission(&ballot);
    assert_eq!(
        issues,
        vec![
            ValidationIssue::AlreadySubmitted,
            ValidationIssue::MissingBudget,
            ValidationIssue::CategoryTotal { total: 80.0 },
            ValidationIssue::ProjectTotal { total: 70.0 },
            ValidationIssue::UnscoredProjects { remaining: 1 },
        ]
    );
    assert_eq!(
        issues[4].to_string(),
        "1 project(s) still need an impact score"
    );
}

#[test]
fn submission_payload_is_sorted_and_excludes_conflicts() {
    let payload = build_submission(&ready_ballot());
    let projects: Vec<&str> = payload
        .project_allocations
        .iter()
        .map(|project| project.project_id.as_str())
        .collect();
    assert_eq!(projects, ["p1", "p2"]);
    let categories: Vec<&str> = payload
        .category_allocations
        .iter()
        .map(|category| category.category_slug.as_str())
        .collect();
    assert_eq!(categories, ["governance", "infra"]);
    assert_eq!(
        signing_message(&payload).expect("message"),
        signing_message(&build_submission(&ready_ballot())).expect("message")
    );
}

#[tokio::test]
async fn submit_signs_canonical_message_and_posts() {
    let ballot = ready_ballot();
    let api = RecordingApi::new(ballot.clone());
    let signer = RecordingSigner::default();

    let submitted = submit_ballot(api.as_ref(), &signer, &ballot)
        .await
        .expect("submit");

    assert!(submitted.is_submitted());
    assert!(submitted.submitted_at.is_some());
    assert_eq!(
        api.calls(),
        vec![ApiCall::Submit {
            signature: "0xsigned".into(),
        }]
    );
    let messages = signer.messages.lock().expect("messages");
    assert_eq!(
        messages.as_slice(),
        [signing_message(&build_submission(&ballot)).expect("message")]
    );
}

#[tokio::test]
async fn invalid_ballot_is_never_signed_or_posted() {
    let mut ballot = ready_ballot();
    ballot.project_allocations[1].allocation = 10.0;
    let api = RecordingApi::new(ballot.clone());
    let signer = RecordingSigner::default();

    let err = submit_ballot(api.as_ref(), &signer, &ballot)
        .await
        .expect_err("invalid");
    assert!(matches!(err, SubmitError::Validation(ref issues) if issues.len() == 1));
    assert!(signer.messages.lock().expect("messages").is_empty());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn declined_signature_is_reported_separately() {
    let ballot = ready_ballot();
    let api = RecordingApi::new(ballot.clone());

    let err = submit_ballot(api.as_ref(), &DecliningSigner, &ballot)
        .await
        .expect_err("declined");
    assert!(matches!(err, SubmitError::Signature(_)));
    assert!(api.calls().is_empty());
}
