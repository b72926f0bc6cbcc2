use super::*;

use serde_json::json;

#[test]
fn project_fields_are_normalized_on_read() {
    let project: ProjectAllocation = serde_json::from_value(json!({
        "project_id": "p1",
        "name": "  ",
        "image": ["https://img.example/1.png", "https://img.example/2.png"],
        "position": "-1",
        "allocation": "150.456",
        "impact": 4
    }))
    .expect("project");

    assert_eq!(project.name, UNTITLED_PROJECT);
    assert_eq!(project.image.as_deref(), Some("https://img.example/1.png"));
    assert_eq!(project.position, None);
    assert_eq!(project.allocation, 100.0);
    assert_eq!(project.impact, Some(ImpactScore::High));
}

#[test]
fn image_accepts_string_object_or_blank() {
    let from_object: ProjectAllocation = serde_json::from_value(json!({
        "project_id": "p1",
        "image": { "url": "https://img.example/a.png" }
    }))
    .expect("object");
    assert_eq!(from_object.image.as_deref(), Some("https://img.example/a.png"));

    let blank: ProjectAllocation =
        serde_json::from_value(json!({ "project_id": "p2", "image": "" })).expect("blank");
    assert_eq!(blank.image, None);
    assert_eq!(blank.allocation, 0.0);
}

#[test]
fn garbage_numbers_degrade_to_defaults() {
    let project: ProjectAllocation = serde_json::from_value(json!({
        "project_id": "p1",
        "allocation": "lots",
        "impact": 7,
        "position": 2.0
    }))
    .expect("project");

    assert_eq!(project.allocation, 0.0);
    assert_eq!(project.impact, None);
    assert_eq!(project.position, Some(2));
}

#[test]
fn ballot_snapshot_is_normalized() {
    let ballot: Ballot = serde_json::from_value(json!({
        "address": "0xabc",
        "status": "submitted",
        "budget": "2500000",
        "category_allocations": [
            { "category": "governance", "allocation": "40", "locked": true },
            { "category_slug": "infra", "allocation": 60 }
        ],
        "project_allocations": [
            { "project_id": "p1", "name": "Alpha", "impact": 0 },
            { "project_id": "p2", "name": "Beta", "impact": 999 }
        ],
        "projects_to_be_evaluated": ["p2", { "project_id": "p3" }],
        "distribution_method": "top_to_bottom",
        "submitted_at": "2024-10-01T12:00:00Z"
    }))
    .expect("ballot");

    assert!(ballot.is_submitted());
    assert_eq!(ballot.budget, Some(2_500_000));
    assert_eq!(ballot.category_allocations[0].category_slug, CategoryId::new("governance"));
    assert!(ballot.category_allocations[0].locked);
    assert!(!ballot.category_allocations[1].locked);
    assert_eq!(ballot.total_projects, 2);
    assert_eq!(
        ballot.projects_to_be_evaluated,
        vec![ProjectId::new("p2"), ProjectId::new("p3")]
    );
    assert_eq!(ballot.voted_count(), 0);
    assert_eq!(ballot.distribution_method, Some(DistributionMethod::TopToBottom));
    assert!(ballot.project(&ProjectId::new("p1")).expect("p1").is_conflict());
    assert_eq!(
        ballot.project(&ProjectId::new("p2")).expect("p2").impact,
        Some(ImpactScore::Skip)
    );
}

#[test]
fn unknown_method_and_status_fall_back() {
    let ballot: Ballot = serde_json::from_value(json!({
        "address": "0xabc",
        "status": "ARCHIVED",
        "distribution_method": "RANDOM",
        "total_projects": 12
    }))
    .expect("ballot");

    assert_eq!(ballot.status, BallotStatus::Draft);
    assert_eq!(ballot.distribution_method, None);
    assert_eq!(ballot.voted_count(), 12);
}

#[test]
fn normalized_ballot_reads_back_unchanged() {
    let mut ballot = Ballot::empty(WalletAddress::new("0xabc"));
    let mut project = ProjectAllocation::new("p1", "Alpha");
    project.allocation = 33.33;
    project.position = Some(0);
    project.impact = Some(ImpactScore::Medium);
    ballot.project_allocations.push(project);
    ballot.total_projects = 1;
    ballot.distribution_method = Some(DistributionMethod::ImpactGroups);

    let encoded = serde_json::to_string(&ballot).expect("encode");
    let decoded: Ballot = serde_json::from_str(&encoded).expect("decode");
    assert_eq!(decoded, ballot);
}

#[test]
fn request_bodies_use_api_field_names() {
    let update = CategoryAllocationUpdate {
        category_slug: CategoryId::new("infra"),
        allocation: 25.0,
        locked: true,
    };
    assert_eq!(
        serde_json::to_value(&update).expect("encode"),
        json!({ "category_slug": "infra", "allocation": 25.0, "locked": true })
    );
    assert_eq!(
        serde_json::to_value(ProjectPositionUpdate { position: 3 }).expect("encode"),
        json!({ "position": 3 })
    );
}
