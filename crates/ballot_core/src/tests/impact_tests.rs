use super::*;

use std::time::Duration;

use storage::MemoryLocalStore;

use crate::{
    events::event_channel,
    test_support::{project, sample_ballot, scored, ApiCall, RecordingApi},
};

struct Fixture {
    api: Arc<RecordingApi>,
    store: Arc<MemoryLocalStore>,
    editor: BallotEditor,
    scoring: ImpactScoring,
}

fn voter() -> WalletAddress {
    WalletAddress::new("0xvoter")
}

fn pid(value: &str) -> ProjectId {
    ProjectId::new(value)
}

async fn fixture(ballot: Ballot) -> Fixture {
    let api = RecordingApi::new(ballot);
    let store = Arc::new(MemoryLocalStore::new());
    let events = event_channel();
    let mut editor = BallotEditor::new(api.clone(), voter(), events.clone(), Duration::from_millis(200));
    editor.reset(&api.ballot().project_allocations);
    let mut scoring = ImpactScoring::new(voter(), CategoryId::new("governance"), store.clone(), events);
    scoring.load_skipped().await.expect("load skipped");
    scoring.reset(&api.ballot());
    Fixture {
        api,
        store,
        editor,
        scoring,
    }
}

fn three_projects() -> Ballot {
    sample_ballot(vec![
        project("p1", "Charlie", None, 0.0),
        project("p2", "alpha", None, 0.0),
        project("p3", "Bravo", None, 0.0),
    ])
}

#[tokio::test]
async fn skip_then_score_clears_skip_and_counts_vote() {
    let Fixture {
        api,
        store,
        mut editor,
        mut scoring,
    } = fixture(three_projects()).await;

    let outcome = scoring
        .select_score(&pid("p1"), ImpactScore::Skip, &mut editor)
        .await
        .expect("skip");
    assert_eq!(outcome, ScoreOutcome::Skipped);
    assert!(scoring.skipped().contains(&pid("p1")));
    assert_eq!(scoring.status(&pid("p1")), ScoreStatus::Skipped);
    assert_eq!(api.ballot().voted_count(), 0);
    assert!(api.calls().is_empty(), "skip stays local");

    let outcome = scoring
        .select_score(&pid("p1"), ImpactScore::Medium, &mut editor)
        .await
        .expect("score");
    assert_eq!(outcome, ScoreOutcome::Scored(ImpactScore::Medium));
    assert!(!scoring.skipped().contains(&pid("p1")));
    assert_eq!(api.ballot().voted_count(), 1);
    assert_eq!(scoring.voted_count(), 1);
    assert_eq!(
        api.calls(),
        vec![ApiCall::ProjectImpact {
            project: "p1".into(),
            score: 3,
        }]
    );

    let stored: Vec<ProjectId> = read_json(
        store.as_ref(),
        &keys::skipped_projects(&CategoryId::new("governance"), &voter()),
    )
    .await
    .expect("read")
    .expect("stored");
    assert!(stored.is_empty());
}

#[tokio::test]
async fn skipped_set_survives_a_reload() {
    let Fixture {
        store,
        mut editor,
        mut scoring,
        ..
    } = fixture(three_projects()).await;
    scoring
        .select_score(&pid("p2"), ImpactScore::Skip, &mut editor)
        .await
        .expect("skip");

    let mut reloaded =
        ImpactScoring::new(voter(), CategoryId::new("governance"), store.clone(), event_channel());
    reloaded.load_skipped().await.expect("load");
    assert!(reloaded.skipped().contains(&pid("p2")));

    assert!(reloaded.clear_skip(&pid("p2")).await.expect("clear"));
    assert!(!reloaded.clear_skip(&pid("p2")).await.expect("clear again"));
}

#[tokio::test]
async fn conflict_of_interest_needs_confirmation() {
    let Fixture {
        api,
        mut editor,
        mut scoring,
        ..
    } = fixture(three_projects()).await;

    let outcome = scoring
        .select_score(&pid("p3"), ImpactScore::ConflictOfInterest, &mut editor)
        .await
        .expect("select");
    let ScoreOutcome::ConfirmationRequired(pending) = outcome else {
        panic!("expected confirmation, got {outcome:?}");
    };
    assert!(api.calls().is_empty());
    assert_eq!(scoring.status(&pid("p3")), ScoreStatus::Unscored);

    scoring
        .confirm_conflict(pending, &mut editor)
        .await
        .expect("confirm");
    assert_eq!(scoring.status(&pid("p3")), ScoreStatus::ConflictOfInterest);
    assert_eq!(
        api.calls(),
        vec![ApiCall::ProjectImpact {
            project: "p3".into(),
            score: 0,
        }]
    );
    assert!(editor.project(&pid("p3")).expect("p3").is_conflict());
}

#[tokio::test]
async fn failed_save_keeps_project_skipped() {
    let Fixture {
        api,
        mut editor,
        mut scoring,
        ..
    } = fixture(three_projects()).await;
    scoring
        .select_score(&pid("p1"), ImpactScore::Skip, &mut editor)
        .await
        .expect("skip");
    api.fail_with(Some("timeout"));

    assert!(scoring
        .select_score(&pid("p1"), ImpactScore::High, &mut editor)
        .await
        .is_err());
    assert_eq!(scoring.status(&pid("p1")), ScoreStatus::Skipped);
    assert_eq!(scoring.voted_count(), 0);
}

#[tokio::test]
async fn navigation_prefers_unscored_by_name_then_skipped() {
    let Fixture {
        mut editor,
        mut scoring,
        ..
    } = fixture(three_projects()).await;

    assert_eq!(scoring.next_project(None), Some(pid("p2")));
    assert_eq!(scoring.next_project(Some(&pid("p2"))), Some(pid("p3")));

    scoring
        .select_score(&pid("p2"), ImpactScore::Skip, &mut editor)
        .await
        .expect("skip");
    assert_eq!(scoring.next_project(None), Some(pid("p3")));

    scoring
        .select_score(&pid("p3"), ImpactScore::Low, &mut editor)
        .await
        .expect("score");
    scoring
        .select_score(&pid("p1"), ImpactScore::High, &mut editor)
        .await
        .expect("score");
    assert_eq!(scoring.next_project(None), Some(pid("p2")));

    scoring
        .select_score(&pid("p2"), ImpactScore::VeryLow, &mut editor)
        .await
        .expect("score");
    assert_eq!(scoring.next_project(None), None);
    assert!(scoring.all_scored());
}

#[tokio::test]
async fn skip_never_counts_toward_completion() {
    let Fixture {
        mut editor,
        mut scoring,
        ..
    } = fixture(sample_ballot(vec![
        scored(project("p1", "Alpha", None, 0.0), ImpactScore::High),
        project("p2", "Beta", None, 0.0),
    ]))
    .await;

    scoring
        .select_score(&pid("p2"), ImpactScore::Skip, &mut editor)
        .await
        .expect("skip");
    assert_eq!(scoring.voted_count(), 1);
    assert!(!scoring.all_scored());
    assert!(!scoring.maybe_request_unlock(false).await.expect("unlock"));
}

#[tokio::test]
async fn unlock_request_is_raised_once_per_wallet() {
    let ballot = sample_ballot(vec![scored(
        project("p1", "Alpha", None, 0.0),
        ImpactScore::High,
    )]);
    let api = RecordingApi::new(ballot.clone());
    let store = Arc::new(MemoryLocalStore::new());
    let events = event_channel();
    let mut rx = events.subscribe();
    let mut scoring = ImpactScoring::new(voter(), CategoryId::new("governance"), store.clone(), events);
    scoring.reset(&api.ballot());

    assert!(scoring.all_scored());
    assert!(scoring.maybe_request_unlock(false).await.expect("first"));
    assert!(!scoring.maybe_request_unlock(true).await.expect("second"));
    assert_eq!(rx.recv().await.expect("event"), BallotEvent::UnlockBallotRequested);
    assert!(rx.try_recv().is_err());

    let mut again = ImpactScoring::new(voter(), CategoryId::new("governance"), store, event_channel());
    again.reset(&ballot);
    assert!(!again.maybe_request_unlock(true).await.expect("after reload"));

    assert!(!again.is_ballot_unlocked().await.expect("flag"));
    again.mark_ballot_unlocked().await.expect("mark");
    assert!(again.is_ballot_unlocked().await.expect("flag"));
}
