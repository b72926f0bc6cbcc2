//! Per-wallet ballot session.
//!
//! Created on wallet connect and torn down on disconnect. Owns every editor
//! and derived list for one voter and category, and is the only writer to
//! them; the presentation layer reads state from here and forwards user
//! actions to the methods below.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use shared::{
    domain::{CategoryId, DistributionMethod, Identity, ImpactScore, ProjectId, WalletAddress},
    protocol::Ballot,
};
use storage::LocalStore;
use tracing::{debug, info};

use crate::{
    allocation_editor::AllocationEditor,
    api::BallotApi,
    ballot_editor::{BallotEditor, ImportReport},
    config::Settings,
    csv_template::{export_csv, parse_csv},
    debounce::{Debouncer, FlushFn},
    distribution::{DistributionOrchestrator, MethodSync, PendingMethodChange},
    error::{ReorderError, SubmitError, ValidationIssue},
    events::{report_persist_failure, BallotEvent, EventSender},
    impact::{ImpactScoring, PendingConflict, ScoreOutcome},
    reconciler::ProjectListReconciler,
    submit::{submit_ballot, validate_submission, BallotSigner},
};

pub struct BallotSession {
    address: WalletAddress,
    category: CategoryId,
    api: Arc<dyn BallotApi>,
    events: EventSender,
    ballot: Ballot,
    budget: Option<u64>,
    budget_writes: Debouncer<WalletAddress, u64>,
    categories: AllocationEditor,
    editor: BallotEditor,
    orchestrator: DistributionOrchestrator,
    reconciler: ProjectListReconciler,
    scoring: ImpactScoring,
}

impl BallotSession {
    /// Fetches the voter's ballot and derives every view from it. Only
    /// badgeholders with an assigned voting category can open a session.
    pub async fn connect(
        identity: &Identity,
        api: Arc<dyn BallotApi>,
        store: Arc<dyn LocalStore>,
        events: EventSender,
        settings: &Settings,
    ) -> Result<Self> {
        if !identity.is_badgeholder {
            bail!("{} is not a badgeholder for this round", identity.address);
        }
        let Some(category) = identity.category.clone() else {
            bail!("{} has no voting category", identity.address);
        };
        let address = identity.address.clone();

        let budget_flush: FlushFn<WalletAddress, u64> = {
            let api = Arc::clone(&api);
            let events = events.clone();
            Arc::new(move |address: WalletAddress, budget: u64| -> BoxFuture<'static, ()> {
                let api = Arc::clone(&api);
                let events = events.clone();
                Box::pin(async move {
                    if let Err(err) = api.update_budget(&address, budget).await {
                        report_persist_failure(&events, "budget".into(), &err);
                    }
                })
            })
        };

        let mut orchestrator = DistributionOrchestrator::new(
            address.clone(),
            Arc::clone(&api),
            Arc::clone(&store),
            events.clone(),
        );
        orchestrator
            .load()
            .await
            .context("failed to read local distribution method")?;
        let mut scoring = ImpactScoring::new(
            address.clone(),
            category.clone(),
            Arc::clone(&store),
            events.clone(),
        );
        scoring
            .load_skipped()
            .await
            .context("failed to read skipped projects")?;

        let mut session = Self {
            categories: AllocationEditor::with_remote(
                Arc::clone(&api),
                address.clone(),
                events.clone(),
                settings.allocation_debounce(),
            ),
            editor: BallotEditor::new(
                Arc::clone(&api),
                address.clone(),
                events.clone(),
                settings.allocation_debounce(),
            ),
            budget_writes: Debouncer::new(settings.budget_debounce(), budget_flush),
            ballot: Ballot::empty(address.clone()),
            budget: None,
            orchestrator,
            reconciler: ProjectListReconciler::new(),
            scoring,
            address,
            category,
            api,
            events,
        };
        session.load_remote().await?;
        info!(
            "session: connected address={} category={} projects={}",
            session.address,
            session.category,
            session.ballot.project_allocations.len()
        );
        Ok(session)
    }

    pub async fn disconnect(self) {
        self.flush().await;
        info!("session: disconnected address={}", self.address);
    }

    pub async fn flush(&self) {
        self.categories.flush().await;
        self.editor.flush().await;
        self.budget_writes.flush_all().await;
    }

    pub async fn refetch(&mut self) -> Result<()> {
        self.load_remote().await?;
        let _ = self.events.send(BallotEvent::BallotRefetched);
        Ok(())
    }

    /// Replaces local state with `ballot` without persisting anything.
    pub fn apply_snapshot(&mut self, ballot: Ballot) {
        self.categories.reset_from(&ballot.category_allocations);
        self.editor.reset(&ballot.project_allocations);
        self.reconciler
            .reconcile(self.editor.projects(), self.orchestrator.method());
        self.scoring.reset(&ballot);
        self.budget = ballot.budget;
        self.ballot = ballot;
    }

    async fn load_remote(&mut self) -> Result<()> {
        let mut ballot = self
            .api
            .fetch_ballot(&self.address)
            .await
            .context("failed to fetch ballot")?;
        if self
            .orchestrator
            .reconcile_remote(ballot.distribution_method)
            .await?
            == MethodSync::Refetch
        {
            debug!("session: distribution method changed remotely, refetching");
            ballot = self
                .api
                .fetch_ballot(&self.address)
                .await
                .context("failed to refetch ballot")?;
        }
        self.apply_snapshot(ballot);
        Ok(())
    }

    pub fn address(&self) -> &WalletAddress {
        &self.address
    }

    pub fn category(&self) -> &CategoryId {
        &self.category
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// The ballot as it stands locally, including unflushed edits.
    pub fn current_ballot(&self) -> Ballot {
        let mut ballot = self.ballot.clone();
        ballot.budget = self.budget;
        ballot.category_allocations = self.categories.snapshot();
        ballot.project_allocations = self.editor.projects().to_vec();
        ballot.distribution_method = self.orchestrator.method();
        ballot
    }

    pub fn budget(&self) -> Option<u64> {
        self.budget
    }

    pub fn set_budget(&mut self, budget: u64) {
        self.budget = Some(budget);
        debug!("session: queue budget write budget={budget}");
        self.budget_writes.schedule(self.address.clone(), budget);
    }

    pub fn category_amount(&self, category: &CategoryId) -> Option<u64> {
        let budget = self.budget?;
        let entry = self.categories.get(category)?;
        Some((budget as f64 * entry.allocation / 100.0).round() as u64)
    }

    pub fn categories(&self) -> &AllocationEditor {
        &self.categories
    }

    pub fn categories_mut(&mut self) -> &mut AllocationEditor {
        &mut self.categories
    }

    pub fn editor(&self) -> &BallotEditor {
        &self.editor
    }

    pub fn reconciler(&self) -> &ProjectListReconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut ProjectListReconciler {
        &mut self.reconciler
    }

    pub fn scoring(&self) -> &ImpactScoring {
        &self.scoring
    }

    pub fn distribution_method(&self) -> Option<DistributionMethod> {
        self.orchestrator.method()
    }

    pub fn is_movable(&self) -> bool {
        self.orchestrator.is_movable()
    }

    pub async fn move_project(&mut self, dragged: usize, new_index: usize) -> Result<(), ReorderError> {
        let ballot = self
            .reconciler
            .handle_project_move(dragged, new_index, &mut self.editor, &self.orchestrator)
            .await?;
        self.adopt_recomputed(ballot);
        Ok(())
    }

    pub fn change_position(&mut self, index: usize, value: &str) -> bool {
        self.reconciler.handle_position_change(index, value)
    }

    pub async fn commit_position(&mut self, index: usize) -> Result<(), ReorderError> {
        let ballot = self
            .reconciler
            .handle_position_commit(index, &mut self.editor, &self.orchestrator)
            .await?;
        self.adopt_recomputed(ballot);
        Ok(())
    }

    pub fn change_allocation(&mut self, index: usize, value: &str) {
        self.reconciler.handle_allocation_change(index, value);
    }

    pub async fn save_allocation(&mut self, index: usize) -> bool {
        self.reconciler
            .handle_allocation_save(index, &mut self.editor, &mut self.orchestrator)
            .await
    }

    pub async fn score_project(
        &mut self,
        project_id: &ProjectId,
        impact: ImpactScore,
    ) -> Result<ScoreOutcome> {
        let outcome = self
            .scoring
            .select_score(project_id, impact, &mut self.editor)
            .await?;
        self.after_score(project_id, &outcome).await?;
        Ok(outcome)
    }

    pub async fn confirm_conflict(&mut self, pending: PendingConflict) -> Result<ScoreOutcome> {
        let project_id = pending.project_id.clone();
        let outcome = self
            .scoring
            .confirm_conflict(pending, &mut self.editor)
            .await?;
        self.after_score(&project_id, &outcome).await?;
        Ok(outcome)
    }

    pub async fn clear_skip(&mut self, project_id: &ProjectId) -> Result<bool> {
        self.scoring.clear_skip(project_id).await
    }

    /// Running out of projects to visit counts as reaching the end of the
    /// review, which raises the unlock request.
    pub async fn next_project(&self, current: Option<&ProjectId>) -> Result<Option<ProjectId>> {
        let next = self.scoring.next_project(current);
        if next.is_none() {
            self.scoring.maybe_request_unlock(true).await?;
        }
        Ok(next)
    }

    async fn after_score(&mut self, project_id: &ProjectId, outcome: &ScoreOutcome) -> Result<()> {
        if let ScoreOutcome::Scored(_) = outcome {
            self.ballot
                .projects_to_be_evaluated
                .retain(|id| id != project_id);
            self.reconciler
                .reconcile(self.editor.projects(), self.orchestrator.method());
            self.scoring.maybe_request_unlock(false).await?;
        }
        Ok(())
    }

    pub fn request_method_change(&self, method: DistributionMethod) -> Option<PendingMethodChange> {
        self.orchestrator.request_change(method)
    }

    pub async fn confirm_method_change(&mut self, change: PendingMethodChange) -> Result<()> {
        let ballot = self.orchestrator.confirm_change(change).await?;
        self.apply_snapshot(ballot);
        Ok(())
    }

    pub fn export_csv(&self, template: bool) -> String {
        export_csv(self.editor.projects(), template)
    }

    pub async fn import_csv(&mut self, text: &str) -> Result<ImportReport> {
        let rows = parse_csv(text)?;
        let report = self.editor.import_rows(rows).await;
        if !report.imported.is_empty() {
            self.orchestrator.on_allocation_edit(self.editor.total()).await;
        }
        self.refetch().await?;
        Ok(report)
    }

    pub fn validate(&self) -> Vec<ValidationIssue> {
        validate_submission(&self.current_ballot())
    }

    /// Flushes pending writes, then validates, signs and submits the ballot.
    pub async fn submit(&mut self, signer: &dyn BallotSigner) -> Result<Ballot, SubmitError> {
        self.flush().await;
        let submitted = submit_ballot(self.api.as_ref(), signer, &self.current_ballot()).await?;
        let _ = self.events.send(BallotEvent::Submitted {
            submitted_at: submitted.submitted_at,
        });
        self.apply_snapshot(submitted.clone());
        Ok(submitted)
    }

    fn adopt_recomputed(&mut self, ballot: Option<Ballot>) {
        if let Some(ballot) = ballot {
            self.scoring.reset(&ballot);
            self.ballot = ballot;
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
