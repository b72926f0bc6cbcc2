//! Per-project impact scoring.
//!
//! Scores 1-5 and conflicts of interest are saved remotely; a conflict needs
//! an explicit confirmation first. Skip only touches the local skip set,
//! which orders navigation and never counts toward completion.

use std::{collections::BTreeSet, sync::Arc};

use anyhow::{Context, Result};
use shared::{
    domain::{CategoryId, ImpactScore, ProjectId, WalletAddress},
    protocol::{Ballot, ProjectAllocation},
};
use storage::{keys, read_flag, read_json, write_flag, write_json, LocalStore};
use tracing::{debug, info};

use crate::{
    ballot_editor::BallotEditor,
    events::{BallotEvent, EventSender},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreStatus {
    Unscored,
    Scored(ImpactScore),
    ConflictOfInterest,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConflict {
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreOutcome {
    Skipped,
    Scored(ImpactScore),
    ConfirmationRequired(PendingConflict),
}

pub struct ImpactScoring {
    address: WalletAddress,
    category: CategoryId,
    store: Arc<dyn LocalStore>,
    events: EventSender,
    ballot: Ballot,
    skipped: BTreeSet<ProjectId>,
}

impl ImpactScoring {
    pub fn new(
        address: WalletAddress,
        category: CategoryId,
        store: Arc<dyn LocalStore>,
        events: EventSender,
    ) -> Self {
        Self {
            ballot: Ballot::empty(address.clone()),
            address,
            category,
            store,
            events,
            skipped: BTreeSet::new(),
        }
    }

    pub async fn load_skipped(&mut self) -> Result<()> {
        let key = keys::skipped_projects(&self.category, &self.address);
        self.skipped = read_json::<Vec<ProjectId>>(self.store.as_ref(), &key)
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();
        Ok(())
    }

    /// Adopts the server's view of which projects are scored.
    pub fn reset(&mut self, ballot: &Ballot) {
        self.ballot = ballot.clone();
    }

    pub fn skipped(&self) -> &BTreeSet<ProjectId> {
        &self.skipped
    }

    pub fn status(&self, project_id: &ProjectId) -> ScoreStatus {
        match self
            .ballot
            .project(project_id)
            .and_then(|project| project.impact)
        {
            Some(ImpactScore::ConflictOfInterest) => ScoreStatus::ConflictOfInterest,
            Some(impact) if impact.is_persisted() => ScoreStatus::Scored(impact),
            _ if self.skipped.contains(project_id) => ScoreStatus::Skipped,
            _ => ScoreStatus::Unscored,
        }
    }

    pub fn voted_count(&self) -> u32 {
        self.ballot.voted_count()
    }

    pub fn total(&self) -> u32 {
        self.ballot.total_projects
    }

    pub fn all_scored(&self) -> bool {
        self.voted_count() == self.total()
    }

    pub async fn select_score(
        &mut self,
        project_id: &ProjectId,
        impact: ImpactScore,
        editor: &mut BallotEditor,
    ) -> Result<ScoreOutcome> {
        match impact {
            ImpactScore::Skip => {
                if self.skipped.insert(project_id.clone()) {
                    self.save_skipped().await?;
                }
                debug!("scoring: skipped project={project_id}");
                Ok(ScoreOutcome::Skipped)
            }
            ImpactScore::ConflictOfInterest => {
                Ok(ScoreOutcome::ConfirmationRequired(PendingConflict {
                    project_id: project_id.clone(),
                }))
            }
            impact => self.commit(project_id, impact, editor).await,
        }
    }

    pub async fn confirm_conflict(
        &mut self,
        pending: PendingConflict,
        editor: &mut BallotEditor,
    ) -> Result<ScoreOutcome> {
        self.commit(&pending.project_id, ImpactScore::ConflictOfInterest, editor)
            .await
    }

    /// Moves a skipped project back to unscored.
    pub async fn clear_skip(&mut self, project_id: &ProjectId) -> Result<bool> {
        if !self.skipped.remove(project_id) {
            return Ok(false);
        }
        self.save_skipped().await?;
        Ok(true)
    }

    /// Next project to score after `current`: unscored ones first, then
    /// skipped ones, each by name.
    pub fn next_project(&self, current: Option<&ProjectId>) -> Option<ProjectId> {
        let mut fresh = Vec::new();
        let mut skipped = Vec::new();
        for project in &self.ballot.project_allocations {
            if Some(&project.project_id) == current {
                continue;
            }
            match self.status(&project.project_id) {
                ScoreStatus::Unscored => fresh.push(project),
                ScoreStatus::Skipped => skipped.push(project),
                _ => {}
            }
        }
        let first_by_name = |mut candidates: Vec<&ProjectAllocation>| {
            candidates.sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then_with(|| a.project_id.cmp(&b.project_id))
            });
            candidates.first().map(|project| project.project_id.clone())
        };
        first_by_name(fresh).or_else(|| first_by_name(skipped))
    }

    /// Raises the unlock request once per wallet when every project is
    /// scored or navigation reached the last project.
    pub async fn maybe_request_unlock(&self, reached_last: bool) -> Result<bool> {
        if !(reached_last || self.all_scored()) {
            return Ok(false);
        }
        let key = keys::unlock_dialog_shown(&self.address);
        if read_flag(self.store.as_ref(), &key).await? {
            return Ok(false);
        }
        write_flag(self.store.as_ref(), &key, true).await?;
        info!("scoring: requesting ballot unlock address={}", self.address);
        let _ = self.events.send(BallotEvent::UnlockBallotRequested);
        Ok(true)
    }

    pub async fn mark_ballot_unlocked(&self) -> Result<()> {
        write_flag(
            self.store.as_ref(),
            &keys::ballot_unlocked(&self.address),
            true,
        )
        .await
    }

    pub async fn is_ballot_unlocked(&self) -> Result<bool> {
        read_flag(self.store.as_ref(), &keys::ballot_unlocked(&self.address)).await
    }

    async fn commit(
        &mut self,
        project_id: &ProjectId,
        impact: ImpactScore,
        editor: &mut BallotEditor,
    ) -> Result<ScoreOutcome> {
        editor
            .save_impact(project_id, impact)
            .await
            .with_context(|| format!("failed to save impact for project {project_id}"))?;

        if let Some(project) = self
            .ballot
            .project_allocations
            .iter_mut()
            .find(|project| &project.project_id == project_id)
        {
            project.impact = Some(impact);
        }
        self.ballot
            .projects_to_be_evaluated
            .retain(|id| id != project_id);
        if self.skipped.remove(project_id) {
            self.save_skipped().await?;
        }
        debug!(
            "scoring: scored project={project_id} impact={}",
            impact.value()
        );
        Ok(ScoreOutcome::Scored(impact))
    }

    async fn save_skipped(&self) -> Result<()> {
        let key = keys::skipped_projects(&self.category, &self.address);
        write_json(self.store.as_ref(), &key, &self.skipped).await
    }
}

#[cfg(test)]
#[path = "tests/impact_tests.rs"]
mod tests;
