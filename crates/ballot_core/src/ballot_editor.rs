//! Project-level ballot editor.
//!
//! Project percentages are user-declared, so nothing here rebalances. The
//! editor keeps an optimistic mirror of the project list and persists one
//! field at a time: allocations through a per-project debounce, positions and
//! impact scores immediately.

use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use shared::{
    domain::{clamp_allocation, round_allocation, ImpactScore, ProjectId, WalletAddress},
    protocol::ProjectAllocation,
};
use tracing::{debug, info, warn};

use crate::{
    api::BallotApi,
    csv_template::{plan_import, BallotCsvRow},
    debounce::{Debouncer, FlushFn},
    events::{report_persist_failure, BallotEvent, EventSender},
    impact::PendingConflict,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub imported: Vec<ProjectId>,
    pub warnings: Vec<String>,
    /// Rows scoring a conflict of interest; applied only once confirmed.
    pub pending_conflicts: Vec<PendingConflict>,
}

pub struct BallotEditor {
    projects: Vec<ProjectAllocation>,
    api: Arc<dyn BallotApi>,
    address: WalletAddress,
    events: EventSender,
    writes: Debouncer<ProjectId, f64>,
}

impl BallotEditor {
    pub fn new(
        api: Arc<dyn BallotApi>,
        address: WalletAddress,
        events: EventSender,
        delay: Duration,
    ) -> Self {
        let flush: FlushFn<ProjectId, f64> = {
            let api = Arc::clone(&api);
            let address = address.clone();
            let events = events.clone();
            Arc::new(
                move |project_id: ProjectId, allocation: f64| -> BoxFuture<'static, ()> {
                    let api = Arc::clone(&api);
                    let address = address.clone();
                    let events = events.clone();
                    Box::pin(async move {
                        if let Err(err) = api
                            .update_project_allocation(&address, &project_id, allocation)
                            .await
                        {
                            report_persist_failure(&events, format!("project {project_id}"), &err);
                        }
                    })
                },
            )
        };

        Self {
            projects: Vec::new(),
            api,
            address,
            events,
            writes: Debouncer::new(delay, flush),
        }
    }

    pub fn projects(&self) -> &[ProjectAllocation] {
        &self.projects
    }

    pub fn project(&self, project_id: &ProjectId) -> Option<&ProjectAllocation> {
        self.projects
            .iter()
            .find(|project| &project.project_id == project_id)
    }

    pub fn total(&self) -> f64 {
        self.projects.iter().map(|project| project.allocation).sum()
    }

    pub fn reset(&mut self, projects: &[ProjectAllocation]) {
        self.projects = projects.to_vec();
    }

    pub fn set_allocation(&mut self, project_id: &ProjectId, amount: f64) -> Option<f64> {
        let allocation = round_allocation(clamp_allocation(amount));
        let project = self.project_mut(project_id)?;
        project.allocation = allocation;
        debug!("projects: queue write project={project_id} allocation={allocation}");
        self.writes.schedule(project_id.clone(), allocation);
        Some(allocation)
    }

    pub fn inc(&mut self, project_id: &ProjectId) -> Option<f64> {
        let current = self.project(project_id)?.allocation;
        self.set_allocation(project_id, current.floor() + 1.0)
    }

    pub fn dec(&mut self, project_id: &ProjectId) -> Option<f64> {
        let current = self.project(project_id)?.allocation;
        self.set_allocation(project_id, current.ceil() - 1.0)
    }

    /// Mirrors a reorder locally: `order[i]` takes position `i`.
    pub fn apply_order(&mut self, order: &[ProjectId]) {
        for (position, project_id) in order.iter().enumerate() {
            if let Some(project) = self.project_mut(project_id) {
                project.position = Some(position as u32);
            }
        }
    }

    pub async fn save_position(&mut self, project_id: &ProjectId, position: u32) -> Result<()> {
        if let Some(project) = self.project_mut(project_id) {
            project.position = Some(position);
        }
        debug!("projects: save position project={project_id} position={position}");
        self.api
            .update_project_position(&self.address, project_id, position)
            .await
            .inspect_err(|err| {
                report_persist_failure(&self.events, format!("position of {project_id}"), err)
            })
    }

    /// Persists a 0-5 score. Skip never reaches the server.
    pub async fn save_impact(&mut self, project_id: &ProjectId, impact: ImpactScore) -> Result<()> {
        if !impact.is_persisted() {
            return Err(anyhow!("impact score {} is kept locally", impact.value()));
        }
        if let Some(project) = self.project_mut(project_id) {
            project.impact = Some(impact);
        }
        self.api
            .update_project_impact(&self.address, project_id, impact)
            .await
            .inspect_err(|err| {
                report_persist_failure(&self.events, format!("impact of {project_id}"), err)
            })
    }

    /// Applies CSV rows as discrete per-project writes. Rows naming a project
    /// outside this ballot are dropped with a warning.
    pub async fn import_rows(&mut self, rows: Vec<BallotCsvRow>) -> ImportReport {
        let known: HashSet<ProjectId> = self
            .projects
            .iter()
            .map(|project| project.project_id.clone())
            .collect();
        let plan = plan_import(rows, &known);
        let mut report = ImportReport {
            imported: Vec::new(),
            warnings: plan.warnings,
            pending_conflicts: Vec::new(),
        };

        for row in plan.rows {
            let mut applied = true;
            if let Some(allocation) = row.allocation {
                self.writes.cancel(&row.project_id);
                if let Some(project) = self.project_mut(&row.project_id) {
                    project.allocation = allocation;
                }
                if let Err(err) = self
                    .api
                    .update_project_allocation(&self.address, &row.project_id, allocation)
                    .await
                {
                    applied = false;
                    report
                        .warnings
                        .push(format!("project {}: {err:#}", row.project_id));
                }
            }
            match row.impact {
                Some(ImpactScore::ConflictOfInterest) => {
                    let already = self
                        .project(&row.project_id)
                        .is_some_and(|project| project.is_conflict());
                    if !already {
                        report.pending_conflicts.push(PendingConflict {
                            project_id: row.project_id.clone(),
                        });
                    }
                }
                Some(impact) => {
                    if self.save_impact(&row.project_id, impact).await.is_err() {
                        applied = false;
                    }
                }
                None => {}
            }
            if applied {
                report.imported.push(row.project_id);
            }
        }

        for warning in &report.warnings {
            warn!("import: {warning}");
            let _ = self.events.send(BallotEvent::ImportWarning(warning.clone()));
        }
        info!(
            "import: applied rows imported={} warnings={} pending_conflicts={}",
            report.imported.len(),
            report.warnings.len(),
            report.pending_conflicts.len()
        );
        report
    }

    pub fn has_pending_writes(&self) -> bool {
        self.writes.pending_len() > 0
    }

    pub async fn flush(&self) {
        self.writes.flush_all().await;
    }

    fn project_mut(&mut self, project_id: &ProjectId) -> Option<&mut ProjectAllocation> {
        self.projects
            .iter_mut()
            .find(|project| &project.project_id == project_id)
    }
}

#[cfg(test)]
#[path = "tests/ballot_editor_tests.rs"]
mod tests;
