//! Ordered project lists derived from the ballot.
//!
//! `project_list` holds every scoreable project sorted for the active
//! distribution method; `conflicts` holds projects scored as a conflict of
//! interest. Both are rebuilt from the editor's projects on every
//! reconciliation, so together they always cover the ballot exactly once.
//!
//! Each row carries display strings for its allocation and its 1-based
//! position. They follow the numeric values except while the user is typing.

use std::cmp::Ordering;

use shared::{
    domain::{clamp_allocation, round_allocation, DistributionMethod, ALLOCATION_EPSILON},
    protocol::{Ballot, ProjectAllocation},
};
use tracing::debug;

use crate::{
    ballot_editor::BallotEditor, distribution::DistributionOrchestrator, error::ReorderError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub project: ProjectAllocation,
    pub allocation_input: String,
    pub position_input: String,
}

impl ProjectRow {
    fn new(project: ProjectAllocation, index: usize) -> Self {
        Self {
            allocation_input: format_allocation(project.allocation),
            position_input: (index + 1).to_string(),
            project,
        }
    }
}

/// Two decimals at most, without trailing zeros.
pub fn format_allocation(allocation: f64) -> String {
    let allocation = round_allocation(allocation);
    if allocation == 0.0 {
        return "0".into();
    }
    let formatted = format!("{allocation:.2}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[derive(Debug, Default)]
pub struct ProjectListReconciler {
    project_list: Vec<ProjectRow>,
    conflicts: Vec<ProjectRow>,
    search: String,
    input_focused: bool,
}

impl ProjectListReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project_list(&self) -> &[ProjectRow] {
        &self.project_list
    }

    pub fn conflicts(&self) -> &[ProjectRow] {
        &self.conflicts
    }

    /// Custom sorts by allocation, highest first; other methods by position.
    pub fn reconcile(&mut self, projects: &[ProjectAllocation], method: Option<DistributionMethod>) {
        let (conflicts, mut scoreable): (Vec<_>, Vec<_>) = projects
            .iter()
            .cloned()
            .partition(ProjectAllocation::is_conflict);

        if method == Some(DistributionMethod::Custom) {
            scoreable.sort_by(|a, b| b.allocation.total_cmp(&a.allocation));
        } else {
            scoreable.sort_by(|a, b| compare_positions(a.position, b.position));
        }

        self.project_list = scoreable
            .into_iter()
            .enumerate()
            .map(|(index, project)| ProjectRow::new(project, index))
            .collect();
        self.conflicts = conflicts
            .into_iter()
            .enumerate()
            .map(|(index, project)| ProjectRow::new(project, index))
            .collect();
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
    }

    pub fn display_projects(&self) -> Vec<&ProjectRow> {
        let needle = self.search.trim().to_lowercase();
        self.project_list
            .iter()
            .filter(|row| needle.is_empty() || row.project.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn input_focused(&self) -> bool {
        self.input_focused
    }

    pub fn set_input_focused(&mut self, focused: bool) {
        self.input_focused = focused;
    }

    /// A failed position write keeps the local order and skips redistribution.
    pub async fn handle_project_move(
        &mut self,
        dragged: usize,
        new_index: usize,
        editor: &mut BallotEditor,
        orchestrator: &DistributionOrchestrator,
    ) -> Result<Option<Ballot>, ReorderError> {
        if !orchestrator.is_movable() {
            return Err(ReorderError::NotMovable);
        }
        if self.input_focused {
            return Err(ReorderError::InputFocused);
        }
        let len = self.project_list.len();
        for index in [dragged, new_index] {
            if index >= len {
                return Err(ReorderError::IndexOutOfRange { index, len });
            }
        }
        if dragged == new_index {
            return Ok(None);
        }

        let row = self.project_list.remove(dragged);
        let project_id = row.project.project_id.clone();
        self.project_list.insert(new_index, row);
        for (index, row) in self.project_list.iter_mut().enumerate() {
            row.position_input = (index + 1).to_string();
            row.project.position = Some(index as u32);
        }
        debug!("reorder: moved project={project_id} from={dragged} to={new_index}");

        let order: Vec<_> = self
            .project_list
            .iter()
            .map(|row| row.project.project_id.clone())
            .collect();
        editor.apply_order(&order);

        if editor
            .save_position(&project_id, new_index as u32)
            .await
            .is_err()
        {
            return Ok(None);
        }

        let ballot = orchestrator.redistribute().await;
        if let Some(ballot) = &ballot {
            editor.reset(&ballot.project_allocations);
            self.reconcile(editor.projects(), orchestrator.method());
        }
        Ok(ballot)
    }

    /// `value` is the 1-based position shown to the user: `1..=len` maps to
    /// the index range `[0, len)`. Empty input is kept while typing.
    pub fn handle_position_change(&mut self, index: usize, value: &str) -> bool {
        let len = self.project_list.len();
        let Some(row) = self.project_list.get_mut(index) else {
            return false;
        };
        let value = value.trim();
        let accepted = value.is_empty()
            || value
                .parse::<usize>()
                .is_ok_and(|position| (1..=len).contains(&position));
        if accepted {
            row.position_input = value.to_string();
        }
        accepted
    }

    pub async fn handle_position_commit(
        &mut self,
        index: usize,
        editor: &mut BallotEditor,
        orchestrator: &DistributionOrchestrator,
    ) -> Result<Option<Ballot>, ReorderError> {
        self.input_focused = false;
        let len = self.project_list.len();
        let row = self
            .project_list
            .get_mut(index)
            .ok_or(ReorderError::IndexOutOfRange { index, len })?;
        let target = row
            .position_input
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|position| (1..=len).contains(position))
            .map(|position| position - 1);
        row.position_input = (index + 1).to_string();

        match target {
            Some(target) if target != index => {
                self.handle_project_move(index, target, editor, orchestrator)
                    .await
            }
            _ => Ok(None),
        }
    }

    pub fn handle_allocation_change(&mut self, index: usize, value: &str) {
        if let Some(row) = self.project_list.get_mut(index) {
            row.allocation_input = value.to_string();
        }
    }

    /// Unparsable input counts as 0.
    pub async fn handle_allocation_save(
        &mut self,
        index: usize,
        editor: &mut BallotEditor,
        orchestrator: &mut DistributionOrchestrator,
    ) -> bool {
        self.input_focused = false;
        let Some(row) = self.project_list.get_mut(index) else {
            return false;
        };
        let parsed = row
            .allocation_input
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| !value.is_nan())
            .unwrap_or(0.0);
        let allocation = round_allocation(clamp_allocation(parsed));

        if (allocation - row.project.allocation).abs() < ALLOCATION_EPSILON / 2.0 {
            row.allocation_input = format_allocation(row.project.allocation);
            return false;
        }

        let project_id = row.project.project_id.clone();
        if editor.set_allocation(&project_id, allocation).is_none() {
            return false;
        }
        orchestrator.on_allocation_edit(editor.total()).await;
        self.reconcile(editor.projects(), orchestrator.method());
        true
    }
}

fn compare_positions(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
