//! In-memory `BallotApi` that records every call and mimics the server's
//! bookkeeping closely enough for editor and session tests.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{DistributionMethod, ImpactScore, ProjectId, WalletAddress},
    protocol::{
        Ballot, CategoryAllocation, CategoryAllocationUpdate, ProjectAllocation,
        SubmitBallotRequest,
    },
};

use crate::api::BallotApi;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    FetchBallot,
    Budget(u64),
    CategoryAllocation {
        category: String,
        allocation: f64,
        locked: bool,
    },
    ProjectAllocation {
        project: String,
        allocation: f64,
    },
    ProjectPosition {
        project: String,
        position: u32,
    },
    ProjectImpact {
        project: String,
        score: u16,
    },
    DistributionMethod(DistributionMethod),
    Submit {
        signature: String,
    },
}

pub struct RecordingApi {
    calls: Mutex<Vec<ApiCall>>,
    ballot: Mutex<Ballot>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingApi {
    pub fn new(ballot: Ballot) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            ballot: Mutex::new(ballot),
            fail_with: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().expect("calls").clear();
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot.lock().expect("ballot").clone()
    }

    pub fn fail_with(&self, message: Option<&str>) {
        *self.fail_with.lock().expect("fail_with") = message.map(str::to_string);
    }

    fn record(&self, call: ApiCall) -> Result<()> {
        if let Some(message) = self.fail_with.lock().expect("fail_with").clone() {
            return Err(anyhow!(message));
        }
        self.calls.lock().expect("calls").push(call);
        Ok(())
    }

    fn with_project(&self, project_id: &ProjectId, update: impl FnOnce(&mut ProjectAllocation)) {
        let mut ballot = self.ballot.lock().expect("ballot");
        if let Some(project) = ballot
            .project_allocations
            .iter_mut()
            .find(|project| &project.project_id == project_id)
        {
            update(project);
        }
    }
}

/// Weights `n, n-1, .., 1` by position, the way the server ranks projects.
fn redistribute_by_rank(ballot: &mut Ballot) {
    let mut ranked: Vec<usize> = (0..ballot.project_allocations.len())
        .filter(|index| !ballot.project_allocations[*index].is_conflict())
        .collect();
    ranked.sort_by_key(|index| ballot.project_allocations[*index].position.unwrap_or(u32::MAX));
    let n = ranked.len() as f64;
    let weight_sum = n * (n + 1.0) / 2.0;
    for (rank, index) in ranked.into_iter().enumerate() {
        let weight = n - rank as f64;
        ballot.project_allocations[index].allocation = (weight / weight_sum * 10_000.0).round() / 100.0;
    }
}

#[async_trait]
impl BallotApi for RecordingApi {
    async fn fetch_ballot(&self, _address: &WalletAddress) -> Result<Ballot> {
        self.record(ApiCall::FetchBallot)?;
        Ok(self.ballot())
    }

    async fn update_budget(&self, _address: &WalletAddress, budget: u64) -> Result<()> {
        self.record(ApiCall::Budget(budget))?;
        self.ballot.lock().expect("ballot").budget = Some(budget);
        Ok(())
    }

    async fn update_category_allocation(
        &self,
        _address: &WalletAddress,
        update: CategoryAllocationUpdate,
    ) -> Result<()> {
        self.record(ApiCall::CategoryAllocation {
            category: update.category_slug.0.clone(),
            allocation: update.allocation,
            locked: update.locked,
        })?;
        let mut ballot = self.ballot.lock().expect("ballot");
        let allocations = &mut ballot.category_allocations;
        match allocations
            .iter_mut()
            .find(|allocation| allocation.category_slug == update.category_slug)
        {
            Some(existing) => {
                existing.allocation = update.allocation;
                existing.locked = update.locked;
            }
            None => allocations.push(CategoryAllocation {
                category_slug: update.category_slug,
                allocation: update.allocation,
                locked: update.locked,
            }),
        }
        Ok(())
    }

    async fn update_project_allocation(
        &self,
        _address: &WalletAddress,
        project_id: &ProjectId,
        allocation: f64,
    ) -> Result<()> {
        self.record(ApiCall::ProjectAllocation {
            project: project_id.0.clone(),
            allocation,
        })?;
        self.with_project(project_id, |project| project.allocation = allocation);
        Ok(())
    }

    async fn update_project_position(
        &self,
        _address: &WalletAddress,
        project_id: &ProjectId,
        position: u32,
    ) -> Result<()> {
        self.record(ApiCall::ProjectPosition {
            project: project_id.0.clone(),
            position,
        })?;
        let mut ballot = self.ballot.lock().expect("ballot");
        let mut order: Vec<ProjectId> = {
            let mut ranked: Vec<&ProjectAllocation> = ballot
                .project_allocations
                .iter()
                .filter(|project| !project.is_conflict())
                .collect();
            ranked.sort_by_key(|project| project.position.unwrap_or(u32::MAX));
            ranked
                .into_iter()
                .map(|project| project.project_id.clone())
                .collect()
        };
        order.retain(|id| id != project_id);
        let at = (position as usize).min(order.len());
        order.insert(at, project_id.clone());
        for project in ballot.project_allocations.iter_mut() {
            if let Some(rank) = order.iter().position(|id| id == &project.project_id) {
                project.position = Some(rank as u32);
            }
        }
        Ok(())
    }

    async fn update_project_impact(
        &self,
        _address: &WalletAddress,
        project_id: &ProjectId,
        impact: ImpactScore,
    ) -> Result<()> {
        if !impact.is_persisted() {
            return Err(anyhow!("impact score {} is local-only", impact.value()));
        }
        self.record(ApiCall::ProjectImpact {
            project: project_id.0.clone(),
            score: impact.value(),
        })?;
        self.with_project(project_id, |project| project.impact = Some(impact));
        self.ballot
            .lock()
            .expect("ballot")
            .projects_to_be_evaluated
            .retain(|id| id != project_id);
        Ok(())
    }

    async fn update_distribution_method(
        &self,
        _address: &WalletAddress,
        method: DistributionMethod,
    ) -> Result<Ballot> {
        self.record(ApiCall::DistributionMethod(method))?;
        let mut ballot = self.ballot.lock().expect("ballot");
        ballot.distribution_method = Some(method);
        if method.is_server_computed() {
            redistribute_by_rank(&mut ballot);
        }
        Ok(ballot.clone())
    }

    async fn submit_ballot(
        &self,
        _address: &WalletAddress,
        request: SubmitBallotRequest,
    ) -> Result<Ballot> {
        self.record(ApiCall::Submit {
            signature: request.signature,
        })?;
        let mut ballot = self.ballot.lock().expect("ballot");
        ballot.status = shared::domain::BallotStatus::Submitted;
        ballot.submitted_at = Some("2024-10-01T12:00:00Z".parse().expect("timestamp"));
        Ok(ballot.clone())
    }
}

pub fn project(id: &str, name: &str, position: Option<u32>, allocation: f64) -> ProjectAllocation {
    let mut project = ProjectAllocation::new(id, name);
    project.position = position;
    project.allocation = allocation;
    project
}

pub fn scored(mut project: ProjectAllocation, impact: ImpactScore) -> ProjectAllocation {
    project.impact = Some(impact);
    project
}

pub fn sample_ballot(projects: Vec<ProjectAllocation>) -> Ballot {
    let mut ballot = Ballot::empty(WalletAddress::new("0xvoter"));
    ballot.total_projects = projects.len() as u32;
    ballot.projects_to_be_evaluated = projects
        .iter()
        .filter(|project| project.impact.is_none())
        .map(|project| project.project_id.clone())
        .collect();
    ballot.project_allocations = projects;
    ballot
}
