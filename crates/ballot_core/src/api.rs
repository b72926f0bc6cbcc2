use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{DistributionMethod, ImpactScore, ProjectId, WalletAddress},
    error::ApiError,
    protocol::{
        Ballot, BudgetUpdate, CategoryAllocationUpdate, ProjectAllocationUpdate,
        ProjectPositionUpdate, SubmitBallotRequest,
    },
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{status_of, ApiRequestError};

/// Field-level commands against the remote ballot. Every mutation is one
/// discrete call; there is no whole-document write.
#[async_trait]
pub trait BallotApi: Send + Sync {
    async fn fetch_ballot(&self, address: &WalletAddress) -> Result<Ballot>;
    async fn update_budget(&self, address: &WalletAddress, budget: u64) -> Result<()>;
    async fn update_category_allocation(
        &self,
        address: &WalletAddress,
        update: CategoryAllocationUpdate,
    ) -> Result<()>;
    async fn update_project_allocation(
        &self,
        address: &WalletAddress,
        project_id: &ProjectId,
        allocation: f64,
    ) -> Result<()>;
    async fn update_project_position(
        &self,
        address: &WalletAddress,
        project_id: &ProjectId,
        position: u32,
    ) -> Result<()>;
    async fn update_project_impact(
        &self,
        address: &WalletAddress,
        project_id: &ProjectId,
        impact: ImpactScore,
    ) -> Result<()>;
    /// Stores the method; for server-computed methods the server also
    /// redistributes allocations. Returns the resulting ballot.
    async fn update_distribution_method(
        &self,
        address: &WalletAddress,
        method: DistributionMethod,
    ) -> Result<Ballot>;
    async fn submit_ballot(
        &self,
        address: &WalletAddress,
        request: SubmitBallotRequest,
    ) -> Result<Ballot>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Produces a fresh access token, or `None` for unauthenticated access.
    async fn access_token(&self) -> Result<Option<String>>;
}

pub struct NoAuth;

#[async_trait]
impl TokenProvider for NoAuth {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BallotResponse {
    One(Box<Ballot>),
    Many(Vec<Ballot>),
}

pub struct HttpBallotApi {
    http: Client,
    base_url: Url,
    round_id: u32,
    tokens: Arc<dyn TokenProvider>,
    token: RwLock<Option<String>>,
}

impl HttpBallotApi {
    pub fn new(base_url: &str, round_id: u32, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(ApiRequestError::Url)?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("ballot api url must be hierarchical: {base_url}"));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            round_id,
            tokens,
            token: RwLock::new(None),
        })
    }

    fn ballot_url(&self, address: &WalletAddress, rest: &[&str]) -> Result<Url> {
        let round = self.round_id.to_string();
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("ballot api url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["retrofunding", "rounds", round.as_str(), "ballots", address.as_str()])
            .extend(rest);
        Ok(url)
    }

    async fn current_token(&self) -> Result<Option<String>> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(Some(token));
        }
        let fresh = self
            .tokens
            .access_token()
            .await
            .context("failed to obtain ballot api token")?;
        *self.token.write().await = fresh.clone();
        Ok(fresh)
    }

    async fn send_once<B: Serialize + Sync>(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&B>,
    ) -> Result<Response> {
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(token) = self.current_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await.map_err(ApiRequestError::Transport)?)
    }

    /// Sends a request; a 401 clears the cached token and retries exactly once.
    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Response> {
        debug!("ballot api: {method} {url}");
        let mut response = self.send_once(&method, &url, body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("ballot api: token rejected, refreshing and retrying {method} {url}");
            self.token.write().await.take();
            response = self.send_once(&method, &url, body).await?;
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiRequestError::Unauthorized(text).into());
        }
        Err(ApiRequestError::Status {
            status: status.as_u16(),
            error: ApiError::from_response(status.as_u16(), &text),
        }
        .into())
    }

    async fn post_json<B: Serialize + Sync>(&self, url: Url, body: &B) -> Result<()> {
        self.send(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    async fn post_for_ballot<B: Serialize + Sync>(
        &self,
        url: Url,
        body: Option<&B>,
        address: &WalletAddress,
    ) -> Result<Ballot> {
        let response: BallotResponse = self
            .send(Method::POST, url, body)
            .await?
            .json()
            .await
            .context("malformed ballot in api response")?;
        Ok(first_ballot(response, address))
    }
}

fn first_ballot(response: BallotResponse, address: &WalletAddress) -> Ballot {
    match response {
        BallotResponse::One(ballot) => *ballot,
        BallotResponse::Many(ballots) => ballots
            .into_iter()
            .next()
            .unwrap_or_else(|| Ballot::empty(address.clone())),
    }
}

#[async_trait]
impl BallotApi for HttpBallotApi {
    async fn fetch_ballot(&self, address: &WalletAddress) -> Result<Ballot> {
        let url = self.ballot_url(address, &[])?;
        let response = match self.send::<()>(Method::GET, url, None).await {
            Ok(response) => response,
            // The server creates a ballot on the first write; until then there is none.
            Err(err) if status_of(&err) == Some(404) => {
                info!("ballot api: no ballot yet for {address}");
                return Ok(Ballot::empty(address.clone()));
            }
            Err(err) => return Err(err.context(format!("failed to fetch ballot for {address}"))),
        };
        let body: BallotResponse = response
            .json()
            .await
            .context("malformed ballot in api response")?;
        Ok(first_ballot(body, address))
    }

    async fn update_budget(&self, address: &WalletAddress, budget: u64) -> Result<()> {
        let url = self.ballot_url(address, &["budget"])?;
        self.post_json(url, &BudgetUpdate { budget })
            .await
            .context("failed to save budget")
    }

    async fn update_category_allocation(
        &self,
        address: &WalletAddress,
        update: CategoryAllocationUpdate,
    ) -> Result<()> {
        let url = self.ballot_url(address, &["categoryAllocation"])?;
        let category = update.category_slug.clone();
        self.post_json(url, &update)
            .await
            .with_context(|| format!("failed to save allocation for category {category}"))
    }

    async fn update_project_allocation(
        &self,
        address: &WalletAddress,
        project_id: &ProjectId,
        allocation: f64,
    ) -> Result<()> {
        let url = self.ballot_url(address, &["projects", project_id.as_str(), "allocation"])?;
        self.post_json(url, &ProjectAllocationUpdate { allocation })
            .await
            .with_context(|| format!("failed to save allocation for project {project_id}"))
    }

    async fn update_project_position(
        &self,
        address: &WalletAddress,
        project_id: &ProjectId,
        position: u32,
    ) -> Result<()> {
        let url = self.ballot_url(address, &["projects", project_id.as_str(), "position"])?;
        self.post_json(url, &ProjectPositionUpdate { position })
            .await
            .with_context(|| format!("failed to save position for project {project_id}"))
    }

    async fn update_project_impact(
        &self,
        address: &WalletAddress,
        project_id: &ProjectId,
        impact: ImpactScore,
    ) -> Result<()> {
        if !impact.is_persisted() {
            return Err(anyhow!("impact score {} is local-only", impact.value()));
        }
        let score = impact.value().to_string();
        let url = self.ballot_url(
            address,
            &["projects", project_id.as_str(), "impact", score.as_str()],
        )?;
        self.send::<()>(Method::POST, url, None)
            .await
            .with_context(|| format!("failed to save impact for project {project_id}"))?;
        Ok(())
    }

    async fn update_distribution_method(
        &self,
        address: &WalletAddress,
        method: DistributionMethod,
    ) -> Result<Ballot> {
        let url = self.ballot_url(address, &["distributionMethod", method.as_str()])?;
        self.post_for_ballot::<()>(url, None, address)
            .await
            .with_context(|| format!("failed to apply distribution method {method}"))
    }

    async fn submit_ballot(
        &self,
        address: &WalletAddress,
        request: SubmitBallotRequest,
    ) -> Result<Ballot> {
        let url = self.ballot_url(address, &["submit"])?;
        let ballot = self
            .post_for_ballot(url, Some(&request), address)
            .await
            .context("failed to submit ballot")?;
        info!("ballot api: submitted ballot for {address}");
        Ok(ballot)
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
