use crate::normalize::{RowShape, normalize_rows};
use crate::sihf::{self, Alias, Candidates, FacetsResponse, GameDetailResponse, StatsRequest};
use crate::{AddressKey, GoalieRecord, MappingEntry, PlayerRecord, RosterEntry, StatLine, StatsKind};
use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::{REFERER, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

pub const SIHF_STATS_BASE: &str = "https://data.sihf.ch/Statistic/api/cms";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("Parse error: {message} (body starts with {snippet:?})")]
    Parse { message: String, snippet: String },
    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    FetchExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<ApiError>,
    },
    #[error("No mapping found for {0}")]
    NoMappingFound(AddressKey),
    #[error("Response for alias '{alias}' has no '{field}' table")]
    Shape { alias: &'static str, field: &'static str },
    #[error("Mapping store {path}: {message}")]
    Store { path: String, message: String },
}

impl ApiError {
    /// Failures that must stop the whole batch rather than a single unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Store { .. })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    pub user_agent: String,
    pub referer: String,
}

impl Default for RequestHeaders {
    fn default() -> Self {
        // The service rejects requests that do not look like they come from its own site.
        Self {
            user_agent: "Mozilla/5.0 (compatible; rinkstats/0.1)".into(),
            referer: "https://www.sihf.ch/".into(),
        }
    }
}

/// "Fetch text from URL with headers".
pub trait Transport: Send + Sync {
    fn get_text(
        &self,
        url: &str,
        headers: &RequestHeaders,
    ) -> impl Future<Output = ApiResult<String>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: Client::builder().build().unwrap_or_default(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpTransport {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Transport for HttpTransport {
    async fn get_text(&self, url: &str, headers: &RequestHeaders) -> ApiResult<String> {
        let network = |e: reqwest::Error| ApiError::Network {
            url: url.to_owned(),
            message: e.to_string(),
        };
        self.client
            .get(url)
            .header(USER_AGENT, headers.user_agent.as_str())
            .header(REFERER, headers.referer.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(network)?
            .error_for_status()
            .map_err(network)?
            .text()
            .await
            .map_err(network)
    }
}

// ---------------------------------------------------------------------------
// Retrying fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` is followed by a pause of `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(1000) }
    }
}

fn with_cache_buster(url: &str, token: u64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}v={token}")
}

/// SIHF statistics client. Sequential by construction: every call awaits its
/// single outstanding request.
#[derive(Debug)]
pub struct SihfApi<T = HttpTransport> {
    transport: T,
    base_url: String,
    headers: RequestHeaders,
    retry: RetryPolicy,
    last_token: AtomicU64,
}

impl Default for SihfApi<HttpTransport> {
    fn default() -> Self {
        Self::with_transport(HttpTransport::default())
    }
}

impl SihfApi<HttpTransport> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Transport> SihfApi<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            base_url: SIHF_STATS_BASE.to_owned(),
            headers: RequestHeaders::default(),
            retry: RetryPolicy::default(),
            last_token: AtomicU64::new(0),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Strictly increasing per client, even within one millisecond.
    fn next_cache_token(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let previous = self
            .last_token
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| Some(now.max(prev + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }

    /// Run `decode` on the body of up to `policy.max_attempts` requests,
    /// returning the first success. Transport and decode failures are
    /// retried alike.
    async fn fetch_with<V>(
        &self,
        url: &str,
        policy: RetryPolicy,
        decode: impl Fn(String) -> ApiResult<V>,
    ) -> ApiResult<V> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let full_url = with_cache_buster(url, self.next_cache_token());
            let result = self
                .transport
                .get_text(&full_url, &self.headers)
                .await
                .and_then(&decode);

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => {
                    return Err(ApiError::FetchExhausted {
                        url: url.to_owned(),
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!("attempt {attempt}/{attempts} for {url} failed: {e}");
                    tokio::time::sleep(policy.base_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Raw body, retried on transport failures only.
    pub async fn fetch_text(&self, url: &str, policy: RetryPolicy) -> ApiResult<String> {
        self.fetch_with(url, policy, Ok).await
    }

    /// Parsed body; a body that does not parse counts as a failed attempt.
    pub async fn fetch_json(&self, url: &str, policy: RetryPolicy) -> ApiResult<Value> {
        self.fetch_with(url, policy, |text| crate::jsonp::parse(&text)).await
    }

    async fn get(&self, request: &StatsRequest) -> ApiResult<Value> {
        let url = request.url(&self.base_url);
        debug!("fetching {} ({})", request.alias, url);
        self.fetch_json(&url, self.retry).await
    }

    async fn get_rows(&self, request: &StatsRequest) -> ApiResult<Vec<Value>> {
        sihf::table_rows(self.get(request).await?, request.alias)
    }

    /// Statistics table of one resolved team/season/phase.
    pub async fn fetch_records<R: StatLine>(
        &self,
        key: &AddressKey,
        entry: &MappingEntry,
    ) -> ApiResult<Vec<R>> {
        let alias = match R::KIND {
            StatsKind::Players => Alias::Player,
            StatsKind::Goaltenders => Alias::Goalkeeper,
        };
        let request = StatsRequest::stats(alias, key, entry);
        let table = sihf::table(self.get(&request).await?, alias)?;
        let shape = RowShape::for_layout(R::KIND, table.layout);
        Ok(normalize_rows(&table.rows, &shape))
    }

    pub async fn fetch_players(
        &self,
        key: &AddressKey,
        entry: &MappingEntry,
    ) -> ApiResult<Vec<PlayerRecord>> {
        self.fetch_records(key, entry).await
    }

    pub async fn fetch_goalies(
        &self,
        key: &AddressKey,
        entry: &MappingEntry,
    ) -> ApiResult<Vec<GoalieRecord>> {
        self.fetch_records(key, entry).await
    }

    /// Region and phase facets valid for a team/season.
    pub async fn fetch_candidates(&self, key: &AddressKey) -> ApiResult<Candidates> {
        let body = self.get(&StatsRequest::facets(key)).await?;
        let facets: FacetsResponse = decode(&body, "filters")?;
        Ok(facets.candidates())
    }

    /// Whether a region/phase combination holds at least one row.
    pub async fn probe(&self, key: &AddressKey, region: &str, group: &str) -> ApiResult<bool> {
        let rows = self.get_rows(&StatsRequest::probe(key, region, group)).await?;
        Ok(!rows.is_empty())
    }

    pub async fn fetch_game_ids(&self, key: &AddressKey, limit: usize) -> ApiResult<Vec<String>> {
        let take = u32::try_from(limit.max(50)).unwrap_or(u32::MAX);
        let rows = self.get_rows(&StatsRequest::results(key, take)).await?;
        let mut ids = sihf::game_ids(&rows);
        ids.truncate(limit);
        Ok(ids)
    }

    pub async fn fetch_roster(&self, game_id: &str) -> ApiResult<Vec<RosterEntry>> {
        let body = self.get(&StatsRequest::game_detail(game_id)).await?;
        let detail: GameDetailResponse = decode(&body, &format!("game detail {game_id}"))?;
        Ok(detail.players.into_iter().map(RosterEntry::from).collect())
    }

    /// Rosters of the first `games` games of a team's season, concatenated
    /// in game order.
    pub async fn fetch_rosters(&self, key: &AddressKey, games: usize) -> ApiResult<Vec<RosterEntry>> {
        let mut roster = Vec::new();
        for game_id in self.fetch_game_ids(key, games).await? {
            roster.extend(self.fetch_roster(&game_id).await?);
        }
        Ok(roster)
    }

    /// Standings table as delivered, for diagnostics.
    pub async fn fetch_standings(&self, season: u16, league_id: u32) -> ApiResult<Value> {
        self.get(&StatsRequest::standings(season, league_id)).await
    }
}

/// Typed view of an already parsed body.
fn decode<D: DeserializeOwned>(body: &Value, what: &str) -> ApiResult<D> {
    D::deserialize(body).map_err(|e| ApiError::Parse {
        message: format!("invalid {what}: {e}"),
        snippet: crate::jsonp::snippet(&body.to_string()),
    })
}
