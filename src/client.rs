//! Typed Riot API client.

use crate::chunk::{batches, SUMMONER_NAMES_PER_CALL};
use crate::config::Config;
use crate::endpoint::{Endpoint, Region, Routes};
use crate::error::Result;
use crate::executor::Executor;
use crate::gate::{build_gate, ThrottleGate};
use crate::metrics::MetricsCollector;
use crate::models::{Champion, ChampionList, LeagueList, MatchList, MatchReference, Summoner, SummonerIdentity};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Ranked solo queue
pub const RANKED_SOLO_QUEUE_ID: u32 = 420;
pub const RANKED_SOLO_QUEUE: &str = "RANKED_SOLO_5x5";

/// Client context: HTTP client, credential, gate and routes, validated once
/// at construction.
pub struct RiotClient {
    executor: Executor,
    routes: Routes,
    shutdown: CancellationToken,
}

impl RiotClient {
    /// Build a client with the gate selected by `config`
    pub fn new(config: &Config) -> Result<Self> {
        let gate = build_gate(config)?;
        Self::with_gate(config, gate)
    }

    /// Build a client around an existing gate, e.g. one shared by several
    /// clients in the same process
    pub fn with_gate(config: &Config, gate: Arc<dyn ThrottleGate>) -> Result<Self> {
        let routes = Routes::from_config(config)?;
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("riot-gate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let executor = Executor::new(http, config.api_key.clone(), gate)?;

        tracing::debug!(
            target: "riot_gate::client",
            region = %routes.region(),
            "Riot client ready"
        );

        Ok(Self {
            executor,
            routes,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&Config::from_env()?)
    }

    pub fn region(&self) -> Region {
        self.routes.region()
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn metrics(&self) -> &MetricsCollector {
        self.executor.metrics()
    }

    /// Token cancelled by [`RiotClient::shutdown`]; every call made through
    /// this client observes it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Raw JSON tree for a path under `/lol`
    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        let endpoint = self.routes.describe(&self.routes.api(path).url);
        self.executor.execute(&endpoint, &self.shutdown).await
    }

    pub async fn summoner(&self, summoner_id: i64) -> Result<Option<Summoner>> {
        let endpoint = self
            .routes
            .api(&format!("/summoner/v3/summoners/{}", summoner_id));
        self.executor.execute_as(&endpoint, &self.shutdown).await
    }

    /// Ranked solo queue matches of an account since `begin_time` (epoch ms)
    pub async fn match_list(&self, account_id: i64, begin_time: i64) -> Result<Vec<MatchReference>> {
        let endpoint = self.routes.api(&format!(
            "/match/v3/matchlists/by-account/{}?queue={}&beginTime={}",
            account_id, RANKED_SOLO_QUEUE_ID, begin_time
        ));
        let list: Option<MatchList> = self.executor.execute_as(&endpoint, &self.shutdown).await?;
        Ok(list.map(|l| l.matches).unwrap_or_default())
    }

    pub async fn challenger_ids(&self) -> Result<Vec<i64>> {
        self.league_ids("challengerleagues").await
    }

    pub async fn master_ids(&self) -> Result<Vec<i64>> {
        self.league_ids("masterleagues").await
    }

    async fn league_ids(&self, league: &str) -> Result<Vec<i64>> {
        let endpoint = self.routes.api(&format!(
            "/league/v3/{}/by-queue/{}",
            league, RANKED_SOLO_QUEUE
        ));
        let Some(list) = self.executor.execute_as::<LeagueList>(&endpoint, &self.shutdown).await? else {
            return Ok(Vec::new());
        };

        Ok(list
            .entries
            .iter()
            .filter_map(|entry| {
                let id = entry.player_id();
                if id.is_none() {
                    tracing::warn!(
                        target: "riot_gate::client",
                        player_or_team_id = %entry.player_or_team_id,
                        "Skipping league entry without a numeric id"
                    );
                }
                id
            })
            .collect())
    }

    /// Featured games as the JSON text the server sent
    pub async fn featured_games(&self) -> Result<Option<String>> {
        let endpoint = self.routes.api("/spectator/v3/featured-games");
        self.executor.execute_raw(&endpoint, &self.shutdown).await
    }

    /// Summoner ids keyed by name, looked up in batches of 40 names
    pub async fn summoner_ids_by_names<S: AsRef<str>>(&self, names: &[S]) -> Result<HashMap<String, i64>> {
        let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        let mut ids = HashMap::new();

        for batch in batches(&names, SUMMONER_NAMES_PER_CALL) {
            let endpoint = with_segment(self.routes.api("/v1.4/summoner/by-name"), &batch);
            let found: Option<HashMap<String, SummonerIdentity>> =
                self.executor.execute_as(&endpoint, &self.shutdown).await?;
            for summoner in found.into_iter().flat_map(HashMap::into_values) {
                ids.insert(summoner.name, summoner.id);
            }
        }

        Ok(ids)
    }

    /// Summoner names keyed by id, looked up in batches of 40 ids
    pub async fn summoner_names_by_ids(&self, summoner_ids: &[i64]) -> Result<HashMap<i64, String>> {
        let mut names = HashMap::new();

        for batch in batches(summoner_ids, SUMMONER_NAMES_PER_CALL) {
            let endpoint = with_segment(self.routes.api("/v1.4/summoner"), &batch);
            let found: Option<HashMap<String, SummonerIdentity>> =
                self.executor.execute_as(&endpoint, &self.shutdown).await?;
            for summoner in found.into_iter().flat_map(HashMap::into_values) {
                names.insert(summoner.id, summoner.name);
            }
        }

        Ok(names)
    }

    /// All champions from static data, sorted by id. Not throttled.
    pub async fn champions(&self) -> Result<Vec<Champion>> {
        let endpoint = self.routes.static_data("/champions");
        let list: Option<ChampionList> = self.executor.execute_as(&endpoint, &self.shutdown).await?;
        Ok(list.map(ChampionList::into_champions).unwrap_or_default())
    }

    /// Cancel pending calls and release shared gate resources
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.executor.gate().shutdown().await;
        tracing::info!(target: "riot_gate::client", "Riot client shut down");
    }
}

/// Append a percent-encoded path segment to an endpoint URL
fn with_segment(endpoint: Endpoint, segment: &str) -> Endpoint {
    let Ok(mut url) = reqwest::Url::parse(&endpoint.url) else {
        return Endpoint {
            url: format!("{}/{}", endpoint.url, segment),
            ..endpoint
        };
    };

    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(segment);
    }

    Endpoint {
        url: url.to_string(),
        ..endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointCategory;

    #[test]
    fn test_with_segment_encodes_names() {
        let endpoint = Endpoint::new(
            "https://euw1.api.riotgames.com/lol/v1.4/summoner/by-name",
            "euw1",
            EndpointCategory::RateLimited,
        );
        let endpoint = with_segment(endpoint, "Hide on bush,Faker");
        assert_eq!(
            endpoint.url,
            "https://euw1.api.riotgames.com/lol/v1.4/summoner/by-name/Hide%20on%20bush,Faker"
        );
        assert_eq!(endpoint.scope_key, "euw1");
    }

    #[test]
    fn test_missing_key_fails_construction() {
        let mut values = HashMap::new();
        values.insert("RIOT_API_KEY".to_string(), " ".to_string());
        assert!(Config::from_map(&values).is_err());
    }
}
