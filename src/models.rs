use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

// Summoner V3 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summoner {
    pub id: i64,
    #[serde(default)]
    pub account_id: i64,
    pub name: String,
    #[serde(default)]
    pub profile_icon_id: i32,
    #[serde(default)]
    pub summoner_level: i64,
    #[serde(default)]
    pub revision_date: i64,
}

/// Entry of a by-name or by-id summoner lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummonerIdentity {
    pub id: i64,
    pub name: String,
}

// Match list V3 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReference {
    pub game_id: i64,
    #[serde(default)]
    pub champion: i32,
    #[serde(default)]
    pub queue: i32,
    #[serde(default)]
    pub season: i32,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub lane: String,
    #[serde(default)]
    pub platform_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchList {
    #[serde(default)]
    pub matches: Vec<MatchReference>,
    #[serde(default)]
    pub total_games: i64,
    #[serde(default)]
    pub start_index: i64,
    #[serde(default)]
    pub end_index: i64,
}

// League V3 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueList {
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entries: Vec<LeagueItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueItem {
    /// Sent as a string by the league endpoints, occasionally as a number
    #[serde(deserialize_with = "string_or_number")]
    pub player_or_team_id: String,
    #[serde(default)]
    pub player_or_team_name: String,
    #[serde(default)]
    pub league_points: i32,
    #[serde(default)]
    pub rank: String,
    #[serde(default)]
    pub wins: i32,
    #[serde(default)]
    pub losses: i32,
}

impl LeagueItem {
    pub fn player_id(&self) -> Option<i64> {
        self.player_or_team_id.trim().parse().ok()
    }
}

// Static data V3 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Champion {
    pub id: i64,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
}

/// Champions keyed by their string key under `data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChampionList {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub data: HashMap<String, Champion>,
}

impl ChampionList {
    /// Champions sorted by id
    pub fn into_champions(self) -> Vec<Champion> {
        let mut champions: Vec<Champion> = self.data.into_values().collect();
        champions.sort_by_key(|c| c.id);
        champions
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summoner_camel_case() {
        let summoner: Summoner = serde_json::from_value(json!({
            "id": 42,
            "accountId": 1042,
            "name": "Faker",
            "profileIconId": 6,
            "summonerLevel": 30,
            "revisionDate": 1500000000000i64
        }))
        .unwrap();
        assert_eq!(summoner.account_id, 1042);
        assert_eq!(summoner.summoner_level, 30);
    }

    #[test]
    fn test_match_list_without_matches() {
        let list: MatchList = serde_json::from_value(json!({"totalGames": 0})).unwrap();
        assert!(list.matches.is_empty());
    }

    #[test]
    fn test_league_item_ids() {
        let league: LeagueList = serde_json::from_value(json!({
            "tier": "CHALLENGER",
            "entries": [
                {"playerOrTeamId": "123", "leaguePoints": 900},
                {"playerOrTeamId": 456},
                {"playerOrTeamId": "team-abc"}
            ]
        }))
        .unwrap();
        let ids: Vec<Option<i64>> = league.entries.iter().map(LeagueItem::player_id).collect();
        assert_eq!(ids, vec![Some(123), Some(456), None]);
    }

    #[test]
    fn test_champion_list_flattens_sorted() {
        let list: ChampionList = serde_json::from_value(json!({
            "type": "champion",
            "version": "7.10.1",
            "data": {
                "Annie": {"id": 1, "key": "Annie", "name": "Annie", "title": "the Dark Child"},
                "Aatrox": {"id": 266, "key": "Aatrox", "name": "Aatrox"}
            }
        }))
        .unwrap();
        assert_eq!(list.kind, "champion");
        let names: Vec<String> = list.into_champions().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Annie", "Aatrox"]);
    }
}
