/// SIHF statistics API raw wire types and query construction.
/// Endpoint family: https://data.sihf.ch/Statistic/api/cms/{cache300,gameoverview}
use crate::client::{ApiError, ApiResult};
use crate::normalize::{coerce_id, coerce_rate};
use crate::{AddressKey, Enrichment, MappingEntry, RosterEntry};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

pub const CALLBACK: &str = "externalStatisticsCallback";
pub const LANGUAGE: &str = "de";

/// League facet accepted by the statistics tables.
const LEAGUE_SEARCH: &str = "2015-2099/3,10,18,19,33,35,36,38,37,39,40,41,43,101,44,45,46,104";
const TABLE_TAKE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alias {
    Player,
    Goalkeeper,
    Standings,
    Results,
    GameDetail,
}

impl Alias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alias::Player => "player",
            Alias::Goalkeeper => "goalkeeper",
            Alias::Standings => "standings",
            Alias::Results => "results",
            Alias::GameDetail => "gameDetail",
        }
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One upstream query. Values are inserted verbatim: the service expects
/// raw `/` and `,` separators inside `searchQuery` and `filterQuery`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsRequest {
    pub endpoint: &'static str,
    pub alias: Alias,
    pub search_query: String,
    pub filter_query: Option<String>,
    pub order_by: Option<&'static str>,
    pub order_by_descending: Option<bool>,
    pub take: Option<u32>,
    pub skip: Option<i32>,
    pub filter_by: Option<&'static str>,
}

impl StatsRequest {
    fn table(alias: Alias, filter_query: String) -> Self {
        let (order_by, descending, filter_by) = match alias {
            Alias::Goalkeeper => (
                "goalsAgainstAverage",
                false,
                "Season,League,Region,Phase,Team,Licence",
            ),
            _ => ("points", true, "Season,League,Region,Phase,Team,Position,Licence"),
        };
        Self {
            endpoint: "cache300",
            alias,
            search_query: format!("1/{LEAGUE_SEARCH}"),
            filter_query: Some(filter_query),
            order_by: Some(order_by),
            order_by_descending: Some(descending),
            take: Some(TABLE_TAKE),
            skip: Some(-1),
            filter_by: Some(filter_by),
        }
    }

    /// Full statistics table for one resolved team/season/phase.
    pub fn stats(alias: Alias, key: &AddressKey, entry: &MappingEntry) -> Self {
        Self::table(
            alias,
            format!(
                "{}/{}/{}/{}/{}",
                key.season, entry.league_id, entry.region, entry.group, entry.team_id
            ),
        )
    }

    /// Wildcard query whose `filters` list the valid region and phase facets.
    pub fn facets(key: &AddressKey) -> Self {
        Self {
            take: Some(1),
            ..Self::table(
                Alias::Player,
                format!("{}/{}/all/all/{}", key.season, key.league_id, key.team_id),
            )
        }
    }

    /// Minimal one-row query used to test a region/phase combination.
    pub fn probe(key: &AddressKey, region: &str, group: &str) -> Self {
        Self {
            take: Some(1),
            ..Self::table(
                Alias::Player,
                format!(
                    "{}/{}/{region}/{group}/{}",
                    key.season, key.league_id, key.team_id
                ),
            )
        }
    }

    /// Game list of a team for the season window (Aug 1 – Jul 31).
    pub fn results(key: &AddressKey, take: u32) -> Self {
        let from = format!("{}-08-01", key.season - 1);
        let to = format!("{}-07-31", key.season);
        Self {
            endpoint: "cache300",
            alias: Alias::Results,
            search_query: format!("1,10/{LEAGUE_SEARCH}"),
            filter_query: Some(format!(
                "{}/{}/all/all/{from}-{to}/all/{}/all",
                key.season, key.league_id, key.team_id
            )),
            order_by: Some("date"),
            order_by_descending: Some(false),
            take: Some(take),
            skip: Some(-1),
            filter_by: Some("season,league,region,phase,date,deferredState,team1,team2"),
        }
    }

    pub fn game_detail(game_id: &str) -> Self {
        Self {
            endpoint: "gameoverview",
            alias: Alias::GameDetail,
            search_query: game_id.to_owned(),
            filter_query: None,
            order_by: None,
            order_by_descending: None,
            take: None,
            skip: None,
            filter_by: None,
        }
    }

    pub fn standings(season: u16, league_id: u32) -> Self {
        Self {
            endpoint: "cache300",
            alias: Alias::Standings,
            search_query: format!("{season}/{league_id}/"),
            filter_query: Some(format!("{season}/{league_id}/")),
            order_by: None,
            order_by_descending: None,
            take: None,
            skip: None,
            filter_by: None,
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        let mut url = format!(
            "{}/{}?alias={}&searchQuery={}",
            base_url.trim_end_matches('/'),
            self.endpoint,
            self.alias,
            self.search_query
        );
        if let Some(filter) = &self.filter_query {
            url.push_str(&format!("&filterQuery={filter}"));
        }
        if let Some(order_by) = self.order_by {
            url.push_str(&format!("&orderBy={order_by}"));
        }
        if let Some(descending) = self.order_by_descending {
            url.push_str(&format!("&orderByDescending={descending}"));
        }
        if let Some(take) = self.take {
            url.push_str(&format!("&take={take}"));
        }
        if let Some(filter_by) = self.filter_by {
            url.push_str(&format!("&filterBy={filter_by}"));
        }
        url.push_str(&format!("&callback={CALLBACK}"));
        if let Some(skip) = self.skip {
            url.push_str(&format!("&skip={skip}"));
        }
        url.push_str(&format!("&language={LANGUAGE}"));
        url
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// How the rows of a table address their fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Arrays indexed by column.
    Positional,
    /// Objects addressed by field name.
    Keyed,
}

/// Tabular part of a statistics response.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub rows: Vec<Value>,
    pub layout: Layout,
}

/// Current endpoints wrap positional rows in `data` (or `rows`); the older
/// export answers with a bare array of keyed objects. The envelope decides
/// the layout for the whole table.
pub fn table(body: Value, alias: Alias) -> ApiResult<Table> {
    match body {
        Value::Array(rows) => Ok(Table { rows, layout: Layout::Keyed }),
        Value::Object(mut map) => {
            for field in ["data", "rows"] {
                if let Some(Value::Array(rows)) = map.remove(field) {
                    return Ok(Table { rows, layout: Layout::Positional });
                }
            }
            Err(ApiError::Shape { alias: alias.as_str(), field: "data" })
        }
        _ => Err(ApiError::Shape { alias: alias.as_str(), field: "data" }),
    }
}

pub fn table_rows(body: Value, alias: Alias) -> ApiResult<Vec<Value>> {
    table(body, alias).map(|t| t.rows)
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct FacetsResponse {
    #[serde(default)]
    pub filters: Vec<Filter>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(from = "RawFilter")]
pub struct Filter {
    pub alias: String,
    pub entries: Vec<FilterEntry>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "RawFilterEntry")]
pub struct FilterEntry {
    pub alias: String,
    pub text: String,
}

// Facets name their keys either way, sometimes both at once; the first
// key present wins.
#[derive(Deserialize)]
struct RawFilter {
    alias: Option<String>,
    name: Option<String>,
    #[serde(default)]
    entries: Vec<FilterEntry>,
}

impl From<RawFilter> for Filter {
    fn from(raw: RawFilter) -> Self {
        Self { alias: raw.alias.or(raw.name).unwrap_or_default(), entries: raw.entries }
    }
}

#[derive(Deserialize)]
struct RawFilterEntry {
    alias: Option<Value>,
    id: Option<Value>,
    text: Option<String>,
    name: Option<String>,
}

impl TryFrom<RawFilterEntry> for FilterEntry {
    type Error = String;

    fn try_from(raw: RawFilterEntry) -> Result<Self, Self::Error> {
        let alias = match raw.alias.or(raw.id) {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            other => return Err(format!("expected string or number identifier, got {other:?}")),
        };
        Ok(Self { alias, text: raw.text.or(raw.name).unwrap_or_default() })
    }
}

impl FilterEntry {
    fn is_wildcard(&self) -> bool {
        self.alias.is_empty() || self.alias.eq_ignore_ascii_case("all")
    }
}

/// Region and phase candidates, in upstream order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
    pub regions: Vec<FilterEntry>,
    pub phases: Vec<FilterEntry>,
}

impl FacetsResponse {
    pub fn candidates(&self) -> Candidates {
        let facet = |name: &str| -> Vec<FilterEntry> {
            self.filters
                .iter()
                .find(|f| f.alias.eq_ignore_ascii_case(name))
                .map(|f| f.entries.iter().filter(|e| !e.is_wildcard()).cloned().collect())
                .unwrap_or_default()
        };
        Candidates { regions: facet("region"), phases: facet("phase") }
    }
}

/// Game ids from a results table: each row carries one cell of type
/// `linkToGameDetail`.
pub fn game_ids(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.as_array())
        .filter_map(|cells| {
            cells
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some("linkToGameDetail"))
        })
        .filter_map(|cell| match cell.get("gameId")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct GameDetailResponse {
    #[serde(default)]
    pub players: Vec<DetailPlayer>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DetailPlayer {
    #[serde(default)]
    pub full_name: String,
    pub id: Option<Value>,
    pub jersey_number: Option<Value>,
    pub age_group: Option<String>,
}

impl From<DetailPlayer> for RosterEntry {
    fn from(p: DetailPlayer) -> Self {
        let jersey_number = coerce_rate(p.jersey_number.as_ref())
            .filter(|n| *n >= 0.0)
            .map(|n| n as u32);
        RosterEntry {
            full_name: p.full_name,
            enrichment: Enrichment {
                id: coerce_id(p.id.as_ref()),
                jersey_number,
                age_group: p.age_group.filter(|a| !a.trim().is_empty()),
            },
        }
    }
}

/// Opaque upstream identifiers arrive as numbers or strings.
pub(crate) fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}
