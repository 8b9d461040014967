pub mod client;
pub mod jsonp;
pub mod mapping;
pub mod merge;
pub mod normalize;
pub mod sihf;

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

pub use client::{ApiError, ApiResult, HttpTransport, RequestHeaders, RetryPolicy, SihfApi, Transport};
pub use mapping::{MappingResolver, MappingStore, ResolveMode};
pub use merge::{Grouping, Merger, merge};
pub use normalize::RowShape;

/// Goals-against average is expressed per regulation game.
pub const REGULATION_MINUTES: u32 = 60;

// ---------------------------------------------------------------------------
// Domain types, independent of the SIHF wire format
// ---------------------------------------------------------------------------

/// One team's participation in one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey {
    pub season: u16,
    pub league_id: u32,
    pub team_id: u32,
}

impl AddressKey {
    pub fn new(season: u16, league_id: u32, team_id: u32) -> Self {
        Self { season, league_id, team_id }
    }

    /// Key of the primary entry in the mapping store.
    pub fn store_key(&self) -> String {
        format!("{}-{}-{}", self.season, self.league_id, self.team_id)
    }

    /// Key of an additional phase entry (`n >= 1`).
    pub fn phase_key(&self, n: usize) -> String {
        format!("{}-P{n}", self.store_key())
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "season {} / league {} / team {}",
            self.season, self.league_id, self.team_id
        )
    }
}

/// Resolved addressing tuple for one (team, season, phase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub league_id: u32,
    pub team_id: u32,
    #[serde(deserialize_with = "sihf::opaque_id")]
    pub region: String,
    #[serde(deserialize_with = "sihf::opaque_id")]
    pub group: String,
    pub phase: String,
}

impl MappingEntry {
    pub fn is_regular_season(&self) -> bool {
        self.phase.to_lowercase().contains("regular")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsKind {
    Players,
    Goaltenders,
}

impl StatsKind {
    pub fn label(&self) -> &'static str {
        match self {
            StatsKind::Players => "players",
            StatsKind::Goaltenders => "goaltenders",
        }
    }
}

/// Identity fields that tabular rows never carry; filled by roster enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    pub id: Option<u64>,
    pub jersey_number: Option<u32>,
    pub age_group: Option<String>,
}

impl Enrichment {
    pub fn fill_from(&mut self, other: &Enrichment) {
        if self.id.is_none() {
            self.id = other.id;
        }
        if self.jersey_number.is_none() {
            self.jersey_number = other.jersey_number;
        }
        if self.age_group.is_none() {
            self.age_group = other.age_group.clone();
        }
    }
}

/// A player as listed in one game's detail roster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterEntry {
    pub full_name: String,
    pub enrichment: Enrichment,
}

/// Behaviour shared by player and goaltender lines so that normalization,
/// merging and sorting can be written once.
pub trait StatLine: Clone {
    const KIND: StatsKind;
    /// Column keys in display order.
    const COLUMNS: &'static [&'static str];
    const DEFAULT_SORT: &'static str;

    fn from_row(row: &normalize::RowView<'_>) -> Self;

    fn name(&self) -> &str;

    /// Merge identity. Two entities sharing a display name collapse into one.
    fn identity(&self) -> &str {
        self.name().trim()
    }

    /// Add counting statistics of `other` and recompute every ratio.
    fn absorb(&mut self, other: &Self);

    fn league(&self) -> Option<&str>;
    fn set_league(&mut self, league: Option<String>);
    fn enrichment_mut(&mut self) -> &mut Enrichment;

    /// Numeric value of a column, for sorting.
    fn metric(&self, key: &str) -> Option<f64>;
}

pub fn points_per_game(points: u32, games: u32) -> f64 {
    f64::from(points) / f64::from(games.max(1))
}

/// Recomputed from raw time on ice when there is any; otherwise the
/// upstream value is kept as-is.
pub fn goals_against_average(goals_against: u32, seconds_played: u32, upstream: Option<f64>) -> Option<f64> {
    if seconds_played == 0 {
        return upstream;
    }
    let regulation_seconds = f64::from(REGULATION_MINUTES * 60);
    Some(f64::from(goals_against) * regulation_seconds / f64::from(seconds_played))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerRecord {
    pub rank: Option<u32>,
    pub name: String,
    pub team: Option<String>,
    pub position: Option<String>,
    pub games: u32,
    pub goals: u32,
    pub assists: u32,
    pub points: u32,
    pub points_per_game: f64,
    pub penalty_minutes: u32,
    #[serde(flatten)]
    pub enrichment: Enrichment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub league: Option<String>,
}

impl StatLine for PlayerRecord {
    const KIND: StatsKind = StatsKind::Players;
    const COLUMNS: &'static [&'static str] = &[
        "games",
        "goals",
        "assists",
        "points",
        "pointsPerGame",
        "penaltyMinutes",
    ];
    const DEFAULT_SORT: &'static str = "points";

    fn from_row(row: &normalize::RowView<'_>) -> Self {
        use normalize::Field;

        let games = row.count(Field::Games);
        let points = row.count(Field::Points);
        Self {
            rank: row.optional_count(Field::Rank),
            name: row.text(Field::Name).unwrap_or_default(),
            team: row.text(Field::Team),
            position: row.text(Field::Position),
            games,
            goals: row.count(Field::Goals),
            assists: row.count(Field::Assists),
            points,
            points_per_game: points_per_game(points, games),
            penalty_minutes: row.count(Field::PenaltyMinutes),
            enrichment: Enrichment { id: row.id(), ..Enrichment::default() },
            league: None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn absorb(&mut self, other: &Self) {
        self.games = self.games.saturating_add(other.games);
        self.goals = self.goals.saturating_add(other.goals);
        self.assists = self.assists.saturating_add(other.assists);
        self.points = self.points.saturating_add(other.points);
        self.penalty_minutes = self.penalty_minutes.saturating_add(other.penalty_minutes);
        self.points_per_game = points_per_game(self.points, self.games);

        // Ranks are only meaningful inside the table they came from.
        self.rank = None;
        if self.team != other.team {
            self.team = None;
        }
        if self.position.is_none() {
            self.position = other.position.clone();
        }
        self.enrichment.fill_from(&other.enrichment);
    }

    fn league(&self) -> Option<&str> {
        self.league.as_deref()
    }

    fn set_league(&mut self, league: Option<String>) {
        self.league = league;
    }

    fn enrichment_mut(&mut self) -> &mut Enrichment {
        &mut self.enrichment
    }

    fn metric(&self, key: &str) -> Option<f64> {
        let value = match key {
            "rank" => f64::from(self.rank?),
            "games" => f64::from(self.games),
            "goals" => f64::from(self.goals),
            "assists" => f64::from(self.assists),
            "points" => f64::from(self.points),
            "pointsPerGame" => self.points_per_game,
            "penaltyMinutes" => f64::from(self.penalty_minutes),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoalieRecord {
    pub rank: Option<u32>,
    pub name: String,
    pub team: Option<String>,
    pub games_played: u32,
    pub first_keeper: u32,
    pub goals_against: u32,
    pub goals_against_average: Option<f64>,
    pub seconds_played: u32,
    pub penalty_minutes: u32,
    pub goals: u32,
    pub assists: u32,
    #[serde(flatten)]
    pub enrichment: Enrichment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub league: Option<String>,
}

impl StatLine for GoalieRecord {
    const KIND: StatsKind = StatsKind::Goaltenders;
    const COLUMNS: &'static [&'static str] = &[
        "gamesPlayed",
        "firstKeeper",
        "goalsAgainst",
        "goalsAgainstAverage",
        "secondsPlayed",
        "penaltyMinutes",
        "goals",
        "assists",
    ];
    const DEFAULT_SORT: &'static str = "goalsAgainstAverage";

    fn from_row(row: &normalize::RowView<'_>) -> Self {
        use normalize::Field;

        let goals_against = row.count(Field::GoalsAgainst);
        let seconds_played = row.seconds(Field::TimeOnIce);
        Self {
            rank: row.optional_count(Field::Rank),
            name: row.text(Field::Name).unwrap_or_default(),
            team: row.text(Field::Team),
            games_played: row.count(Field::Games),
            first_keeper: row.count(Field::FirstKeeper),
            goals_against,
            goals_against_average: goals_against_average(
                goals_against,
                seconds_played,
                row.rate(Field::GoalsAgainstAverage),
            ),
            seconds_played,
            penalty_minutes: row.count(Field::PenaltyMinutes),
            goals: row.count(Field::Goals),
            assists: row.count(Field::Assists),
            enrichment: Enrichment { id: row.id(), ..Enrichment::default() },
            league: None,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn absorb(&mut self, other: &Self) {
        self.games_played = self.games_played.saturating_add(other.games_played);
        self.first_keeper = self.first_keeper.saturating_add(other.first_keeper);
        self.goals_against = self.goals_against.saturating_add(other.goals_against);
        self.seconds_played = self.seconds_played.saturating_add(other.seconds_played);
        self.penalty_minutes = self.penalty_minutes.saturating_add(other.penalty_minutes);
        self.goals = self.goals.saturating_add(other.goals);
        self.assists = self.assists.saturating_add(other.assists);
        // Upstream averages of different tables cannot be combined.
        self.goals_against_average =
            goals_against_average(self.goals_against, self.seconds_played, None);

        self.rank = None;
        if self.team != other.team {
            self.team = None;
        }
        self.enrichment.fill_from(&other.enrichment);
    }

    fn league(&self) -> Option<&str> {
        self.league.as_deref()
    }

    fn set_league(&mut self, league: Option<String>) {
        self.league = league;
    }

    fn enrichment_mut(&mut self) -> &mut Enrichment {
        &mut self.enrichment
    }

    fn metric(&self, key: &str) -> Option<f64> {
        let value = match key {
            "rank" => f64::from(self.rank?),
            "gamesPlayed" => f64::from(self.games_played),
            "firstKeeper" => f64::from(self.first_keeper),
            "goalsAgainst" => f64::from(self.goals_against),
            "goalsAgainstAverage" => self.goals_against_average?,
            "secondsPlayed" => f64::from(self.seconds_played),
            "penaltyMinutes" => f64::from(self.penalty_minutes),
            "goals" => f64::from(self.goals),
            "assists" => f64::from(self.assists),
            _ => return None,
        };
        Some(value)
    }
}

/// Output of one (team, season, phase) fetch. A failed fetch still yields a
/// dataset: no records, plus a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonDataset<R> {
    pub season: u16,
    pub phase: String,
    pub team: String,
    pub league: u32,
    pub records: Vec<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Names that no roster lookup could match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl<R> SeasonDataset<R> {
    pub fn new(season: u16, phase: &str, team: &str, league: u32, records: Vec<R>) -> Self {
        Self {
            season,
            phase: phase.to_owned(),
            team: team.to_owned(),
            league,
            records,
            note: None,
            missing: Vec::new(),
        }
    }

    pub fn failed(season: u16, phase: &str, team: &str, league: u32, note: String) -> Self {
        Self { note: Some(note), ..Self::new(season, phase, team, league, Vec::new()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateSeason {
    Season(u16),
    Merged,
}

impl Serialize for AggregateSeason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AggregateSeason::Season(year) => serializer.serialize_u16(*year),
            AggregateSeason::Merged => serializer.serialize_str("merged"),
        }
    }
}

/// Merged view over several datasets. Recomputed per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDataset<R> {
    pub season: AggregateSeason,
    pub team: String,
    pub league: Option<u32>,
    pub records: Vec<R>,
}

impl<R> AggregateDataset<R> {
    pub fn find(&self, name: &str) -> Option<&R>
    where
        R: StatLine,
    {
        self.records.iter().find(|r| r.identity() == name.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_keys_follow_season_league_team() {
        let key = AddressKey::new(2025, 10, 103941);
        assert_eq!(key.store_key(), "2025-10-103941");
        assert_eq!(key.phase_key(2), "2025-10-103941-P2");
    }

    #[test]
    fn points_per_game_never_divides_by_zero() {
        assert_eq!(points_per_game(3, 0), 3.0);
        assert!((points_per_game(11, 14) - 0.7857).abs() < 1e-3);
    }

    #[test]
    fn goals_against_average_prefers_time_on_ice() {
        // 6 goals over 180 minutes is two per regulation game.
        assert_eq!(goals_against_average(6, 180 * 60, Some(9.99)), Some(2.0));
        assert_eq!(goals_against_average(6, 0, Some(2.5)), Some(2.5));
        assert_eq!(goals_against_average(6, 0, None), None);
    }

    #[test]
    fn player_absorb_sums_counts_and_recomputes_ratio() {
        let mut a = PlayerRecord {
            name: "J. Doe".into(),
            games: 10,
            goals: 5,
            assists: 3,
            points: 8,
            points_per_game: 0.8,
            rank: Some(1),
            ..Default::default()
        };
        let b = PlayerRecord {
            name: "J. Doe".into(),
            games: 4,
            goals: 1,
            assists: 2,
            points: 3,
            points_per_game: 0.75,
            ..Default::default()
        };
        a.absorb(&b);
        assert_eq!((a.games, a.goals, a.assists, a.points), (14, 6, 5, 11));
        assert!((a.points_per_game - 11.0 / 14.0).abs() < 1e-9);
        assert_eq!(a.rank, None);
    }

    #[test]
    fn goalie_absorb_drops_upstream_average_without_minutes() {
        let mut a = GoalieRecord {
            name: "K. Keeper".into(),
            goals_against_average: Some(3.0),
            goals_against: 3,
            ..Default::default()
        };
        let b = a.clone();
        a.absorb(&b);
        assert_eq!(a.goals_against, 6);
        assert_eq!(a.goals_against_average, None);
    }

    #[test]
    fn mapping_entry_accepts_numeric_identifiers() {
        let raw = r#"{"leagueId":37,"teamId":105810,"region":1,"group":4659,"phase":"Regular Season"}"#;
        let entry: MappingEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.region, "1");
        assert_eq!(entry.group, "4659");
        assert!(entry.is_regular_season());
    }

    #[test]
    fn aggregate_season_serializes_marker() {
        assert_eq!(serde_json::to_string(&AggregateSeason::Merged).unwrap(), "\"merged\"");
        assert_eq!(serde_json::to_string(&AggregateSeason::Season(2024)).unwrap(), "2024");
    }
}
