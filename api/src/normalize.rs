//! Mapping of raw table rows onto player and goaltender records.
//!
//! Row layout is decided once per table through [`RowShape`]; nothing here
//! inspects a single row to guess its layout. Numeric coercion never fails: counts
//! default to zero, rates to `None`.

use crate::sihf::Layout;
use crate::{GoalieRecord, PlayerRecord, RosterEntry, StatLine, StatsKind};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Rank,
    Id,
    Name,
    Team,
    Position,
    Games,
    Goals,
    Assists,
    Points,
    PointsPerGame,
    PenaltyMinutes,
    FirstKeeper,
    GoalsAgainst,
    GoalsAgainstAverage,
    TimeOnIce,
}

/// Fixed column index per field.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    pub kind: StatsKind,
    pub columns: &'static [(Field, usize)],
}

/// Key names per field. Several keys are joined with a space (first and
/// last name).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    pub kind: StatsKind,
    pub fields: &'static [(Field, &'static [&'static str])],
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowShape {
    Positional(ColumnMap),
    Keyed(FieldMap),
}

const PLAYER_COLUMNS: &[(Field, usize)] = &[
    (Field::Rank, 0),
    (Field::Name, 1),
    (Field::Team, 2),
    (Field::Position, 3),
    (Field::Games, 4),
    (Field::Goals, 5),
    (Field::Assists, 6),
    (Field::Points, 7),
    (Field::PointsPerGame, 8),
    (Field::PenaltyMinutes, 9),
];

const GOALIE_COLUMNS: &[(Field, usize)] = &[
    (Field::Rank, 0),
    (Field::Name, 1),
    (Field::Team, 2),
    (Field::Games, 3),
    (Field::FirstKeeper, 4),
    (Field::GoalsAgainst, 5),
    (Field::GoalsAgainstAverage, 6),
    (Field::TimeOnIce, 7),
    (Field::PenaltyMinutes, 8),
    (Field::Goals, 9),
    (Field::Assists, 10),
];

const PLAYER_FIELDS: &[(Field, &[&str])] = &[
    (Field::Id, &["PlayerId"]),
    (Field::Name, &["FirstName", "LastName"]),
    (Field::Team, &["Team"]),
    (Field::Position, &["Position"]),
    (Field::Games, &["GP"]),
    (Field::Goals, &["Goals"]),
    (Field::Assists, &["Assists"]),
    (Field::Points, &["Points"]),
    (Field::PointsPerGame, &["PPG"]),
    (Field::PenaltyMinutes, &["PIM"]),
];

const GOALIE_FIELDS: &[(Field, &[&str])] = &[
    (Field::Id, &["PlayerId"]),
    (Field::Name, &["FirstName", "LastName"]),
    (Field::Team, &["Team"]),
    (Field::Games, &["GP"]),
    (Field::FirstKeeper, &["GPI"]),
    (Field::GoalsAgainst, &["GA"]),
    (Field::GoalsAgainstAverage, &["GAA"]),
    (Field::TimeOnIce, &["MIP"]),
    (Field::PenaltyMinutes, &["PIM"]),
    (Field::Goals, &["Goals"]),
    (Field::Assists, &["Assists"]),
];

impl RowShape {
    /// Layout of the `data` arrays returned by the statistics aliases.
    pub fn positional(kind: StatsKind) -> Self {
        let columns = match kind {
            StatsKind::Players => PLAYER_COLUMNS,
            StatsKind::Goaltenders => GOALIE_COLUMNS,
        };
        RowShape::Positional(ColumnMap { kind, columns })
    }

    /// Layout of object rows (`FirstName`, `GP`, ...).
    pub fn keyed(kind: StatsKind) -> Self {
        let fields = match kind {
            StatsKind::Players => PLAYER_FIELDS,
            StatsKind::Goaltenders => GOALIE_FIELDS,
        };
        RowShape::Keyed(FieldMap { kind, fields })
    }

    pub fn for_layout(kind: StatsKind, layout: Layout) -> Self {
        match layout {
            Layout::Positional => Self::positional(kind),
            Layout::Keyed => Self::keyed(kind),
        }
    }

    pub fn kind(&self) -> StatsKind {
        match self {
            RowShape::Positional(map) => map.kind,
            RowShape::Keyed(map) => map.kind,
        }
    }
}

/// A raw row seen through its shape.
pub struct RowView<'a> {
    row: &'a Value,
    shape: &'a RowShape,
}

impl<'a> RowView<'a> {
    pub fn new(row: &'a Value, shape: &'a RowShape) -> Self {
        Self { row, shape }
    }

    fn values(&self, field: Field) -> Vec<&'a Value> {
        match self.shape {
            RowShape::Positional(map) => map
                .columns
                .iter()
                .filter(|(f, _)| *f == field)
                .filter_map(|(_, idx)| self.row.get(*idx))
                .collect(),
            RowShape::Keyed(map) => map
                .fields
                .iter()
                .filter(|(f, _)| *f == field)
                .flat_map(|(_, keys)| keys.iter())
                .filter_map(|key| self.row.get(*key))
                .collect(),
        }
    }

    fn raw(&self, field: Field) -> Option<&'a Value> {
        self.values(field).into_iter().next()
    }

    /// Text value; several keys are joined, objects contribute their `name`.
    pub fn text(&self, field: Field) -> Option<String> {
        let parts: Vec<String> = self
            .values(field)
            .into_iter()
            .filter_map(value_text)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() { None } else { Some(parts.join(" ")) }
    }

    pub fn count(&self, field: Field) -> u32 {
        to_count(coerce_number(self.raw(field), 0.0))
    }

    pub fn optional_count(&self, field: Field) -> Option<u32> {
        parse_number(self.raw(field)?).map(to_count)
    }

    pub fn rate(&self, field: Field) -> Option<f64> {
        coerce_rate(self.raw(field))
    }

    pub fn id(&self) -> Option<u64> {
        coerce_id(self.raw(Field::Id))
    }

    pub fn seconds(&self, field: Field) -> u32 {
        self.raw(field).map(time_on_ice_seconds).unwrap_or(0)
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(|s| s.trim().to_owned()),
        _ => None,
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            s.parse::<f64>()
                .or_else(|_| s.replace(',', ".").parse::<f64>())
                .ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Numeric coercion with an explicit fallback.
pub fn coerce_number(raw: Option<&Value>, default: f64) -> f64 {
    raw.and_then(parse_number).unwrap_or(default)
}

/// Coercion for rates and derived values, which have no meaningful zero.
pub fn coerce_rate(raw: Option<&Value>) -> Option<f64> {
    raw.and_then(parse_number)
}

pub fn coerce_id(raw: Option<&Value>) -> Option<u64> {
    coerce_rate(raw).filter(|n| *n > 0.0).map(|n| n as u64)
}

fn to_count(n: f64) -> u32 {
    // `as` saturates and maps NaN to zero.
    n.max(0.0).trunc() as u32
}

/// Time on ice in seconds. `"mm:ss"` and `"hh:mm:ss"` are clock values; a
/// bare number is already seconds.
fn time_on_ice_seconds(value: &Value) -> u32 {
    if let Value::String(s) = value
        && s.contains(':')
    {
        return s
            .trim()
            .split(':')
            .map(|part| part.trim().parse::<u32>().unwrap_or(0))
            .fold(0u32, |acc, part| acc.saturating_mul(60).saturating_add(part));
    }
    parse_number(value).map(|seconds| to_count(seconds.round())).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatRecord {
    Player(PlayerRecord),
    Goalie(GoalieRecord),
}

pub fn normalize_row(row: &Value, shape: &RowShape) -> StatRecord {
    let view = RowView::new(row, shape);
    match shape.kind() {
        StatsKind::Players => StatRecord::Player(PlayerRecord::from_row(&view)),
        StatsKind::Goaltenders => StatRecord::Goalie(GoalieRecord::from_row(&view)),
    }
}

/// Normalize a whole table. Rows without a name are dropped.
pub fn normalize_rows<R: StatLine>(rows: &[Value], shape: &RowShape) -> Vec<R> {
    rows.iter()
        .map(|row| R::from_row(&RowView::new(row, shape)))
        .filter(|record| !record.name().trim().is_empty())
        .collect()
}

fn roster_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Fill identity fields from roster lookups by exact (trimmed,
/// case-insensitive) name. Returns the names no roster matched, without
/// duplicates, in record order.
pub fn enrich<R: StatLine>(records: &mut [R], roster: &[RosterEntry]) -> Vec<String> {
    let mut by_name: HashMap<String, &RosterEntry> = HashMap::new();
    for entry in roster {
        by_name.entry(roster_key(&entry.full_name)).or_insert(entry);
    }

    let mut missing: Vec<String> = Vec::new();
    for record in records.iter_mut() {
        match by_name.get(&roster_key(record.name())) {
            Some(entry) => record.enrichment_mut().fill_from(&entry.enrichment),
            None => {
                let name = record.name().trim().to_owned();
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Enrichment;
    use serde_json::json;

    #[test]
    fn positional_player_row_normalizes() {
        let row = json!([1, "J. Doe", null, "F", 12, 5, 7, 12, 1.0, 4]);
        let shape = RowShape::positional(StatsKind::Players);
        let StatRecord::Player(p) = normalize_row(&row, &shape) else {
            panic!("player shape must yield a player");
        };
        assert_eq!(p.rank, Some(1));
        assert_eq!(p.name, "J. Doe");
        assert_eq!(p.team, None);
        assert_eq!(p.position.as_deref(), Some("F"));
        assert_eq!((p.games, p.goals, p.assists, p.points), (12, 5, 7, 12));
        assert_eq!(p.points_per_game, 1.0);
        assert_eq!(p.penalty_minutes, 4);
        assert_eq!(p.enrichment, Enrichment::default());
    }

    #[test]
    fn points_per_game_is_recomputed_not_trusted() {
        let row = json!([3, "A. Skater", {"name": "EHC"}, "D", 4, 1, 1, 2, 9.99, 0]);
        let players: Vec<PlayerRecord> =
            normalize_rows(&[row], &RowShape::positional(StatsKind::Players));
        assert_eq!(players[0].points_per_game, 0.5);
        assert_eq!(players[0].team.as_deref(), Some("EHC"));
    }

    #[test]
    fn uncoercible_numbers_fall_back_to_defaults() {
        let row = json!([null, "B. Rookie", "", "F", "n/a", "3", true, null, "x", "2"]);
        let players: Vec<PlayerRecord> =
            normalize_rows(&[row], &RowShape::positional(StatsKind::Players));
        let p = &players[0];
        assert_eq!(p.rank, None);
        assert_eq!(p.team, None);
        assert_eq!((p.games, p.goals, p.assists, p.points), (0, 3, 0, 0));
        assert_eq!(p.penalty_minutes, 2);
    }

    #[test]
    fn short_rows_do_not_fail() {
        let players: Vec<PlayerRecord> =
            normalize_rows(&[json!([1, "C. Short"])], &RowShape::positional(StatsKind::Players));
        assert_eq!(players[0].games, 0);
        assert_eq!(players[0].position, None);
    }

    #[test]
    fn nameless_rows_are_dropped() {
        let players: Vec<PlayerRecord> = normalize_rows(
            &[json!([1, "", null, "F", 1]), json!({"unexpected": true})],
            &RowShape::positional(StatsKind::Players),
        );
        assert!(players.is_empty());
    }

    #[test]
    fn keyed_player_row_joins_name_and_reads_id() {
        let row = json!({
            "PlayerId": 4711, "FirstName": "Jon", "LastName": "Doe", "Position": "F",
            "GP": 10, "Goals": 5, "Assists": 3, "Points": 8, "PPG": 0.8, "PIM": 2
        });
        let shape = RowShape::keyed(StatsKind::Players);
        let StatRecord::Player(p) = normalize_row(&row, &shape) else {
            panic!("expected player");
        };
        assert_eq!(p.name, "Jon Doe");
        assert_eq!(p.enrichment.id, Some(4711));
        assert_eq!((p.games, p.points), (10, 8));
        assert_eq!(p.rank, None);
    }

    #[test]
    fn positional_goalie_row_recomputes_average_from_clock() {
        let row = json!([1, "K. Keeper", {"name": "EHC"}, "3", "3", "6", "9.99", "180:00", "2", "0", "1"]);
        let shape = RowShape::positional(StatsKind::Goaltenders);
        let StatRecord::Goalie(g) = normalize_row(&row, &shape) else {
            panic!("expected goalie");
        };
        assert_eq!(g.games_played, 3);
        assert_eq!(g.first_keeper, 3);
        assert_eq!(g.goals_against, 6);
        assert_eq!(g.seconds_played, 180 * 60);
        assert_eq!(g.goals_against_average, Some(2.0));
        assert_eq!((g.penalty_minutes, g.goals, g.assists), (2, 0, 1));
    }

    #[test]
    fn goalie_without_time_keeps_upstream_average() {
        let row = json!([2, "L. Backup", null, 1, 0, 4, "4.00", null, 0, 0, 0]);
        let goalies: Vec<GoalieRecord> =
            normalize_rows(&[row], &RowShape::positional(StatsKind::Goaltenders));
        assert_eq!(goalies[0].seconds_played, 0);
        assert_eq!(goalies[0].goals_against_average, Some(4.0));

        let row = json!([2, "L. Backup", null, 1, 0, 4, "-", null, 0, 0, 0]);
        let goalies: Vec<GoalieRecord> =
            normalize_rows(&[row], &RowShape::positional(StatsKind::Goaltenders));
        assert_eq!(goalies[0].goals_against_average, None);
    }

    #[test]
    fn time_on_ice_formats() {
        assert_eq!(time_on_ice_seconds(&json!("59:30")), 3570);
        assert_eq!(time_on_ice_seconds(&json!("1:00:05")), 3605);
        assert_eq!(time_on_ice_seconds(&json!(7200)), 7200);
        assert_eq!(time_on_ice_seconds(&json!("90.5")), 91);
        assert_eq!(time_on_ice_seconds(&json!(null)), 0);
    }

    #[test]
    fn numeric_time_on_ice_is_read_as_seconds() {
        // Two goals over one full game: 3600 seconds, not 3600 minutes.
        let row = json!([1, "K. Keeper", null, 1, 1, 2, null, 3600, 0, 0, 0]);
        let StatRecord::Goalie(g) = normalize_row(&row, &RowShape::positional(StatsKind::Goaltenders)) else {
            panic!("goaltender shape must yield a goaltender");
        };
        assert_eq!(g.seconds_played, 3600);
        assert_eq!(g.goals_against_average, Some(2.0));
    }

    #[test]
    fn coercion_accepts_decimal_commas() {
        assert_eq!(coerce_number(Some(&json!("1,5")), 0.0), 1.5);
        assert_eq!(coerce_number(Some(&json!("abc")), 7.0), 7.0);
        assert_eq!(coerce_number(None, 0.0), 0.0);
        assert_eq!(coerce_rate(Some(&json!(""))), None);
    }

    #[test]
    fn enrichment_matches_trimmed_names_and_reports_missing() {
        let mut players = vec![
            PlayerRecord { name: "Jon Doe ".into(), ..Default::default() },
            PlayerRecord { name: "Ann Other".into(), ..Default::default() },
            PlayerRecord { name: "Ann Other".into(), ..Default::default() },
        ];
        let roster = vec![RosterEntry {
            full_name: "  jon doe".into(),
            enrichment: Enrichment {
                id: Some(4711),
                jersey_number: Some(17),
                age_group: Some("U20".into()),
            },
        }];
        let missing = enrich(&mut players, &roster);
        assert_eq!(players[0].enrichment.id, Some(4711));
        assert_eq!(players[0].enrichment.jersey_number, Some(17));
        assert_eq!(players[1].enrichment.id, None);
        assert_eq!(missing, vec!["Ann Other".to_string()]);
    }
}
