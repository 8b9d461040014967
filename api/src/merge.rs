//! Cross-source merging of partial datasets into one record per entity.
//!
//! Entity identity is the trimmed display name. Two different people with the
//! same name collapse into one record; no numeric id is reliably present in
//! the statistics tables to do better.
//!
//! Input records are always cloned, so an aggregate never aliases the
//! datasets it was built from.

use crate::{AggregateDataset, AggregateSeason, SeasonDataset, StatLine};
use std::collections::{BTreeSet, HashMap};

/// Label given to a merged record whose sources span different leagues.
pub const MIXED_LEAGUE: &str = "Mix";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// All inputs belong to one season (typically several phases of it).
    Season(u16),
    /// Inputs span seasons or teams.
    Merged,
}

impl From<Grouping> for AggregateSeason {
    fn from(grouping: Grouping) -> Self {
        match grouping {
            Grouping::Season(year) => AggregateSeason::Season(year),
            Grouping::Merged => AggregateSeason::Merged,
        }
    }
}

/// Incremental merger. Records keep the order in which each identity was
/// first seen.
#[derive(Debug, Clone)]
pub struct Merger<R> {
    records: Vec<R>,
    index: HashMap<String, usize>,
    teams: Vec<String>,
    leagues: BTreeSet<u32>,
    leagueless: bool,
}

impl<R: StatLine> Default for Merger<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: StatLine> Merger<R> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
            teams: Vec::new(),
            leagues: BTreeSet::new(),
            leagueless: false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add_records(&mut self, records: &[R]) {
        for record in records {
            self.add_record(record);
        }
    }

    fn add_record(&mut self, record: &R) {
        let identity = record.identity();
        match self.index.get(identity) {
            Some(&at) => {
                let existing = &mut self.records[at];
                let league = combine_league(existing.league(), record.league());
                existing.absorb(record);
                existing.set_league(league);
            }
            None => {
                self.index.insert(identity.to_owned(), self.records.len());
                self.records.push(record.clone());
            }
        }
    }

    pub fn add_dataset(&mut self, dataset: &SeasonDataset<R>) {
        self.note_team(&dataset.team);
        self.leagues.insert(dataset.league);
        self.add_records(&dataset.records);
    }

    /// Fold an earlier aggregate back in, so merges can be nested.
    pub fn add_aggregate(&mut self, aggregate: &AggregateDataset<R>) {
        for team in aggregate.team.split(", ") {
            self.note_team(team);
        }
        match aggregate.league {
            Some(league) => {
                self.leagues.insert(league);
            }
            None => self.leagueless = true,
        }
        self.add_records(&aggregate.records);
    }

    fn note_team(&mut self, team: &str) {
        let team = team.trim();
        if !team.is_empty() && !self.teams.iter().any(|t| t == team) {
            self.teams.push(team.to_owned());
        }
    }

    pub fn finish(self, grouping: Grouping) -> AggregateDataset<R> {
        let league = match (self.leagueless, self.leagues.len()) {
            (false, 1) => self.leagues.first().copied(),
            _ => None,
        };
        AggregateDataset {
            season: grouping.into(),
            team: self.teams.join(", "),
            league,
            records: self.records,
        }
    }
}

/// Equal labels stay, differing labels become [`MIXED_LEAGUE`], a missing
/// label takes the other.
fn combine_league(current: Option<&str>, incoming: Option<&str>) -> Option<String> {
    match (current, incoming) {
        (Some(a), Some(b)) if a == b => Some(a.to_owned()),
        (Some(_), Some(_)) => Some(MIXED_LEAGUE.to_owned()),
        (Some(a), None) | (None, Some(a)) => Some(a.to_owned()),
        (None, None) => None,
    }
}

/// Merge datasets into one aggregate. No input yields an empty aggregate.
pub fn merge<R: StatLine>(datasets: &[SeasonDataset<R>], grouping: Grouping) -> AggregateDataset<R> {
    let mut merger = Merger::new();
    for dataset in datasets {
        merger.add_dataset(dataset);
    }
    merger.finish(grouping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GoalieRecord, PlayerRecord, points_per_game};

    fn player(name: &str, games: u32, goals: u32, assists: u32) -> PlayerRecord {
        let points = goals + assists;
        PlayerRecord {
            name: name.into(),
            team: Some("EHC".into()),
            games,
            goals,
            assists,
            points,
            points_per_game: points_per_game(points, games),
            penalty_minutes: games / 2,
            ..Default::default()
        }
    }

    fn dataset(season: u16, phase: &str, league: u32, records: Vec<PlayerRecord>) -> SeasonDataset<PlayerRecord> {
        SeasonDataset::new(season, phase, "1 Mannschaft", league, records)
    }

    fn totals(agg: &AggregateDataset<PlayerRecord>) -> Vec<(String, u32, u32, u32, u32, u32)> {
        let mut rows: Vec<_> = agg
            .records
            .iter()
            .map(|r| (r.name.clone(), r.games, r.goals, r.assists, r.points, r.penalty_minutes))
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn merges_two_phases_of_one_season() {
        let regular = dataset(2025, "Regular Season", 10, vec![player("J. Doe", 10, 5, 3)]);
        let playoffs = dataset(2025, "Playoffs", 10, vec![player(" J. Doe ", 4, 1, 2)]);

        let agg = merge(&[regular, playoffs], Grouping::Season(2025));

        assert_eq!(agg.season, AggregateSeason::Season(2025));
        assert_eq!(agg.league, Some(10));
        assert_eq!(agg.team, "1 Mannschaft");
        assert_eq!(agg.records.len(), 1);
        let doe = agg.find("J. Doe").unwrap();
        assert_eq!((doe.games, doe.goals, doe.assists, doe.points), (14, 6, 5, 11));
        assert!((doe.points_per_game - 11.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn ratio_is_recomputed_not_summed() {
        // 2 points in 1 game and 0 in 9: a summed ratio would be 2.0.
        let a = dataset(2024, "A", 10, vec![player("X", 1, 2, 0)]);
        let b = dataset(2025, "B", 10, vec![player("X", 9, 0, 0)]);
        let agg = merge(&[a, b], Grouping::Merged);
        assert!((agg.records[0].points_per_game - 0.2).abs() < 1e-9);
    }

    #[test]
    fn zero_games_divides_by_one() {
        let a = dataset(2025, "A", 10, vec![player("X", 0, 1, 0)]);
        let b = dataset(2025, "B", 10, vec![player("X", 0, 1, 1)]);
        let agg = merge(&[a, b], Grouping::Season(2025));
        assert_eq!(agg.records[0].points_per_game, 3.0);
    }

    #[test]
    fn empty_input_yields_empty_aggregate() {
        let agg = merge::<PlayerRecord>(&[], Grouping::Merged);
        assert!(agg.records.is_empty());
        assert_eq!(agg.season, AggregateSeason::Merged);
        assert_eq!(agg.league, None);
    }

    #[test]
    fn single_input_is_copied_unchanged() {
        let only = dataset(2025, "Regular Season", 10, vec![player("A", 3, 1, 1), player("B", 2, 0, 0)]);
        let agg = merge(std::slice::from_ref(&only), Grouping::Season(2025));
        assert_eq!(agg.records, only.records);
    }

    #[test]
    fn counting_totals_are_order_independent() {
        let a = dataset(2023, "R", 10, vec![player("A", 10, 5, 3), player("B", 2, 1, 0)]);
        let b = dataset(2024, "R", 10, vec![player("B", 4, 1, 2), player("C", 1, 0, 1)]);
        let c = dataset(2025, "R", 19, vec![player("A", 3, 0, 0), player("C", 5, 2, 2)]);

        let flat = merge(&[a.clone(), b.clone(), c.clone()], Grouping::Merged);
        let reversed = merge(&[c.clone(), b.clone(), a.clone()], Grouping::Merged);

        let mut left = Merger::new();
        left.add_aggregate(&merge(&[a.clone(), b.clone()], Grouping::Merged));
        left.add_dataset(&c);
        let left = left.finish(Grouping::Merged);

        let mut right = Merger::new();
        right.add_dataset(&a);
        right.add_aggregate(&merge(&[b, c], Grouping::Merged));
        let right = right.finish(Grouping::Merged);

        assert_eq!(totals(&flat), totals(&reversed));
        assert_eq!(totals(&flat), totals(&left));
        assert_eq!(totals(&flat), totals(&right));
    }

    #[test]
    fn first_seen_order_is_kept() {
        let a = dataset(2025, "R", 10, vec![player("B", 1, 0, 0), player("A", 1, 0, 0)]);
        let b = dataset(2025, "P", 10, vec![player("C", 1, 0, 0), player("A", 1, 0, 0)]);
        let names: Vec<_> = merge(&[a, b], Grouping::Season(2025))
            .records
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn mixed_leagues_are_labelled() {
        let mut a = player("A", 1, 0, 0);
        a.league = Some("2. Liga".into());
        let mut b = player("A", 1, 0, 0);
        b.league = Some("4. Liga".into());
        let mut c = player("C", 1, 0, 0);
        c.league = Some("2. Liga".into());

        let agg = merge(
            &[dataset(2025, "R", 10, vec![a, c.clone()]), dataset(2025, "R", 19, vec![b, c])],
            Grouping::Merged,
        );
        assert_eq!(agg.league, None);
        assert_eq!(agg.find("A").unwrap().league.as_deref(), Some(MIXED_LEAGUE));
        assert_eq!(agg.find("C").unwrap().league.as_deref(), Some("2. Liga"));
    }

    #[test]
    fn teams_are_listed_once_in_first_seen_order() {
        let mut second = SeasonDataset::new(2025, "R", "2 Mannschaft", 19, vec![player("B", 1, 0, 0)]);
        second.records[0].team = Some("EHC II".into());
        let agg = merge(
            &[
                dataset(2024, "R", 10, vec![player("B", 1, 0, 0)]),
                second,
                dataset(2025, "R", 10, vec![]),
            ],
            Grouping::Merged,
        );
        assert_eq!(agg.team, "1 Mannschaft, 2 Mannschaft");
        assert_eq!(agg.find("B").unwrap().team, None);
    }

    #[test]
    fn goalie_average_follows_summed_time_on_ice() {
        let keeper = |ga: u32, seconds: u32| GoalieRecord {
            name: "K. Keeper".into(),
            goals_against: ga,
            seconds_played: seconds,
            games_played: 1,
            goals_against_average: Some(99.0),
            ..Default::default()
        };
        let a = SeasonDataset::new(2025, "R", "Damen", 43, vec![keeper(2, 3600)]);
        let b = SeasonDataset::new(2025, "P", "Damen", 43, vec![keeper(4, 3600)]);
        let agg = merge(&[a, b], Grouping::Season(2025));
        let merged = &agg.records[0];
        assert_eq!(merged.goals_against, 6);
        assert_eq!(merged.seconds_played, 7200);
        assert_eq!(merged.goals_against_average, Some(3.0));
    }

    #[test]
    fn oversized_counts_saturate_instead_of_overflowing() {
        use crate::StatsKind;
        use crate::normalize::{RowShape, normalize_rows};

        let shape = RowShape::positional(StatsKind::Players);
        let rows = [serde_json::json!([1, "Big", null, "F", "1e12", 1, 1, 2, 0, 0])];
        let big: Vec<PlayerRecord> = normalize_rows(&rows, &shape);
        assert_eq!(big[0].games, u32::MAX);

        let a = dataset(2025, "Regular Season", 10, big.clone());
        let b = dataset(2025, "Playoffs", 10, big);
        let agg = merge(&[a, b], Grouping::Season(2025));
        let merged = agg.find("Big").unwrap();
        assert_eq!(merged.games, u32::MAX);
        assert_eq!(merged.points, 4);

        let keeper = GoalieRecord { name: "K".into(), seconds_played: u32::MAX, goals_against: 1, ..Default::default() };
        let g = SeasonDataset::new(2025, "R", "Damen", 43, vec![keeper.clone()]);
        let h = SeasonDataset::new(2025, "P", "Damen", 43, vec![keeper]);
        let agg = merge(&[g, h], Grouping::Season(2025));
        assert_eq!(agg.records[0].seconds_played, u32::MAX);
        assert_eq!(agg.records[0].goals_against, 2);
    }
}
