//! Consumer-side query view: loads stored datasets, merges them the way a
//! widget asks for, and renders the result as JSON.

use crate::directory::Directory;
use crate::output::OutputStore;
use crate::settings::TeamConfig;
use anyhow::{Context, bail};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sihf_api::{
    AddressKey, AggregateDataset, Grouping, MappingStore, Merger, SeasonDataset, StatLine, merge,
};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SeasonSelector {
    /// Latest season known for the requested teams.
    #[default]
    Current,
    /// Every season known for the requested teams.
    All,
    List(Vec<u16>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseFilter {
    #[default]
    All,
    Regular,
    Playoffs,
}

impl PhaseFilter {
    pub fn accepts(&self, phase: &str) -> bool {
        let regular = phase.to_lowercase().contains("regular");
        match self {
            PhaseFilter::All => true,
            PhaseFilter::Regular => regular,
            PhaseFilter::Playoffs => !regular,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsQuery {
    /// Short codes or names; empty means every configured team.
    pub teams: Vec<String>,
    pub season: SeasonSelector,
    pub phase: PhaseFilter,
    /// Column key; `None` picks the record type's default.
    pub sort: Option<String>,
    pub show_league: bool,
    pub hidden_columns: BTreeSet<String>,
}

impl StatsQuery {
    /// Parse `key=value&key=value` as written in widget attributes, e.g.
    /// `team=1T,2T&season=all&phase=regular&sort=points&showLeague=true&col.assists=false`.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut query = Self::default();
        for pair in raw.trim().trim_start_matches('?').split('&').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("'{pair}' is not key=value"))?;
            let (key, value) = (key.trim(), value.trim());

            if let Some(column) = key.strip_prefix("col.") {
                if !parse_flag(value)? {
                    query.hidden_columns.insert(column.to_owned());
                }
                continue;
            }
            match key.to_ascii_lowercase().as_str() {
                "team" => {
                    query.teams = value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_owned)
                        .collect();
                }
                "season" => query.season = parse_season(value)?,
                "phase" => {
                    query.phase = match value.to_ascii_lowercase().as_str() {
                        "all" => PhaseFilter::All,
                        "regular" => PhaseFilter::Regular,
                        "playoffs" => PhaseFilter::Playoffs,
                        other => bail!("unknown phase '{other}' (expected all, regular or playoffs)"),
                    };
                }
                "sort" => query.sort = Some(value.to_owned()).filter(|s| !s.is_empty()),
                "showleague" => query.show_league = parse_flag(value)?,
                _ => bail!("unknown query key '{key}'"),
            }
        }
        Ok(query)
    }

    fn sort_key<R: StatLine>(&self) -> anyhow::Result<&str> {
        let key = self.sort.as_deref().unwrap_or(R::DEFAULT_SORT);
        if key == "name" || key == "rank" || R::COLUMNS.contains(&key) {
            Ok(key)
        } else {
            bail!("cannot sort {} by '{key}'", R::KIND.label())
        }
    }
}

fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("'{other}' is not a boolean"),
    }
}

fn parse_season(value: &str) -> anyhow::Result<SeasonSelector> {
    match value.to_ascii_lowercase().as_str() {
        "current" | "" => Ok(SeasonSelector::Current),
        "all" => Ok(SeasonSelector::All),
        list => {
            let seasons = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<u16>().with_context(|| format!("'{s}' is not a season year")))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(SeasonSelector::List(seasons))
        }
    }
}

/// Sort in place: goals-against average ascending (missing last), names
/// ascending, every other key descending. Ties fall back to the name.
pub fn sort_records<R: StatLine>(records: &mut [R], key: &str) {
    let by_name = |a: &R, b: &R| a.identity().cmp(b.identity());
    records.sort_by(|a, b| {
        let primary = match key {
            "name" => Ordering::Equal,
            "goalsAgainstAverage" => match (a.metric(key), b.metric(key)) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            _ => {
                let x = a.metric(key).unwrap_or(f64::NEG_INFINITY);
                let y = b.metric(key).unwrap_or(f64::NEG_INFINITY);
                y.total_cmp(&x)
            }
        };
        primary.then_with(|| by_name(a, b))
    });
}

/// Read-only view over the mapping store and the stored datasets.
pub struct StatsView<'a> {
    directory: &'a Directory,
    mappings: &'a MappingStore,
    output: &'a OutputStore,
}

impl<'a> StatsView<'a> {
    pub fn new(directory: &'a Directory, mappings: &'a MappingStore, output: &'a OutputStore) -> Self {
        Self { directory, mappings, output }
    }

    fn teams(&self, query: &StatsQuery) -> anyhow::Result<Vec<&'a TeamConfig>> {
        if query.teams.is_empty() {
            return Ok(self.directory.teams().iter().collect());
        }
        query
            .teams
            .iter()
            .map(|t| self.directory.team(t).with_context(|| format!("unknown team '{t}'")))
            .collect()
    }

    /// Seasons the query covers, oldest first.
    pub fn seasons(&self, teams: &[&TeamConfig], selector: &SeasonSelector) -> Vec<u16> {
        let known: BTreeSet<u16> = teams
            .iter()
            .flat_map(|t| self.mappings.seasons_for(t.league_id, t.team_id))
            .collect();
        match selector {
            SeasonSelector::All => known.into_iter().collect(),
            SeasonSelector::Current => known.last().copied().into_iter().collect(),
            SeasonSelector::List(list) => list.clone(),
        }
    }

    /// Phase documents of one team-season that pass the phase filter.
    fn load_season<R>(
        &self,
        team: &TeamConfig,
        season: u16,
        query: &StatsQuery,
    ) -> anyhow::Result<Vec<SeasonDataset<R>>>
    where
        R: StatLine + DeserializeOwned,
    {
        let key = AddressKey::new(season, team.league_id, team.team_id);
        let mut datasets = Vec::new();
        for entry in self.mappings.entries_for(&key) {
            if !query.phase.accepts(&entry.phase) {
                continue;
            }
            let Some(mut dataset) = self.output.read::<R>(R::KIND, &team.name, season, &entry.phase)? else {
                warn!("no {} document for {} {season} {}", R::KIND.label(), team.name, entry.phase);
                continue;
            };
            if query.show_league {
                let label = self.directory.league_label(dataset.league);
                for record in &mut dataset.records {
                    record.set_league(Some(label.clone()));
                }
            }
            datasets.push(dataset);
        }
        Ok(datasets)
    }

    /// Merge phases per season, then seasons and teams into one aggregate,
    /// sorted per the query.
    pub fn aggregate<R>(&self, query: &StatsQuery) -> anyhow::Result<AggregateDataset<R>>
    where
        R: StatLine + DeserializeOwned,
    {
        let sort_key = query.sort_key::<R>()?.to_owned();
        let teams = self.teams(query)?;
        let seasons = self.seasons(&teams, &query.season);
        debug!("view over {} teams, seasons {seasons:?}", teams.len());

        let mut merger = Merger::new();
        for team in &teams {
            for &season in &seasons {
                let phases = self.load_season::<R>(team, season, query)?;
                if phases.is_empty() {
                    continue;
                }
                merger.add_aggregate(&merge(&phases, Grouping::Season(season)));
            }
        }

        let grouping = match seasons.as_slice() {
            [only] => Grouping::Season(*only),
            _ => Grouping::Merged,
        };
        let mut aggregate = merger.finish(grouping);
        sort_records(&mut aggregate.records, &sort_key);
        Ok(aggregate)
    }

    /// The aggregate as JSON, restricted to the visible columns.
    pub fn render<R>(&self, query: &StatsQuery) -> anyhow::Result<Value>
    where
        R: StatLine + DeserializeOwned + Serialize,
    {
        let aggregate = self.aggregate::<R>(query)?;
        let columns: Vec<&str> = R::COLUMNS
            .iter()
            .copied()
            .filter(|c| !query.hidden_columns.contains(*c))
            .collect();
        for hidden in &query.hidden_columns {
            if !R::COLUMNS.contains(&hidden.as_str()) {
                warn!("ignoring unknown column '{hidden}'");
            }
        }

        let mut value = serde_json::to_value(&aggregate).context("serializing aggregate")?;
        if let Some(Value::Array(records)) = value.get_mut("records") {
            for record in records.iter_mut().filter_map(Value::as_object_mut) {
                record.retain(|k, _| !query.hidden_columns.contains(k));
                if !query.show_league {
                    record.remove("league");
                }
            }
        }
        if let Some(object) = value.as_object_mut() {
            object.insert("columns".into(), serde_json::json!(columns));
            object.insert("showLeague".into(), Value::Bool(query.show_league));
        }
        Ok(value)
    }
}
