use crate::output::OutputStore;
use crate::settings::TeamConfig;
use anyhow::Context;
use log::{debug, error, info, warn};
use serde::Serialize;
use sihf_api::normalize::enrich;
use sihf_api::{
    AddressKey, ApiError, GoalieRecord, HttpTransport, MappingEntry, MappingResolver, PlayerRecord,
    RosterEntry, SeasonDataset, SihfApi, StatLine, StatsKind, Transport,
};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Written { records: usize, missing: usize },
    Failed { note: String },
}

/// What happened to one (team, season, phase, kind) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub team: String,
    pub season: u16,
    pub phase: Option<String>,
    pub kind: StatsKind,
    pub outcome: UnitOutcome,
}

impl fmt::Display for UnitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = self.phase.as_deref().unwrap_or("-");
        write!(f, "{} {} {} [{}]: ", self.team, self.season, phase, self.kind.label())?;
        match &self.outcome {
            UnitOutcome::Written { records, missing: 0 } => write!(f, "{records} records"),
            UnitOutcome::Written { records, missing } => {
                write!(f, "{records} records, {missing} not enriched")
            }
            UnitOutcome::Failed { note } => write!(f, "failed: {note}"),
        }
    }
}

/// Sequential ingestion batch: team, then season, then phase. A failure
/// inside one unit becomes that unit's note; only mapping store failures
/// stop the batch.
pub struct Pipeline<T: Transport = HttpTransport> {
    api: SihfApi<T>,
    resolver: MappingResolver,
    output: OutputStore,
    enrich_games: usize,
    min_season: u16,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(api: SihfApi<T>, resolver: MappingResolver, output: OutputStore) -> Self {
        Self { api, resolver, output, enrich_games: 0, min_season: 0 }
    }

    pub fn with_enrichment(mut self, games: usize) -> Self {
        self.enrich_games = games;
        self
    }

    pub fn with_min_season(mut self, season: u16) -> Self {
        self.min_season = season;
        self
    }

    pub async fn run(&mut self, teams: &[TeamConfig], seasons: &[u16]) -> anyhow::Result<Vec<UnitReport>> {
        let mut reports = Vec::new();
        for team in teams {
            for &season in seasons {
                if season < self.min_season {
                    debug!("skipping {} {season}: before {}", team.name, self.min_season);
                    continue;
                }
                reports.extend(self.run_team_season(team, season).await?);
            }
        }
        Ok(reports)
    }

    async fn run_team_season(&mut self, team: &TeamConfig, season: u16) -> anyhow::Result<Vec<UnitReport>> {
        let key = AddressKey::new(season, team.league_id, team.team_id);
        let entries = match self.resolver.resolve_all(&self.api, &key).await {
            Ok(entries) => entries,
            Err(e) if e.is_fatal() => {
                return Err(e).context(format!("resolving {} {season}", team.name));
            }
            Err(e) => {
                let note = e.to_string();
                error!("{} {season}: {note}", team.name);
                return Ok([StatsKind::Players, StatsKind::Goaltenders]
                    .into_iter()
                    .map(|kind| UnitReport {
                        team: team.name.clone(),
                        season,
                        phase: None,
                        kind,
                        outcome: UnitOutcome::Failed { note: note.clone() },
                    })
                    .collect());
            }
        };

        let roster = self.roster(&key).await;
        let mut reports = Vec::new();
        for entry in &entries {
            reports.push(self.ingest::<PlayerRecord>(team, &key, entry, roster.as_deref()).await);
            reports.push(self.ingest::<GoalieRecord>(team, &key, entry, roster.as_deref()).await);
        }
        Ok(reports)
    }

    /// Roster of the first games of the season, shared by every phase and
    /// kind of one team-season. `None` when enrichment is off or failed.
    async fn roster(&self, key: &AddressKey) -> Option<Vec<RosterEntry>> {
        if self.enrich_games == 0 {
            return None;
        }
        match self.api.fetch_rosters(key, self.enrich_games).await {
            Ok(roster) => {
                debug!("{key}: {} roster entries for enrichment", roster.len());
                Some(roster)
            }
            Err(e) => {
                warn!("{key}: enrichment skipped: {e}");
                None
            }
        }
    }

    async fn ingest<R>(
        &self,
        team: &TeamConfig,
        key: &AddressKey,
        entry: &MappingEntry,
        roster: Option<&[RosterEntry]>,
    ) -> UnitReport
    where
        R: StatLine + Serialize,
    {
        let dataset = match self.api.fetch_records::<R>(key, entry).await {
            Ok(mut records) => {
                let missing = roster.map(|r| enrich(&mut records, r)).unwrap_or_default();
                let mut dataset = SeasonDataset::new(key.season, &entry.phase, &team.name, entry.league_id, records);
                dataset.missing = missing;
                dataset
            }
            Err(e) => {
                error!("{} {} {} [{}]: {e}", team.name, key.season, entry.phase, R::KIND.label());
                SeasonDataset::failed(key.season, &entry.phase, &team.name, entry.league_id, unit_note(&e))
            }
        };

        let outcome = match (&dataset.note, self.output.write(R::KIND, &dataset)) {
            (_, Err(e)) => UnitOutcome::Failed { note: format!("{e:#}") },
            (Some(note), Ok(_)) => UnitOutcome::Failed { note: note.clone() },
            (None, Ok(path)) => {
                info!("saved {} ({} {})", path.display(), dataset.records.len(), R::KIND.label());
                UnitOutcome::Written { records: dataset.records.len(), missing: dataset.missing.len() }
            }
        };
        UnitReport {
            team: team.name.clone(),
            season: key.season,
            phase: Some(entry.phase.clone()),
            kind: R::KIND,
            outcome,
        }
    }
}

fn unit_note(e: &ApiError) -> String {
    match e {
        ApiError::FetchExhausted { attempts, last, .. } => {
            format!("data unavailable after {attempts} attempts: {last}")
        }
        other => format!("data unavailable: {other}"),
    }
}
