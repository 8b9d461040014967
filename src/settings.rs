use anyhow::{Context, bail};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use sihf_api::client::SIHF_STATS_BASE;
use sihf_api::{ResolveMode, RetryPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// One club team as configured for ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    /// Short code used in view queries, e.g. `1T`.
    pub key: String,
    pub name: String,
    pub league_id: u32,
    pub team_id: u32,
}

impl TeamConfig {
    fn new(key: &str, name: &str, league_id: u32, team_id: u32) -> Self {
        Self { key: key.into(), name: name.into(), league_id, team_id }
    }
}

pub fn default_teams() -> Vec<TeamConfig> {
    vec![
        TeamConfig::new("1T", "1 Mannschaft", 10, 103941),
        TeamConfig::new("2T", "2 Mannschaft", 19, 104319),
        TeamConfig::new("D", "Damen", 43, 103700),
        TeamConfig::new("S", "Senioren", 37, 105810),
    ]
}

/// Seasons are named after the year they end in; August starts the next one.
pub fn current_season(today: NaiveDate) -> u16 {
    let year = if today.month() >= 8 { today.year() + 1 } else { today.year() };
    u16::try_from(year).unwrap_or(u16::MAX)
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub mappings_path: PathBuf,
    pub out_dir: PathBuf,
    pub mode: ResolveMode,
    pub seasons: Vec<u16>,
    pub teams: Vec<TeamConfig>,
    pub retry: RetryPolicy,
    /// Number of games whose rosters feed enrichment; 0 disables it.
    pub enrich_games: usize,
    pub min_season: u16,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), Local::now().date_naive())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        today: NaiveDate,
    ) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let mode = match var("RINKSTATS_MODE") {
            Some(raw) => raw
                .parse::<ResolveMode>()
                .map_err(anyhow::Error::msg)
                .context("invalid RINKSTATS_MODE")?,
            None => ResolveMode::default(),
        };

        let seasons = match var("RINKSTATS_SEASONS") {
            Some(raw) => parse_seasons(&raw).context("invalid RINKSTATS_SEASONS")?,
            None => vec![current_season(today)],
        };

        let teams = match var("RINKSTATS_TEAMS") {
            Some(path) => load_teams(&path)?,
            None => default_teams(),
        };

        let defaults = RetryPolicy::default();
        let max_attempts = parse_number(var("RINKSTATS_MAX_ATTEMPTS"), "RINKSTATS_MAX_ATTEMPTS", defaults.max_attempts)?;
        let delay_ms = parse_number(var("RINKSTATS_RETRY_DELAY_MS"), "RINKSTATS_RETRY_DELAY_MS", 1000u64)?;
        if max_attempts == 0 {
            bail!("RINKSTATS_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            base_url: var("RINKSTATS_BASE_URL").unwrap_or_else(|| SIHF_STATS_BASE.to_owned()),
            mappings_path: var("RINKSTATS_MAPPINGS")
                .map_or_else(|| PathBuf::from("data").join("mappings.json"), PathBuf::from),
            out_dir: var("RINKSTATS_OUT_DIR").map_or_else(|| PathBuf::from("data"), PathBuf::from),
            mode,
            seasons,
            teams,
            retry: RetryPolicy { max_attempts, base_delay: Duration::from_millis(delay_ms) },
            enrich_games: parse_number(var("RINKSTATS_ENRICH_GAMES"), "RINKSTATS_ENRICH_GAMES", 0usize)?,
            min_season: parse_number(var("RINKSTATS_MIN_SEASON"), "RINKSTATS_MIN_SEASON", 2014u16)?,
        })
    }
}

fn parse_number<N>(raw: Option<String>, name: &str, default: N) -> anyhow::Result<N>
where
    N: std::str::FromStr,
    N::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw.parse().with_context(|| format!("invalid {name}: '{raw}'")),
        None => Ok(default),
    }
}

fn parse_seasons(raw: &str) -> anyhow::Result<Vec<u16>> {
    let mut seasons = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let season: u16 = part.parse().with_context(|| format!("'{part}' is not a season year"))?;
        if !seasons.contains(&season) {
            seasons.push(season);
        }
    }
    if seasons.is_empty() {
        bail!("no seasons given");
    }
    Ok(seasons)
}

fn load_teams(path: &str) -> anyhow::Result<Vec<TeamConfig>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading team file {path}"))?;
    let teams: Vec<TeamConfig> =
        serde_json::from_str(&content).with_context(|| format!("parsing team file {path}"))?;
    if teams.is_empty() {
        bail!("team file {path} lists no teams");
    }
    Ok(teams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let env: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        Settings::from_lookup(|name| env.get(name).cloned(), date(2025, 3, 1))
    }

    #[test]
    fn season_turns_over_in_august() {
        assert_eq!(current_season(date(2025, 7, 31)), 2025);
        assert_eq!(current_season(date(2025, 8, 1)), 2026);
        assert_eq!(current_season(date(2026, 1, 15)), 2026);
    }

    #[test]
    fn defaults_apply_without_environment() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.base_url, SIHF_STATS_BASE);
        assert_eq!(s.mappings_path, PathBuf::from("data").join("mappings.json"));
        assert_eq!(s.out_dir, PathBuf::from("data"));
        assert_eq!(s.mode, ResolveMode::Discovery);
        assert_eq!(s.seasons, vec![2025]);
        assert_eq!(s.teams, default_teams());
        assert_eq!(s.retry, RetryPolicy::default());
        assert_eq!(s.enrich_games, 0);
        assert_eq!(s.min_season, 2014);
    }

    #[test]
    fn environment_overrides_defaults() {
        let s = settings(&[
            ("RINKSTATS_MODE", "strict"),
            ("RINKSTATS_SEASONS", "2024, 2025,2024"),
            ("RINKSTATS_MAX_ATTEMPTS", "5"),
            ("RINKSTATS_RETRY_DELAY_MS", "250"),
            ("RINKSTATS_ENRICH_GAMES", "6"),
            ("RINKSTATS_OUT_DIR", "/tmp/out"),
        ])
        .unwrap();
        assert_eq!(s.mode, ResolveMode::Strict);
        assert_eq!(s.seasons, vec![2024, 2025]);
        assert_eq!(s.retry.max_attempts, 5);
        assert_eq!(s.retry.base_delay, Duration::from_millis(250));
        assert_eq!(s.enrich_games, 6);
        assert_eq!(s.out_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(settings(&[("RINKSTATS_MODE", "sometimes")]).is_err());
        assert!(settings(&[("RINKSTATS_SEASONS", "2025,next")]).is_err());
        assert!(settings(&[("RINKSTATS_MAX_ATTEMPTS", "0")]).is_err());
        assert!(settings(&[("RINKSTATS_RETRY_DELAY_MS", "-1")]).is_err());
    }

    #[test]
    fn teams_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teams.json");
        std::fs::write(
            &path,
            r#"[{"key":"U20","name":"Junioren Top","leagueId":18,"teamId":200001}]"#,
        )
        .unwrap();
        let s = settings(&[("RINKSTATS_TEAMS", path.to_str().unwrap())]).unwrap();
        assert_eq!(s.teams, vec![TeamConfig::new("U20", "Junioren Top", 18, 200001)]);

        let missing = dir.path().join("nope.json");
        assert!(settings(&[("RINKSTATS_TEAMS", missing.to_str().unwrap())]).is_err());
    }
}
