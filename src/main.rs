mod directory;
mod output;
mod pipeline;
mod settings;
mod view;

use crate::directory::Directory;
use crate::output::OutputStore;
use crate::pipeline::{Pipeline, UnitOutcome};
use crate::settings::Settings;
use crate::view::{StatsQuery, StatsView};
use anyhow::{Context, bail};
use log::info;
use sihf_api::{GoalieRecord, MappingResolver, MappingStore, PlayerRecord, SihfApi};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

enum Command {
    Ingest,
    View { kind: String, query: String },
    Standings { season: u16, league_id: u32 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(command) = handle_cli_args()? else {
        return Ok(());
    };

    better_panic::install();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rinkstats=info,sihf_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = Settings::load().context("loading settings")?;

    match command {
        Command::Ingest => ingest(&settings).await,
        Command::View { kind, query } => view(&settings, &kind, &query),
        Command::Standings { season, league_id } => standings(&settings, season, league_id).await,
    }
}

/// `Ok(None)` when the arguments were fully handled (help, version).
fn handle_cli_args() -> anyhow::Result<Option<Command>> {
    let mut args = std::env::args().skip(1);
    let Some(arg) = args.next() else {
        return Ok(Some(Command::Ingest));
    };

    match arg.as_str() {
        "-h" | "--help" => {
            println!("{}", usage_text());
            Ok(None)
        }
        "-V" | "--version" => {
            println!("rinkstats {}", env!("CARGO_PKG_VERSION"));
            Ok(None)
        }
        "view" => {
            let Some(kind) = args.next() else {
                bail!("view needs players or goalies\n\n{}", usage_text());
            };
            let query = args.collect::<Vec<_>>().join("&");
            Ok(Some(Command::View { kind, query }))
        }
        "standings" => {
            let (Some(season), Some(league)) = (args.next(), args.next()) else {
                bail!("standings needs a season and a league id\n\n{}", usage_text());
            };
            Ok(Some(Command::Standings {
                season: season.parse().with_context(|| format!("invalid season '{season}'"))?,
                league_id: league.parse().with_context(|| format!("invalid league id '{league}'"))?,
            }))
        }
        _ => {
            eprintln!("Unknown argument: {arg}\n\n{}", usage_text());
            std::process::exit(2);
        }
    }
}

fn usage_text() -> &'static str {
    "rinkstats - SIHF player and goaltender statistics

Usage:
  rinkstats                         fetch every configured team and season
  rinkstats view players <query>    print a merged player table as JSON
  rinkstats view goalies <query>    print a merged goaltender table as JSON
  rinkstats standings <season> <league>
                                    print the raw standings table as JSON
  rinkstats --help
  rinkstats --version

Query:
  team=1T,2T&season=all|current|2024,2025&phase=all|regular|playoffs
  &sort=<column>&showLeague=true&col.<column>=false

Environment:
  RINKSTATS_BASE_URL        Statistics endpoint (default https://data.sihf.ch/Statistic/api/cms)
  RINKSTATS_MAPPINGS        Mapping store (default data/mappings.json)
  RINKSTATS_OUT_DIR         Dataset directory (default data)
  RINKSTATS_MODE            discovery or strict (default discovery)
  RINKSTATS_SEASONS         Comma separated season years (default current season)
  RINKSTATS_TEAMS           JSON team list [{key,name,leagueId,teamId}]
  RINKSTATS_MAX_ATTEMPTS    Requests per fetch (default 3)
  RINKSTATS_RETRY_DELAY_MS  Base retry delay (default 1000)
  RINKSTATS_ENRICH_GAMES    Games used for roster enrichment (default 0, off)
  RINKSTATS_MIN_SEASON      Oldest season fetched (default 2014)
  RUST_LOG                  Log filter (default rinkstats=info,sihf_api=info)"
}

async fn ingest(settings: &Settings) -> anyhow::Result<()> {
    let store = MappingStore::load(&settings.mappings_path)?;
    info!("{} stored mappings in {}", store.len(), settings.mappings_path.display());

    let api = SihfApi::new().with_base_url(settings.base_url.clone()).with_retry(settings.retry);
    let mut pipeline = Pipeline::new(
        api,
        MappingResolver::new(store, settings.mode),
        OutputStore::new(&settings.out_dir),
    )
    .with_enrichment(settings.enrich_games)
    .with_min_season(settings.min_season);

    let reports = pipeline.run(&settings.teams, &settings.seasons).await?;
    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, UnitOutcome::Failed { .. }))
        .count();
    for report in &reports {
        println!("{report}");
    }
    info!("{} units, {failed} failed", reports.len());
    Ok(())
}

fn view(settings: &Settings, kind: &str, raw_query: &str) -> anyhow::Result<()> {
    let query = StatsQuery::parse(raw_query).context("parsing view query")?;
    let store = MappingStore::load(&settings.mappings_path)?;
    let directory = Directory::new(settings.teams.clone());
    let output = OutputStore::new(&settings.out_dir);
    let view = StatsView::new(&directory, &store, &output);

    let json = match kind {
        "players" => view.render::<PlayerRecord>(&query)?,
        "goalies" | "goaltenders" => view.render::<GoalieRecord>(&query)?,
        other => bail!("unknown view '{other}' (expected players or goalies)"),
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn standings(settings: &Settings, season: u16, league_id: u32) -> anyhow::Result<()> {
    let api = SihfApi::new().with_base_url(settings.base_url.clone()).with_retry(settings.retry);
    let table = api
        .fetch_standings(season, league_id)
        .await
        .with_context(|| format!("standings {season} league {league_id}"))?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}
