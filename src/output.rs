use anyhow::Context;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sihf_api::{SeasonDataset, StatsKind};
use std::path::PathBuf;

const GOALTENDER_DIR: &str = "Goaltenders";

/// Per-unit dataset documents:
/// `{root}/{team}/{season}-{phase}.json` for players and
/// `{root}/{team}/Goaltenders/{season}-{phase}.json` for goaltenders.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

/// Whitespace runs become `_`.
pub fn team_dir(team: &str) -> String {
    team.split_whitespace().collect::<Vec<_>>().join("_")
}

/// File-name-safe phase label: whitespace runs and `/` become `-`, anything
/// outside `[A-Za-z0-9_-]` is dropped.
pub fn sanitize_phase(phase: &str) -> String {
    phase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .replace('/', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, kind: StatsKind, team: &str, season: u16, phase: &str) -> PathBuf {
        let mut dir = self.root.join(team_dir(team));
        if kind == StatsKind::Goaltenders {
            dir.push(GOALTENDER_DIR);
        }
        dir.join(format!("{season}-{}.json", sanitize_phase(phase)))
    }

    /// Write a dataset, replacing any earlier document for the same unit.
    pub fn write<R: Serialize>(&self, kind: StatsKind, dataset: &SeasonDataset<R>) -> anyhow::Result<PathBuf> {
        let path = self.path(kind, &dataset.team, dataset.season, &dataset.phase);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let payload = serde_json::to_string_pretty(dataset).context("serializing dataset")?;
        std::fs::write(&path, payload).with_context(|| format!("writing {}", path.display()))?;
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// `Ok(None)` when no document exists for the unit.
    pub fn read<R: DeserializeOwned>(
        &self,
        kind: StatsKind,
        team: &str,
        season: u16,
        phase: &str,
    ) -> anyhow::Result<Option<SeasonDataset<R>>> {
        let path = self.path(kind, team, season, phase);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let dataset = serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sihf_api::{GoalieRecord, PlayerRecord};

    #[test]
    fn phase_labels_become_file_safe() {
        assert_eq!(sanitize_phase("Regular Season"), "Regular-Season");
        assert_eq!(sanitize_phase("Playoffs 1/8-Final"), "Playoffs-1-8-Final");
        assert_eq!(sanitize_phase("Qualifikation (Gr. Süd)"), "Qualifikation-Gr-Sd");
    }

    #[test]
    fn paths_follow_team_and_kind() {
        let store = OutputStore::new("data");
        assert_eq!(
            store.path(StatsKind::Players, "1 Mannschaft", 2025, "Regular Season"),
            PathBuf::from("data/1_Mannschaft/2025-Regular-Season.json")
        );
        assert_eq!(
            store.path(StatsKind::Goaltenders, "1  Mannschaft", 2025, "Playoffs"),
            PathBuf::from("data/1_Mannschaft/Goaltenders/2025-Playoffs.json")
        );
    }

    #[test]
    fn written_documents_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let dataset = SeasonDataset::new(
            2025,
            "Regular Season",
            "Damen",
            43,
            vec![PlayerRecord { name: "A. Player".into(), games: 3, points: 2, ..Default::default() }],
        );
        store.write(StatsKind::Players, &dataset).unwrap();

        let back: SeasonDataset<PlayerRecord> =
            store.read(StatsKind::Players, "Damen", 2025, "Regular Season").unwrap().unwrap();
        assert_eq!(back, dataset);

        let none: Option<SeasonDataset<GoalieRecord>> =
            store.read(StatsKind::Goaltenders, "Damen", 2025, "Regular Season").unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn failed_units_keep_their_note() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path());
        let failed = SeasonDataset::<GoalieRecord>::failed(2024, "Playoffs", "Senioren", 37, "unavailable".into());
        let path = store.write(StatsKind::Goaltenders, &failed).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["note"], "unavailable");
        assert_eq!(raw["records"], serde_json::json!([]));
    }
}
