//! Resolution of (season, league, team) to the region/group addressing the
//! statistics tables require.
//!
//! Resolved entries live in a single JSON document keyed by
//! `"{season}-{leagueId}-{teamId}"`; further phases of the same key are stored
//! as `"{key}-P{n}"`. The store only ever grows: an existing key is never
//! overwritten.

use crate::client::{ApiError, ApiResult, SihfApi, Transport};
use crate::{AddressKey, MappingEntry};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolveMode {
    /// Only stored mappings are used.
    Strict,
    /// Missing mappings are discovered by probing the endpoint.
    #[default]
    Discovery,
}

impl FromStr for ResolveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(ResolveMode::Strict),
            "discovery" | "discover" => Ok(ResolveMode::Discovery),
            other => Err(format!("unknown resolve mode '{other}' (expected strict or discovery)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, MappingEntry>,
}

impl MappingStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store at `path`. A missing file is an empty store; an
    /// unreadable or malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let store_error = |message: String| ApiError::Store { path: path.display().to_string(), message };

        let entries = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| store_error(format!("invalid mapping json: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(store_error(format!("read failed: {e}"))),
        };
        Ok(Self { path: Some(path.to_path_buf()), entries })
    }

    /// Rewrite the whole document. In-memory stores have nothing to write.
    pub fn save(&self) -> ApiResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let store_error = |message: String| ApiError::Store { path: path.display().to_string(), message };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| store_error(format!("create dir failed: {e}")))?;
        }
        let payload = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| store_error(format!("serialize failed: {e}")))?;
        std::fs::write(path, payload).map_err(|e| store_error(format!("write failed: {e}")))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &AddressKey) -> Option<&MappingEntry> {
        self.entries.get(&key.store_key())
    }

    /// Insert unless the key exists. Returns whether the entry was added.
    pub fn insert(&mut self, store_key: String, entry: MappingEntry) -> bool {
        match self.entries.entry(store_key) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Primary entry first, then phase entries by number.
    pub fn entries_for(&self, key: &AddressKey) -> Vec<&MappingEntry> {
        let base = key.store_key();
        let prefix = format!("{base}-P");
        let mut phases: Vec<(usize, &MappingEntry)> = self
            .entries
            .iter()
            .filter_map(|(k, entry)| {
                let n = k.strip_prefix(&prefix)?.parse::<usize>().ok()?;
                Some((n, entry))
            })
            .collect();
        phases.sort_by_key(|(n, _)| *n);

        self.entries
            .get(&base)
            .into_iter()
            .chain(phases.into_iter().map(|(_, entry)| entry))
            .collect()
    }

    /// Seasons with at least one entry for a team.
    pub fn seasons_for(&self, league_id: u32, team_id: u32) -> BTreeSet<u16> {
        self.entries
            .iter()
            .filter(|(_, e)| e.league_id == league_id && e.team_id == team_id)
            .filter_map(|(k, _)| k.split('-').next()?.parse::<u16>().ok())
            .collect()
    }
}

/// Owns the mapping store; the single writer to it.
#[derive(Debug)]
pub struct MappingResolver {
    store: MappingStore,
    mode: ResolveMode,
}

impl MappingResolver {
    pub fn new(store: MappingStore, mode: ResolveMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn into_store(self) -> MappingStore {
        self.store
    }

    /// The addressing for `key`: the stored entry, or in discovery mode the
    /// first region × phase combination that returns data.
    pub async fn resolve<T: Transport>(
        &mut self,
        api: &SihfApi<T>,
        key: &AddressKey,
    ) -> ApiResult<MappingEntry> {
        if let Some(entry) = self.store.get(key) {
            return Ok(entry.clone());
        }
        if self.mode == ResolveMode::Strict {
            return Err(ApiError::NoMappingFound(*key));
        }
        let found = self.discover(api, key, true).await?;
        self.persist(key, &found)?;
        found.into_iter().next().ok_or(ApiError::NoMappingFound(*key))
    }

    /// Every phase known for `key`. Discovery records all combinations that
    /// return data, in probing order.
    pub async fn resolve_all<T: Transport>(
        &mut self,
        api: &SihfApi<T>,
        key: &AddressKey,
    ) -> ApiResult<Vec<MappingEntry>> {
        let stored: Vec<MappingEntry> = self.store.entries_for(key).into_iter().cloned().collect();
        if !stored.is_empty() {
            return Ok(stored);
        }
        if self.mode == ResolveMode::Strict {
            return Err(ApiError::NoMappingFound(*key));
        }
        let found = self.discover(api, key, false).await?;
        if found.is_empty() {
            return Err(ApiError::NoMappingFound(*key));
        }
        self.persist(key, &found)?;
        Ok(found)
    }

    /// Probe regions (outer) × phases (inner) in upstream order. A probe that
    /// fails counts as empty.
    async fn discover<T: Transport>(
        &self,
        api: &SihfApi<T>,
        key: &AddressKey,
        first_only: bool,
    ) -> ApiResult<Vec<MappingEntry>> {
        let candidates = api.fetch_candidates(key).await?;
        debug!(
            "discovering {key}: {} regions x {} phases",
            candidates.regions.len(),
            candidates.phases.len()
        );

        let mut found = Vec::new();
        for region in &candidates.regions {
            for phase in &candidates.phases {
                match api.probe(key, &region.alias, &phase.alias).await {
                    Ok(true) => {
                        info!("{key}: region {} / phase '{}' has data", region.alias, phase.text);
                        found.push(MappingEntry {
                            league_id: key.league_id,
                            team_id: key.team_id,
                            region: region.alias.clone(),
                            group: phase.alias.clone(),
                            phase: phase.text.clone(),
                        });
                        if first_only {
                            return Ok(found);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("{key}: probe {}/{} failed: {e}", region.alias, phase.alias),
                }
            }
        }
        Ok(found)
    }

    fn persist(&mut self, key: &AddressKey, found: &[MappingEntry]) -> ApiResult<()> {
        if found.is_empty() {
            return Ok(());
        }
        let mut added = false;
        for (n, entry) in found.iter().enumerate() {
            let store_key = if n == 0 { key.store_key() } else { key.phase_key(n) };
            added |= self.store.insert(store_key, entry.clone());
        }
        if added { self.store.save() } else { Ok(()) }
    }
}
