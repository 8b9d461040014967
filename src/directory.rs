use crate::settings::TeamConfig;
use std::collections::BTreeMap;

/// Immutable lookup data for presenting datasets: team short codes and
/// league labels. Built once at startup and handed to whoever needs it.
#[derive(Debug, Clone)]
pub struct Directory {
    teams: Vec<TeamConfig>,
    leagues: BTreeMap<u32, String>,
}

const LEAGUES: &[(u32, &str)] = &[
    (10, "2. Liga"),
    (18, "3. Liga"),
    (19, "4. Liga"),
    (33, "Senioren A"),
    (35, "Senioren B"),
    (36, "Senioren C"),
    (37, "Senioren D"),
    (39, "Veteranen A"),
    (40, "Veteranen B"),
    (41, "Division 50+"),
    (43, "SWHL B"),
    (101, "SWHL C"),
    (104, "SWHL D"),
];

impl Directory {
    pub fn new(teams: Vec<TeamConfig>) -> Self {
        let leagues = LEAGUES.iter().map(|(id, label)| (*id, (*label).to_owned())).collect();
        Self { teams, leagues }
    }

    pub fn teams(&self) -> &[TeamConfig] {
        &self.teams
    }

    /// A team by short code or full name, ignoring case.
    pub fn team(&self, code_or_name: &str) -> Option<&TeamConfig> {
        let wanted = code_or_name.trim();
        self.teams
            .iter()
            .find(|t| t.key.eq_ignore_ascii_case(wanted) || t.name.eq_ignore_ascii_case(wanted))
    }

    pub fn league_label(&self, league_id: u32) -> String {
        self.leagues
            .get(&league_id)
            .cloned()
            .unwrap_or_else(|| format!("Liga {league_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::default_teams;

    #[test]
    fn resolves_codes_and_names() {
        let dir = Directory::new(default_teams());
        assert_eq!(dir.team("1T").map(|t| t.name.as_str()), Some("1 Mannschaft"));
        assert_eq!(dir.team(" d ").map(|t| t.team_id), Some(103700));
        assert_eq!(dir.team("senioren").map(|t| t.key.as_str()), Some("S"));
        assert!(dir.team("3T").is_none());
    }

    #[test]
    fn unknown_leagues_get_a_generic_label() {
        let dir = Directory::new(Vec::new());
        assert_eq!(dir.league_label(43), "SWHL B");
        assert_eq!(dir.league_label(999), "Liga 999");
    }
}
