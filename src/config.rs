//! Session tuning knobs

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Hard upper bound on lobby slots.
pub const MAX_MEMBERS: usize = 7;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of usable lobby slots, clamped to [`MAX_MEMBERS`].
    pub max_members: usize,
    /// How long the host waits for every member's game link.
    pub preparation_timeout_secs: u64,
    /// Money credited per dominated room per tick.
    pub income_per_room: i64,
    /// Inbound packets read per member per update.
    pub max_packets_per_tick: usize,
    /// Actions written straight into unit bookkeeping on followers.
    pub continuous_actions: Vec<String>,
    /// Club catalog used when finalizing team themes.
    pub clubs: Vec<String>,
    pub roster_size: usize,
    pub random_character: String,
    pub random_club: String,
    pub default_display_name: String,
    /// Per-direction queue bound of in-process links.
    pub link_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_members: MAX_MEMBERS,
            preparation_timeout_secs: 20,
            income_per_room: 10,
            max_packets_per_tick: 16,
            continuous_actions: vec!["walk".to_string(), "capture".to_string()],
            clubs: [
                "karate", "judo", "kendo", "boxing", "wrestling", "sumo", "fencing", "archery",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            roster_size: 5,
            random_character: "__random__".to_string(),
            random_club: "random".to_string(),
            default_display_name: "???".to_string(),
            link_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid session config")?;
        Ok(config.normalized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config '{}'", path.display()))?;
        Self::from_json(&json)
    }

    pub fn preparation_timeout(&self) -> Duration {
        Duration::from_secs(self.preparation_timeout_secs)
    }

    pub fn capacity(&self) -> usize {
        self.max_members.clamp(1, MAX_MEMBERS)
    }

    pub fn is_continuous(&self, action: &str) -> bool {
        self.continuous_actions.iter().any(|a| a == action)
    }

    fn normalized(mut self) -> Self {
        self.max_members = self.capacity();
        self.link_capacity = self.link_capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SessionConfig::from_json(r#"{ "income_per_room": 25, "max_members": 40 }"#)
            .unwrap();
        assert_eq!(config.income_per_room, 25);
        assert_eq!(config.max_members, MAX_MEMBERS);
        assert_eq!(config.preparation_timeout(), Duration::from_secs(20));
        assert!(config.is_continuous("walk"));
        assert!(!config.is_continuous("train"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(SessionConfig::from_json("not json").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = std::env::temp_dir().join(format!("cp-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.json");
        std::fs::write(&path, r#"{ "clubs": ["a", "b"] }"#).unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.clubs, vec!["a".to_string(), "b".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
