// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use tictactoe_common::{BOARDS_COLLECTION, LOBBIES_COLLECTION, USERS_COLLECTION, expand_env_vars};
use tracing::{info, warn};

pub const CONFIG_PATH_ENV: &str = "GAME_SYNC_CONFIG_PATH";
pub const DEFAULT_FEED_CAPACITY: usize = 512;
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionConfig {
    /// Upper bound on live keys; `None` means unbounded.
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Advisory only, the in-memory bucket keeps entries until they are deleted.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionsConfig {
    #[serde(default)]
    pub lobbies: CollectionConfig,
    #[serde(default)]
    pub boards: CollectionConfig,
    #[serde(default)]
    pub users: CollectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Events buffered per subscriber before it is considered lagging.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    #[serde(default)]
    pub collections: CollectionsConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            feed_capacity: DEFAULT_FEED_CAPACITY,
            collections: CollectionsConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn collection_names() -> [&'static str; 3] {
        [LOBBIES_COLLECTION, BOARDS_COLLECTION, USERS_COLLECTION]
    }

    pub fn collection(&self, name: &str) -> CollectionConfig {
        match name {
            LOBBIES_COLLECTION => self.collections.lobbies.clone(),
            BOARDS_COLLECTION => self.collections.boards.clone(),
            USERS_COLLECTION => self.collections.users.clone(),
            _ => CollectionConfig::default(),
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        let mut config: StoreConfig = serde_yaml::from_str(&expand_env_vars(raw))?;
        config.feed_capacity = config.feed_capacity.max(1);
        Ok(config)
    }
}

fn default_feed_capacity() -> usize {
    DEFAULT_FEED_CAPACITY
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_TTL_SECONDS
}

/// Reads the YAML file named by `GAME_SYNC_CONFIG_PATH`, falling back to
/// defaults when the variable is unset or the file cannot be used.
pub fn load_store_config() -> StoreConfig {
    let Some(path) = std::env::var(CONFIG_PATH_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return StoreConfig::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read store config file");
            return StoreConfig::default();
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, "store config file is empty");
        return StoreConfig::default();
    }

    match StoreConfig::from_yaml(&raw) {
        Ok(config) => {
            info!(
                path = %path,
                feed_capacity = config.feed_capacity,
                lobbies_max_entries = ?config.collections.lobbies.max_entries,
                "loaded store config"
            );
            config
        }
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse store config yaml");
            StoreConfig::default()
        }
    }
}
