//! Persisted player profile.
//!
//! The profile lives in a small JSON file next to the client. Reading is
//! forgiving: a missing, unreadable or corrupt file yields the default profile
//! so the client can always start. Writing reports errors to the caller.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write profile {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed profile {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub gold: u32,
    pub extractions: u32,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            gold: 0,
            extractions: 0,
        }
    }
}

pub struct ProfileStore {
    path: PathBuf,
    profile: Profile,
}

impl ProfileStore {
    /// Opens the profile at `path`, falling back to the default on any error.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profile = match Self::load(&path) {
            Ok(profile) => {
                info!(
                    "Loaded profile {} ({} gold, {} extractions)",
                    profile.name, profile.gold, profile.extractions
                );
                profile
            }
            Err(e) => {
                warn!("{}; starting with a fresh profile", e);
                Profile::default()
            }
        };
        Self { path, profile }
    }

    pub fn load(path: &Path) -> Result<Profile, ProfileError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ProfileError::Format {
            path: display,
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn save(&self) -> Result<(), ProfileError> {
        let display = self.path.display().to_string();
        let text = serde_json::to_string_pretty(&self.profile).map_err(|source| {
            ProfileError::Format {
                path: display.clone(),
                source,
            }
        })?;
        fs::write(&self.path, text).map_err(|source| ProfileError::Write {
            path: display,
            source,
        })
    }

    /// Applies `change` and rewrites the file.
    pub fn update<F>(&mut self, change: F) -> Result<(), ProfileError>
    where
        F: FnOnce(&mut Profile),
    {
        change(&mut self.profile);
        self.save()
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), ProfileError> {
        self.update(|p| p.name = name.to_string())
    }

    pub fn add_rewards(&mut self, gold: u32, extractions: u32) -> Result<(), ProfileError> {
        self.update(|p| {
            p.gold = p.gold.saturating_add(gold);
            p.extractions = p.extractions.saturating_add(extractions);
        })
    }
}
