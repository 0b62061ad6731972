//! On-disk persistence of durable per-profile isolation state
//!
//! Each profile is written to `profile-<id>.json` in the store directory.
//! Writes go to a temporary file first and are renamed into place.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::IsolatedOriginSource;
use crate::browsing::ProfileId;
use crate::origin::{Origin, OriginPattern, Site};
use crate::utils::Result;

/// Durable state of one profile, in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub opt_in_origins: BTreeSet<Origin>,
    pub isolated_origins: Vec<(OriginPattern, IsolatedOriginSource)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
enum PersistedPattern {
    Origin(String),
    Site(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    pattern: PersistedPattern,
    source: IsolatedOriginSource,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedProfile {
    #[serde(default)]
    opt_in_origins: Vec<String>,
    #[serde(default)]
    isolated_origins: Vec<PersistedEntry>,
}

impl From<&ProfileSnapshot> for PersistedProfile {
    fn from(snapshot: &ProfileSnapshot) -> Self {
        Self {
            opt_in_origins: snapshot.opt_in_origins.iter().map(Origin::to_string).collect(),
            isolated_origins: snapshot
                .isolated_origins
                .iter()
                .map(|(pattern, source)| PersistedEntry {
                    pattern: match pattern {
                        OriginPattern::Site(site) => PersistedPattern::Site(site.to_string()),
                        other => PersistedPattern::Origin(other.to_string()),
                    },
                    source: source.clone(),
                })
                .collect(),
        }
    }
}

impl PersistedProfile {
    /// Convert back, dropping entries that no longer parse
    fn into_snapshot(self) -> ProfileSnapshot {
        let opt_in_origins = self
            .opt_in_origins
            .iter()
            .filter_map(|s| Origin::parse(s).ok())
            .filter(|origin| !origin.is_opaque())
            .collect();
        let isolated_origins = self
            .isolated_origins
            .into_iter()
            .filter_map(|entry| {
                let pattern = match &entry.pattern {
                    PersistedPattern::Origin(s) => OriginPattern::parse(s),
                    PersistedPattern::Site(s) => Site::parse(s).map(OriginPattern::Site),
                };
                match pattern {
                    Ok(pattern) => Some((pattern, entry.source)),
                    Err(e) => {
                        log::warn!("Dropping persisted isolation entry: {}", e);
                        None
                    }
                }
            })
            .collect();
        ProfileSnapshot {
            opt_in_origins,
            isolated_origins,
        }
    }
}

/// Directory-backed store of profile snapshots
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, profile: ProfileId) -> PathBuf {
        self.dir.join(format!("profile-{}.json", profile))
    }

    /// Read a profile's snapshot; `None` if it was never saved
    pub fn load(&self, profile: ProfileId) -> Result<Option<ProfileSnapshot>> {
        let path = self.path_for(profile);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let persisted: PersistedProfile = serde_json::from_str(&contents)?;
        Ok(Some(persisted.into_snapshot()))
    }

    /// Write a profile's snapshot, replacing any earlier one
    pub fn save(&self, profile: ProfileId, snapshot: &ProfileSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(profile);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&PersistedProfile::from(snapshot))?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        log::debug!("Saved isolation state for profile {} to {}", profile, path.display());
        Ok(())
    }

    /// Delete a profile's file if present
    pub fn remove(&self, profile: ProfileId) -> Result<()> {
        let path = self.path_for(profile);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
