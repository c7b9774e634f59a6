use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::is_valid_accession;
use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-sync.json";
pub const DEFAULT_SKIP_LIST_PREFIX: &str = "skiplist";
pub const DEFAULT_COMMIT_WINDOW: usize = 1000;
pub const DEFAULT_SNAPSHOT_FILE: &str = "knowledge-store.json";
pub const DEFAULT_DATABASE_NAME: &str = "gk_central";
pub const DEFAULT_INSTANCE_BROWSER_URL: &str =
    "https://curator.reactome.org/cgi-bin/instancebrowser";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub update_directory: Utf8PathBuf,
    #[serde(default)]
    pub store_snapshot: Option<Utf8PathBuf>,
    #[serde(default)]
    pub skip_list_directory: Option<Utf8PathBuf>,
    #[serde(default)]
    pub skip_list_prefix: Option<String>,
    #[serde(default)]
    pub commit_window: Option<usize>,
    #[serde(default)]
    pub curator: Option<Curator>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub instance_browser_url: Option<String>,
    #[serde(default)]
    pub ensembl_base_url: Option<String>,
    #[serde(default)]
    pub uniprot_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Curator {
    pub surname: String,
    pub initials: String,
}

impl Default for Curator {
    fn default() -> Self {
        Self {
            surname: "Weiser".to_string(),
            initials: "JD".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub update_directory: Utf8PathBuf,
    pub store_snapshot: Utf8PathBuf,
    pub skip_list_directory: Utf8PathBuf,
    pub skip_list_prefix: String,
    pub commit_window: usize,
    pub curator: Curator,
    pub database_name: String,
    pub instance_browser_url: String,
    pub ensembl_base_url: Option<String>,
    pub uniprot_base_url: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| KiraError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        if config.update_directory.as_str().trim().is_empty() {
            return Err(KiraError::ConfigParse(
                "update_directory must not be empty".to_string(),
            ));
        }
        let commit_window = config.commit_window.unwrap_or(DEFAULT_COMMIT_WINDOW);
        if commit_window == 0 {
            return Err(KiraError::ConfigParse(
                "commit_window must be at least 1".to_string(),
            ));
        }

        let update_directory = config.update_directory;
        let store_snapshot = config
            .store_snapshot
            .unwrap_or_else(|| update_directory.join(DEFAULT_SNAPSHOT_FILE));
        let skip_list_directory = config
            .skip_list_directory
            .unwrap_or_else(|| update_directory.clone());

        Ok(ResolvedConfig {
            store_snapshot,
            skip_list_directory,
            skip_list_prefix: config
                .skip_list_prefix
                .filter(|prefix| !prefix.is_empty())
                .unwrap_or_else(|| DEFAULT_SKIP_LIST_PREFIX.to_string()),
            commit_window,
            curator: config.curator.unwrap_or_default(),
            database_name: config
                .database_name
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            instance_browser_url: config
                .instance_browser_url
                .unwrap_or_else(|| DEFAULT_INSTANCE_BROWSER_URL.to_string()),
            ensembl_base_url: config.ensembl_base_url,
            uniprot_base_url: config.uniprot_base_url,
            update_directory,
        })
    }
}

impl ResolvedConfig {
    pub fn load_skip_list(&self) -> Result<BTreeSet<String>, KiraError> {
        load_skip_list(&self.skip_list_directory, &self.skip_list_prefix)
    }
}

/// Valid accessions listed in files under `directory` whose names start with `prefix`.
pub fn load_skip_list(directory: &Utf8Path, prefix: &str) -> Result<BTreeSet<String>, KiraError> {
    let mut accessions = BTreeSet::new();
    if !directory.as_std_path().is_dir() {
        warn!(directory = %directory, "skip list directory not found");
        return Ok(accessions);
    }

    let entries = directory
        .read_dir_utf8()
        .map_err(|err| KiraError::Filesystem(format!("read {directory}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        if !entry.file_name().starts_with(prefix) || !entry.path().is_file() {
            continue;
        }
        let content = fs::read_to_string(entry.path().as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", entry.path())))?;
        for line in content.lines() {
            let line = line.trim();
            if is_valid_accession(line) {
                accessions.insert(line.to_string());
            } else if !line.is_empty() {
                debug!(file = %entry.path(), line, "ignoring skip list line");
            }
        }
    }
    Ok(accessions)
}
