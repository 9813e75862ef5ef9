use log::{info, warn};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("json error in config file: {source}"))]
    Json { source: serde_json::Error },

    #[snafu(display("io error with config file: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("try to save without path"))]
    PathNotSet,

    #[snafu(display("cannot parse proxy from: {source}"))]
    ProxyParse { source: reqwest::Error },
}
type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    config_path: Option<PathBuf>,

    pub root_storage_dir: String,
    pub proxy_all: String,
    pub deviantart: DeviantArtConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: None,
            root_storage_dir: dirs::home_dir()
                .unwrap_or_default()
                .join(".magpie")
                .to_string_lossy()
                .to_string(),
            proxy_all: "".to_string(),
            deviantart: DeviantArtConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviantArtConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub proxy_api: String,
    /// Account the replica follows; also names the database file.
    pub account: String,
    pub gallery: String,
    /// Metadata snapshots older than this many days are refreshed.
    pub metadata_refresh_days: i64,
}

impl Default for DeviantArtConfig {
    fn default() -> Self {
        Self {
            client_id: "".to_string(),
            client_secret: "".to_string(),
            refresh_token: "".to_string(),
            proxy_api: "".to_string(),
            account: "".to_string(),
            gallery: "all".to_string(),
            metadata_refresh_days: 7,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            info!("creating config file: {}", path.to_string_lossy());
            let defaults = Config {
                config_path: Some(path.to_owned()),
                ..Default::default()
            };

            defaults.save()?;
            Ok(defaults)
        } else {
            let file = File::open(path).context(IoSnafu)?;
            let mut config_loaded: Config = serde_json::from_reader(file).context(JsonSnafu)?;
            config_loaded.config_path = Some(PathBuf::from(path));
            config_loaded.save()?;
            Ok(config_loaded)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| PathNotSetSnafu.build())?;
        if let Some(p) = path.parent() {
            std::fs::create_dir_all(p).context(IoSnafu)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .context(IoSnafu)?;
        serde_json::to_writer_pretty(file, &self).context(JsonSnafu)
    }

    pub fn sub_dir(&self, dir: impl AsRef<Path>) -> PathBuf {
        let dir = dir.as_ref();
        if dir.is_relative() {
            let rel = PathBuf::from(&self.root_storage_dir).join(dir);
            match rel.canonicalize() {
                Ok(abs) => abs,
                Err(e) => {
                    warn!(
                        "cannot canonicalize path: {}, error: {}",
                        rel.to_string_lossy(),
                        e
                    );
                    rel
                }
            }
        } else {
            dir.to_owned()
        }
    }

    /// Database file for the selected account, one replica file per account.
    pub fn database_path(&self, account: Option<&str>) -> PathBuf {
        let name = account
            .filter(|a| !a.is_empty())
            .or_else(|| Some(self.deviantart.account.as_str()).filter(|a| !a.is_empty()))
            .unwrap_or("deviantart_data");
        PathBuf::from(&self.root_storage_dir).join(format!("{name}.sqlite"))
    }

    /// Where the refreshed OAuth token value is persisted between runs.
    pub fn token_path(&self) -> PathBuf {
        PathBuf::from(&self.root_storage_dir).join("token.json")
    }

    pub fn pxoxy(&self, url: &str) -> Result<Option<reqwest::Proxy>> {
        use reqwest::Proxy;
        if !url.is_empty() {
            Ok(Some(Proxy::all(url).context(ProxyParseSnafu)?))
        } else if !self.proxy_all.is_empty() {
            Ok(Some(Proxy::all(&self.proxy_all).context(ProxyParseSnafu)?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let created = Config::from_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.deviantart.gallery, "all");

        let mut edited = created.clone();
        edited.deviantart.account = "somecreator".to_string();
        edited.save().unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.deviantart.account, "somecreator");
        assert_eq!(
            loaded.database_path(None).file_name().unwrap(),
            "somecreator.sqlite"
        );
        assert_eq!(
            loaded.database_path(Some("other")).file_name().unwrap(),
            "other.sqlite"
        );
    }
}
