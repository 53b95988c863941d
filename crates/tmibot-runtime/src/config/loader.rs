//! Layered configuration loading.
//!
//! Later layers win:
//!
//! | Layer | Source |
//! |-------|--------|
//! | defaults | [`TmibotConfig::default`] |
//! | profile file | `tmibot.<profile>.toml` next to the main file |
//! | main file | `tmibot.toml` from the search path, or [`ConfigLoader::file`] |
//! | environment | `TMIBOT_SECTION__KEY=value` |
//! | overrides | [`ConfigLoader::set`], e.g. channels from the command line |
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .with_current_dir()
//!     .profile("live")
//!     .set("connection.channels", vec!["lobby"])
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(feature = "toml-config")]
use figment::providers::{Format, Toml};
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::TmibotConfig;

const ENV_PREFIX: &str = "TMIBOT_";
const PROFILE_VAR: &str = "TMIBOT_PROFILE";
const FILE_STEM: &str = "tmibot";

/// Name selecting the optional `tmibot.<profile>.toml` layer.
///
/// `dev` and `prod` are shorthands for `development` and `production`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(String);

impl Profile {
    pub fn parse(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        Self(match name.as_str() {
            "dev" => "development".to_string(),
            "prod" => "production".to_string(),
            _ => name,
        })
    }

    /// `TMIBOT_PROFILE`, or `development` when unset.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_name(&self) -> String {
        format!("{FILE_STEM}.{}.toml", self.0)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self("development".to_string())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the file layers come from.
#[derive(Debug, Clone)]
enum FileSource {
    /// First directory holding `tmibot.toml` wins.
    Search(Vec<PathBuf>),
    /// Exactly this file; it must exist.
    Explicit(PathBuf),
}

/// Builds a [`TmibotConfig`] from defaults, files, environment and overrides.
pub struct ConfigLoader {
    files: FileSource,
    profile: Profile,
    use_env: bool,
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader with no search directories, the profile from the
    /// environment and environment variables enabled.
    pub fn new() -> Self {
        Self {
            files: FileSource::Search(Vec::new()),
            profile: Profile::from_env(),
            use_env: true,
            overrides: Figment::new(),
        }
    }

    pub fn profile(mut self, name: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(name.as_ref());
        self
    }

    /// Appends a directory to search. Ignored once [`file`](Self::file) is set.
    pub fn search_path(mut self, dir: impl AsRef<Path>) -> Self {
        if let FileSource::Search(dirs) = &mut self.files {
            dirs.push(dir.as_ref().to_path_buf());
        }
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Searches `<user config dir>/tmibot`, e.g. `~/.config/tmibot`.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join(FILE_STEM)),
            None => self,
        }
    }

    /// Loads this file instead of searching. Its profile sibling
    /// (`<dir>/tmibot.<profile>.toml`) is still layered underneath.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.files = FileSource::Explicit(path.as_ref().to_path_buf());
        self
    }

    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Sets a dotted key above every other layer.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    pub fn load(self) -> ConfigResult<TmibotConfig> {
        let profile = self.profile.clone();
        let config: TmibotConfig = self
            .figment()?
            .extract()
            .map_err(|e| ConfigError::Extract(e.to_string()))?;

        debug!(
            profile = %profile,
            nickname = %config.connection.nickname,
            channels = config.connection.channels.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(TmibotConfig::default()));

        let main = match &self.files {
            FileSource::Explicit(path) if !path.exists() => {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            FileSource::Explicit(path) => Some(path.clone()),
            FileSource::Search(dirs) => find_main_file(dirs),
        };

        match main {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    let profile_file = dir.join(self.profile.file_name());
                    if profile_file.exists() {
                        debug!(path = %profile_file.display(), "Profile config found");
                        figment = merge_file(figment, &profile_file)?;
                    }
                }
                info!(path = %path.display(), "Reading configuration");
                figment = merge_file(figment, &path)?;
            }
            None => warn!("No tmibot.toml found, running on defaults"),
        }

        if self.use_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(figment.merge(self.overrides))
    }
}

fn find_main_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(format!("{FILE_STEM}.toml")))
        .find(|path| path.is_file())
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    match path.extension().and_then(|e| e.to_str()) {
        #[cfg(feature = "toml-config")]
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Searches the working directory and the user config directory.
pub fn load_config() -> ConfigResult<TmibotConfig> {
    ConfigLoader::new()
        .with_current_dir()
        .with_user_config_dir()
        .load()
}

pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<TmibotConfig> {
    ConfigLoader::new().file(path).load()
}
