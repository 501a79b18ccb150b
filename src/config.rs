use anyhow::{anyhow, bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::github::DEFAULT_API_URL;
use crate::retry::RetryConfig;
use crate::sync::{Profile, SyncOptions, SyncSource};

/// Main configuration structure for reposync
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory holding one folder per synced owner
    #[serde(default = "default_base_directory")]
    pub base_directory: String,

    /// GitHub authentication and API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Default filters for ad-hoc syncs
    #[serde(default)]
    pub sync: SyncConfig,

    /// Backoff policy for rate-limited requests
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named sync profiles
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Login owning the token (looked up from the API if null)
    pub username: Option<String>,

    /// List private repositories
    #[serde(default)]
    pub include_private: bool,

    /// REST API root, for GitHub Enterprise
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

/// Synchronization defaults
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    #[serde(default)]
    pub include: Vec<String>,

    /// Applied to every sync, including profiles
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Fast-forward only pulls
    #[serde(default = "default_true")]
    pub fast_forward_only: bool,
}

/// Retry policy as written in the config file
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level, used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// A stored sync profile
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProfileConfig {
    pub name: String,

    /// Exactly one of `user` / `org` must be set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,

    /// Defaults to `<base_directory>/<user or org>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Replaces the global include patterns when non-empty
    #[serde(default)]
    pub include: Vec<String>,

    /// Added to the global exclude patterns
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Overrides `github.include_private`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_private: Option<bool>,
}

// Default value functions
fn default_base_directory() -> String {
    "${HOME}/src".to_string()
}
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            username: None,
            include_private: false,
            api_url: default_api_url(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            fast_forward_only: default_true(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        )
    }
}

impl ProfileConfig {
    pub fn source(&self) -> Result<SyncSource> {
        match (&self.user, &self.org) {
            (Some(user), None) => Ok(SyncSource::User(user.clone())),
            (None, Some(org)) => Ok(SyncSource::Org(org.clone())),
            (Some(_), Some(_)) => Err(anyhow!(
                "Profile '{}' sets both user and org",
                self.name
            )),
            (None, None) => Err(anyhow!(
                "Profile '{}' must set either user or org",
                self.name
            )),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);

            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("reposync").join("config.yml"))
    }

    /// Expand environment variables and `~` in configured paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.base_directory = shellexpand::full(&self.base_directory)
            .context("Failed to expand base_directory path")?
            .into_owned();

        for profile in &mut self.profiles {
            if let Some(target) = &profile.target {
                let expanded = shellexpand::full(target)
                    .with_context(|| format!("Failed to expand target of profile '{}'", profile.name))?
                    .into_owned();
                profile.target = Some(expanded);
            }
        }

        Ok(())
    }

    /// Reject settings that would make a run misbehave
    pub fn validate(&self) -> Result<()> {
        if self.retry.multiplier < 1.0 || !self.retry.multiplier.is_finite() {
            bail!("retry.multiplier must be a finite number >= 1.0");
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            bail!("retry.initial_delay_ms must not exceed retry.max_delay_ms");
        }

        let mut names = std::collections::HashSet::new();
        for profile in &self.profiles {
            if profile.name.trim().is_empty() {
                bail!("Profiles must have a non-empty name");
            }
            if !names.insert(profile.name.as_str()) {
                bail!("Duplicate profile name: {}", profile.name);
            }
            profile.source()?;
        }

        Ok(())
    }

    pub fn base_path(&self) -> PathBuf {
        PathBuf::from(&self.base_directory)
    }

    /// Default target for a user or organization: `<base_directory>/<login>`
    pub fn target_for(&self, login: &str) -> PathBuf {
        self.base_path().join(login)
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.to_retry_config()
    }

    /// Build runnable profiles, optionally restricted to `only` (by name).
    pub fn profiles(&self, only: &[String], dry_run: bool, verbose: bool) -> Result<Vec<Profile>> {
        for name in only {
            if !self.profiles.iter().any(|p| &p.name == name) {
                bail!("Unknown profile: {}", name);
            }
        }

        self.profiles
            .iter()
            .filter(|p| only.is_empty() || only.contains(&p.name))
            .map(|p| self.build_profile(p, dry_run, verbose))
            .collect()
    }

    fn build_profile(&self, profile: &ProfileConfig, dry_run: bool, verbose: bool) -> Result<Profile> {
        let source = profile.source()?;
        let login = match &source {
            SyncSource::User(login) | SyncSource::Org(login) => login.as_str(),
        };

        let target = profile
            .target
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.target_for(login));

        let include = if profile.include.is_empty() {
            self.sync.include.clone()
        } else {
            profile.include.clone()
        };
        let exclude: Vec<String> = self
            .sync
            .exclude
            .iter()
            .chain(profile.exclude.iter())
            .cloned()
            .collect();

        let options = SyncOptions::new(target)
            .with_include(include)
            .with_exclude(exclude)
            .with_include_private(profile.include_private.unwrap_or(self.github.include_private))
            .with_dry_run(dry_run)
            .with_verbose(verbose);

        Ok(Profile {
            name: profile.name.clone(),
            source,
            options,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
            github: GitHubConfig::default(),
            sync: SyncConfig::default(),
            retry: RetrySettings::default(),
            logging: LoggingConfig::default(),
            profiles: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    // Helper function to create a temporary config directory
    fn setup_test_config_dir() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("reposync");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        (temp_dir, config_dir)
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.base_directory, "${HOME}/src");
        assert_eq!(config.github.auth_method, "auto");
        assert!(!config.github.include_private);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert!(config.sync.fast_forward_only);
        assert!(config.profiles.is_empty());

        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
        assert_eq!(retry.multiplier, 2.0);
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_REPOSYNC_HOME", "/test/home");

        let mut config = Config {
            base_directory: "${TEST_REPOSYNC_HOME}/src".to_string(),
            profiles: vec![ProfileConfig {
                name: "work".to_string(),
                org: Some("acme".to_string()),
                target: Some("$TEST_REPOSYNC_HOME/work".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.base_directory, "/test/home/src");
        assert_eq!(config.profiles[0].target.as_deref(), Some("/test/home/work"));

        env::remove_var("TEST_REPOSYNC_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        let result = Config::load(nonexistent_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let (_temp_dir, config_dir) = setup_test_config_dir();
        let config_path = config_dir.join("config.yml");

        let mut config = Config::default();
        config.base_directory = "/custom/path".to_string();
        config.github.username = Some("testuser".to_string());
        config.retry.max_retries = 5;
        config.profiles.push(ProfileConfig {
            name: "mine".to_string(),
            user: Some("testuser".to_string()),
            include: vec!["proj-*".to_string()],
            ..Default::default()
        });

        config.save(&config_path).expect("Failed to save config");
        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.base_directory, "/custom/path");
        assert_eq!(loaded.github.username, Some("testuser".to_string()));
        assert_eq!(loaded.retry.max_retries, 5);
        assert_eq!(loaded.profiles.len(), 1);
        assert_eq!(loaded.profiles[0].include, vec!["proj-*".to_string()]);
        assert!(loaded.profiles[0].org.is_none());
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("reposync"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
base_directory: "/srv/mirror"
github:
  auth_method: "token"
  include_private: true
  api_url: "https://github.example.com/api/v3"
sync:
  exclude: ["*-archive"]
retry:
  max_retries: 6
  initial_delay_ms: 500
  max_delay_ms: 10000
  multiplier: 3.0
logging:
  level: "debug"
profiles:
  - name: oss
    org: acme
    include: ["proj-*"]
    exclude: ["proj-old"]
  - name: personal
    user: octo
    target: "/srv/personal"
    include_private: false
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");
        config.validate().expect("valid config");

        assert_eq!(config.github.auth_method, "token");
        assert!(config.github.include_private);
        assert_eq!(config.github.api_url, "https://github.example.com/api/v3");
        assert_eq!(config.logging.level, "debug");

        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 6);
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
        assert_eq!(retry.multiplier, 3.0);

        let profiles = config.profiles(&[], true, false).unwrap();
        assert_eq!(profiles.len(), 2);

        let oss = &profiles[0];
        assert_eq!(oss.source, SyncSource::Org("acme".to_string()));
        assert_eq!(oss.options.target, PathBuf::from("/srv/mirror/acme"));
        assert_eq!(oss.options.include, vec!["proj-*".to_string()]);
        assert_eq!(
            oss.options.exclude,
            vec!["*-archive".to_string(), "proj-old".to_string()]
        );
        assert!(oss.options.include_private);
        assert!(oss.options.dry_run);

        let personal = &profiles[1];
        assert_eq!(personal.source, SyncSource::User("octo".to_string()));
        assert_eq!(personal.options.target, PathBuf::from("/srv/personal"));
        assert!(!personal.options.include_private);
    }

    #[test]
    fn test_profile_selection() {
        let config = Config {
            profiles: vec![
                ProfileConfig {
                    name: "a".to_string(),
                    user: Some("octo".to_string()),
                    ..Default::default()
                },
                ProfileConfig {
                    name: "b".to_string(),
                    org: Some("acme".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let only_b = config.profiles(&["b".to_string()], false, false).unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].name, "b");

        assert!(config.profiles(&["missing".to_string()], false, false).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.initial_delay_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.profiles.push(ProfileConfig {
            name: "both".to_string(),
            user: Some("octo".to_string()),
            org: Some("acme".to_string()),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        for _ in 0..2 {
            config.profiles.push(ProfileConfig {
                name: "dup".to_string(),
                user: Some("octo".to_string()),
                ..Default::default()
            });
        }
        assert!(config.validate().is_err());
    }
}
