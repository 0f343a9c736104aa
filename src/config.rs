//! Service configuration.
//!
//! Layered the usual way: defaults, then `dagsmith.toml` if present, then
//! environment variables. A `.env` file is honored for local development.
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [git]
//! username = "dagsmith-bot"
//! default_branch = "main"
//! remote_url = "https://github.com/acme/pipelines.git"
//!
//! [app]
//! repo_dir = ".dagsmith/checkout"
//! ```
//!
//! The token is expected from `DAGSMITH_GIT_TOKEN` rather than the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "dagsmith.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub app: AppSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitSection {
    pub username: String,
    /// Personal access token for pushes and the GitHub API. Usually set
    /// via `DAGSMITH_GIT_TOKEN`, never committed in the config file.
    pub token: String,
    pub default_branch: String,
    pub remote_url: String,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            username: "dagsmith-bot".to_string(),
            token: String::new(),
            default_branch: "main".to_string(),
            remote_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSection {
    /// Directory holding the service's working checkout.
    pub repo_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from(".dagsmith/checkout"),
        }
    }
}

impl Config {
    /// Load configuration: `.env`, then the TOML file (explicit path must
    /// exist; the default path may be absent), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(username) = std::env::var("DAGSMITH_GIT_USERNAME") {
            self.git.username = username;
        }
        if let Ok(token) = std::env::var("DAGSMITH_GIT_TOKEN") {
            self.git.token = token;
        }
        if let Ok(branch) = std::env::var("DAGSMITH_DEFAULT_BRANCH") {
            self.git.default_branch = branch;
        }
        if let Ok(url) = std::env::var("DAGSMITH_GIT_REMOTE_URL") {
            self.git.remote_url = url;
        }
        if let Ok(dir) = std::env::var("DAGSMITH_REPO_DIR") {
            self.app.repo_dir = PathBuf::from(dir);
        }
    }

    /// The settings `serve` cannot run without.
    pub fn validate_for_serve(&self) -> Result<()> {
        if self.git.remote_url.is_empty() {
            bail!("git remote URL is not configured (DAGSMITH_GIT_REMOTE_URL or [git].remote_url)");
        }
        if self.git.token.is_empty() {
            bail!("git token is not configured (DAGSMITH_GIT_TOKEN)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.git.default_branch, "main");
        assert_eq!(config.app.repo_dir, PathBuf::from(".dagsmith/checkout"));
        assert!(config.git.remote_url.is_empty());
    }

    #[test]
    fn parses_a_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 9999

[git]
username = "bot"
default_branch = "trunk"
remote_url = "https://github.com/acme/pipelines.git"

[app]
repo_dir = "/var/lib/dagsmith/checkout"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.git.username, "bot");
        assert_eq!(config.git.default_branch, "trunk");
        assert_eq!(
            config.app.repo_dir,
            PathBuf::from("/var/lib/dagsmith/checkout")
        );
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server]\nport = 4000\n").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.git.default_branch, "main");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server]\nporte = 4000\n").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn env_overrides_take_precedence() {
        // Distinct variable names per test keep parallel runs from racing.
        unsafe {
            std::env::set_var("DAGSMITH_DEFAULT_BRANCH", "develop");
        }
        let mut config = Config::default();
        config.apply_env();
        assert_eq!(config.git.default_branch, "develop");
        unsafe {
            std::env::remove_var("DAGSMITH_DEFAULT_BRANCH");
        }
    }

    #[test]
    fn serve_validation_requires_remote_and_token() {
        let mut config = Config::default();
        assert!(config.validate_for_serve().is_err());
        config.git.remote_url = "https://github.com/acme/pipelines.git".into();
        assert!(config.validate_for_serve().is_err());
        config.git.token = "ghp_example".into();
        assert!(config.validate_for_serve().is_ok());
    }
}
