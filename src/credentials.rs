//! Bearer token discovery
//!
//! The token comes from the GitHub CLI (`gh auth token`) or from the
//! `GITHUB_TOKEN` environment variable. An empty token is rejected here so
//! that no client is ever built without credentials.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// GitHub authentication strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCli,
    /// Use environment variable token
    EnvironmentToken,
}

/// A token together with where it came from
#[derive(Clone)]
pub struct Credentials {
    pub strategy: AuthStrategy,
    token: String,
}

impl Credentials {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("strategy", &self.strategy)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Raised by the CLI when the remote rejected the token mid-run.
#[derive(Debug, Error)]
#[error("GitHub credentials expired or lack access ({reason}); re-authenticate with `gh auth login` or refresh GITHUB_TOKEN")]
pub struct CredentialsExpired {
    pub reason: String,
}

/// Obtain a token using the configured `auth_method` (`auto`, `gh_cli` or `token`).
pub fn resolve(auth_method: &str) -> Result<Credentials> {
    let (strategy, token) = match auth_method {
        "auto" => {
            // Try GitHub CLI first, then environment token
            if let Ok(token) = try_github_cli() {
                (AuthStrategy::GitHubCli, token)
            } else if let Ok(token) = try_environment_token() {
                (AuthStrategy::EnvironmentToken, token)
            } else {
                return Err(anyhow!(
                    "No GitHub authentication found. Please either:\n\
                     1. Install and authenticate GitHub CLI: gh auth login\n\
                     2. Set GITHUB_TOKEN environment variable"
                ));
            }
        }
        "gh_cli" => {
            let token =
                try_github_cli().context("GitHub CLI authentication failed. Run: gh auth login")?;
            (AuthStrategy::GitHubCli, token)
        }
        "token" => {
            let token = try_environment_token()
                .context("GITHUB_TOKEN environment variable not found or invalid")?;
            (AuthStrategy::EnvironmentToken, token)
        }
        other => return Err(anyhow!("Unknown auth method: {}", other)),
    };

    info!("Using authentication strategy: {:?}", strategy);
    Ok(Credentials { strategy, token })
}

/// Try to get token from GitHub CLI
fn try_github_cli() -> Result<String> {
    debug!("Attempting GitHub CLI authentication");

    if !is_command_available("gh") {
        return Err(anyhow!("GitHub CLI (gh) is not installed"));
    }

    let token_output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("Failed to get GitHub CLI token")?;

    if !token_output.status.success() {
        return Err(anyhow!(
            "GitHub CLI is not authenticated: {}",
            String::from_utf8_lossy(&token_output.stderr).trim()
        ));
    }

    let token = String::from_utf8(token_output.stdout)
        .context("GitHub CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("GitHub CLI returned empty token"));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}

/// Try to get token from environment variable
fn try_environment_token() -> Result<String> {
    debug!("Attempting environment variable authentication");

    let token = env::var(TOKEN_ENV_VAR).context("GITHUB_TOKEN environment variable not set")?;
    let token = token.trim().to_string();

    if token.is_empty() {
        return Err(anyhow!("GITHUB_TOKEN is empty"));
    }

    if !looks_like_github_token(&token) {
        warn!("GITHUB_TOKEN doesn't look like a GitHub token (expected a ghp_, gho_, ghs_ or github_pat_ prefix)");
    }

    Ok(token)
}

fn looks_like_github_token(token: &str) -> bool {
    ["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"]
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Check if a command is available in PATH
fn is_command_available(command: &str) -> bool {
    Command::new(command)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Restores `GITHUB_TOKEN` when dropped.
    struct TokenGuard(Option<String>);

    impl TokenGuard {
        fn set(value: Option<&str>) -> Self {
            let previous = env::var(TOKEN_ENV_VAR).ok();
            match value {
                Some(v) => env::set_var(TOKEN_ENV_VAR, v),
                None => env::remove_var(TOKEN_ENV_VAR),
            }
            Self(previous)
        }
    }

    impl Drop for TokenGuard {
        fn drop(&mut self) {
            match &self.0 {
                Some(v) => env::set_var(TOKEN_ENV_VAR, v),
                None => env::remove_var(TOKEN_ENV_VAR),
            }
        }
    }

    #[test]
    #[serial]
    fn test_token_method_reads_environment() {
        let _guard = TokenGuard::set(Some("  ghp_abc123\n"));

        let credentials = resolve("token").unwrap();
        assert_eq!(credentials.strategy, AuthStrategy::EnvironmentToken);
        assert_eq!(credentials.token(), "ghp_abc123");
    }

    #[test]
    #[serial]
    fn test_empty_token_is_rejected() {
        let _guard = TokenGuard::set(Some("   "));
        assert!(resolve("token").is_err());

        let _guard = TokenGuard::set(None);
        assert!(resolve("token").is_err());
    }

    #[test]
    fn test_unknown_method() {
        let err = resolve("keychain").unwrap_err();
        assert!(err.to_string().contains("Unknown auth method"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let credentials = Credentials {
            strategy: AuthStrategy::EnvironmentToken,
            token: "ghp_secret".to_string(),
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("ghp_secret"));
    }

    #[test]
    fn test_token_prefixes() {
        assert!(looks_like_github_token("ghp_x"));
        assert!(looks_like_github_token("github_pat_x"));
        assert!(!looks_like_github_token("xoxb-slack"));
    }

    #[test]
    fn test_credentials_expired_message() {
        let err = CredentialsExpired {
            reason: "unauthorized: Bad credentials".to_string(),
        };
        assert!(err.to_string().contains("re-authenticate"));
    }
}
