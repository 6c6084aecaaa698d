//! Configuration resolution for the login command.
//!
//! Each field is taken from the first source that provides it: command-line
//! flag, YAML config file, environment, then an interactive prompt.

use std::path::{Path, PathBuf};

use oidc_device_flow::DeviceAuthorizationRequest;
use serde::{Deserialize, Serialize};

/// Scopes offered when asking the user.
pub const SCOPE_CHOICES: &[&str] = &[
    "address",
    "email",
    "offline_access",
    "phone",
    "profile",
    "openid",
];

/// Scopes selected when the user accepts the default.
pub const DEFAULT_SCOPES: &[&str] = &["profile", "openid"];

const DOMAIN_ENV: &str = "AUTH0_DOMAIN";
const CLIENT_ID_ENV: &str = "AUTH0_CLIENT_ID";

/// Contents of the YAML config file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,

    #[serde(default)]
    pub scope: Vec<String>,
}

impl FileConfig {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("~/.config"));
        config_dir.join("oidc-device-login").join("config.yaml")
    }

    /// Load `explicit` if given (it must exist), otherwise the default path if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Values picked up from the environment (including a `.env` file).
#[derive(Debug, Clone, Default)]
pub struct EnvDefaults {
    pub domain: Option<String>,
    pub client_id: Option<String>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self {
            domain: non_empty_var(DOMAIN_ENV),
            client_id: non_empty_var(CLIENT_ID_ENV),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub domain: Option<String>,
    pub client_id: Option<String>,
    pub audience: Option<String>,
    pub scope: Vec<String>,
}

/// Asks the user for a value. `initial` is offered as the default answer.
pub trait Prompter {
    fn ask(&self, question: &str, initial: Option<&str>) -> Result<String, ConfigError>;
}

/// Fully resolved login parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub domain: String,
    pub client_id: String,
    pub audience: Option<String>,
    pub scope: Vec<String>,
}

impl CliConfig {
    /// Merge all sources. With `assume_defaults`, the optional audience and
    /// scope fall back to their defaults instead of being asked for.
    pub fn resolve(
        overrides: CliOverrides,
        file: FileConfig,
        env: EnvDefaults,
        prompter: &dyn Prompter,
        assume_defaults: bool,
    ) -> Result<Self, ConfigError> {
        let domain = match first_non_empty([overrides.domain, file.domain, env.domain]) {
            Some(domain) => domain,
            None => required(prompter.ask("What is your Auth0 domain?", None)?, "domain")?,
        };

        let client_id = match first_non_empty([overrides.client_id, file.client_id, env.client_id])
        {
            Some(client_id) => client_id,
            None => required(
                prompter.ask("What is your Device Flow Client ID?", None)?,
                "client_id",
            )?,
        };

        let audience = match (overrides.audience, file.audience) {
            // An explicitly empty audience on the command line means "omit".
            (Some(audience), _) => Some(audience),
            (None, Some(audience)) => Some(audience),
            (None, None) if assume_defaults => None,
            (None, None) => Some(
                prompter.ask("What is the target Access Token API Audience?", None)?,
            ),
        }
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

        let scope = if !overrides.scope.is_empty() {
            parse_scopes(&overrides.scope.join(" "))
        } else if !file.scope.is_empty() {
            parse_scopes(&file.scope.join(" "))
        } else if assume_defaults {
            default_scopes()
        } else {
            let question = format!(
                "What are the target Access Token scopes? ({})",
                SCOPE_CHOICES.join(", ")
            );
            let answer = prompter.ask(&question, Some(&DEFAULT_SCOPES.join(" ")))?;
            match parse_scopes(&answer) {
                scopes if scopes.is_empty() => default_scopes(),
                scopes => scopes,
            }
        };

        Ok(Self {
            domain,
            client_id,
            audience,
            scope,
        })
    }

    /// Issuer URL for the domain. A bare host is served over HTTPS.
    pub fn authority(&self) -> String {
        let domain = self.domain.trim().trim_end_matches('/');
        if domain.contains("://") {
            domain.to_string()
        } else {
            format!("https://{}", domain)
        }
    }

    pub fn request(&self) -> DeviceAuthorizationRequest {
        DeviceAuthorizationRequest::new(&self.client_id)
            .with_scopes(self.scope.iter().map(String::as_str))
            .with_audience(self.audience.as_deref())
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn required(answer: String, field: &'static str) -> Result<String, ConfigError> {
    let answer = answer.trim();
    if answer.is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(answer.to_string())
    }
}

/// Split on whitespace and commas, keeping first-seen order.
pub fn parse_scopes(input: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for scope in input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
    {
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read answer: {0}")]
    Prompt(#[source] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
