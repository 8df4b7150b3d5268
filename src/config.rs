//! Deployment configuration.

use crate::error::{DeployError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Schemas shipped with slapd that may be loaded by `default_schema`.
const KNOWN_SYSTEM_SCHEMAS: &[&str] = &[
    "collective",
    "corba",
    "core",
    "cosine",
    "duaconf",
    "dyngroup",
    "inetorgperson",
    "java",
    "misc",
    "nis",
    "openldap",
    "pmi",
    "ppolicy",
];

/// Settings for a deployment run.
///
/// Every field has a default, so an empty TOML document is a valid config.
///
/// # Example
///
/// ```
/// use ldap_deploy::DeployConfig;
///
/// let config = DeployConfig::from_toml_str(r#"
///     domain = "example.com"
///     aliases = ["ldap"]
/// "#)
/// .unwrap()
/// .with_hostname("dir01");
///
/// assert_eq!(config.domain.as_deref(), Some("example.com"));
/// assert_eq!(config.target_for("dir01", "example.com"), "dir01.example.com.");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Host the directory runs on. Detected with `gethostname(2)` when unset.
    pub hostname: Option<String>,

    /// Network domain name (e.g. `"example.com"`). Prompted for when unset.
    pub domain: Option<String>,

    /// BIND zone file to edit. Defaults to `/etc/bind/zones/<domain>.db`.
    pub zone_file: Option<PathBuf>,

    /// Aliases managed in the zone file.
    pub aliases: Vec<String>,

    /// CNAME target. Defaults to `<hostname>.<domain>.`.
    pub alias_target: Option<String>,

    /// Directory holding the LDIF templates.
    pub schema_dir: PathBuf,

    /// Directory holding `groups/` and `users/` preseed LDIFs.
    pub preseed_dir: PathBuf,

    /// Session log appended to on every run.
    pub log_file: PathBuf,

    /// Where slapd installs its bundled schemas.
    pub system_schema_dir: PathBuf,

    /// Bundled schemas loaded by `default_schema`.
    pub default_schemas: Vec<String>,

    /// URI used for `ldapadd -Y EXTERNAL`.
    pub ldap_uri: String,

    /// Length of generated passwords.
    pub password_length: usize,

    /// Prefix privileged commands with `sudo`.
    pub use_sudo: bool,

    /// Log commands and zone edits without performing them.
    pub dry_run: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            domain: None,
            zone_file: None,
            aliases: vec!["ldap".to_string(), "ldap-master".to_string()],
            alias_target: None,
            schema_dir: PathBuf::from("schemas"),
            preseed_dir: PathBuf::from("preseed"),
            log_file: PathBuf::from("deploy.log"),
            system_schema_dir: PathBuf::from("/etc/ldap/schema"),
            default_schemas: vec![
                "cosine".to_string(),
                "nis".to_string(),
                "inetorgperson".to_string(),
            ],
            ldap_uri: "ldapi:///".to_string(),
            password_length: 16,
            use_sudo: true,
            dry_run: false,
        }
    }
}

impl DeployConfig {
    /// Loads and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::FileAccess`] if the file cannot be read,
    /// [`DeployError::Config`] if it is not valid TOML, or
    /// [`DeployError::InvalidConfig`] if validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| DeployError::file_access(path, e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded deployment config");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Config`] on parse failure or
    /// [`DeployError::InvalidConfig`] if validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.aliases.is_empty() {
            return Err(DeployError::InvalidConfig(
                "at least one alias is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .aliases
            .iter()
            .find(|a| a.is_empty() || a.contains(char::is_whitespace) || a.contains(';'))
        {
            return Err(DeployError::InvalidConfig(format!(
                "alias `{bad}` must be a single non-empty label"
            )));
        }
        if self.password_length == 0 {
            return Err(DeployError::InvalidConfig(
                "password_length must be positive".to_string(),
            ));
        }
        if let Some(unknown) = self
            .default_schemas
            .iter()
            .find(|s| !KNOWN_SYSTEM_SCHEMAS.contains(&s.as_str()))
        {
            return Err(DeployError::InvalidConfig(format!(
                "unknown default schema `{unknown}`"
            )));
        }
        Ok(())
    }

    /// Overrides the hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Overrides the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Overrides the zone file path.
    #[must_use]
    pub fn with_zone_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.zone_file = Some(path.into());
        self
    }

    /// Overrides the template directory.
    #[must_use]
    pub fn with_schema_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_dir = dir.into();
        self
    }

    /// Overrides the preseed directory.
    #[must_use]
    pub fn with_preseed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preseed_dir = dir.into();
        self
    }

    /// Overrides the session log path.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    /// Enables or disables `sudo` for privileged commands.
    #[must_use]
    pub const fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Default zone file path offered to the operator.
    #[must_use]
    pub fn zone_file_for(&self, domain: &str) -> PathBuf {
        self.zone_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/etc/bind/zones/{domain}.db")))
    }

    /// CNAME target for the managed aliases.
    #[must_use]
    pub fn target_for(&self, hostname: &str, domain: &str) -> String {
        self.alias_target
            .clone()
            .unwrap_or_else(|| format!("{hostname}.{domain}."))
    }

    /// Path to the LDIF template `name` (e.g. `"backend.ldif"`).
    #[must_use]
    pub fn template(&self, name: &str) -> PathBuf {
        self.schema_dir.join(name)
    }
}
