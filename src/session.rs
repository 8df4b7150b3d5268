//! Per-run mutable state and the session log.
//!
//! A [`Session`] holds every value resolved while the operator works through
//! the tasks (domain, DN, passwords, ...) together with a scratch workspace
//! for rendered LDIF files. It is owned by the orchestrator; tasks borrow it.

use crate::error::{DeployError, Result};
use crate::template::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Values resolved during a deployment run.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    /// Local host name.
    pub hostname: String,
    /// Network domain name.
    pub domain: Option<String>,
    /// Directory base DN.
    pub dn: Option<String>,
    /// `olcRootPW` for the backend database.
    pub root_password: Option<String>,
    /// Password of `cn=admin,<dn>`.
    pub admin_password: Option<String>,
    /// Organisation name for the frontend entry.
    pub organisation: Option<String>,
    /// Description of the directory's top entry.
    pub description: Option<String>,
}

/// State of one deployment run.
pub struct Session {
    log_path: PathBuf,
    workspace: TempDir,
    /// Values resolved so far.
    pub resolved: Resolved,
}

impl Session {
    /// Starts a session: creates the workspace and writes a banner to the
    /// session log at `log_path`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::FileAccess`] if the workspace cannot be created
    /// or the log cannot be appended to.
    pub fn start(log_path: impl Into<PathBuf>, hostname: impl Into<String>) -> Result<Self> {
        let workspace = tempfile::Builder::new()
            .prefix("ldap-deploy-")
            .tempdir()
            .map_err(|e| DeployError::file_access(std::env::temp_dir(), e))?;

        let mut session = Self {
            log_path: log_path.into(),
            workspace,
            resolved: Resolved {
                hostname: hostname.into(),
                ..Resolved::default()
            },
        };

        let hr = "=".repeat(50);
        let space = " ".repeat(30);
        session.log(&format!(
            " {hr}\n{space} New Deployment Session started.\n{space}{hr}"
        ))?;
        session.log(&format!("HOSTNAME = {}", session.resolved.hostname))?;
        session.log(&format!("WORKSPACE = {}", session.workspace().display()))?;

        tracing::info!(
            log = %session.log_path.display(),
            workspace = %session.workspace().display(),
            "Deployment session started"
        );
        Ok(session)
    }

    /// Appends a timestamped line to the session log.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::FileAccess`] if the log cannot be written.
    pub fn log(&mut self, message: &str) -> Result<()> {
        let stamp = chrono::Local::now().to_rfc3339();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| writeln!(f, "{stamp} : {message}"))
            .map_err(|e| DeployError::file_access(&self.log_path, e))
    }

    /// Session log path.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Scratch directory for rendered files. Removed when the session drops.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Template variables for the values resolved so far.
    ///
    /// Unresolved values are omitted, leaving their placeholders intact.
    #[must_use]
    pub fn context(&self) -> Context {
        let r = &self.resolved;
        let mut ctx = Context::new();
        ctx.insert("HOSTNAME".to_string(), r.hostname.clone());
        let optional = [
            ("DOMAIN", &r.domain),
            ("DN", &r.dn),
            ("ROOTPASSWORD", &r.root_password),
            ("ADMINPASSWORD", &r.admin_password),
            ("ORGANISATIONNAME", &r.organisation),
            ("DESCRIPTION", &r.description),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                ctx.insert(key.to_string(), value.clone());
            }
        }
        ctx
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("log_path", &self.log_path)
            .field("workspace", &self.workspace.path())
            .field("hostname", &self.resolved.hostname)
            .field("domain", &self.resolved.domain)
            .field("dn", &self.resolved.dn)
            .finish_non_exhaustive()
    }
}
