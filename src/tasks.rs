//! Deployment tasks.
//!
//! Each task asks the operator before doing anything with side effects,
//! records what it did in the session log, and hands the real work to the
//! zone editor, the template renderer or an external tool.

use crate::command::CommandRunner;
use crate::config::DeployConfig;
use crate::error::{DeployError, Result};
use crate::prompt::Prompter;
use crate::session::Session;
use crate::template::{Context, write_template};
use crate::util::{base_dn, generate_password};
use crate::zone::{AliasRecord, RecordMode, ZoneFile, ZoneText, ZoneUpdate, format_record};
use colored::Colorize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Packages installed and purged by the package tasks.
const PACKAGES: &[&str] = &["slapd", "ldap-utils"];

/// Directories wiped by [`Deployer::reset`].
const LDAP_STATE_DIRS: &[&str] = &["/etc/ldap", "/var/lib/ldap"];

/// Kind of preseed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedKind {
    /// Posix groups.
    Groups,
    /// Person entries.
    Users,
}

impl SeedKind {
    /// Directory name under the preseed and workspace roots.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Groups => "groups",
            Self::Users => "users",
        }
    }
}

impl fmt::Display for SeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Groups => "Groups",
            Self::Users => "Users",
        })
    }
}

/// Suggested answers for [`Deployer::person`].
#[derive(Debug, Clone, Default)]
pub struct PersonDefaults {
    /// Login name, also the `uid` RDN.
    pub username: Option<String>,
    /// Given name.
    pub firstname: Option<String>,
    /// Surname.
    pub lastname: Option<String>,
    /// Initials.
    pub initials: Option<String>,
    /// Job title.
    pub title: Option<String>,
    /// Unix user id (`uidNumber`).
    pub uid: Option<String>,
    /// Unix primary group id (`gidNumber`).
    pub gid: Option<String>,
    /// Login password. Generated when unset.
    pub password: Option<String>,
    /// Mobile phone number.
    pub mobile: Option<String>,
    /// Home phone number.
    pub phone: Option<String>,
    /// Organisation name.
    pub organisation: Option<String>,
    /// Postal address.
    pub address: Option<String>,
    /// Postal code.
    pub postcode: Option<String>,
    /// Suburb or locality (`l`).
    pub suburb: Option<String>,
}

/// Runs deployment tasks against one session.
pub struct Deployer<P, R> {
    config: DeployConfig,
    session: Session,
    prompter: P,
    runner: R,
}

impl<P: Prompter, R: CommandRunner> Deployer<P, R> {
    /// Creates a deployer.
    pub const fn new(config: DeployConfig, session: Session, prompter: P, runner: R) -> Self {
        Self {
            config,
            session,
            prompter,
            runner,
        }
    }

    /// The current session.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Consumes the deployer, returning the session, prompter and runner.
    pub fn into_parts(self) -> (Session, P, R) {
        (self.session, self.prompter, self.runner)
    }

    // -----------------------------------------------------------------------
    // Packages
    // -----------------------------------------------------------------------

    fn apt_get(&mut self, action: &str) -> Result<()> {
        let mut args = vec![action];
        args.extend_from_slice(PACKAGES);
        self.runner.run("apt-get", &args, true)
    }

    /// Installs slapd and the LDAP client utilities.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging or command errors.
    pub fn install(&mut self) -> Result<bool> {
        if !self.prompter.confirm("Install LDAP daemon?")? {
            return Ok(false);
        }
        self.session.log("Installing slapd ldap-utils")?;
        self.apt_get("install")?;
        Ok(true)
    }

    /// Stops slapd and purges its packages, configuration and database.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging or command errors.
    pub fn purge(&mut self) -> Result<bool> {
        if !self.prompter.confirm("Purge openLDAP Config and Database?")? {
            return Ok(false);
        }
        self.session.log("Purging slapd ldap-utils")?;
        self.runner.run("service", &["slapd", "stop"], true)?;
        self.apt_get("purge")?;
        Ok(true)
    }

    /// Deletes the slapd configuration and database, then reconfigures it.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging or command errors.
    pub fn reset(&mut self) -> Result<bool> {
        if !self.prompter.confirm("Reset openLDAP Config and Database?")? {
            return Ok(false);
        }
        self.session.log("Resetting and Reconfiguring settings, database")?;
        for dir in LDAP_STATE_DIRS {
            self.runner.run("rm", &["-rf", *dir], true)?;
        }
        self.runner.run("dpkg-reconfigure", &["slapd"], true)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Asks for the network domain and derives the base DN from it.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingValue`] if the domain is left empty.
    pub fn variables(&mut self) -> Result<()> {
        let default = self
            .session
            .resolved
            .domain
            .clone()
            .or_else(|| self.config.domain.clone());
        let domain = self
            .prompter
            .prompt("Network Domain Name :", default.as_deref())?;
        let domain = domain.trim_end_matches('.').to_string();
        if domain.is_empty() {
            return Err(DeployError::MissingValue("domain"));
        }

        let dn = base_dn(&self.session.resolved.hostname, &domain);
        self.session.log(&format!("DOMAIN : {domain}"))?;
        self.session.log(&format!("DN : {dn}"))?;
        tracing::info!(domain = %domain, dn = %dn, "Resolved directory variables");

        self.session.resolved.domain = Some(domain);
        self.session.resolved.dn = Some(dn);
        Ok(())
    }

    fn ensure_variables(&mut self) -> Result<(String, String)> {
        if self.session.resolved.dn.is_none() {
            self.variables()?;
        }
        let domain = self
            .session
            .resolved
            .domain
            .clone()
            .ok_or(DeployError::MissingValue("domain"))?;
        let dn = self
            .session
            .resolved
            .dn
            .clone()
            .ok_or(DeployError::MissingValue("dn"))?;
        Ok((domain, dn))
    }

    // -----------------------------------------------------------------------
    // DNS
    // -----------------------------------------------------------------------

    fn zone_file(&mut self) -> Result<ZoneFile> {
        let (domain, _) = self.ensure_variables()?;
        let default = self.config.zone_file_for(&domain);
        let path = self.prompter.prompt(
            "Path to the Zone File",
            Some(&default.to_string_lossy()),
        )?;
        Ok(ZoneFile::new(path))
    }

    /// Reports the aliases currently in the zone's managed region.
    ///
    /// # Errors
    ///
    /// Returns zone file access or format errors.
    pub fn list_aliases(&mut self) -> Result<Vec<AliasRecord>> {
        let zone = self.zone_file()?;
        let records = zone.records()?;
        let prefix = "Bind9 DNS CNAME Alias Records : ".cyan();
        if records.is_empty() {
            self.prompter
                .notify(&format!("{prefix}no managed aliases in {}", zone.path().display()))?;
        }
        for record in &records {
            self.prompter.notify(&format!(
                "{prefix}{} -> {} (line {})",
                record.alias, record.target, record.line
            ))?;
        }
        Ok(records)
    }

    /// Inserts or removes every configured alias in the BIND zone file.
    ///
    /// Each alias is a separate edit, so each change bumps the serial once.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging, zone file access or format errors. Aliases
    /// edited before the error keep their changes.
    pub fn dns(&mut self, mode: RecordMode) -> Result<Vec<ZoneUpdate>> {
        let prefix = "Bind9 DNS CNAME Alias Records : ".cyan();
        self.prompter.notify(&format!(
            "{prefix}{}",
            "This process assumes you already have a working bind9 installation.".red()
        ))?;
        let question = match mode {
            RecordMode::Insert => "Create Bind DNS Cname Records",
            RecordMode::Remove => "Remove Bind DNS Cname Records",
        };
        if !self.prompter.confirm(question)? {
            return Ok(Vec::new());
        }

        let zone = self.zone_file()?;
        let (domain, _) = self.ensure_variables()?;
        let target = self.config.target_for(&self.session.resolved.hostname, &domain);

        // Dry-run edits chain in memory.
        let mut preview: Option<ZoneText> = None;
        let mut updates = Vec::new();
        for alias in self.config.aliases.clone() {
            let update = match preview.take() {
                Some(text) => zone.apply_to(&text, &alias, &target, mode, true)?,
                None => zone.apply(&alias, &target, mode, self.config.dry_run)?,
            };
            if self.config.dry_run {
                preview = Some(update.text.clone());
            }
            self.report_zone_update(&zone, &alias, &target, mode, &update)?;
            updates.push(update);
        }
        Ok(updates)
    }

    fn report_zone_update(
        &mut self,
        zone: &ZoneFile,
        alias: &str,
        target: &str,
        mode: RecordMode,
        update: &ZoneUpdate,
    ) -> Result<()> {
        let prefix = "Bind9 DNS CNAME Alias Records : ".cyan();

        if update.changed {
            let record = update.existing.as_ref().map_or_else(
                || format_record(alias, target),
                |r| format_record(&r.alias, &r.target),
            );
            let (from, to) = update.serial.unwrap_or_default();
            tracing::info!(
                zone = %zone.path().display(),
                alias,
                %mode,
                serial_from = from,
                serial_to = to,
                written = update.written,
                "Zone alias record changed"
            );
            let verb = match (mode, update.written) {
                (RecordMode::Insert, true) => "Inserted",
                (RecordMode::Remove, true) => "Removed",
                (RecordMode::Insert, false) => "Would insert",
                (RecordMode::Remove, false) => "Would remove",
            };
            let message = format!("{verb} CNAME DNS record : {record} (serial {from} > {to})");
            self.session.log(&message)?;
            return self.prompter.notify(&format!("{prefix}{}", message.blue()));
        }

        match (&update.existing, mode) {
            (Some(existing), RecordMode::Insert) if existing.target != target => {
                tracing::warn!(
                    zone = %zone.path().display(),
                    alias,
                    existing = %existing.target,
                    wanted = target,
                    "Alias exists with a different target, leaving it in place"
                );
                let message = format!(
                    "CNAME DNS found with different target : {} (line {}), wanted {target}",
                    format_record(&existing.alias, &existing.target),
                    existing.line
                );
                self.session.log(&message)?;
                self.prompter.notify(&format!("{prefix}{}", message.yellow()))
            }
            _ => {
                tracing::debug!(
                    zone = %zone.path().display(),
                    alias,
                    %mode,
                    "Zone already in the requested state"
                );
                self.session
                    .log(&format!("CNAME DNS record unchanged ({mode}) : {alias}"))?;
                self.prompter.notify(&format!(
                    "{prefix}{}",
                    format!("{alias} already in requested state").yellow()
                ))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Schemas
    // -----------------------------------------------------------------------

    fn ldapadd_external(&mut self, ldif: &Path) -> Result<()> {
        let ldif = ldif.to_string_lossy();
        self.runner.run(
            "ldapadd",
            &["-Y", "EXTERNAL", "-H", &self.config.ldap_uri, "-f", &ldif],
            true,
        )
    }

    fn ldapadd_admin(&mut self, dn: &str, ldif: &Path) -> Result<()> {
        let ldif = ldif.to_string_lossy();
        let bind = format!("cn=admin,{dn}");
        self.runner
            .run("ldapadd", &["-x", "-D", &bind, "-W", "-f", &ldif], false)
    }

    fn workspace_file(&self, parts: &[&str]) -> PathBuf {
        parts
            .iter()
            .fold(self.session.workspace().join("schemas"), |p, part| p.join(part))
    }

    /// Loads the schemas bundled with slapd (`cosine`, `nis`, ...).
    ///
    /// # Errors
    ///
    /// Returns prompt, logging or command errors.
    pub fn default_schema(&mut self) -> Result<bool> {
        if !self.prompter.confirm("Insert Default LDIF Schemas")? {
            return Ok(false);
        }
        let schemas = self.config.default_schemas.clone();
        self.session
            .log(&format!("Inserting Default Schema [{}]", schemas.join(",")))?;
        for schema in schemas {
            let path = self
                .config
                .system_schema_dir
                .join(format!("{schema}.ldif"));
            self.ldapadd_external(&path)?;
            self.session
                .log(&format!("Inserted default schema [{}]", path.display()))?;
        }
        Ok(true)
    }

    /// Renders and loads the backend database configuration.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging, template or command errors.
    pub fn backend_schema(&mut self) -> Result<bool> {
        if !self.prompter.confirm("Insert Default Backend LDIF Schemas")? {
            return Ok(false);
        }
        self.ensure_variables()?;
        self.session.log("Inserting Backend Schema")?;

        let generated = generate_password(self.config.password_length);
        let password = self
            .prompter
            .prompt("LDAP Root Password", Some(&generated))?;
        self.session.resolved.root_password = Some(password);
        self.session.log("ROOTPASSWORD : set")?;

        let output = self.workspace_file(&["backend.ldif"]);
        self.prompter.notify(&format!(
            "{}{}",
            "Backend Schema : ".cyan(),
            format!("Processing Schema {}", output.display()).yellow()
        ))?;
        write_template(
            &self.config.template("backend.ldif"),
            &output,
            &self.session.context(),
        )?;
        self.ldapadd_external(&output)?;
        self.session
            .log(&format!("Inserted Schema {}", output.display()))?;
        Ok(true)
    }

    /// Renders and loads the directory's top entry and admin account.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging, template or command errors.
    pub fn frontend_schema(&mut self) -> Result<bool> {
        if !self.prompter.confirm("Insert Default Frontend LDIF Schemas")? {
            return Ok(false);
        }
        let (domain, dn) = self.ensure_variables()?;
        self.session.log("Inserting Frontend Schema")?;

        let organisation = self.prompter.prompt("Organisation Name", Some("Example"))?;
        self.session
            .log(&format!("ORGANISATIONNAME : {organisation}"))?;
        let description = self.prompter.prompt(
            "LDAP Domain Description",
            Some(&format!("Directory for {domain}")),
        )?;
        self.session.log(&format!("DESCRIPTION : {description}"))?;

        self.session.log(&format!("Inserting Admin User: cn=admin,{dn}"))?;
        let generated = generate_password(self.config.password_length);
        let admin_password = self
            .prompter
            .prompt("LDAP Admin Password :", Some(&generated))?;
        self.session.log("ADMINPASSWORD : set")?;

        self.session.resolved.organisation = Some(organisation);
        self.session.resolved.description = Some(description);
        self.session.resolved.admin_password = Some(admin_password);

        let output = self.workspace_file(&["frontend.ldif"]);
        self.session
            .log(&format!("Processing Schema {}", output.display()))?;
        write_template(
            &self.config.template("frontend.ldif"),
            &output,
            &self.session.context(),
        )?;
        self.session
            .log(&format!("Inserting Schema {}", output.display()))?;
        self.ldapadd_admin(&dn, &output)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Groups and users
    // -----------------------------------------------------------------------

    fn load_preseed(&mut self, kind: SeedKind, path: &Path) -> Result<bool> {
        if !path.is_file() {
            tracing::warn!(kind = %kind, path = %path.display(), "Preseed LDIF does not exist");
            self.session.log(&format!(
                "Problem, preseed {} ldif doesn't exist.\n\t{}",
                kind.dir_name(),
                path.display()
            ))?;
            return Ok(false);
        }
        let (_, dn) = self.ensure_variables()?;
        self.prompter.notify(&format!(
            "{}{}",
            format!("Preseed {kind} : ").cyan(),
            format!("Inserting preseed ldif {}", path.display()).green()
        ))?;
        self.ldapadd_admin(&dn, path)?;
        self.session
            .log(&format!("Inserted preseed ldif {}", path.display()))?;
        Ok(true)
    }

    /// Adds a group, either from a preseed LDIF or from operator answers.
    ///
    /// A preseed path that does not exist is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingValue`] if no group name is given, or
    /// prompt, logging, template or command errors.
    pub fn group(&mut self, preseed: Option<&Path>) -> Result<bool> {
        if let Some(path) = preseed {
            return self.load_preseed(SeedKind::Groups, path);
        }
        let (_, session_dn) = self.ensure_variables()?;

        let name = self.prompter.prompt("Groupname :", None)?;
        if name.is_empty() {
            return Err(DeployError::MissingValue("group name"));
        }
        let gid = self.prompter.prompt("Unix GroupID :", None)?;
        let dn = self
            .prompter
            .prompt("Distinguished Name :", Some(&session_dn))?;

        let mut context = self.session.context();
        context.insert("GROUPNAME".to_string(), name.clone());
        context.insert("GROUPID".to_string(), gid);
        context.insert("DN".to_string(), dn);

        let output = self.workspace_file(&[
            SeedKind::Groups.dir_name(),
            &ldif_file_name(&name),
        ]);
        write_template(&self.config.template("group.ldif"), &output, &context)?;
        self.session.log(&format!("Inserting group LDIF : {name}"))?;
        self.ldapadd_admin(&session_dn, &output)?;
        Ok(true)
    }

    /// Adds a user from a preseed LDIF, or interactively via [`Self::person`].
    ///
    /// # Errors
    ///
    /// See [`Self::group`] and [`Self::person`].
    pub fn user(&mut self, preseed: Option<&Path>) -> Result<bool> {
        match preseed {
            Some(path) => self.load_preseed(SeedKind::Users, path),
            None => self.person(&PersonDefaults::default()),
        }
    }

    /// Asks for every attribute of a person entry, then renders and loads it.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingValue`] if no username is given, or
    /// prompt, logging, template or command errors.
    pub fn person(&mut self, defaults: &PersonDefaults) -> Result<bool> {
        let (domain, dn) = self.ensure_variables()?;
        let password = defaults
            .password
            .clone()
            .unwrap_or_else(|| generate_password(self.config.password_length));

        let fields = [
            ("USERNAME", "Username :", defaults.username.clone()),
            ("FIRSTNAME", "Firstname :", defaults.firstname.clone()),
            ("LASTNAME", "Lastname :", defaults.lastname.clone()),
            ("INITIALS", "Initials :", defaults.initials.clone()),
            ("TITLE", "Title :", defaults.title.clone()),
            ("USERID", "unix User ID :", defaults.uid.clone()),
            ("GROUPID", "unix Group ID :", defaults.gid.clone()),
            ("USERPASSWORD", "User Password :", Some(password)),
            ("PHONEMOBILE", "Mobile Phone :", defaults.mobile.clone()),
            ("PHONEHOME", "Home Phone :", defaults.phone.clone()),
            ("ORGANISATION", "Organisation :", defaults.organisation.clone()),
            ("POSTALADDRESS", "Address :", defaults.address.clone()),
            ("POSTCODE", "Postcode :", defaults.postcode.clone()),
            ("SUBURB", "Suburb :", defaults.suburb.clone()),
            ("DN", "DN :", Some(dn.clone())),
            ("DOMAIN", "DOMAIN :", Some(domain)),
            ("HOSTNAME", "HOSTNAME :", Some(self.session.resolved.hostname.clone())),
        ];

        let mut context = Context::new();
        for (key, text, default) in fields {
            let value = self.prompter.prompt(text, default.as_deref())?;
            context.insert(key.to_string(), value);
        }

        let username = context.get("USERNAME").cloned().unwrap_or_default();
        if username.is_empty() {
            return Err(DeployError::MissingValue("username"));
        }

        let summary = context
            .iter()
            .filter(|(k, _)| k.as_str() != "USERPASSWORD")
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();
        self.session
            .log(&format!("Inserting person LDIF : {username} [{}]", summary.join(", ")))?;

        let output = self.workspace_file(&[
            SeedKind::Users.dir_name(),
            &ldif_file_name(&username),
        ]);
        self.prompter.notify(&format!(
            "{}{}",
            "Person Record : ".cyan(),
            "Creating Temporary User LDIF".yellow()
        ))?;
        write_template(&self.config.template("user.ldif"), &output, &context)?;
        self.ldapadd_admin(&dn, &output)?;
        Ok(true)
    }

    /// Loads every `*.ldif` file from the preseed directory for `kind`, in
    /// file name order. Returns how many were loaded.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging, directory access or command errors.
    pub fn preseed(&mut self, kind: SeedKind) -> Result<usize> {
        if !self
            .prompter
            .confirm(&format!("Scan for LDIF Preseed {kind} Data?"))?
        {
            return Ok(0);
        }

        let dir = self.config.preseed_dir.join(kind.dir_name());
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "No preseed directory");
            return Ok(0);
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| DeployError::file_access(&dir, e))? {
            let path = entry.map_err(|e| DeployError::file_access(&dir, e))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "ldif") {
                files.push(path);
            }
        }
        files.sort();

        let mut loaded = 0;
        for path in files {
            let added = match kind {
                SeedKind::Groups => self.group(Some(&path))?,
                SeedKind::Users => self.user(Some(&path))?,
            };
            if added {
                loaded += 1;
            }
        }
        tracing::info!(kind = %kind, loaded, "Preseed scan complete");
        Ok(loaded)
    }

    /// Adds entries interactively for as long as the operator wants more.
    /// Returns how many were added.
    ///
    /// # Errors
    ///
    /// Returns prompt, logging, template or command errors.
    pub fn inputseed(&mut self, kind: SeedKind) -> Result<usize> {
        let question = format!("Manually input LDIF Preseed {kind} Data?");
        let mut added = 0;
        while self.prompter.confirm(&question)? {
            let done = match kind {
                SeedKind::Groups => self.group(None)?,
                SeedKind::Users => self.user(None)?,
            };
            if done {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Runs the whole deployment in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing task and returns its error.
    pub fn start(&mut self) -> Result<()> {
        self.variables()?;
        self.dns(RecordMode::Insert)?;
        self.install()?;
        self.default_schema()?;
        self.backend_schema()?;
        self.frontend_schema()?;
        for kind in [SeedKind::Groups, SeedKind::Users] {
            self.preseed(kind)?;
            self.inputseed(kind)?;
        }
        self.session.log("Deployment finished")?;
        tracing::info!("Deployment finished");
        Ok(())
    }
}

/// Turns an entry name into a safe file name.
fn ldif_file_name(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.ldif", stem.trim_start_matches('.'))
}
