//! `ldap-deploy` command-line entry point.
//!
//! ```bash
//! # Full interactive deployment
//! ldap-deploy start
//!
//! # Show, create or remove the BIND aliases
//! ldap-deploy dns
//! ldap-deploy --dry-run dns --create
//! ldap-deploy dns --remove
//!
//! # Seed entries
//! ldap-deploy preseed groups
//! ldap-deploy person --username jdoe --firstname Jane --lastname Doe
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ldap_deploy::{
    DeployConfig, Deployer, PersonDefaults, RecordMode, SeedKind, Session, SystemRunner,
    TerminalPrompter, util,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "ldap-deploy.toml";

/// Interactive OpenLDAP deployment with BIND9 alias records.
#[derive(Parser, Debug)]
#[command(name = "ldap-deploy")]
#[command(author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// TOML config file (defaults to ./ldap-deploy.toml when present)
    #[arg(short, long, global = true, env = "LDAP_DEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Network domain name
    #[arg(long, global = true)]
    domain: Option<String>,

    /// Host name used for the DN and alias target
    #[arg(long, global = true)]
    hostname: Option<String>,

    /// BIND zone file to edit
    #[arg(long, global = true)]
    zone_file: Option<PathBuf>,

    /// Log commands and zone edits without performing them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        ignore_case = true,
        env = "RUST_LOG_FORMAT",
        default_value = "text"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Seed {
    Groups,
    Users,
}

impl From<Seed> for SeedKind {
    fn from(seed: Seed) -> Self {
        match seed {
            Seed::Groups => Self::Groups,
            Seed::Users => Self::Users,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every task in order
    Start,
    /// Install slapd and ldap-utils
    Install,
    /// Stop slapd and purge its packages, config and database
    Purge,
    /// Delete the slapd config and database, then reconfigure
    Reset,
    /// Show, insert or remove the BIND CNAME aliases
    Dns(DnsArgs),
    /// Load the schemas bundled with slapd
    DefaultSchema,
    /// Render and load the backend database config
    BackendSchema,
    /// Render and load the top entry and admin account
    FrontendSchema,
    /// Add a group interactively or from a preseed LDIF
    Group {
        /// Preseed LDIF to load instead of prompting
        #[arg(long)]
        preseed: Option<PathBuf>,
    },
    /// Add a user interactively
    Person(PersonArgs),
    /// Load every preseed LDIF of a kind
    Preseed {
        #[arg(value_enum)]
        kind: Seed,
    },
    /// Add entries of a kind until told to stop
    Inputseed {
        #[arg(value_enum)]
        kind: Seed,
    },
    /// Print a random password
    Password {
        /// Password length
        #[arg(short, long)]
        length: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct DnsArgs {
    /// Insert the configured aliases
    #[arg(long, conflicts_with = "remove")]
    create: bool,

    /// Remove the configured aliases
    #[arg(long)]
    remove: bool,
}

#[derive(Args, Debug, Default)]
struct PersonArgs {
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    firstname: Option<String>,
    #[arg(long)]
    lastname: Option<String>,
    #[arg(long)]
    initials: Option<String>,
    #[arg(long)]
    title: Option<String>,
    /// Unix user id
    #[arg(long)]
    uid: Option<String>,
    /// Unix group id
    #[arg(long)]
    gid: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    mobile: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    org: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    postcode: Option<String>,
    #[arg(long)]
    suburb: Option<String>,
}

impl From<PersonArgs> for PersonDefaults {
    fn from(a: PersonArgs) -> Self {
        Self {
            username: a.username,
            firstname: a.firstname,
            lastname: a.lastname,
            initials: a.initials,
            title: a.title,
            uid: a.uid,
            gid: a.gid,
            password: a.password,
            mobile: a.mobile,
            phone: a.phone,
            organisation: a.org,
            address: a.address,
            postcode: a.postcode,
            suburb: a.suburb,
        }
    }
}

fn init_tracing(format: LogFormat) {
    // Respects RUST_LOG, defaulting to INFO.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }
}

fn load_config(cli: &Cli) -> Result<DeployConfig> {
    let mut config = match &cli.config {
        Some(path) => DeployConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => DeployConfig::load(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("loading config {DEFAULT_CONFIG_FILE}"))?,
        None => DeployConfig::default(),
    };

    if let Some(domain) = &cli.domain {
        config = config.with_domain(domain);
    }
    if let Some(hostname) = &cli.hostname {
        config = config.with_hostname(hostname);
    }
    if let Some(zone_file) = &cli.zone_file {
        config = config.with_zone_file(zone_file);
    }
    if cli.dry_run {
        config = config.with_dry_run(true);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    debug!(?config, "Configuration resolved");

    let command = match cli.command {
        Commands::Password { length } => {
            println!(
                "{}",
                util::generate_password(length.unwrap_or(config.password_length))
            );
            return Ok(());
        }
        command => command,
    };

    let hostname = match &config.hostname {
        Some(h) => h.clone(),
        None => util::hostname().context("detecting host name")?,
    };
    let session = Session::start(&config.log_file, hostname)
        .with_context(|| format!("starting session log {}", config.log_file.display()))?;
    let runner = SystemRunner::new(config.use_sudo, config.dry_run);
    let mut deployer = Deployer::new(config, session, TerminalPrompter::stdio(), runner);

    match command {
        Commands::Start => deployer.start()?,
        Commands::Install => {
            deployer.install()?;
        }
        Commands::Purge => {
            deployer.purge()?;
        }
        Commands::Reset => {
            deployer.reset()?;
        }
        Commands::Dns(DnsArgs { create, remove }) => {
            if create || remove {
                let mode = if create {
                    RecordMode::Insert
                } else {
                    RecordMode::Remove
                };
                let updates = deployer.dns(mode)?;
                let changed = updates.iter().filter(|u| u.changed).count();
                info!(%mode, changed, total = updates.len(), "DNS alias update finished");
            } else {
                deployer.list_aliases()?;
            }
        }
        Commands::DefaultSchema => {
            deployer.default_schema()?;
        }
        Commands::BackendSchema => {
            deployer.backend_schema()?;
        }
        Commands::FrontendSchema => {
            deployer.frontend_schema()?;
        }
        Commands::Group { preseed } => {
            deployer.group(preseed.as_deref())?;
        }
        Commands::Person(args) => {
            deployer.person(&args.into())?;
        }
        Commands::Preseed { kind } => {
            deployer.preseed(kind.into())?;
        }
        Commands::Inputseed { kind } => {
            deployer.inputseed(kind.into())?;
        }
        Commands::Password { .. } => {}
    }
    info!(
        log = %deployer.session().log_path().display(),
        "Session recorded"
    );
    Ok(())
}
