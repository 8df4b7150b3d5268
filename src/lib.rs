//! # ldap-deploy
//!
//! Interactive deployment of an OpenLDAP directory: installs slapd, loads
//! schemas, seeds groups and users, and publishes `ldap` / `ldap-master`
//! CNAME aliases in a BIND9 zone file.
//!
//! ## Zone file contract
//!
//! The zone editor only touches lines after the marker comment
//! [`zone::MANAGED_MARKER`], which must appear exactly once. The SOA serial
//! must sit on its own line with a `serial` comment:
//!
//! ```text
//! @ IN SOA ns1.example.com. admin.example.com. (
//!                        2024010101 ; serial number
//!                        ...
//! )
//! ;[==ldap-deploy aliases==]
//! ```
//!
//! Every change bumps the serial by one and replaces the file through an
//! atomic rename, so a reloading `named` never sees a half-written zone.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ldap_deploy::zone::{RecordMode, ZoneFile};
//!
//! let zone = ZoneFile::new("/etc/bind/zones/example.com.db");
//! let update = zone.apply("ldap", "dir01.example.com.", RecordMode::Insert, false)?;
//! if update.changed {
//!     println!("serial {:?}", update.serial);
//! }
//! ```
//!
//! The interactive tasks live on [`Deployer`], which owns the configuration,
//! the [`Session`] and the operator and command collaborators.
//!
//! ## Permissions
//!
//! Package installation and `ldapadd -Y EXTERNAL` need root, and so does
//! writing `/etc/bind/zones/`. Privileged commands are prefixed with `sudo`
//! unless `use_sudo = false`.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod config;
pub mod error;
pub mod prompt;
pub mod session;
pub mod tasks;
pub mod template;
pub mod util;
pub mod zone;

pub use command::{CommandRunner, SystemRunner};
pub use config::DeployConfig;
pub use error::{DeployError, Result};
pub use prompt::{Prompter, TerminalPrompter};
pub use session::Session;
pub use tasks::{Deployer, PersonDefaults, SeedKind};
pub use zone::{RecordMode, ZoneFile, apply_record_change, bump_serial};
