//! Running package-manager and directory-server tools.

use crate::error::{DeployError, Result};
use std::process::Command;

/// Runs external programs on behalf of a task.
pub trait CommandRunner {
    /// Runs `program` with `args`, waiting for it to finish.
    ///
    /// `privileged` commands are run as root when the runner supports it.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::CommandFailed`] on a non-zero exit, or
    /// [`DeployError::Io`] if the program cannot be spawned.
    fn run(&mut self, program: &str, args: &[&str], privileged: bool) -> Result<()>;
}

/// Renders a command line for logs and error messages.
#[must_use]
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs commands on the local system with inherited stdio, so tools such as
/// `dpkg-reconfigure` and `ldapadd -W` can talk to the operator directly.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    use_sudo: bool,
    dry_run: bool,
}

impl SystemRunner {
    /// Creates a runner. With `dry_run`, commands are logged but not run.
    #[must_use]
    pub const fn new(use_sudo: bool, dry_run: bool) -> Self {
        Self { use_sudo, dry_run }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[&str], privileged: bool) -> Result<()> {
        let mut cmd = if privileged && self.use_sudo {
            let mut sudo = Command::new("sudo");
            sudo.arg(program);
            sudo
        } else {
            Command::new(program)
        };
        cmd.args(args);

        let line = command_line(program, args);
        if self.dry_run {
            tracing::info!(command = %line, privileged, "Dry run, not executing");
            return Ok(());
        }

        tracing::info!(command = %line, privileged, "Running command");
        let status = cmd.status()?;
        if !status.success() {
            tracing::warn!(command = %line, %status, "Command failed");
            return Err(DeployError::CommandFailed {
                command: line,
                status,
            });
        }
        Ok(())
    }
}
