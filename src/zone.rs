//! BIND zone file editing for managed CNAME aliases.
//!
//! The editor owns only the part of a zone file that follows the marker line
//! [`MANAGED_MARKER`]. Everything before it belongs to whoever maintains the
//! zone and is copied through untouched. Every mutation also bumps the SOA
//! serial so that secondaries pick up the change.
//!
//! The pure functions [`apply_record_change`] and [`bump_serial`] work on
//! line sequences and never touch the filesystem. [`ZoneFile`] ties them to a
//! path and persists results with an atomic rename.
//!
//! ```text
//! $TTL 86400
//! @ IN SOA ns1. admin. (
//!                        12345 ; serial number
//!                        ...
//! )
//! ;[==ldap-deploy aliases==]
//! ldap                                    CNAME   host.example.com.
//! ```

use crate::error::{DeployError, Result};
use regex::Regex;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// Marker comment that starts the managed region of a zone file.
pub const MANAGED_MARKER: &str = ";[==ldap-deploy aliases==]";

/// Column at which the record type starts in lines written by this module.
const ALIAS_FIELD_WIDTH: usize = 40;

/// Record type field, padded to the target column.
const CNAME_FIELD: &str = "CNAME   ";

/// Whether a record should be present or absent after the edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Ensure the alias exists.
    Insert,
    /// Ensure the alias does not exist.
    Remove,
}

impl fmt::Display for RecordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Remove => "remove",
        })
    }
}

impl FromStr for RecordMode {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "remove" => Ok(Self::Remove),
            other => Err(DeployError::InvalidConfig(format!(
                "unknown record mode `{other}` (expected `insert` or `remove`)"
            ))),
        }
    }
}

/// A CNAME record found in the managed region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    /// Owner name of the record.
    pub alias: String,
    /// Canonical name the alias points at.
    pub target: String,
    /// 1-based line number within the zone file.
    pub line: usize,
}

impl AliasRecord {
    /// Parses a single zone line as `<alias> [ttl] [class] CNAME <target>`.
    ///
    /// Lines starting with whitespace inherit the previous owner name and are
    /// never treated as managed aliases.
    fn parse(line: &str, line_number: usize) -> Option<Self> {
        if line.starts_with(char::is_whitespace) {
            return None;
        }
        let code = line.split_once(';').map_or(line, |(code, _)| code);
        let mut fields = code.split_whitespace();
        let alias = fields.next()?;

        // TTL and class may each appear once, in either order.
        let mut rtype = fields.next()?;
        for _ in 0..2 {
            if !is_ttl(rtype) && !is_class(rtype) {
                break;
            }
            rtype = fields.next()?;
        }
        if !rtype.eq_ignore_ascii_case("CNAME") {
            return None;
        }

        let target = fields.next()?;
        Some(Self {
            alias: alias.to_string(),
            target: target.to_string(),
            line: line_number,
        })
    }

    fn matches(&self, alias: &str) -> bool {
        self.alias.eq_ignore_ascii_case(alias)
    }
}

static TTL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+[smhdwSMHDW]?)+$").expect("TTL pattern is valid"));

/// `3600`, `1h`, `1h30m`, ...
fn is_ttl(field: &str) -> bool {
    TTL.is_match(field)
}

fn is_class(field: &str) -> bool {
    ["IN", "CH", "HS", "ANY"]
        .iter()
        .any(|c| field.eq_ignore_ascii_case(c))
}

/// Formats a record line the way this module writes them.
///
/// ```
/// use ldap_deploy::zone::format_record;
///
/// let line = format_record("ldap", "host.example.com.");
/// assert!(line.starts_with("ldap "));
/// assert_eq!(&line[40..], "CNAME   host.example.com.");
/// ```
#[must_use]
pub fn format_record(alias: &str, target: &str) -> String {
    if alias.len() >= ALIAS_FIELD_WIDTH {
        return format!("{alias} {CNAME_FIELD}{target}");
    }
    format!("{alias:<ALIAS_FIELD_WIDTH$}{CNAME_FIELD}{target}")
}

// ---------------------------------------------------------------------------
// Zone text
// ---------------------------------------------------------------------------

/// Zone file contents split into lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneText {
    lines: Vec<String>,
    trailing_newline: bool,
    crlf: bool,
}

impl ZoneText {
    /// Splits raw file contents into lines, remembering the line ending
    /// of the first line and whether the text ends with one.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            trailing_newline: text.ends_with('\n'),
            crlf: text
                .split_once('\n')
                .is_some_and(|(first, _)| first.ends_with('\r')),
        }
    }

    /// Replaces the lines, keeping this text's line endings.
    #[must_use]
    pub fn with_lines(&self, lines: Vec<String>) -> Self {
        Self {
            lines,
            trailing_newline: self.trailing_newline,
            crlf: self.crlf,
        }
    }

    /// Returns the lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consumes the text, returning the lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Joins the lines back into file contents.
    #[must_use]
    pub fn render(&self) -> String {
        let eol = if self.crlf { "\r\n" } else { "\n" };
        let mut out = self.lines.join(eol);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(eol);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Record editing
// ---------------------------------------------------------------------------

/// Outcome of [`apply_record_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    /// The zone lines after the edit.
    pub lines: Vec<String>,
    /// Whether `lines` differs from the input.
    pub changed: bool,
    /// The record for the alias as it was before the edit, if any.
    pub existing: Option<AliasRecord>,
}

/// Returns the index of the managed-region marker.
fn locate_marker(lines: &[String]) -> Result<usize> {
    let mut markers = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.trim() == MANAGED_MARKER)
        .map(|(i, _)| i);

    let first = markers.next().ok_or(DeployError::MissingMarker)?;
    let extra = markers.count();
    if extra > 0 {
        return Err(DeployError::DuplicateMarker { count: extra + 1 });
    }
    Ok(first)
}

/// Lists the CNAME records in the managed region.
///
/// # Errors
///
/// Returns [`DeployError::MissingMarker`] or [`DeployError::DuplicateMarker`]
/// if the region cannot be located.
pub fn managed_records(lines: &[String]) -> Result<Vec<AliasRecord>> {
    let marker = locate_marker(lines)?;
    Ok(lines
        .iter()
        .enumerate()
        .skip(marker + 1)
        .filter_map(|(i, line)| AliasRecord::parse(line, i + 1))
        .collect())
}

/// Inserts or removes the `alias → target` record in the managed region.
///
/// Inserting an alias that is already present leaves the lines alone, even
/// if it points somewhere else; the existing record is reported in
/// [`RecordChange::existing`] so the caller can decide what to do. New
/// records go after the last non-blank line of the region. Removal drops
/// every managed record for the alias.
///
/// # Errors
///
/// Returns [`DeployError::MissingMarker`] if the zone has no marker, or
/// [`DeployError::DuplicateMarker`] if it has more than one.
pub fn apply_record_change(
    lines: &[String],
    alias: &str,
    target: &str,
    mode: RecordMode,
) -> Result<RecordChange> {
    let marker = locate_marker(lines)?;
    let region = marker + 1;

    let matching: Vec<AliasRecord> = lines
        .iter()
        .enumerate()
        .skip(region)
        .filter_map(|(i, line)| AliasRecord::parse(line, i + 1))
        .filter(|record| record.matches(alias))
        .collect();
    let existing = matching.first().cloned();

    match (mode, existing.is_some()) {
        (RecordMode::Insert, false) => {
            let end = (region..lines.len())
                .rev()
                .find(|&i| !lines[i].trim().is_empty())
                .map_or(region, |i| i + 1);
            let mut out = Vec::with_capacity(lines.len() + 1);
            out.extend_from_slice(&lines[..end]);
            out.push(format_record(alias, target));
            out.extend_from_slice(&lines[end..]);
            Ok(RecordChange {
                lines: out,
                changed: true,
                existing,
            })
        }
        (RecordMode::Remove, true) => {
            let out = lines
                .iter()
                .enumerate()
                .filter(|(i, _)| !matching.iter().any(|r| r.line == i + 1))
                .map(|(_, line)| line.clone())
                .collect();
            Ok(RecordChange {
                lines: out,
                changed: true,
                existing,
            })
        }
        (RecordMode::Insert, true) | (RecordMode::Remove, false) => Ok(RecordChange {
            lines: lines.to_vec(),
            changed: false,
            existing,
        }),
    }
}

// ---------------------------------------------------------------------------
// Serial number
// ---------------------------------------------------------------------------

/// Outcome of [`bump_serial`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialBump {
    /// The zone lines with the serial replaced.
    pub lines: Vec<String>,
    /// 1-based line number of the serial.
    pub line: usize,
    /// Serial before the bump.
    pub previous: u32,
    /// Serial after the bump.
    pub current: u32,
}

/// Locates the serial digits on a line of the form `<int> ; ... serial ...`.
///
/// Returns the byte range of the integer.
fn serial_field(line: &str) -> Option<(usize, usize)> {
    let (code, comment) = line.split_once(';')?;
    let has_token = comment
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word.eq_ignore_ascii_case("serial"));
    if !has_token {
        return None;
    }

    let value = code.trim_start();
    let start = code.len() - value.len();
    let digits = value.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    if !value[digits..].chars().next().is_none_or(char::is_whitespace) {
        return None;
    }
    Some((start, start + digits))
}

/// Increments the zone's serial number by one.
///
/// The rest of the serial line is preserved. When the number gains a digit,
/// one space of padding after it is absorbed so the comment column stays put.
/// Leading zeros keep the field at its original width.
///
/// # Errors
///
/// Returns [`DeployError::SerialNotFound`] or
/// [`DeployError::AmbiguousSerial`] unless exactly one serial line exists,
/// and [`DeployError::SerialOverflow`] if the value does not fit in a `u32`
/// after incrementing.
pub fn bump_serial(lines: &[String]) -> Result<SerialBump> {
    let candidates: Vec<(usize, (usize, usize))> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| serial_field(line).map(|range| (i, range)))
        .collect();

    let (index, (start, end)) = match candidates.as_slice() {
        [] => return Err(DeployError::SerialNotFound),
        [single] => *single,
        many => {
            return Err(DeployError::AmbiguousSerial {
                lines: many.iter().map(|(i, _)| i + 1).collect(),
            });
        }
    };

    let line = &lines[index];
    let digits = &line[start..end];
    let overflow = || DeployError::SerialOverflow {
        serial: digits.to_string(),
    };
    let previous: u32 = digits.parse().map_err(|_| overflow())?;
    let current = previous.checked_add(1).ok_or_else(overflow)?;

    let formatted = format!("{current:0width$}", width = digits.len());
    let grown = formatted.len() - digits.len();
    let rest = &line[end..];
    let padding = rest.len() - rest.trim_start_matches(' ').len();
    let rest = if grown > 0 && padding > grown {
        &rest[grown..]
    } else {
        rest
    };

    let mut out = lines.to_vec();
    out[index] = format!("{}{formatted}{rest}", &line[..start]);
    Ok(SerialBump {
        lines: out,
        line: index + 1,
        previous,
        current,
    })
}

// ---------------------------------------------------------------------------
// Zone file on disk
// ---------------------------------------------------------------------------

/// Result of [`ZoneFile::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneUpdate {
    /// Whether the record change altered the zone.
    pub changed: bool,
    /// Whether the new zone was written to disk.
    pub written: bool,
    /// `(previous, current)` serial, when it was bumped.
    pub serial: Option<(u32, u32)>,
    /// The alias record as it was before the edit, if any.
    pub existing: Option<AliasRecord>,
    /// Zone contents after the edit.
    pub text: ZoneText,
}

/// A BIND zone file containing a managed alias region.
///
/// # Example
///
/// ```rust,ignore
/// use ldap_deploy::zone::{RecordMode, ZoneFile};
///
/// let zone = ZoneFile::new("/etc/bind/zones/example.com.db");
/// let update = zone.apply("ldap", "host.example.com.", RecordMode::Insert, false)?;
/// assert!(update.written);
/// ```
#[derive(Debug, Clone)]
pub struct ZoneFile {
    path: PathBuf,
}

impl ZoneFile {
    /// Creates a handle for the zone file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the zone file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and splits the zone file.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::FileAccess`] if the file cannot be read.
    pub fn read(&self) -> Result<ZoneText> {
        std::fs::read_to_string(&self.path)
            .map(|text| ZoneText::parse(&text))
            .map_err(|e| DeployError::file_access(&self.path, e))
    }

    /// Lists the CNAME records in the managed region.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::FileAccess`] on read failure, or a marker error
    /// if the managed region cannot be located.
    pub fn records(&self) -> Result<Vec<AliasRecord>> {
        managed_records(self.read()?.lines())
    }

    /// Inserts or removes an alias and, if anything changed, bumps the serial
    /// and writes the zone back unless `dry_run` is set.
    ///
    /// The file is only replaced after the new contents are fully computed,
    /// so every error leaves it as it was.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::FileAccess`] on I/O failure, or any zone format
    /// error from [`apply_record_change`] and [`bump_serial`].
    pub fn apply(
        &self,
        alias: &str,
        target: &str,
        mode: RecordMode,
        dry_run: bool,
    ) -> Result<ZoneUpdate> {
        self.apply_to(&self.read()?, alias, target, mode, dry_run)
    }

    /// Like [`Self::apply`], but edits `current` instead of the file on disk.
    ///
    /// Feeding each dry-run [`ZoneUpdate::text`] into the next call previews
    /// a sequence of edits with the serials a real run would produce.
    ///
    /// # Errors
    ///
    /// See [`Self::apply`].
    pub fn apply_to(
        &self,
        current: &ZoneText,
        alias: &str,
        target: &str,
        mode: RecordMode,
        dry_run: bool,
    ) -> Result<ZoneUpdate> {
        let change = apply_record_change(current.lines(), alias, target, mode)?;

        if !change.changed {
            return Ok(ZoneUpdate {
                changed: false,
                written: false,
                serial: None,
                existing: change.existing,
                text: current.clone(),
            });
        }

        let bump = bump_serial(&change.lines)?;
        let text = current.with_lines(bump.lines);

        if !dry_run {
            write_atomic(&self.path, &text.render())?;
        }

        Ok(ZoneUpdate {
            changed: true,
            written: !dry_run,
            serial: Some((bump.previous, bump.current)),
            existing: change.existing,
            text,
        })
    }
}

// ---------------------------------------------------------------------------
// Persistence helpers
// ---------------------------------------------------------------------------

/// Replaces `path` with `contents` through a synced temporary file in the
/// same directory, then renames it into place.
///
/// Symlinks are resolved first, so the link's target is replaced rather than
/// the link. The new file keeps the original's permission bits and, when
/// allowed, its owner and group.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let path = &std::fs::canonicalize(path).map_err(|e| DeployError::file_access(path, e))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let metadata = std::fs::metadata(path).map_err(|e| DeployError::file_access(path, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".ldap-deploy-")
        .tempfile_in(dir)
        .map_err(|e| DeployError::file_access(dir, e))?;
    let tmp_path = tmp.path().to_path_buf();

    tmp.write_all(contents.as_bytes())
        .and_then(|()| tmp.flush())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| DeployError::file_access(&tmp_path, e))?;
    std::fs::set_permissions(&tmp_path, metadata.permissions())
        .map_err(|e| DeployError::file_access(&tmp_path, e))?;
    preserve_owner(&tmp_path, &metadata);

    tmp.persist(path)
        .map_err(|e| DeployError::file_access(path, e.error))?;
    Ok(())
}

#[cfg(unix)]
fn preserve_owner(path: &Path, metadata: &std::fs::Metadata) {
    use std::os::unix::fs::MetadataExt;

    if let Err(e) = std::os::unix::fs::chown(path, Some(metadata.uid()), Some(metadata.gid())) {
        tracing::debug!(
            path = %path.display(),
            error = %e,
            "Could not preserve zone file ownership"
        );
    }
}

#[cfg(not(unix))]
fn preserve_owner(_path: &Path, _metadata: &std::fs::Metadata) {}
