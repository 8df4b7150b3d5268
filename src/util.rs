//! Internal utilities.

use crate::error::Result;
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Returns the local host name as reported by `gethostname(2)`.
///
/// # Errors
///
/// Returns [`DeployError::Io`](crate::DeployError::Io) with the OS error if
/// the call fails.
pub fn hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes for the whole
    // call, and gethostname never writes past the length it is given.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// Generates a random alphanumeric password.
#[must_use]
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Builds the directory base DN: `dc=<host>` followed by one `dc=` per
/// domain label.
///
/// ```
/// use ldap_deploy::util::base_dn;
///
/// assert_eq!(base_dn("dir01", "example.com"), "dc=dir01,dc=example,dc=com");
/// ```
#[must_use]
pub fn base_dn(hostname: &str, domain: &str) -> String {
    std::iter::once(hostname)
        .chain(domain.split('.'))
        .filter(|label| !label.is_empty())
        .map(|label| format!("dc={label}"))
        .collect::<Vec<_>>()
        .join(",")
}
