//! `${NAME}` substitution for LDIF templates.
//!
//! Placeholders are `${NAME}` or `$NAME`, and `$$` is a literal dollar sign.
//! Placeholders with no value in the context are left as they are, so a
//! partially filled template still renders.

use crate::error::{DeployError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// Variables available to a template.
pub type Context = HashMap<String, String>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|\{([A-Za-z0-9_]+)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("placeholder pattern is valid")
});

/// Substitutes every known placeholder in `source`.
///
/// ```
/// use ldap_deploy::template::{render, Context};
///
/// let mut ctx = Context::new();
/// ctx.insert("DN".into(), "dc=h,dc=example,dc=com".into());
/// assert_eq!(render("dn: ${DN}", &ctx), "dn: dc=h,dc=example,dc=com");
/// assert_eq!(render("${UNKNOWN} costs $$5", &ctx), "${UNKNOWN} costs $5");
/// ```
#[must_use]
pub fn render(source: &str, context: &Context) -> String {
    PLACEHOLDER
        .replace_all(source, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            context
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Renders the template at `template_path` into `output_path`, creating the
/// output's parent directories.
///
/// # Errors
///
/// Returns [`DeployError::FileAccess`] if the template cannot be read or the
/// output cannot be written.
pub fn write_template(template_path: &Path, output_path: &Path, context: &Context) -> Result<()> {
    let source = std::fs::read_to_string(template_path)
        .map_err(|e| DeployError::file_access(template_path, e))?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeployError::file_access(parent, e))?;
    }
    std::fs::write(output_path, render(&source, context))
        .map_err(|e| DeployError::file_access(output_path, e))?;

    tracing::debug!(
        template = %template_path.display(),
        output = %output_path.display(),
        "Rendered template"
    );
    Ok(())
}
