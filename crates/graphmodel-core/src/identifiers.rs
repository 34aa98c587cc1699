//! Cypher identifier escaping and validation.
//!
//! Labels, relationship types and property keys are spliced into statement
//! text (they cannot be parameters), so every one of them goes through
//! [`escape_identifier`]. Values never do: they are always bound parameters.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, MappingError, MappingErrorKind, Result};

fn plain_identifier() -> Option<&'static Regex> {
    static PLAIN: OnceLock<Option<Regex>> = OnceLock::new();
    PLAIN
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "Identifier pattern failed to compile, quoting everything");
                None
            }
        })
        .as_ref()
}

/// Whether a name can appear in a statement without backticks.
pub fn is_plain_identifier(name: &str) -> bool {
    plain_identifier().is_some_and(|re| re.is_match(name))
}

/// Escape a label, relationship type or property key for statement text.
///
/// Plain names are returned as-is; anything else is wrapped in backticks with
/// embedded backticks doubled.
///
/// # Examples
///
/// ```
/// use graphmodel_core::escape_identifier;
///
/// assert_eq!(escape_identifier("Folder"), "Folder");
/// assert_eq!(escape_identifier("has space"), "`has space`");
/// assert_eq!(escape_identifier("a`b"), "`a``b`");
/// ```
pub fn escape_identifier(name: &str) -> Cow<'_, str> {
    if is_plain_identifier(name) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("`{}`", name.replace('`', "``")))
    }
}

/// Render a label set as `:A:B`, escaping each label.
pub fn label_expression<S: AsRef<str>>(labels: &[S]) -> String {
    labels
        .iter()
        .map(|l| format!(":{}", escape_identifier(l.as_ref())))
        .collect()
}

/// Reject names no amount of escaping makes usable.
///
/// `kind` names what is being validated ("label", "relationship type", ...)
/// for the error message.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Mapping(MappingError::new(
            MappingErrorKind::InvalidIdentifier,
            format!("empty {kind}"),
        )));
    }
    if name.contains('\0') {
        return Err(Error::Mapping(MappingError::new(
            MappingErrorKind::InvalidIdentifier,
            format!("{kind} '{}' contains a NUL byte", name.escape_debug()),
        )));
    }
    Ok(())
}
