#![forbid(unsafe_code)]

use regex::Regex;

pub fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.contains('*') {
        let escaped = regex::escape(&pattern.replace('*', "\x00"));
        let regex_pattern = format!("^{}$", escaped.replace('\x00', ".*"));
        if let Ok(re) = Regex::new(&regex_pattern) {
            return re.is_match(value);
        }
    }
    pattern == value
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}

/// Validates a concrete or wildcard permission code.
///
/// Concrete codes are `resource:action` with lowercase alphanumeric segments.
/// The action segment may be `*` (e.g. `budget:*`), and the bare code `*` is
/// accepted where `allow_wildcard` is set (grants, never catalog entries).
pub fn validate_code(code: &str, allow_wildcard: bool) -> crate::Result<()> {
    if code == "*" {
        if allow_wildcard {
            return Ok(());
        }
        return Err(crate::Error::Validation(
            "bare wildcard code not allowed here".into(),
        ));
    }
    let Some((resource, action)) = code.split_once(':') else {
        return Err(crate::Error::Validation(format!(
            "permission code '{}' must be resource:action",
            code
        )));
    };
    if resource.is_empty() || !resource.chars().all(is_segment_char) {
        return Err(crate::Error::Validation(format!(
            "invalid resource segment in '{}'",
            code
        )));
    }
    if action == "*" {
        if allow_wildcard {
            return Ok(());
        }
        return Err(crate::Error::Validation(format!(
            "wildcard action not allowed in '{}'",
            code
        )));
    }
    if action.is_empty() || !action.chars().all(is_segment_char) {
        return Err(crate::Error::Validation(format!(
            "invalid action segment in '{}'",
            code
        )));
    }
    Ok(())
}

pub fn validate_id(kind: &str, id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(crate::Error::Validation(format!(
            "{} id cannot be empty",
            kind
        )));
    }
    if id.len() > 64 {
        return Err(crate::Error::Validation(format!(
            "{} id must be 64 chars or less",
            kind
        )));
    }
    if !id.chars().all(is_segment_char) {
        return Err(crate::Error::Validation(format!(
            "{} id '{}' must be lowercase alphanumeric, dash, or underscore",
            kind, id
        )));
    }
    Ok(())
}

pub fn validate_actor_id(id: &str) -> crate::Result<()> {
    if id.is_empty() {
        return Err(crate::Error::Validation("actor id cannot be empty".into()));
    }
    if id.len() > 256 {
        return Err(crate::Error::Validation(
            "actor id must be 256 chars or less".into(),
        ));
    }
    if !id.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '@' || c == ':'
    }) {
        return Err(crate::Error::Validation(
            "actor id contains invalid characters".into(),
        ));
    }
    Ok(())
}
