/// Topic name validation and wildcard matching
///
/// Names are dot-separated segments of `[a-z0-9_]+`. Patterns additionally
/// allow `*` (exactly one segment) and a trailing `#` (one or more segments).
use crate::errors::RegistryError;
use once_cell::sync::Lazy;
use regex::Regex;

static SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("Invalid topic segment regex"));

/// Validate a concrete topic name
pub fn validate_topic_name(name: &str) -> Result<(), RegistryError> {
    check_shape(name)?;
    for segment in name.split('.') {
        if !SEGMENT.is_match(segment) {
            return Err(RegistryError::invalid_name(
                name,
                format!("segment {:?} must match [a-z0-9_]+", segment),
            ));
        }
    }
    Ok(())
}

/// Validate a wildcard pattern
pub fn validate_topic_pattern(pattern: &str) -> Result<(), RegistryError> {
    check_shape(pattern)?;
    let segments: Vec<&str> = pattern.split('.').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        let ok = match *segment {
            "*" => true,
            "#" => i == last,
            s => SEGMENT.is_match(s),
        };
        if !ok {
            return Err(RegistryError::invalid_name(
                pattern,
                format!("pattern segment {:?} is not allowed here", segment),
            ));
        }
    }
    Ok(())
}

fn check_shape(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::invalid_name(name, "empty name"));
    }
    if name.starts_with('.') {
        return Err(RegistryError::invalid_name(name, "leading dot"));
    }
    if name.ends_with('.') {
        return Err(RegistryError::invalid_name(name, "trailing dot"));
    }
    if name.contains("..") {
        return Err(RegistryError::invalid_name(name, "empty segment"));
    }
    Ok(())
}

/// True when `name` is covered by `pattern`
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let mut pattern_segments = pattern.split('.').peekable();
    let mut name_segments = name.split('.');

    while let Some(p) = pattern_segments.next() {
        if p == "#" && pattern_segments.peek().is_none() {
            return name_segments.next().is_some();
        }
        match name_segments.next() {
            Some(n) if p == "*" || p == n => continue,
            _ => return false,
        }
    }

    name_segments.next().is_none()
}

/// True when the string carries wildcard segments
pub fn is_pattern(candidate: &str) -> bool {
    candidate.split('.').any(|s| s == "*" || s == "#")
}
