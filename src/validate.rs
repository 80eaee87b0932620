//! Single-segment name policy, applied before a create or rename introduces
//! a new name into the tree.

use crate::error::{VfsError, VfsResult};

pub const MAX_NAME_LEN: usize = 255;
pub const RESERVED_CHARS: [char; 8] = ['<', '>', ':', '"', '|', '?', '*', '\\'];

/// Returns `(true, "")` for an acceptable name, otherwise `(false, reason)`.
pub fn validate(segment: &str) -> (bool, String) {
    match check(segment) {
        Ok(()) => (true, String::new()),
        Err(reason) => (false, reason),
    }
}

/// Same policy as [`validate`], as a typed error.
pub fn validate_name(segment: &str) -> VfsResult<()> {
    check(segment).map_err(|reason| VfsError::InvalidName {
        name: segment.to_string(),
        reason,
    })
}

fn check(segment: &str) -> Result<(), String> {
    if segment.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    let len = segment.chars().count();
    if len > MAX_NAME_LEN {
        return Err(format!(
            "name too long ({} characters, maximum is {})",
            len, MAX_NAME_LEN
        ));
    }
    if let Some(c) = segment.chars().find(|c| !c.is_ascii()) {
        return Err(format!("non-ASCII character {:?}", c));
    }
    if let Some(c) = segment.chars().find(|c| c.is_ascii_control()) {
        return Err(format!("control character {:?}", c));
    }
    if let Some(c) = RESERVED_CHARS.iter().find(|c| segment.contains(**c)) {
        return Err(format!("reserved character {:?}", c));
    }
    if segment.starts_with(' ') || segment.ends_with(' ') {
        return Err("name cannot start or end with a space".to_string());
    }
    if segment.starts_with('.') || segment.ends_with('.') {
        return Err("name cannot start or end with a dot".to_string());
    }
    if segment.contains("..") {
        return Err("name cannot contain '..'".to_string());
    }
    if segment.contains('/') {
        return Err("name cannot contain '/'".to_string());
    }
    Ok(())
}
