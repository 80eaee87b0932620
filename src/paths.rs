//! Canonical path handling.
//!
//! These functions never fail: odd segments are preserved or collapsed and
//! rejecting bad names is left to [`crate::validate`].

pub const ROOT: &str = "/";
pub const ROOT_NAME: &str = "root";

/// Collapse repeated separators and drop empty segments. A leading `/` is
/// kept when the input had one; `/` itself comes back unchanged.
pub fn normalize(path: &str) -> String {
    if path == ROOT {
        return ROOT.to_string();
    }
    let joined = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if path.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Normalize and anchor at the root, so `a//b/` and `/a/b` are the same node.
pub fn absolute(path: &str) -> String {
    let normalized = normalize(path);
    if normalized.starts_with('/') {
        normalized
    } else {
        format!("/{}", normalized)
    }
}

pub fn parent_of(path: &str) -> Option<String> {
    if path == ROOT {
        return None;
    }
    let normalized = normalize(path);
    if normalized == ROOT {
        return None;
    }
    match normalized.rfind('/') {
        None | Some(0) => Some(ROOT.to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
    }
}

pub fn name_of(path: &str) -> String {
    if path == ROOT {
        return ROOT_NAME.to_string();
    }
    let normalized = normalize(path);
    if normalized == ROOT {
        return ROOT_NAME.to_string();
    }
    normalized
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path != ROOT && path.starts_with('/');
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}
