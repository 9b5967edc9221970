//! Normalizes raw, possibly pathological ZIP entry names into canonical
//! absolute paths rooted at `/`.

const NAME_MAX: usize = 255;

/// Reasons a raw entry name is rejected outright (the entry is skipped, not fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    Empty,
    ComponentDotOrDotDot,
    ComponentTooLong { len: usize },
    ControlCharacter,
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::Empty => write!(f, "empty name"),
            NormalizeError::ComponentDotOrDotDot => write!(f, "component is '.' or '..'"),
            NormalizeError::ComponentTooLong { len } => write!(f, "component too long ({len} bytes)"),
            NormalizeError::ControlCharacter => write!(f, "component contains a control character"),
        }
    }
}

/// Scans every raw entry name in the archive once, before normalization, to
/// decide whether the `/ROOT`, `/UP`, `/CUR` prefix scheme is needed.
pub fn needs_prefix<'a>(names: impl IntoIterator<Item = &'a str>) -> bool {
    names.into_iter().any(|name| name.starts_with('/') || name.starts_with("../"))
}

/// Normalizes `name` into a canonical absolute path.
///
/// `need_prefix` must be the result of [`needs_prefix`] applied across every
/// entry name in the archive, computed once before any entry is normalized.
pub fn normalize(name: &str, need_prefix: bool) -> Result<String, NormalizeError> {
    if name.is_empty() {
        return Err(NormalizeError::Empty);
    }

    let mut rest = name;
    let mut out = String::from("/");

    if let Some(stripped) = rest.strip_prefix('/') {
        rest = stripped;
        if need_prefix {
            out.push_str("ROOT");
        }
    } else {
        let mut parent_relative = false;
        while let Some(stripped) = rest.strip_prefix("../") {
            rest = stripped;
            parent_relative = true;
            out.push_str("UP");
        }
        if !parent_relative && need_prefix {
            if !out.ends_with('/') {
                out.push('/');
            }
            out.push_str("CUR");
        }
    }

    for component in rest.split('/') {
        if component.is_empty() {
            continue;
        }
        if component == "." || component == ".." {
            return Err(NormalizeError::ComponentDotOrDotDot);
        }
        if component.len() > NAME_MAX {
            return Err(NormalizeError::ComponentTooLong { len: component.len() });
        }
        if component.chars().any(|c| c.is_ascii_control()) {
            return Err(NormalizeError::ControlCharacter);
        }
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(component);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_relative_path() {
        assert_eq!(normalize("a/b/c", false).unwrap(), "/a/b/c");
    }

    #[test]
    fn absolute_path_without_prefix_need() {
        // defensive branch: need_prefix should always be true when this is reachable,
        // but the normalizer does not assert it.
        assert_eq!(normalize("/a/b", false).unwrap(), "/a/b");
    }

    #[test]
    fn absolute_path_with_prefix() {
        assert_eq!(normalize("/abs", true).unwrap(), "/ROOT/abs");
    }

    #[test]
    fn parent_relative_path() {
        assert_eq!(normalize("../up", true).unwrap(), "/UP/up");
        assert_eq!(normalize("../../up", true).unwrap(), "/UPUP/up");
    }

    #[test]
    fn plain_relative_path_gets_cur_when_prefix_needed() {
        assert_eq!(normalize("x/y", true).unwrap(), "/CUR/x/y");
    }

    #[test]
    fn collapses_empty_components() {
        assert_eq!(normalize("a//b///c", false).unwrap(), "/a/b/c");
    }

    #[test]
    fn rejects_dot_components() {
        assert_eq!(normalize("a/./b", false), Err(NormalizeError::ComponentDotOrDotDot));
        assert_eq!(normalize("a/../b", false), Err(NormalizeError::ComponentDotOrDotDot));
    }

    #[test]
    fn rejects_overlong_component() {
        let long = "x".repeat(256);
        assert!(matches!(normalize(&long, false), Err(NormalizeError::ComponentTooLong { .. })));
    }

    #[test]
    fn rejects_control_characters() {
        assert_eq!(normalize("a/b\u{0007}c", false), Err(NormalizeError::ControlCharacter));
    }

    #[test]
    fn needs_prefix_detects_absolute_and_parent_relative() {
        assert!(needs_prefix(["a", "/b"]));
        assert!(needs_prefix(["a", "../b"]));
        assert!(!needs_prefix(["a", "b/c"]));
    }
}
