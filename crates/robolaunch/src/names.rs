//! Hierarchical name utilities
//!
//! Names form a `/`-separated hierarchy. A name starting with `/` is
//! global, a name starting with `~` is private to a node, anything else is
//! relative to the enclosing namespace.

/// Namespace separator.
pub const SEP: char = '/';

/// Prefix marking a private (node-local) name.
pub const PRIV_PREFIX: char = '~';

/// Check whether a name is global (`/x`).
pub fn is_global(name: &str) -> bool {
    name.starts_with(SEP)
}

/// Check whether a name is private (`~x`).
pub fn is_private(name: &str) -> bool {
    name.starts_with(PRIV_PREFIX)
}

/// Join a name onto a namespace.
///
/// Global and private names are returned unchanged; a relative name is
/// appended to `ns` with exactly one separator between them.
pub fn ns_join(ns: &str, name: &str) -> String {
    if is_global(name) || is_private(name) {
        return name.to_owned();
    }
    if ns.is_empty() {
        return name.to_owned();
    }
    if ns == "~" {
        return format!("~{name}");
    }
    if ns.ends_with(SEP) {
        format!("{ns}{name}")
    } else {
        format!("{ns}{SEP}{name}")
    }
}

/// Force a name into global-namespace form: leading and trailing `/`.
///
/// Private names cannot be globalized.
pub fn make_global_ns(name: &str) -> Result<String, NameError> {
    if is_private(name) {
        return Err(NameError::PrivateNamespace(name.to_owned()));
    }
    let mut ns = if is_global(name) {
        name.to_owned()
    } else {
        format!("{SEP}{name}")
    };
    if !ns.ends_with(SEP) {
        ns.push(SEP);
    }
    Ok(ns)
}

/// Collapse repeated separators and strip a trailing separator (the root
/// namespace `/` is left untouched).
pub fn canonicalize_name(name: &str) -> String {
    if name.is_empty() || name == "/" {
        return name.to_owned();
    }
    let mut out = String::with_capacity(name.len());
    let mut prev_sep = false;
    for c in name.chars() {
        if c == SEP {
            if !prev_sep {
                out.push(c);
            }
            prev_sep = true;
        } else {
            out.push(c);
            prev_sep = false;
        }
    }
    if out.len() > 1 && out.ends_with(SEP) {
        out.pop();
    }
    out
}

/// Errors raised by name manipulation
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("cannot turn private name '{0}' into a namespace")]
    PrivateNamespace(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(is_global("/a/b"));
        assert!(!is_global("a/b"));
        assert!(is_private("~x"));
        assert!(!is_private("/x"));
    }

    #[test]
    fn test_ns_join_root() {
        assert_eq!(ns_join("/", "x"), "/x");
    }

    #[test]
    fn test_ns_join_global_wins() {
        assert_eq!(ns_join("/a", "/b"), "/b");
    }

    #[test]
    fn test_ns_join_private_wins() {
        assert_eq!(ns_join("/a", "~b"), "~b");
    }

    #[test]
    fn test_ns_join_relative() {
        assert_eq!(ns_join("/a", "b"), "/a/b");
        assert_eq!(ns_join("/a/", "b"), "/a/b");
    }

    #[test]
    fn test_make_global_ns() {
        assert_eq!(make_global_ns("a").unwrap(), "/a/");
        assert_eq!(make_global_ns("/a/b").unwrap(), "/a/b/");
        assert_eq!(make_global_ns("/").unwrap(), "/");
        assert!(make_global_ns("~a").is_err());
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize_name("/a//b/"), "/a/b");
        assert_eq!(canonicalize_name("/"), "/");
        assert_eq!(canonicalize_name("a/b"), "a/b");
    }
}
