//! Request-path normalization for the decoy filesystem.

/// Normalize a request path to the canonical absolute form used as a store
/// key: the query string (first `?` onward) is dropped, `.` segments vanish,
/// `..` segments pop, empty segments collapse. `""` stays `""` and `"/"`
/// stays `"/"`; both are resolved to an index file by the store, not here.
pub fn normalize(path: &str) -> String {
    // a '?' in the first byte is part of the name, not a query separator
    let path = match path.find('?') {
        Some(pos) if pos > 0 => &path[..pos],
        _ => path,
    };

    if path.is_empty() {
        return String::new();
    }

    if !path.contains('/') {
        return format!("/{path}");
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut out = String::with_capacity(path.len());
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Extension of the final path segment, if any.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => Some(&name[pos + 1..]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_forms() {
        assert_eq!(normalize("/index.html"), "/index.html");
        assert_eq!(normalize("index.html"), "/index.html");
        assert_eq!(normalize("/a/b/c"), "/a/b/c");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_dot_segments() {
        assert_eq!(normalize("/a/../b"), "/b");
        assert_eq!(normalize("/a/./b"), "/a/b");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("/a//b"), "/a/b");
        assert_eq!(normalize("/a/b/../../c"), "/c");
    }

    #[test]
    fn test_query_stripping() {
        assert_eq!(normalize("/page?x=1&y=2"), "/page");
        assert_eq!(normalize("/page.html?"), "/page.html");
        // a leading '?' is not a query separator
        assert_eq!(normalize("?odd"), "/?odd");
    }

    #[test]
    fn test_idempotence() {
        for p in ["/a/../b", "/x/y/z?q", "", "/", "name", "/./a//"] {
            let once = normalize(p);
            assert_eq!(normalize(&once), once, "normalize not idempotent for {p:?}");
        }
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("/a/b.html"), Some("html"));
        assert_eq!(extension("/a/b.tar.gz"), Some("gz"));
        assert_eq!(extension("/a/b"), None);
        assert_eq!(extension("/a.d/b"), None);
        assert_eq!(extension("/ends."), None);
    }
}
