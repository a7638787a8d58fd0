//! Path string helpers
//!
//! Paths are plain `/`-separated strings. Normalisation drops empty and
//! `.` components and lets `..` pop (never above the root).

/// Normalised components of `path`
pub fn components(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts
}

/// Canonical absolute form of `path`
pub fn normalize(path: &str) -> String {
    let parts = components(path);
    if parts.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Resolve `path` against `cwd` unless it is already absolute
pub fn absolute(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{}/{}", cwd, path))
    }
}

/// Join a directory and a name
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components() {
        assert_eq!(components("/a//b/./c"), vec!["a", "b", "c"]);
        assert_eq!(components("/a/b/../c"), vec!["a", "c"]);
        assert_eq!(components("/../.."), Vec::<&str>::new());
        assert!(components("/").is_empty());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/usr/bin/../lib/"), "/usr/lib");
    }

    #[test]
    fn test_absolute() {
        assert_eq!(absolute("/home/user", "docs/../notes"), "/home/user/notes");
        assert_eq!(absolute("/home/user", "/etc"), "/etc");
        assert_eq!(absolute("/", ".."), "/");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "bin"), "/bin");
        assert_eq!(join("/usr", "bin"), "/usr/bin");
    }
}
