/// Ant-style path pattern matching.
///
/// Three pattern forms are supported:
/// - `/api/users` matches exactly (a trailing slash on the path is ignored);
/// - `/api/users/*` matches one additional non-empty segment;
/// - `/api/users/**` matches the prefix itself or anything beneath it.
pub fn matches(path: &str, pattern: &str) -> bool {
    if path.is_empty() || pattern.is_empty() {
        return false;
    }

    let normalized = if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    };

    if let Some(prefix) = pattern.strip_suffix("/**") {
        // `/**` alone matches everything.
        return prefix.is_empty()
            || normalized == prefix
            || normalized.starts_with(&format!("{prefix}/"));
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        let Some(remainder) = normalized
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return false;
        };
        return !remainder.is_empty() && !remainder.contains('/');
    }

    normalized == pattern
}

/// Returns true if the path matches any of the given patterns.
pub fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| matches(path, pattern))
}
