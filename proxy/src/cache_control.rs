use ossfe_cache::CachePolicy;

/// Request path extensions treated as long-lived static assets.
const STATIC_EXTENSIONS: [&str; 12] = [
    "js", "css", "png", "jpg", "jpeg", "gif", "ico", "svg", "woff", "woff2", "ttf", "eot",
];

/// Picks the `max-age` for a response, or `None` when the route disables
/// cache headers. First match wins: HTML content type, then static extension,
/// then the route default.
pub(crate) fn max_age(policy: &CachePolicy, content_type: Option<&str>, path: &str) -> Option<u32> {
    if !policy.enabled {
        return None;
    }
    if content_type.is_some_and(|ct| ct.contains("text/html")) {
        return Some(policy.html_max_age);
    }
    if extension(path).is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext.as_str())) {
        return Some(policy.static_max_age);
    }
    Some(policy.max_age)
}

pub(crate) fn header_value(max_age: u32) -> String {
    format!("public, max-age={max_age}")
}

fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
