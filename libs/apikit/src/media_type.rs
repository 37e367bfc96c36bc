//! Media type comparison used for content negotiation.

/// Whether `source` and `target` denote compatible media types.
///
/// Both sides are split on the first `/` into a main and a sub part. A part
/// matches when either side is exactly `*` or both are equal ignoring ASCII
/// case. A string without `/` is treated as a main part with an empty sub
/// part, so it only matches another main-only string or a wildcard.
///
/// ```
/// use apikit::media_type::matches;
///
/// assert!(matches("application/JSON", "application/json"));
/// assert!(matches("text/plain", "*/*"));
/// assert!(!matches("text/plain", "application/json"));
/// ```
#[must_use]
pub fn matches(source: &str, target: &str) -> bool {
    let (source_main, source_sub) = split(source);
    let (target_main, target_sub) = split(target);
    part_matches(source_main, target_main) && part_matches(source_sub, target_sub)
}

/// The `type/subtype` portion of a `Content-Type` value, without parameters.
///
/// `"application/json; charset=utf-8"` becomes `"application/json"`.
#[must_use]
pub fn essence(content_type: &str) -> &str {
    content_type
        .split_once(';')
        .map_or(content_type, |(essence, _)| essence)
        .trim()
}

fn split(media_type: &str) -> (&str, &str) {
    media_type.split_once('/').unwrap_or((media_type, ""))
}

fn part_matches(source: &str, target: &str) -> bool {
    source == "*" || target == "*" || source.eq_ignore_ascii_case(target)
}
