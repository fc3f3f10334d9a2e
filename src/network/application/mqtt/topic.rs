//! Topic filter matching for handler dispatch.

/// Check whether `topic` matches the subscription `filter`.
///
/// `+` matches exactly one topic level and `#` matches every remaining level
/// (at least one). Filters are assumed to be well formed; wildcard placement
/// is not validated.
///
/// ```rust
/// use tmlink::network::application::mqtt::topic::matches;
///
/// assert!(matches("a/+/c", "a/b/c"));
/// assert!(matches("a/#", "a/b/c"));
/// assert!(!matches("a/+", "a/b/c"));
/// assert!(!matches("x/#", "a/b/c"));
/// ```
pub fn matches(filter: &str, topic: &str) -> bool {
    if filter == topic {
        return true;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), Some(_)) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
