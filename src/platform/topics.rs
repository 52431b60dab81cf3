//! Topic helpers for the messaging session
//!
//! MQTT topic filter matching (`+` single level, `#` multi level) and topic
//! construction under a device's topic root.

/// Join a topic root and a suffix with exactly one separator
pub fn join_topic(root: &str, suffix: &str) -> String {
    let root = root.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');

    match (root.is_empty(), suffix.is_empty()) {
        (true, _) => suffix.to_string(),
        (_, true) => root.to_string(),
        _ => format!("{root}/{suffix}"),
    }
}

/// Check whether a concrete topic matches a subscription filter
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Wildcards at the first level never match system topics
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check that a subscription filter is well formed
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    levels.iter().enumerate().all(|(index, level)| match *level {
        "#" => index == last,
        "+" => true,
        other => !other.contains('#') && !other.contains('+'),
    })
}
