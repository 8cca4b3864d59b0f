use std::sync::LazyLock;

use regex::Regex;

/// Slack's limit on channel name length.
pub const MAX_CHANNEL_NAME_LEN: usize = 80;

const FALLBACK_CHANNEL_NAME: &str = "group";

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Derive a valid channel name from a group name.
///
/// Lowercases, collapses every run of non-alphanumeric characters into a
/// single `-`, trims leading and trailing dashes and caps the length.
/// Names with nothing usable left become `group`.
pub fn normalize_channel_name(group_name: &str) -> String {
    let lowered = group_name.to_lowercase();
    let dashed = SEPARATORS.replace_all(&lowered, "-");

    let mut name: String = dashed.trim_matches('-').chars().take(MAX_CHANNEL_NAME_LEN).collect();
    while name.ends_with('-') {
        name.pop();
    }

    if name.is_empty() {
        FALLBACK_CHANNEL_NAME.to_string()
    } else {
        name
    }
}
