//! Common helper functions for Watchparty.

/// Splits a comma or semicolon separated list, trimming entries and
/// dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shortens a payload for log output without splitting a UTF-8 character.
pub fn preview(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
