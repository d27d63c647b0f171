use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Returned when no version string is present.
pub const NO_VERSION: &str = "NONE";

// roughly what `git describe` produces for a GP2040-CE tag
static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"v[0-9]+\.[0-9]+\.[0-9]+[A-Za-z0-9+.\-]*").expect("version pattern is valid")
});

/// Search for the first version string (e.g. `v0.7.5-12-gabcdef`) embedded in a binary.
pub fn find_version_string_in_binary(binary: &[u8]) -> String {
    match VERSION_PATTERN.find(binary) {
        Some(found) => String::from_utf8_lossy(found.as_bytes()).into_owned(),
        None => NO_VERSION.to_string(),
    }
}
