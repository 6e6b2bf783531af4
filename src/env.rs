//! Environment Helpers
//!
//! Every component reads its configuration through a lookup closure
//! (`Fn(&str) -> Option<String>`). Production code passes [`system`], tests
//! pass a map-backed closure so the process environment is never mutated.

use std::time::Duration;

/// Looks a key up in the process environment
pub fn system(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Returns the value of the first key that is set to a non-blank value
pub fn first<F>(env: F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|&key| env(key))
        .map(|val| val.trim().to_string())
        .find(|val| !val.is_empty())
}

/// Resolves the short hostname.
///
/// Uses `host` when given, falls back to the system hostname and truncates
/// the result at the first `.` (`web-1.aws.dc` becomes `web-1`).
pub fn hostname(host: Option<&str>) -> String {
    let full = match host.map(str::trim).filter(|h| !h.is_empty()) {
        Some(h) => h.to_string(),
        None => ::hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    match full.find('.') {
        Some(pos) => full[..pos].to_string(),
        None => full,
    }
}

/// Parses a duration such as `30s`, `1m30s`, `250ms` or `1.5h`.
///
/// A bare number is read as seconds. Returns `None` for blank or malformed
/// input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return None;
        }
        let value: f64 = rest[..num_end].parse().ok()?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_end..];
        total += value * nanos_per_unit;
    }
    Some(Duration::from_nanos(total as u64))
}

#[cfg(test)]
pub(crate) fn mock(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}
