//! Release and namespace naming rules

use crate::error::{KubeError, Result};

/// Longest release name; leaves room for suffixes on generated resource names
pub const MAX_RELEASE_NAME_LEN: usize = 53;

/// Longest DNS-1123 label
pub const MAX_NAMESPACE_LEN: usize = 63;

/// Generate a release name for `reference` from the current time
///
/// The result is `<base>-<unix seconds>`, where `base` is the last path
/// segment of the chart reference.
pub fn generate_release_name(reference: &str) -> String {
    release_name_at(reference, chrono::Utc::now().timestamp())
}

/// Release name for `reference` at a fixed point in time
pub fn release_name_at(reference: &str, unix_secs: i64) -> String {
    let suffix = format!("-{}", unix_secs);
    let mut base = sanitize(chart_base_name(reference));
    if base.is_empty() {
        base.push_str("release");
    }

    base.truncate(MAX_RELEASE_NAME_LEN.saturating_sub(suffix.len()));
    let base = base.trim_end_matches('-');
    format!("{}{}", base, suffix)
}

/// Last path segment of a chart reference, without a `.tgz` extension
pub fn chart_base_name(reference: &str) -> &str {
    let trimmed = reference.trim().trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    base.strip_suffix(".tgz").unwrap_or(base)
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn dns_label_problem(value: &str, max: usize) -> Option<String> {
    if value.is_empty() {
        return Some("must not be empty".to_string());
    }
    if value.len() > max {
        return Some(format!("must be at most {} characters", max));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Some("must consist of lowercase alphanumerics or '-'".to_string());
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Some("must start and end with an alphanumeric character".to_string());
    }
    None
}

/// Check that `namespace` is a DNS-1123 label
pub fn validate_namespace(namespace: &str) -> Result<()> {
    match dns_label_problem(namespace, MAX_NAMESPACE_LEN) {
        Some(reason) => Err(KubeError::InvalidNamespace {
            namespace: namespace.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

pub fn validate_release_name(name: &str) -> Result<()> {
    match dns_label_problem(name, MAX_RELEASE_NAME_LEN) {
        Some(reason) => Err(KubeError::InvalidReleaseName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
