// backupjobs/src/utils/naming.rs
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

fn non_slug_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap_or_else(|e| unreachable!("{e}")))
}

/// Lowercase ASCII slug: runs of anything other than `[a-z0-9]` collapse to a single `-`.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let slug = non_slug_chars().replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "job".to_string()
    } else {
        slug.to_string()
    }
}

/// Timestamp safe for file names on every platform.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// `backup_<slug-of-job-title>_<timestamp>.zip`
pub fn backup_filename(job_title: &str, at: DateTime<Utc>) -> String {
    format!("backup_{}_{}.zip", slugify(job_title), file_timestamp(at))
}

/// `backup_<slug-of-job-title>_<timestamp>_<suffix>.zip`, for when the plain name is taken.
pub fn backup_filename_with_suffix(job_title: &str, at: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "backup_{}_{}_{}.zip",
        slugify(job_title),
        file_timestamp(at),
        suffix
    )
}
