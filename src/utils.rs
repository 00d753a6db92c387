//! Utility functions for logging, file naming, and file system checks.
//!
//! - String truncation for log fields and prompts (char-boundary safe, the
//!   catalog is mostly Cyrillic text)
//! - Local filename derivation for fetched documents
//! - Writable-directory precondition for the download destination

use crate::error::{Error, Result};
use std::fs as stdfs;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, instrument};

/// Largest index `<= max` that falls on a char boundary of `s`.
pub fn char_boundary_at_most(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (backing off to a char
/// boundary) with an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```
/// use leninka_digest::utils::truncate_for_log;
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(15), 10), "aaaaaaaaaa…(+5 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let end = char_boundary_at_most(s, max);
        format!("{}…(+{} bytes)", &s[..end], s.len() - end)
    }
}

/// Truncate `s` to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build the HTTP client shared by the network stages.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(15))
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
}

/// Concatenate a base URL and an absolute path without doubling the slash.
pub fn endpoint_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Marks stems of links that did not start with the configured prefix.
///
/// Never produced by percent-encoding, so these stems cannot collide with
/// prefixed ones.
pub const FOREIGN_LINK_MARKER: char = '@';

/// Derive the local file stem for an article link.
///
/// The known `prefix` is stripped and the remainder is percent-encoded, so
/// `/`, `\` and every other reserved byte become `%XX`. Links without the
/// prefix are encoded whole behind [`FOREIGN_LINK_MARKER`]. The mapping is
/// injective: distinct links always get distinct names, and the same link
/// always gets the same name.
///
/// # Arguments
///
/// * `link` - Canonical article link, e.g. `/article/n/teoriya-grafov`
/// * `prefix` - Prefix stripped before encoding, e.g. `/article/n/`
///
/// # Returns
///
/// `None` when nothing usable is left (empty remainder, `.` or `..`).
pub fn document_stem(link: &str, prefix: &str) -> Option<String> {
    let stem = match link.strip_prefix(prefix) {
        Some(rest) => urlencoding::encode(rest).into_owned(),
        None => format!("{FOREIGN_LINK_MARKER}{}", urlencoding::encode(link)),
    };
    match stem.as_str() {
        "" | "." | ".." => None,
        s if s.len() == FOREIGN_LINK_MARKER.len_utf8() => None,
        _ => Some(stem),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then creates and removes a
/// probe file.
///
/// # Errors
///
/// [`Error::Storage`] if the directory cannot be created or written.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| Error::storage(path, e))?;

    // Sync probe through std fs keeps the error surface small.
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            debug!("Directory is writable");
            Ok(())
        }
        Err(e) => Err(Error::storage(path, e)),
    }
}
