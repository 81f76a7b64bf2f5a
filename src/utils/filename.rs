//! Safe filename generation utilities

use regex::Regex;
use std::sync::LazyLock;

const MAX_STEM_CHARS: usize = 200;

// Control characters plus anything that is awkward on at least one filesystem
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r##"[\x00-\x1f"#$%'*,./;<>?\\^|~]"##).expect("valid regex"));

/// Convert a title to a safe filename, appending `extension` when non-empty
pub fn to_safe_filename(title: &str, extension: &str) -> String {
    let tidy = title.replace(':', " -");
    let stripped = UNSAFE_CHARS.replace_all(&tidy, "");

    let mut safe_title: String = stripped.trim().chars().take(MAX_STEM_CHARS).collect();
    safe_title = safe_title.trim_end().to_string();

    if safe_title.is_empty() {
        safe_title = "video".to_string();
    }

    if extension.is_empty() {
        safe_title
    } else {
        format!("{}.{}", safe_title, extension.trim_start_matches('.'))
    }
}
