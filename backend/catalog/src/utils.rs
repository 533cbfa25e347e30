use std::{path::Path, sync::LazyLock};

use regex::Regex;

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_ ]+").unwrap());
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9.-]").unwrap());
static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").unwrap());
static DASH_DOT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+\.").unwrap());

/// Normalizes an uploaded file name into something safe to use inside a blob name.
pub fn sanitize(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let s = SEPARATORS.replace_all(&lowered, "-");
    let s = DISALLOWED.replace_all(&s, "");
    let s = DASHES.replace_all(&s, "-");
    let s = DASH_DOT.replace_all(&s, ".");

    s.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Lowercased extension without the dot.
pub fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}
