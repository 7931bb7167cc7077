use std::sync::LazyLock;

use regex::Regex;

static YEAR_MONTH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/(20\d{2})/(\d{1,2})(?:/|$)").ok());

/// `/YYYY/MM/` folder hint recovered from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearMonth {
    pub year: String,
    /// Zero-padded to two digits.
    pub month: String,
}

/// Pieces of a raw token that drive path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    /// Path to test under the uploads root: the remainder after a marker
    /// segment, else the token's own path, without a leading `/`.
    pub relative_hint: String,
    pub had_marker: bool,
    pub year_month: Option<YearMonth>,
    pub basename: String,
}

pub fn parse_token(raw: &str, markers: &[String]) -> ParsedToken {
    let path = token_path(raw.trim());
    let path = path.split(['?', '#']).next().unwrap_or_default().replace('\\', "/");
    let (remainder, had_marker) = match strip_marker(&path, markers) {
        Some(remainder) => (remainder, true),
        None => (path.as_str(), false),
    };
    let relative_hint = remainder.trim_start_matches('/').to_string();
    let year_month = year_month_hint(&format!("/{relative_hint}"));
    let basename = relative_hint
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    ParsedToken {
        relative_hint,
        had_marker,
        year_month,
        basename,
    }
}

/// Strip a historical plugin prefix: `face_<id>_name.jpg` and `face_name.jpg`
/// both become `name.jpg`.
pub fn strip_known_prefix(basename: &str, prefixes: &[String]) -> Option<String> {
    for prefix in prefixes {
        let Some(rest) = strip_prefix_ignore_case(basename, prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        if let Some((segment, tail)) = rest.split_once('_')
            && !segment.is_empty()
            && !tail.is_empty()
        {
            return Some(tail.to_string());
        }
        return Some(rest.to_string());
    }
    None
}

fn token_path(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return raw.to_string();
    }
    match url::Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => {
            let after_scheme = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
            after_scheme
                .find('/')
                .map(|slash| after_scheme[slash..].to_string())
                .unwrap_or_default()
        }
    }
}

/// Remainder after the first marker found at the start or after a `/`.
fn strip_marker<'a>(path: &'a str, markers: &[String]) -> Option<&'a str> {
    let lower = path.to_ascii_lowercase();
    for marker in markers {
        let marker = marker.to_ascii_lowercase();
        if marker.is_empty() {
            continue;
        }
        let mut search_from = 0;
        while let Some(found) = lower[search_from..].find(&marker) {
            let start = search_from + found;
            if start == 0 || lower.as_bytes()[start - 1] == b'/' {
                return Some(&path[start + marker.len()..]);
            }
            search_from = start + marker.len();
        }
    }
    None
}

fn year_month_hint(path: &str) -> Option<YearMonth> {
    let captures = YEAR_MONTH.as_ref()?.captures(path)?;
    let year = captures.get(1)?.as_str().to_string();
    let month = format!("{:0>2}", captures.get(2)?.as_str());
    Some(YearMonth { year, month })
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}
