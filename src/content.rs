use crate::config::MIN_WORD_LEN;
use once_cell::sync::Lazy;
use regex::Regex;

static CATEGORY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[Category:([^|\]]+?)(?:\|[^\]]+)?\]\]").unwrap());

static SECTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(={2,})\s*(.+?)\s*={2,}\s*$").unwrap());

pub static LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^|\]]+?)(?:\|[^\]]+)?\]\]").unwrap());

static WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)?").unwrap());

/// Namespaced link prefixes that are not article links.
const NON_ARTICLE_PREFIXES: &[&str] = &["category:", "file:", "image:", "wikipedia:", "template:"];

/// Returns the lead section (before the first `==` heading) with templates stripped.
pub fn extract_abstract(text: &str) -> String {
    // Strip templates first so headings inside {{Infobox ...}} don't truncate the lead.
    let stripped = strip_templates(text);

    let end_pos = SECTION_REGEX
        .find(&stripped)
        .map(|m| m.start())
        .unwrap_or(stripped.len());

    stripped[..end_pos]
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Article link targets in document order, with any `#section` suffix removed.
pub fn extract_links(text: &str) -> Vec<String> {
    LINK_REGEX
        .captures_iter(text)
        .filter_map(|c| {
            let target = c[1].split('#').next().unwrap_or_default();
            let target = sanitize_field(target.trim());
            let lower = target.to_lowercase();
            if target.is_empty() || NON_ARTICLE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
                None
            } else {
                Some(target)
            }
        })
        .collect()
}

pub fn extract_categories(text: &str) -> Vec<String> {
    CATEGORY_REGEX
        .captures_iter(text)
        .map(|c| sanitize_field(c[1].trim()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lowercased words of at least `MIN_WORD_LEN` characters, markup brackets ignored.
pub fn extract_words(text: &str) -> Vec<String> {
    WORD_REGEX
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .collect()
}

/// Collapses newlines into spaces so terms stay on a single line.
fn sanitize_field(s: &str) -> String {
    if s.contains('\n') || s.contains('\r') {
        s.replace(['\n', '\r'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        s.to_string()
    }
}

fn strip_templates(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut run_start = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if run_start < i {
                result.push_str(&text[run_start..i]);
            }
            let mut depth: i32 = 0;
            while i + 1 < bytes.len() {
                if bytes[i] == b'{' && bytes[i + 1] == b'{' {
                    depth += 1;
                    i += 2;
                } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            // An unclosed template swallows the rest of the text.
            if depth > 0 {
                i = bytes.len();
            }
            run_start = i;
        } else {
            i += 1;
        }
    }

    if run_start < bytes.len() {
        result.push_str(&text[run_start..]);
    }

    result
}
