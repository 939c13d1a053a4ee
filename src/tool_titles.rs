use aho_corasick::{AhoCorasick, MatchKind};
use std::sync::OnceLock;

const KNOWN_PREFIXES: &[&str] = &["mcp__", "mcp_", "functions.", "default_api.", "tools."];

/// Exact friendly names keyed by the lowercased, separator-free tool name.
const FRIENDLY_NAMES: &[(&str, &str)] = &[
    ("get customer profile", "Retrieving Customer Profile"),
    ("get all customers", "Loading Customer Directory"),
    ("exa search", "Searching Adverse Media"),
    ("exa find similar", "Finding Related Coverage"),
    ("exa get contents", "Reading Article Contents"),
    ("web search", "Searching the Web"),
];

/// Substring fallbacks, tried in order when no exact name matches.
const FRIENDLY_FRAGMENTS: &[(&str, &str)] = &[
    ("customer", "Retrieving Customer Profile"),
    ("profile", "Retrieving Customer Profile"),
    ("sanction", "Screening Sanctions Lists"),
    ("news", "Searching Adverse Media"),
    ("search", "Searching Adverse Media"),
    ("similar", "Finding Related Coverage"),
    ("content", "Reading Article Contents"),
    ("fetch", "Reading Article Contents"),
];

fn fragment_matcher() -> Option<&'static AhoCorasick> {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER
        .get_or_init(|| {
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .match_kind(MatchKind::LeftmostFirst)
                .build(FRIENDLY_FRAGMENTS.iter().map(|(pattern, _)| *pattern))
                .ok()
        })
        .as_ref()
}

/// Human-readable title for a raw tool identifier such as `mcp__exa__exa_search`.
pub fn humanize_tool_name(raw: &str) -> String {
    let base = strip_qualifiers(raw.trim());
    let spaced = base
        .split(['_', '-', '.', '/'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if spaced.is_empty() {
        return "Tool Call".to_string();
    }

    let key = spaced.to_ascii_lowercase();
    if let Some((_, friendly)) = FRIENDLY_NAMES.iter().find(|(name, _)| *name == key) {
        return (*friendly).to_string();
    }

    let title = title_case(&spaced);
    let fallback = fragment_matcher()
        .and_then(|matcher| matcher.find(&key))
        .map(|found| FRIENDLY_FRAGMENTS[found.pattern().as_usize()].1);
    match fallback {
        Some(friendly) => friendly.to_string(),
        None => title,
    }
}

fn strip_qualifiers(raw: &str) -> &str {
    let mut name = raw;
    loop {
        match KNOWN_PREFIXES
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix))
        {
            Some(rest) if !rest.is_empty() => name = rest,
            _ => break,
        }
    }
    // Server-qualified names: `server__tool`.
    match name.rsplit_once("__") {
        Some((_, tool)) if !tool.is_empty() => tool,
        _ => name,
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
