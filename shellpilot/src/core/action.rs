//! Extract the single shell command from a model response.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Action;

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:bash|sh)?[ \t]*\n(.*?)\n```").expect("block regex is valid")
});

static TIMEOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#[ \t]*timeout:[ \t]*(\d+)[ \t]*\n").expect("timeout regex is valid")
});

/// The response did not contain exactly one fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    /// Every block found (possibly none).
    pub blocks: Vec<String>,
}

/// Parse the action out of `response`.
///
/// Exactly one fenced block is accepted. A leading `# timeout: N` line is
/// stripped and `N` capped at `max_timeout`.
pub fn parse_action(response: &str, max_timeout: u64) -> Result<Action, FormatError> {
    let blocks: Vec<String> = BLOCK_RE
        .captures_iter(response)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    if blocks.len() != 1 {
        return Err(FormatError { blocks });
    }

    let text = blocks[0].trim();
    if let Some(caps) = TIMEOUT_RE.captures(text) {
        let requested = caps[1].parse::<u64>().unwrap_or(u64::MAX);
        let rest = text[caps.get(0).map_or(0, |m| m.end())..].trim();
        return Ok(Action {
            text: rest.to_string(),
            timeout_override: Some(requested.min(max_timeout)),
        });
    }

    Ok(Action {
        text: text.to_string(),
        timeout_override: None,
    })
}

/// Regular expressions for actions that never need confirmation.
///
/// Patterns are anchored at the start of the action.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    patterns: Vec<Regex>,
}

impl Whitelist {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, action: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(action))
    }
}
