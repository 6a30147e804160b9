//! `#regex#` parameter values.
//!
//! Template authors write regular expressions wrapped in `#` delimiters,
//! optionally followed by flags (`i`, `m`, `s`, `x`). Any other value is
//! taken literally.

use regex::Regex;

use super::error::DomainError;

const DELIMITER: char = '#';

/// A name or value matcher parsed from a tag parameter.
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Regex { source: String, regex: Regex },
}

impl Pattern {
    /// Parse `value`, treating `#...#` as a regular expression.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match split_delimited(value) {
            Some((body, flags)) => {
                let regex = compile(body, flags)
                    .map_err(|reason| DomainError::invalid_pattern(value, reason))?;
                Ok(Self::Regex {
                    source: value.to_string(),
                    regex,
                })
            }
            None => Ok(Self::Exact(value.to_string())),
        }
    }

    /// Parse `value` that must be a regular expression; bare text is
    /// compiled as an unanchored expression.
    pub fn parse_regex(value: &str) -> Result<Regex, DomainError> {
        let (body, flags) = split_delimited(value).unwrap_or((value, ""));
        compile(body, flags).map_err(|reason| DomainError::invalid_pattern(value, reason))
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex { .. })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(name) => name == candidate,
            Self::Regex { regex, .. } => regex.is_match(candidate),
        }
    }

    /// The regular expression body without delimiters and flags, for
    /// handing to a database regex operator.
    pub fn regex_body(&self) -> Option<String> {
        match self {
            Self::Exact(_) => None,
            Self::Regex { regex, .. } => Some(regex.as_str().to_string()),
        }
    }
}

fn split_delimited(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix(DELIMITER)?;
    let end = rest.rfind(DELIMITER)?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'x')) {
        Some((body, flags))
    } else {
        None
    }
}

fn compile(body: &str, flags: &str) -> Result<Regex, String> {
    let source = if flags.is_empty() {
        body.to_string()
    } else {
        format!("(?{flags}){body}")
    };
    Regex::new(&source).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimited_values_become_regexes() {
        let pattern = Pattern::parse("#^foo_#").expect("pattern");
        assert!(pattern.is_regex());
        assert!(pattern.matches("foo_1"));
        assert!(!pattern.matches("bar_1"));
    }

    #[test]
    fn flags_are_honoured() {
        let pattern = Pattern::parse("#^FOO#i").expect("pattern");
        assert!(pattern.matches("foo"));
    }

    #[test]
    fn bare_values_match_exactly() {
        let pattern = Pattern::parse("foo_1").expect("pattern");
        assert!(!pattern.is_regex());
        assert!(pattern.matches("foo_1"));
        assert!(!pattern.matches("foo_10"));
    }

    #[test]
    fn broken_regex_is_a_configuration_error() {
        let err = Pattern::parse("#(unclosed#").expect_err("invalid");
        assert!(matches!(err, DomainError::InvalidPattern { .. }));
    }

    #[test]
    fn bare_text_compiles_as_regex_when_required() {
        let regex = Pattern::parse_regex("^a").expect("regex");
        assert!(regex.is_match("abc"));
    }
}
