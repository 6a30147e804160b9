//! Shared domain enumerations for variable scope, type and processing stage.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Sentinel session qualifier shared by every visitor for `site` scope.
pub const SITE_QUALIFIER: &str = "_global";

/// Visibility and persistence breadth of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Request memory only, never persisted.
    Local,
    /// Persisted, qualified by the visitor's session token.
    User,
    /// Persisted, shared by all visitors.
    Site,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::User => "user",
            Self::Site => "site",
        }
    }

    pub fn is_persistable(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "user" => Ok(Self::User),
            "site" | "global" => Ok(Self::Site),
            other => Err(DomainError::UnknownScope(other.to_string())),
        }
    }
}

/// Which value pool a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    Variable,
    Snippet,
}

impl VarType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Variable => "variable",
            Self::Snippet => "snippet",
        }
    }
}

impl FromStr for VarType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "variable" => Ok(Self::Variable),
            "snippet" | "global" => Ok(Self::Snippet),
            other => Err(DomainError::UnknownType(other.to_string())),
        }
    }
}

/// When a tag runs relative to the template it appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStage {
    Inline,
    Start,
    End,
}

impl ProcessStage {
    /// Parse a `process` parameter. `final` is a legacy alias of `end`.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "inline" => Ok(Self::Inline),
            "start" => Ok(Self::Start),
            "end" | "final" => Ok(Self::End),
            other => Err(DomainError::UnknownProcess(other.to_string())),
        }
    }

    /// Tag bodies cannot run before the template they sit in, so `start`
    /// collapses to `inline` everywhere except the embed primitive.
    pub fn normalize_for_body(self) -> Self {
        match self {
            Self::Start => Self::Inline,
            other => other,
        }
    }

    pub fn is_deferred(self) -> bool {
        matches!(self, Self::End)
    }
}

/// How appends and prepends combine with the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Append,
    Prepend,
}

impl WriteMode {
    pub fn is_update(self) -> bool {
        !matches!(self, Self::Replace)
    }

    pub fn combine(self, current: &str, value: &str) -> String {
        match self {
            Self::Replace => value.to_string(),
            Self::Append => format!("{current}{value}"),
            Self::Prepend => format!("{value}{current}"),
        }
    }
}

/// Interpret a yes/no style tag parameter.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "on" | "1" | "true"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_is_alias_of_end() {
        assert_eq!(ProcessStage::parse("final").unwrap(), ProcessStage::End);
        assert_eq!(ProcessStage::parse("END").unwrap(), ProcessStage::End);
    }

    #[test]
    fn unknown_process_is_rejected() {
        let err = ProcessStage::parse("later").expect_err("unknown stage");
        assert!(matches!(err, DomainError::UnknownProcess(stage) if stage == "later"));
    }

    #[test]
    fn start_collapses_to_inline_for_bodies() {
        assert_eq!(
            ProcessStage::Start.normalize_for_body(),
            ProcessStage::Inline
        );
        assert_eq!(ProcessStage::End.normalize_for_body(), ProcessStage::End);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(matches!(
            "array".parse::<VarType>(),
            Err(DomainError::UnknownType(_))
        ));
        assert_eq!("global".parse::<VarType>().unwrap(), VarType::Snippet);
    }

    #[test]
    fn write_modes_concatenate() {
        assert_eq!(WriteMode::Append.combine("A", "B"), "AB");
        assert_eq!(WriteMode::Prepend.combine("A", "B"), "BA");
        assert_eq!(WriteMode::Replace.combine("A", "B"), "B");
    }

    #[test]
    fn flags_accept_common_spellings() {
        for yes in ["yes", "Y", "on", "1", "true"] {
            assert!(parse_flag(yes), "{yes}");
        }
        for no in ["no", "", "off", "0"] {
            assert!(!parse_flag(no), "{no}");
        }
    }
}
