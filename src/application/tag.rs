//! Immutable snapshot of one tag invocation.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::domain::error::DomainError;
use crate::domain::types::parse_flag;

/// Parameters and body of a tag as handed over by the host engine.
///
/// Nested operations receive their own copy; nothing mutates a shared tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// The tag's own opening text, used to derive deferral placeholders.
    pub raw: String,
    pub params: BTreeMap<String, String>,
    /// Tag-pair content; `None` for single tags.
    pub body: Option<String>,
}

impl Tag {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    /// Parameter value, treating an empty string as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Raw parameter value, empty strings included.
    pub fn raw_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn flag(&self, name: &str, default: bool) -> bool {
        self.get(name).map(parse_flag).unwrap_or(default)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn usize(&self, name: &str) -> Result<Option<usize>, DomainError> {
        self.parsed(name)
    }

    pub fn i64(&self, name: &str) -> Result<Option<i64>, DomainError> {
        self.parsed(name)
    }

    pub fn u64(&self, name: &str) -> Result<Option<u64>, DomainError> {
        self.parsed(name)
    }

    /// Parse a parameter through its `FromStr` implementation.
    pub fn typed<T>(&self, name: &str) -> Result<Option<T>, DomainError>
    where
        T: FromStr<Err = DomainError>,
    {
        self.get(name).map(str::parse).transpose()
    }

    pub fn body(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }

    fn parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, DomainError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| DomainError::InvalidInteger {
                    param: name.to_string(),
                    value: raw.to_string(),
                }),
        }
    }
}
