//! Typed views of the tag parameters the store understands.

use regex::Regex;

use crate::application::error::AppError;
use crate::application::tag::Tag;
use crate::cache::CacheConfig;
use crate::domain::pattern::Pattern;
use crate::domain::types::{Scope, VarType, WriteMode};

/// Name from `name` (or `fallback_param`), prefixed by `context` when the
/// name carries no context of its own.
pub(crate) fn name_param(tag: &Tag, param: &str) -> Result<String, AppError> {
    let name = tag
        .get(param)
        .ok_or_else(|| AppError::validation(format!("`{param}` parameter is required")))?;
    Ok(match tag.get("context") {
        Some(context) if !name.contains(':') && !name.starts_with('@') => {
            format!("{context}:{name}")
        }
        _ => name.to_string(),
    })
}

/// Regex gate from `match` / `against`.
#[derive(Debug, Clone)]
pub struct MatchGate {
    pub regex: Regex,
    /// Subject to test; the value itself when absent.
    pub against: Option<String>,
}

impl MatchGate {
    pub fn from_tag(tag: &Tag) -> Result<Option<Self>, AppError> {
        let Some(raw) = tag.get("match") else {
            return Ok(None);
        };
        Ok(Some(Self {
            regex: Pattern::parse_regex(raw)?,
            against: tag.raw_param("against").map(str::to_string),
        }))
    }

    pub fn passes(&self, value: &str) -> bool {
        self.regex.is_match(self.against.as_deref().unwrap_or(value))
    }
}

#[derive(Debug, Clone)]
pub struct GetOptions {
    pub name: String,
    pub scope: Scope,
    pub var_type: VarType,
    pub bundle: Option<String>,
    pub dynamic: bool,
    pub file: bool,
    pub file_name: Option<String>,
    pub default: Option<String>,
    pub save: bool,
    pub refresh: Option<u64>,
    pub gate: Option<MatchGate>,
    /// Reads made on behalf of append/prepend never write fallbacks back.
    pub update: bool,
}

impl GetOptions {
    pub fn new(name: impl Into<String>, config: &CacheConfig) -> Self {
        Self {
            name: name.into(),
            scope: config.default_scope,
            var_type: VarType::Variable,
            bundle: None,
            dynamic: false,
            file: false,
            file_name: None,
            default: None,
            save: false,
            refresh: None,
            gate: None,
            update: false,
        }
    }

    pub fn from_tag(tag: &Tag, config: &CacheConfig) -> Result<Self, AppError> {
        Ok(Self {
            name: name_param(tag, "name")?,
            scope: tag.typed::<Scope>("scope")?.unwrap_or(config.default_scope),
            var_type: tag.typed::<VarType>("type")?.unwrap_or(VarType::Variable),
            bundle: tag.get("bundle").map(str::to_string),
            dynamic: tag.flag("dynamic", false),
            file: tag.flag("file", false),
            file_name: tag.get("file_name").map(str::to_string),
            default: tag.raw_param("default").map(str::to_string),
            save: tag.flag("save", false),
            refresh: tag.u64("refresh")?,
            gate: MatchGate::from_tag(tag)?,
            update: false,
        })
    }

    /// Side-effect free read of the current value used by append/prepend.
    pub(crate) fn restricted(set: &SetOptions) -> Self {
        Self {
            name: set.name.clone(),
            scope: set.scope,
            var_type: set.var_type,
            bundle: set.bundle.clone(),
            dynamic: false,
            file: false,
            file_name: None,
            default: None,
            save: false,
            refresh: None,
            gate: None,
            update: true,
        }
    }

    /// Options for writing a fallback value back through `set`.
    pub(crate) fn write_back(&self) -> SetOptions {
        SetOptions {
            name: self.name.clone(),
            scope: self.scope,
            var_type: self.var_type,
            bundle: self.bundle.clone(),
            save: self.save,
            refresh: self.refresh,
            replace: true,
            not_empty: false,
            gate: None,
            default: None,
            mode: WriteMode::Replace,
            label: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SetOptions {
    pub name: String,
    pub scope: Scope,
    pub var_type: VarType,
    pub bundle: Option<String>,
    pub save: bool,
    pub refresh: Option<u64>,
    pub replace: bool,
    pub not_empty: bool,
    pub gate: Option<MatchGate>,
    /// Written instead when the gate rejects the value.
    pub default: Option<String>,
    pub mode: WriteMode,
    pub label: Option<String>,
}

impl SetOptions {
    pub fn new(name: impl Into<String>, config: &CacheConfig) -> Self {
        Self {
            name: name.into(),
            scope: config.default_scope,
            var_type: VarType::Variable,
            bundle: None,
            save: false,
            refresh: None,
            replace: true,
            not_empty: false,
            gate: None,
            default: None,
            mode: WriteMode::Replace,
            label: None,
        }
    }

    pub fn from_tag(tag: &Tag, config: &CacheConfig, mode: WriteMode) -> Result<Self, AppError> {
        Self::from_tag_named(tag, config, mode, name_param(tag, "name")?)
    }

    /// Same as [`SetOptions::from_tag`] with the name supplied by the caller.
    pub fn from_tag_named(
        tag: &Tag,
        config: &CacheConfig,
        mode: WriteMode,
        name: String,
    ) -> Result<Self, AppError> {
        Ok(Self {
            name,
            scope: tag.typed::<Scope>("scope")?.unwrap_or(config.default_scope),
            var_type: tag.typed::<VarType>("type")?.unwrap_or(VarType::Variable),
            bundle: tag.get("bundle").map(str::to_string),
            save: tag.flag("save", false),
            refresh: tag.u64("refresh")?,
            replace: tag.flag("replace", true),
            not_empty: tag.flag("not_empty", false),
            gate: MatchGate::from_tag(tag)?,
            default: tag.raw_param("default").map(str::to_string),
            mode,
            label: tag.get("label").map(str::to_string),
        })
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Options for removing variables.
#[derive(Debug, Clone)]
pub struct DestroyOptions {
    pub pattern: Pattern,
    pub scope: Scope,
    pub var_type: VarType,
    pub bundle: Option<String>,
    pub flush_cache: bool,
}

impl DestroyOptions {
    pub fn from_tag(tag: &Tag, config: &CacheConfig) -> Result<Self, AppError> {
        Ok(Self {
            pattern: Pattern::parse(&name_param(tag, "name")?)?,
            scope: tag.typed::<Scope>("scope")?.unwrap_or(config.default_scope),
            var_type: tag.typed::<VarType>("type")?.unwrap_or(VarType::Variable),
            bundle: tag.get("bundle").map(str::to_string),
            flush_cache: tag.flag("flush_cache", true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_param_prefixes_bare_names() {
        let tag = Tag::new("").with_param("name", "title").with_param("context", "blog");
        assert_eq!(name_param(&tag, "name").unwrap(), "blog:title");

        let tag = Tag::new("").with_param("name", "news:title").with_param("context", "blog");
        assert_eq!(name_param(&tag, "name").unwrap(), "news:title");
    }

    #[test]
    fn missing_name_is_a_validation_error() {
        let err = name_param(&Tag::new(""), "name").unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn set_defaults_follow_config() {
        let config = CacheConfig::default();
        let tag = Tag::new("").with_param("name", "x");
        let opts = SetOptions::from_tag(&tag, &config, WriteMode::Append).unwrap();
        assert_eq!(opts.scope, Scope::User);
        assert!(opts.replace);
        assert!(!opts.save);
        assert_eq!(opts.mode, WriteMode::Append);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let config = CacheConfig::default();
        let tag = Tag::new("").with_param("name", "x").with_param("type", "blob");
        assert!(GetOptions::from_tag(&tag, &config).is_err());
    }

    #[test]
    fn gate_tests_against_when_given() {
        let tag = Tag::new("")
            .with_param("match", "#^\\d+$#")
            .with_param("against", "42");
        let gate = MatchGate::from_tag(&tag).unwrap().unwrap();
        assert!(gate.passes("not a number"));
    }
}
