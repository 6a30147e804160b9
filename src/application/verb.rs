//! The closed set of tag verbs the engine dispatches.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::application::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Set,
    Append,
    Prepend,
    SetValue,
    AppendValue,
    PrependValue,
    SetList,
    GetList,
    AppendList,
    PrependList,
    JoinLists,
    SplitList,
    ListCount,
    Copy,
    Destroy,
    Context,
    NotEmpty,
    IsEmpty,
    GetBundle,
    SetBundle,
    Bundle,
    Embed,
    Cache,
    StaticCache,
    Parse,
    FlushCache,
    /// Full-page capture registered by `cache` with `process="end"`.
    SaveOutput,
}

const ALL: [Verb; 28] = [
    Verb::Get,
    Verb::Set,
    Verb::Append,
    Verb::Prepend,
    Verb::SetValue,
    Verb::AppendValue,
    Verb::PrependValue,
    Verb::SetList,
    Verb::GetList,
    Verb::AppendList,
    Verb::PrependList,
    Verb::JoinLists,
    Verb::SplitList,
    Verb::ListCount,
    Verb::Copy,
    Verb::Destroy,
    Verb::Context,
    Verb::NotEmpty,
    Verb::IsEmpty,
    Verb::GetBundle,
    Verb::SetBundle,
    Verb::Bundle,
    Verb::Embed,
    Verb::Cache,
    Verb::StaticCache,
    Verb::Parse,
    Verb::FlushCache,
    Verb::SaveOutput,
];

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::SetValue => "set_value",
            Self::AppendValue => "append_value",
            Self::PrependValue => "prepend_value",
            Self::SetList => "set_list",
            Self::GetList => "get_list",
            Self::AppendList => "append_list",
            Self::PrependList => "prepend_list",
            Self::JoinLists => "join_lists",
            Self::SplitList => "split_list",
            Self::ListCount => "list_count",
            Self::Copy => "copy",
            Self::Destroy => "destroy",
            Self::Context => "context",
            Self::NotEmpty => "not_empty",
            Self::IsEmpty => "is_empty",
            Self::GetBundle => "get_bundle",
            Self::SetBundle => "set_bundle",
            Self::Bundle => "bundle",
            Self::Embed => "embed",
            Self::Cache => "cache",
            Self::StaticCache => "static_cache",
            Self::Parse => "parse",
            Self::FlushCache => "flush_cache",
            Self::SaveOutput => "save_output",
        }
    }

    /// Verbs whose output only makes sense at the point they appear.
    pub fn is_deferrable(self) -> bool {
        !matches!(
            self,
            Self::Context | Self::Bundle | Self::NotEmpty | Self::IsEmpty
        )
    }

    /// Full-page captures receive the whole template on replay and replace
    /// it with their result.
    pub fn is_full_page(self) -> bool {
        matches!(self, Self::SaveOutput | Self::StaticCache)
    }
}

impl Display for Verb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        ALL.iter()
            .copied()
            .find(|verb| verb.as_str() == name)
            .ok_or(AppError::UnknownVerb(name))
    }
}
