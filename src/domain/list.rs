//! Flat-string codec for tabular list values.
//!
//! A list is a sequence of rows; each row is an ordered set of
//! `column → value` fields. Rows are joined by [`ROW_DELIMITER`], fields by
//! [`FIELD_DELIMITER`], and each field is `key GLUE value`. Empty values are
//! written as [`NULL_SENTINEL`] so that a present-but-empty field survives a
//! round trip. Values must not contain the delimiters themselves.

use serde::{Deserialize, Serialize};

pub const ROW_DELIMITER: &str = "|+|";
pub const FIELD_DELIMITER: &str = "|&|";
pub const GLUE: &str = "|=|";
pub const NULL_SENTINEL: &str = "__NULL__";

/// One list row. Field order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut row = Self::new();
        for (key, value) in pairs {
            row.set(key, value);
        }
        row
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == key)
    }

    /// Insert or overwrite a field, keeping the original position on overwrite.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == key) {
            Some(field) => field.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Serialize rows into the flat list format.
pub fn encode(rows: &[Row]) -> String {
    rows.iter()
        .filter(|row| !row.is_empty())
        .map(encode_row)
        .collect::<Vec<_>>()
        .join(ROW_DELIMITER)
}

/// Decode a flat list value. Malformed fields without a key are dropped.
pub fn decode(value: &str) -> Vec<Row> {
    if value.is_empty() {
        return Vec::new();
    }

    value
        .split(ROW_DELIMITER)
        .map(decode_row)
        .filter(|row| !row.is_empty())
        .collect()
}

/// Join an encoded addition onto an existing encoded list.
pub fn join_encoded(existing: &str, addition: &str, append: bool) -> String {
    match (existing.is_empty(), addition.is_empty()) {
        (true, _) => addition.to_string(),
        (false, true) => existing.to_string(),
        (false, false) if append => format!("{existing}{ROW_DELIMITER}{addition}"),
        (false, false) => format!("{addition}{ROW_DELIMITER}{existing}"),
    }
}

/// Split a body of `{key}value{/key}` tag pairs into rows.
///
/// A new row starts whenever a key repeats within the current row.
pub fn rows_from_tag_pairs(body: &str) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut current = Row::new();
    let mut pos = 0;

    while let Some(open_rel) = body[pos..].find('{') {
        let open = pos + open_rel;
        let Some(close_rel) = body[open..].find('}') else {
            break;
        };
        let name = &body[open + 1..open + close_rel];
        if !is_pair_name(name) {
            pos = open + 1;
            continue;
        }

        let content_start = open + close_rel + 1;
        let closing = format!("{{/{name}}}");
        let Some(end_rel) = body[content_start..].find(&closing) else {
            pos = open + 1;
            continue;
        };

        if current.contains_key(name) {
            rows.push(std::mem::take(&mut current));
        }
        current.set(name, &body[content_start..content_start + end_rel]);
        pos = content_start + end_rel + closing.len();
    }

    if !current.is_empty() {
        rows.push(current);
    }
    rows
}

fn encode_row(row: &Row) -> String {
    row.iter()
        .map(|(key, value)| {
            let value = if value.is_empty() { NULL_SENTINEL } else { value };
            format!("{key}{GLUE}{value}")
        })
        .collect::<Vec<_>>()
        .join(FIELD_DELIMITER)
}

fn decode_row(raw: &str) -> Row {
    let mut row = Row::new();
    for field in raw.split(FIELD_DELIMITER) {
        let (key, value) = field.split_once(GLUE).unwrap_or((field, ""));
        if key.is_empty() {
            continue;
        }
        let value = if value == NULL_SENTINEL { "" } else { value };
        row.set(key, value);
    }
    row
}

fn is_pair_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
}
