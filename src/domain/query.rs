//! In-memory query layer over decoded lists.
//!
//! Stages run in a fixed order: raw pre-slice, tracked-value membership,
//! regex filter, de-duplication, ordering, then the display window
//! (`offset`/`limit`). The result is always densely indexed.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use slug::slugify;

use super::error::DomainError;
use super::list::Row;

const LIST_SEPARATOR: char = '|';
const RANDOM: &str = "random";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(DomainError::validation(format!(
                "unknown sort direction `{other}`"
            ))),
        }
    }
}

/// How a column's values compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortType {
    String,
    Numeric,
    Lowercase,
    Normalized,
}

impl SortType {
    fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "string" => Ok(Self::String),
            "integer" | "numeric" | "number" | "float" => Ok(Self::Numeric),
            "lowercase" | "case_insensitive" => Ok(Self::Lowercase),
            "normalize" | "normalized" | "accent" => Ok(Self::Normalized),
            other => Err(DomainError::validation(format!(
                "unknown sort type `{other}`"
            ))),
        }
    }

    fn compare(self, a: &str, b: &str) -> CmpOrdering {
        match self {
            Self::String => a.cmp(b),
            Self::Numeric => numeric(a).total_cmp(&numeric(b)),
            Self::Lowercase => a.to_lowercase().cmp(&b.to_lowercase()),
            Self::Normalized => slugify(a).cmp(&slugify(b)),
        }
    }
}

fn numeric(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
    pub kind: SortType,
}

/// Row ordering requested by `orderby`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    Columns(Vec<SortKey>),
    /// Shuffle whole rows.
    Random,
    /// Shuffle one column's values while every other column stays put.
    RandomColumn(String),
}

impl Order {
    /// Parse pipe-separated `orderby`, `sort` and `sort_type` values. Missing
    /// per-column directions and types reuse the last one given.
    pub fn parse(orderby: &str, sort: &str, sort_type: &str) -> Result<Self, DomainError> {
        let orderby = orderby.trim();
        if orderby.eq_ignore_ascii_case(RANDOM) {
            return Ok(Self::Random);
        }
        if let Some(column) = orderby.strip_prefix("random:") {
            return Ok(Self::RandomColumn(column.trim().to_string()));
        }

        let directions = split_list(sort)
            .iter()
            .map(|d| SortDirection::parse(d))
            .collect::<Result<Vec<_>, _>>()?;
        let kinds = split_list(sort_type)
            .iter()
            .map(|k| SortType::parse(k))
            .collect::<Result<Vec<_>, _>>()?;

        let keys = split_list(orderby)
            .into_iter()
            .enumerate()
            .map(|(index, column)| SortKey {
                column,
                direction: pick(&directions, index).unwrap_or(SortDirection::Asc),
                kind: pick(&kinds, index).unwrap_or(SortType::String),
            })
            .collect::<Vec<_>>();

        if keys.is_empty() {
            return Err(DomainError::validation("orderby names no columns"));
        }
        Ok(Self::Columns(keys))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn pick<T: Copy>(values: &[T], index: usize) -> Option<T> {
    values.get(index).or_else(|| values.last()).copied()
}

/// Keep or drop rows by a column's membership in a tracked value set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    In { column: String, values: HashSet<String> },
    NotIn { column: String, values: HashSet<String> },
}

/// Keep rows whose `column` matches `regex`.
#[derive(Debug, Clone)]
pub struct RowFilter {
    pub column: String,
    pub regex: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unique {
    WholeRow,
    Column(String),
}

/// A composed list query.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Raw `(start, length)` window applied before any filtering.
    pub slice: Option<(usize, Option<usize>)>,
    pub membership: Option<Membership>,
    pub filter: Option<RowFilter>,
    pub unique: Option<Unique>,
    pub order: Option<Order>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Rows selected by a query plus the count before the display window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub absolute_results: usize,
}

impl ListQuery {
    /// Parse a `slice` parameter of the form `start` or `start,length`.
    pub fn parse_slice(value: &str) -> Result<(usize, Option<usize>), DomainError> {
        let mut parts = value.split(',').map(str::trim);
        let start = parse_count("slice", parts.next().unwrap_or_default())?;
        let length = match parts.next() {
            Some(raw) if !raw.is_empty() => Some(parse_count("slice", raw)?),
            _ => None,
        };
        Ok((start, length))
    }

    pub fn apply(&self, rows: Vec<Row>) -> QueryResult {
        self.apply_with_rng(rows, &mut rand::rng())
    }

    pub fn apply_with_rng<R: Rng + ?Sized>(&self, rows: Vec<Row>, rng: &mut R) -> QueryResult {
        let mut rows = match self.slice {
            Some((start, length)) => window(rows, start, length),
            None => rows,
        };

        if let Some(membership) = &self.membership {
            rows.retain(|row| match membership {
                Membership::In { column, values } => {
                    row.get(column).is_some_and(|v| values.contains(v))
                }
                Membership::NotIn { column, values } => {
                    !row.get(column).is_some_and(|v| values.contains(v))
                }
            });
        }

        if let Some(filter) = &self.filter {
            rows.retain(|row| {
                row.get(&filter.column)
                    .is_some_and(|value| filter.regex.is_match(value))
            });
        }

        if let Some(unique) = &self.unique {
            rows = dedupe(rows, unique);
        }

        match &self.order {
            Some(Order::Columns(keys)) => rows.sort_by(|a, b| compare_rows(a, b, keys)),
            Some(Order::Random) => rows.shuffle(rng),
            Some(Order::RandomColumn(column)) => shuffle_column(&mut rows, column, rng),
            None => {}
        }

        let absolute_results = rows.len();
        let rows = window(rows, self.offset, self.limit);
        QueryResult {
            rows,
            absolute_results,
        }
    }
}

fn parse_count(param: &str, raw: &str) -> Result<usize, DomainError> {
    raw.parse::<usize>()
        .map_err(|_| DomainError::InvalidInteger {
            param: param.to_string(),
            value: raw.to_string(),
        })
}

fn window(rows: Vec<Row>, start: usize, length: Option<usize>) -> Vec<Row> {
    let iter = rows.into_iter().skip(start);
    match length {
        Some(length) => iter.take(length).collect(),
        None => iter.collect(),
    }
}

fn dedupe(rows: Vec<Row>, unique: &Unique) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key = match unique {
                Unique::WholeRow => row
                    .iter()
                    .map(|(k, v)| format!("{k}\u{1f}{v}"))
                    .collect::<Vec<_>>()
                    .join("\u{1e}"),
                Unique::Column(column) => row.get(column).unwrap_or_default().to_string(),
            };
            seen.insert(key)
        })
        .collect()
}

fn compare_rows(a: &Row, b: &Row, keys: &[SortKey]) -> CmpOrdering {
    for key in keys {
        let left = a.get(&key.column).unwrap_or_default();
        let right = b.get(&key.column).unwrap_or_default();
        let ordering = key.kind.compare(left, right);
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    CmpOrdering::Equal
}

fn shuffle_column<R: Rng + ?Sized>(rows: &mut [Row], column: &str, rng: &mut R) {
    let holders: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.contains_key(column))
        .map(|(index, _)| index)
        .collect();
    let mut values: Vec<String> = holders
        .iter()
        .filter_map(|&index| rows[index].get(column).map(str::to_string))
        .collect();
    values.shuffle(rng);
    for (index, value) in holders.into_iter().zip(values) {
        rows[index].set(column, value);
    }
}

/// Page arithmetic for paginated list output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub per_page: usize,
    pub offset: usize,
    pub total_items: usize,
}

impl Pagination {
    pub fn current_page(&self) -> usize {
        if self.per_page == 0 {
            return 1;
        }
        self.offset / self.per_page + 1
    }

    pub fn total_pages(&self) -> usize {
        if self.per_page == 0 || self.total_items == 0 {
            return 1;
        }
        self.total_items.div_ceil(self.per_page)
    }
}
