//! Deferred tag queue.
//!
//! A tag with `process="end"` is recorded here under a unique placeholder
//! and its placeholder text is emitted in place of its output. At finalize
//! time entries are replayed by ascending priority, ties in registration
//! order. An entry whose placeholder is no longer in the template is kept
//! for a later pass; a replayed entry is removed so it never runs twice.

use rand::random;
use sha2::{Digest, Sha256};

use crate::application::error::AppError;
use crate::application::tag::Tag;
use crate::application::verb::Verb;

pub const DEFAULT_PRIORITY: i64 = 1;
/// Full-page captures run after every other deferred tag unless told otherwise.
pub const CAPTURE_PRIORITY: i64 = i64::MAX;
const PLACEHOLDER_PREFIX: &str = "stash_deferred_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredEntry {
    /// Placeholder text including braces.
    pub placeholder: String,
    pub verb: Verb,
    pub tag: Tag,
    pub priority: i64,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: Vec<DeferredEntry>,
    next_seq: u64,
}

impl DeferredQueue {
    /// Record `verb` for later and return its placeholder text.
    pub fn register(&mut self, verb: Verb, tag: Tag, priority: i64) -> Result<String, AppError> {
        if !verb.is_deferrable() {
            return Err(AppError::NotDeferrable(verb.as_str()));
        }

        let mut placeholder = placeholder_for(&tag.raw);
        while self.contains(&placeholder) {
            placeholder = placeholder_for(&tag.raw);
        }

        self.entries.push(DeferredEntry {
            placeholder: placeholder.clone(),
            verb,
            tag,
            priority,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        Ok(placeholder)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, placeholder: &str) -> bool {
        self.entries.iter().any(|entry| entry.placeholder == placeholder)
    }

    /// Placeholders in replay order.
    pub fn replay_order(&self) -> Vec<String> {
        let mut ordered: Vec<&DeferredEntry> = self.entries.iter().collect();
        ordered.sort_by_key(|entry| (entry.priority, entry.seq));
        ordered
            .into_iter()
            .map(|entry| entry.placeholder.clone())
            .collect()
    }

    /// Remove and return an entry so it cannot be replayed again.
    pub fn take(&mut self, placeholder: &str) -> Option<DeferredEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.placeholder == placeholder)?;
        Some(self.entries.remove(index))
    }
}

/// `{stash_deferred_<16 hex of sha256(tag)>_<8 hex random>}`.
pub fn placeholder_for(raw_tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_tag.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let suffix: u32 = random();
    format!("{{{PLACEHOLDER_PREFIX}{}_{suffix:08x}}}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(raw: &str) -> Tag {
        Tag::new(raw)
    }

    #[test]
    fn replay_order_sorts_by_priority_then_registration() {
        let mut queue = DeferredQueue::default();
        let five = queue.register(Verb::Get, tag("a"), 5).unwrap();
        let one = queue.register(Verb::Get, tag("b"), 1).unwrap();
        let three = queue.register(Verb::Get, tag("c"), 3).unwrap();
        let one_again = queue.register(Verb::Get, tag("d"), 1).unwrap();
        assert_eq!(queue.replay_order(), vec![one, one_again, three, five]);
    }

    #[test]
    fn repeated_tags_get_distinct_placeholders() {
        let mut queue = DeferredQueue::default();
        let first = queue.register(Verb::Get, tag("same"), 1).unwrap();
        let second = queue.register(Verb::Get, tag("same"), 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(first[..32], second[..32]);
    }

    #[test]
    fn placeholder_shape() {
        let placeholder = placeholder_for("{exp:stash:get name=\"x\"}");
        assert!(placeholder.starts_with("{stash_deferred_"));
        assert!(placeholder.ends_with('}'));
        assert_eq!(placeholder.len(), "{stash_deferred_".len() + 16 + 1 + 8 + 1);
    }

    #[test]
    fn taken_entries_are_gone() {
        let mut queue = DeferredQueue::default();
        let placeholder = queue.register(Verb::Set, tag("x"), 1).unwrap();
        assert!(queue.take(&placeholder).is_some());
        assert!(queue.take(&placeholder).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn non_deferrable_verbs_are_rejected_at_registration() {
        let mut queue = DeferredQueue::default();
        let err = queue.register(Verb::Context, tag("x"), 1).unwrap_err();
        assert!(matches!(err, AppError::NotDeferrable("context")));
    }
}
