//! Match conditions.
//!
//! A [`Condition`] is one of three closed cases, so evaluation is an
//! exhaustive match:
//!
//! - [`Condition::Phrase`]: a literal matched case-insensitively on word
//!   boundaries against the event text (`"hi"` matches `"Hi @bob"` but not
//!   `"chihuahua"`)
//! - [`Condition::Pattern`]: a compiled regular expression over the text
//! - [`Condition::Predicate`]: an arbitrary function of the enriched event

use std::sync::Arc;

use regex::Regex;

use slackhive_core::EnrichedEvent;

/// A predicate over an enriched event.
pub type PredicateFn = Arc<dyn Fn(&EnrichedEvent) -> bool + Send + Sync>;

/// One match condition of a handler.
#[derive(Clone)]
pub enum Condition {
    Phrase(String),
    Pattern(Regex),
    Predicate(PredicateFn),
}

impl Condition {
    /// A word-bounded, case-insensitive literal.
    pub fn phrase(text: impl Into<String>) -> Self {
        Self::Phrase(text.into())
    }

    /// A regular expression over the event text.
    pub fn pattern(regex: Regex) -> Self {
        Self::Pattern(regex)
    }

    /// A predicate function.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&EnrichedEvent) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Evaluates this condition against `event`.
    pub fn matches(&self, event: &EnrichedEvent) -> bool {
        match self {
            Self::Phrase(phrase) => contains_phrase(event.text(), phrase),
            Self::Pattern(regex) => regex.is_match(event.text()),
            Self::Predicate(f) => f(event),
        }
    }
}

impl From<&str> for Condition {
    fn from(text: &str) -> Self {
        Self::phrase(text)
    }
}

impl From<String> for Condition {
    fn from(text: String) -> Self {
        Self::phrase(text)
    }
}

impl From<Regex> for Condition {
    fn from(regex: Regex) -> Self {
        Self::Pattern(regex)
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phrase(p) => f.debug_tuple("Phrase").field(p).finish(),
            Self::Pattern(r) => f.debug_tuple("Pattern").field(&r.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

/// Length in bytes of the case-insensitive match of `needle` at the start of
/// `haystack`, if any.
fn prefix_len(haystack: &str, needle: &str) -> Option<usize> {
    let mut hay = haystack.char_indices();
    for n in needle.chars() {
        let (_, h) = hay.next()?;
        if !eq_ignore_case(h, n) {
            return None;
        }
    }
    Some(hay.next().map_or(haystack.len(), |(i, _)| i))
}

/// Word-bounded, case-insensitive substring search.
///
/// A boundary is only required on a side where the phrase itself begins or
/// ends with a word character, so `"@bob"` still matches `"hi @bob"`.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let (Some(first), Some(last)) = (phrase.chars().next(), phrase.chars().next_back()) else {
        return false;
    };
    let bounded_start = is_word(first);
    let bounded_end = is_word(last);

    let mut prev: Option<char> = None;
    for (start, c) in text.char_indices() {
        let start_ok = !bounded_start || !prev.is_some_and(is_word);
        if start_ok && let Some(len) = prefix_len(&text[start..], phrase) {
            let next = text[start + len..].chars().next();
            if !bounded_end || !next.is_some_and(is_word) {
                return true;
            }
        }
        prev = Some(c);
    }
    false
}
