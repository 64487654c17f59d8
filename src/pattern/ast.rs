//! Pattern graph types.
//!
//! Patterns live in a [`PatternArena`] and refer to each other by [`PatId`].
//! Rule references are stored by name and resolved at match time, so
//! recursive grammars never need cyclic ownership.

use std::ops::Index;

use crate::source::Source;

/// Index of a pattern node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatId(pub(crate) usize);

/// Index of a pattern source text in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub(crate) usize);

/// A compiled pattern node.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatKind,
    /// The pattern text this node was compiled from.
    pub source: SourceId,
    pub start: usize,
    pub end: usize,
    /// No match of this node is ever shorter than this.
    pub min_len: usize,
    /// No match of this node is ever longer than this; `None` is unbounded.
    pub max_len: Option<usize>,
}

impl Pattern {
    /// Minimum and maximum are equal and finite.
    pub fn is_fixed_width(&self) -> bool {
        self.max_len == Some(self.min_len)
    }
}

/// Text comparison applied by the postfix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTest {
    /// `a == b`: `b` matches all of `a`'s text.
    Equal,
    /// `a != b`
    NotEqual,
    /// `a ~ b`: `b` matches somewhere inside `a`'s text.
    Contains,
    /// `a !~ b`
    NotContains,
}

impl TextTest {
    pub fn operator(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Contains => "~",
            Self::NotContains => "!~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatKind {
    Literal(Vec<u8>),
    /// One byte in `low..=high`.
    Range {
        low: u8,
        high: u8,
    },
    /// One codepoint, never a newline.
    AnyChar,
    IdStart,
    IdContinue,
    Not(PatId),
    /// Scan forward until `target` would match. Without a target, scan to end
    /// of line. When `strict`, only `skip` may advance the scan.
    Upto {
        target: Option<PatId>,
        skip: Option<PatId>,
        strict: bool,
    },
    /// Scan forward until `target` matches, including it.
    UptoAnd {
        target: PatId,
        skip: Option<PatId>,
    },
    Repeat {
        min: usize,
        max: Option<usize>,
        pat: PatId,
        sep: Option<PatId>,
    },
    Before(PatId),
    After(PatId),
    Capture {
        pat: PatId,
        name: Option<String>,
    },
    Otherwise(PatId, PatId),
    Chain(PatId, PatId),
    Test {
        op: TextTest,
        left: PatId,
        right: PatId,
    },
    Replace {
        pat: Option<PatId>,
        template: Vec<u8>,
    },
    Ref(String),
    Nodent,
    StartOfFile,
    EndOfFile,
    StartOfLine,
    EndOfLine,
    WordBoundary,
    /// Marks erroneous input inside a grammar.
    Error(Option<PatId>),
}

/// Owner of every compiled pattern node and the texts they came from.
#[derive(Debug, Default)]
pub struct PatternArena {
    nodes: Vec<Pattern>,
    sources: Vec<Source>,
}

impl PatternArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: Source) -> SourceId {
        self.sources.push(source);
        SourceId(self.sources.len() - 1)
    }

    pub fn source(&self, id: SourceId) -> &Source {
        &self.sources[id.0]
    }

    pub(crate) fn alloc(&mut self, pattern: Pattern) -> PatId {
        self.nodes.push(pattern);
        PatId(self.nodes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The pattern text a node was compiled from.
    pub fn text(&self, id: PatId) -> &[u8] {
        let pat = &self[id];
        self.source(pat.source).span_text(pat.start, pat.end)
    }

    /// Name of the capture or rule a node stands for, if any.
    pub fn name(&self, id: PatId) -> Option<&str> {
        match &self[id].kind {
            PatKind::Capture { name, .. } => name.as_deref(),
            PatKind::Ref(name) => Some(name),
            _ => None,
        }
    }
}

impl Index<PatId> for PatternArena {
    type Output = Pattern;

    fn index(&self, id: PatId) -> &Pattern {
        &self.nodes[id.0]
    }
}

/// Sum of two maximum lengths, unbounded if either is.
pub(crate) fn add_max(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    a.zip(b).map(|(a, b)| a.saturating_add(b))
}

/// Larger of two maximum lengths, unbounded if either is.
pub(crate) fn widest(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    a.zip(b).map(|(a, b)| a.max(b))
}

/// Bounds of `n` copies of a node separated by `n - 1` separators.
pub(crate) fn repeat_bounds(
    count: usize,
    item: (usize, Option<usize>),
    sep: (usize, Option<usize>),
) -> (usize, Option<usize>) {
    if count == 0 {
        return (0, Some(0));
    }
    let gaps = count - 1;
    let min = item
        .0
        .saturating_mul(count)
        .saturating_add(sep.0.saturating_mul(gaps));
    let max = item.1.map(|m| m.saturating_mul(count)).and_then(|items| {
        if gaps == 0 {
            Some(items)
        } else {
            sep.1.map(|s| items.saturating_add(s.saturating_mul(gaps)))
        }
    });
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_len_arithmetic() {
        assert_eq!(add_max(Some(2), Some(3)), Some(5));
        assert_eq!(add_max(Some(2), None), None);
        assert_eq!(widest(Some(2), Some(3)), Some(3));
        assert_eq!(widest(None, Some(3)), None);
    }

    #[test]
    fn repeat_bounds_with_separator() {
        assert_eq!(repeat_bounds(0, (1, Some(1)), (0, Some(0))), (0, Some(0)));
        assert_eq!(repeat_bounds(3, (2, Some(2)), (1, Some(1))), (8, Some(8)));
        assert_eq!(repeat_bounds(1, (2, Some(2)), (1, None)), (2, Some(2)));
        assert_eq!(repeat_bounds(2, (2, Some(2)), (1, None)), (5, None));
    }
}
