//! Match trees: the result of a successful match.
//!
//! A [`Match`] owns its children outright. Spans are absolute byte offsets
//! into the source that was matched.

use crate::pattern::ast::{PatId, PatKind, PatternArena};
use crate::source::Source;

/// Stack that must remain before recursing one level deeper.
const RED_ZONE: usize = 64 * 1024;
/// Size of each extra stack segment.
const STACK_SEGMENT: usize = 1024 * 1024;

/// Run `f`, first moving to a fresh stack segment if the current one is
/// nearly exhausted. Wraps every recursion over patterns or match trees.
pub(crate) fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, f)
}

/// One successful application of a pattern node to `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    pub pat: PatId,
    pub children: Vec<Match>,
}

/// How a capture is named in a replacement template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureId<'a> {
    /// `@N`: the Nth capture in pre-order, 1-based. `@0` is the match itself.
    Index(usize),
    /// `@name`
    Name(&'a str),
}

impl<'a> CaptureId<'a> {
    /// Digits are an index, anything else a name.
    pub fn parse(text: &'a str) -> CaptureId<'a> {
        match text.parse::<usize>() {
            Ok(n) => CaptureId::Index(n),
            Err(_) => CaptureId::Name(text),
        }
    }
}

impl Match {
    pub fn new(pat: PatId, start: usize, end: usize) -> Self {
        Self::with_children(pat, start, end, Vec::new())
    }

    pub fn with_children(pat: PatId, start: usize, end: usize, children: Vec<Match>) -> Self {
        Match {
            start,
            end,
            pat,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The raw matched bytes, before any replacement.
    pub fn text<'s>(&self, source: &'s Source) -> &'s [u8] {
        source.span_text(self.start, self.end)
    }

    /// Children that contribute to this match's text. Lookaround and negation
    /// witnesses are excluded, as is the right-hand side of a text test.
    pub fn content<'m>(&'m self, arena: &PatternArena) -> &'m [Match] {
        match arena[self.pat].kind {
            PatKind::Not(_) | PatKind::Before(_) | PatKind::After(_) => &[],
            PatKind::Test { .. } => &self.children[..self.children.len().min(1)],
            _ => &self.children,
        }
    }

    fn is_capture(&self, arena: &PatternArena) -> bool {
        matches!(arena[self.pat].kind, PatKind::Capture { .. })
    }

    fn is_named(&self, arena: &PatternArena, name: &str) -> bool {
        matches!(&arena[self.pat].kind, PatKind::Capture { name: Some(n), .. } if n == name)
    }

    /// Resolve a template capture reference against this match.
    pub fn get_capture(&self, arena: &PatternArena, id: CaptureId<'_>) -> Option<&Match> {
        match id {
            CaptureId::Index(0) => Some(self),
            CaptureId::Index(n) => {
                let mut remaining = n;
                self.nth_capture(arena, &mut remaining)
            }
            CaptureId::Name(name) => self.named_capture(arena, name),
        }
    }

    fn nth_capture(&self, arena: &PatternArena, remaining: &mut usize) -> Option<&Match> {
        if self.is_capture(arena) {
            *remaining -= 1;
            if *remaining == 0 {
                return Some(self);
            }
        }
        with_stack(|| {
            self.content(arena)
                .iter()
                .find_map(|child| child.nth_capture(arena, remaining))
        })
    }

    /// Self, then direct children, then deeper.
    fn named_capture(&self, arena: &PatternArena, name: &str) -> Option<&Match> {
        if self.is_named(arena, name) {
            return Some(self);
        }
        let children = self.content(arena);
        children
            .iter()
            .find(|child| child.is_named(arena, name))
            .or_else(|| {
                with_stack(|| {
                    children
                        .iter()
                        .find_map(|child| child.named_capture(arena, name))
                })
            })
    }

    /// Error-marker matches in pre-order. Markers nested inside another
    /// marker's payload are not reported separately.
    pub fn errors<'m>(&'m self, arena: &PatternArena) -> Vec<&'m Match> {
        let mut found = Vec::new();
        self.collect_errors(arena, &mut found);
        found
    }

    fn collect_errors<'m>(&'m self, arena: &PatternArena, found: &mut Vec<&'m Match>) {
        if matches!(arena[self.pat].kind, PatKind::Error(_)) {
            found.push(self);
            return;
        }
        with_stack(|| {
            for child in self.content(arena) {
                child.collect_errors(arena, found);
            }
        });
    }

    /// Message for an error-marker match: its replacement text if it has
    /// one, otherwise a generic description.
    pub fn error_message(&self, arena: &PatternArena, source: &Source) -> String {
        let template = self.children.first().filter(|inner| {
            matches!(&arena[inner.pat].kind, PatKind::Replace { template, .. } if !template.is_empty())
        });
        match template {
            Some(inner) => {
                String::from_utf8_lossy(&crate::render::render(arena, source, inner)).into_owned()
            }
            None => "Syntax error".to_string(),
        }
    }

    /// Pre-order walk over this match and every descendant.
    pub fn walk(&self) -> impl Iterator<Item = &Match> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}

impl Drop for Match {
    fn drop(&mut self) {
        // Move descendants onto a worklist so deep trees don't recurse.
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut m) = pending.pop() {
            pending.append(&mut m.children);
        }
    }
}
