//! Pattern matcher: evaluate a compiled pattern against a [`Source`].
//!
//! All positions are absolute **byte** offsets into the source allocation.
//! Evaluation is a recursive function of the pattern node, the position and
//! an explicit [`State`]; nothing is cached between top-level calls.

use std::fmt;

use crate::definitions::Definitions;
use crate::match_tree::{Match, with_stack};
use crate::render;
use crate::source::Source;

use super::ast::*;
use super::char_class::{bytes_eq, is_id_continue, is_id_start, next_char, range_matches};

/// Knobs for a single [`Matcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Fold ASCII case for literals, ranges and backreferences.
    pub ignore_case: bool,
    /// Maximum nesting of pattern evaluation before giving up.
    pub max_depth: usize,
    /// Maximum number of rule and repetition steps per search.
    pub step_limit: Option<usize>,
}

/// Default evaluation nesting limit. A right-recursive rule costs about three
/// levels per element it matches.
pub const DEFAULT_MAX_DEPTH: usize = 4096;

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions {
            ignore_case: false,
            max_depth: DEFAULT_MAX_DEPTH,
            step_limit: None,
        }
    }
}

/// Conditions that abort a whole match operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// A rule reference with no definition or capture in scope.
    UnknownIdentifier { name: String, start: usize, end: usize },
    StackExhausted { depth: usize },
    StepLimitExceeded { limit: usize },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownIdentifier { name, .. } => {
                write!(f, "The identifier '{name}' is not defined.")
            }
            Self::StackExhausted { depth } => {
                write!(f, "Pattern nesting exceeded the limit of {depth} levels.")
            }
            Self::StepLimitExceeded { limit } => {
                write!(f, "Matching exceeded the limit of {limit} steps.")
            }
        }
    }
}

impl std::error::Error for MatchError {}

type MResult = Result<Option<Match>, MatchError>;

/// The window of the source a sub-match may see. Text tests narrow it to
/// the left operand's span.
#[derive(Debug, Clone, Copy)]
struct View {
    lo: usize,
    hi: usize,
}

/// A backreference binding introduced by a named capture on the left of a
/// chain, visible while the rest of the chain is matched.
struct Scope<'s> {
    name: &'s str,
    capture: &'s Match,
    parent: Option<&'s Scope<'s>>,
}

impl<'s> Scope<'s> {
    fn lookup(scope: Option<&'s Scope<'s>>, name: &str) -> Option<&'s Match> {
        std::iter::successors(scope, |s| s.parent)
            .find(|s| s.name == name)
            .map(|s| s.capture)
    }
}

/// An in-progress rule invocation, used to detect and grow left recursion.
#[derive(Debug)]
struct LeftRec {
    rule: PatId,
    at: usize,
    best: Option<Match>,
    hit: bool,
}

/// Per-search mutable state.
#[derive(Debug, Default)]
struct State {
    depth: usize,
    steps: usize,
    left_rec: Vec<LeftRec>,
}

/// Matches compiled patterns against one source.
pub struct Matcher<'a> {
    arena: &'a PatternArena,
    defs: &'a Definitions,
    source: &'a Source,
    options: MatchOptions,
    skip: Option<PatId>,
}

impl<'a> Matcher<'a> {
    pub fn new(arena: &'a PatternArena, defs: &'a Definitions, source: &'a Source) -> Self {
        Matcher {
            arena,
            defs,
            source,
            options: MatchOptions::default(),
            skip: None,
        }
    }

    pub fn with_options(mut self, options: MatchOptions) -> Self {
        self.options = options;
        self
    }

    /// While searching, jump over anything `skip` matches instead of looking
    /// for matches inside it.
    pub fn with_skip(mut self, skip: Option<PatId>) -> Self {
        self.skip = skip;
        self
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    pub fn source(&self) -> &'a Source {
        self.source
    }

    fn view(&self) -> View {
        View {
            lo: self.source.start(),
            hi: self.source.end(),
        }
    }

    // ─── Public API ─────────────────────────────────────────────────────────

    /// Match `pat` anchored at `pos`.
    pub fn match_at(&self, pat: PatId, pos: usize) -> MResult {
        let view = self.view();
        if pos < view.lo || pos > view.hi {
            return Ok(None);
        }
        let mut st = State::default();
        self.eval(&mut st, view, None, pos, pat)
    }

    /// The first match after `after`, or from the start of the source.
    ///
    /// Scanning resumes at the end of the previous match, or one character
    /// later if the previous match was empty.
    pub fn find_next(&self, pat: PatId, after: Option<&Match>) -> MResult {
        self.find_after(pat, after.map(|m| (m.start, m.end)))
    }

    /// [`find_next`](Self::find_next) given only the previous match's span.
    fn find_after(&self, pat: PatId, after: Option<(usize, usize)>) -> MResult {
        let view = self.view();
        let from = match after {
            None => view.lo,
            Some((start, end)) if end > start => end,
            Some((_, end)) if end >= view.hi => return Ok(None),
            Some((_, end)) => next_char(self.source.bytes(), end, view.hi),
        };
        self.find_from(pat, from)
    }

    /// The first match starting at or after `from`.
    pub fn find_from(&self, pat: PatId, from: usize) -> MResult {
        let view = self.view();
        let bytes = self.source.bytes();
        let mut st = State::default();
        let mut pos = from.max(view.lo);
        while pos <= view.hi {
            if let Some(skip) = self.skip
                && let Some(skipped) = self.eval(&mut st, view, None, pos, skip)?
                && skipped.end > pos
            {
                pos = skipped.end;
                continue;
            }
            log::trace!("trying {}:{} at {pos}", self.source.name(), self.source.line_number(pos));
            if let Some(m) = self.eval(&mut st, view, None, pos, pat)? {
                return Ok(Some(m));
            }
            if pos >= view.hi {
                break;
            }
            pos = next_char(bytes, pos, view.hi);
        }
        Ok(None)
    }

    /// Iterate over all non-overlapping matches of `pat`.
    pub fn matches(&self, pat: PatId) -> Matches<'_, 'a> {
        Matches {
            matcher: self,
            pat,
            prev: None,
            done: false,
        }
    }

    // ─── Evaluation ─────────────────────────────────────────────────────────

    fn eval(&self, st: &mut State, view: View, scope: Option<&Scope<'_>>, pos: usize, id: PatId) -> MResult {
        if st.depth >= self.options.max_depth {
            return Err(MatchError::StackExhausted {
                depth: self.options.max_depth,
            });
        }
        st.depth += 1;
        let result = with_stack(|| self.eval_kind(st, view, scope, pos, id));
        st.depth -= 1;
        result
    }

    fn tick(&self, st: &mut State) -> Result<(), MatchError> {
        st.steps += 1;
        match self.options.step_limit {
            Some(limit) if st.steps > limit => Err(MatchError::StepLimitExceeded { limit }),
            _ => Ok(()),
        }
    }

    fn eval_kind(&self, st: &mut State, view: View, scope: Option<&Scope<'_>>, pos: usize, id: PatId) -> MResult {
        let bytes = self.source.bytes();
        let ignore_case = self.options.ignore_case;
        let leaf = |end: usize| -> MResult { Ok(Some(Match::new(id, pos, end))) };
        let wrap = |inner: Match| -> MResult {
            let end = inner.end;
            Ok(Some(Match::with_children(id, pos, end, vec![inner])))
        };
        let at = |p: usize| if p < view.hi { Some(bytes[p]) } else { None };

        match &self.arena[id].kind {
            PatKind::Literal(text) => {
                let end = pos + text.len();
                if end <= view.hi && bytes_eq(&bytes[pos..end], text, ignore_case) {
                    leaf(end)
                } else {
                    Ok(None)
                }
            }
            PatKind::Range { low, high } => match at(pos) {
                Some(b) if range_matches(*low, *high, b, ignore_case) => leaf(pos + 1),
                _ => Ok(None),
            },
            PatKind::AnyChar => match at(pos) {
                Some(b) if b != b'\n' => leaf(next_char(bytes, pos, view.hi)),
                _ => Ok(None),
            },
            PatKind::IdStart => match at(pos) {
                Some(b) if is_id_start(b) => leaf(next_char(bytes, pos, view.hi)),
                _ => Ok(None),
            },
            PatKind::IdContinue => match at(pos) {
                Some(b) if is_id_continue(b) => leaf(next_char(bytes, pos, view.hi)),
                _ => Ok(None),
            },
            PatKind::Not(inner) => match self.eval(st, view, scope, pos, *inner)? {
                Some(_) => Ok(None),
                None => leaf(pos),
            },
            PatKind::Upto {
                target,
                skip,
                strict,
            } => self.upto(st, view, scope, pos, id, *target, *skip, *strict),
            PatKind::UptoAnd { target, skip } => self.upto_and(st, view, scope, pos, id, *target, *skip),
            PatKind::Repeat { min, max, pat, sep } => {
                self.repeat(st, view, scope, pos, id, *min, *max, *pat, *sep)
            }
            PatKind::Before(inner) => match self.eval(st, view, scope, pos, *inner)? {
                Some(witness) => Ok(Some(Match::with_children(id, pos, pos, vec![witness]))),
                None => Ok(None),
            },
            PatKind::After(inner) => {
                let width = self.arena[*inner].min_len;
                if pos < view.lo + width {
                    return Ok(None);
                }
                match self.eval(st, view, scope, pos - width, *inner)? {
                    Some(witness) if witness.end == pos => {
                        Ok(Some(Match::with_children(id, pos, pos, vec![witness])))
                    }
                    _ => Ok(None),
                }
            }
            PatKind::Capture { pat, .. } => match self.eval(st, view, scope, pos, *pat)? {
                Some(inner) => wrap(inner),
                None => Ok(None),
            },
            PatKind::Otherwise(first, second) => match self.eval(st, view, scope, pos, *first)? {
                Some(m) => Ok(Some(m)),
                None => self.eval(st, view, scope, pos, *second),
            },
            PatKind::Chain(first, rest) => self.chain(st, view, scope, pos, id, *first, *rest),
            PatKind::Test { op, left, right } => self.test(st, view, scope, pos, id, *op, *left, *right),
            PatKind::Replace { pat, .. } => match pat {
                Some(pat) => match self.eval(st, view, scope, pos, *pat)? {
                    Some(inner) => wrap(inner),
                    None => Ok(None),
                },
                None => leaf(pos),
            },
            PatKind::Ref(name) => self.reference(st, view, scope, pos, id, name),
            PatKind::Nodent => Ok(self.nodent(view, pos).map(|end| Match::new(id, pos, end))),
            PatKind::StartOfFile => Ok((pos == view.lo).then(|| Match::new(id, pos, pos))),
            PatKind::EndOfFile => Ok((pos == view.hi).then(|| Match::new(id, pos, pos))),
            PatKind::StartOfLine => {
                let ok = pos == view.lo || bytes[pos - 1] == b'\n';
                Ok(ok.then(|| Match::new(id, pos, pos)))
            }
            PatKind::EndOfLine => {
                let ok = at(pos).is_none_or(|b| b == b'\n');
                Ok(ok.then(|| Match::new(id, pos, pos)))
            }
            PatKind::WordBoundary => {
                let before = pos > view.lo && is_id_continue(bytes[pos - 1]);
                let after = at(pos).is_some_and(is_id_continue);
                Ok((before != after).then(|| Match::new(id, pos, pos)))
            }
            PatKind::Error(inner) => {
                if let Some(inner) = inner
                    && let Some(payload) = self.eval(st, view, scope, pos, *inner)?
                {
                    return wrap(payload);
                }
                leaf(pos)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn upto(
        &self,
        st: &mut State,
        view: View,
        scope: Option<&Scope<'_>>,
        pos: usize,
        id: PatId,
        target: Option<PatId>,
        skip: Option<PatId>,
        strict: bool,
    ) -> MResult {
        let bytes = self.source.bytes();
        let mut p = pos;
        let mut children = Vec::new();
        // Running out of line or input only succeeds without a target.
        let stop = |p: usize, children: Vec<Match>| -> MResult {
            Ok(target.is_none().then(|| Match::with_children(id, pos, p, children)))
        };
        loop {
            if let Some(target) = target
                && self.eval(st, view, scope, p, target)?.is_some()
            {
                return Ok(Some(Match::with_children(id, pos, p, children)));
            }
            if p >= view.hi {
                return stop(p, children);
            }
            if let Some(skip) = skip
                && let Some(skipped) = self.eval(st, view, scope, p, skip)?
                && skipped.end > p
            {
                p = skipped.end;
                children.push(skipped);
                continue;
            }
            if strict || bytes[p] == b'\n' {
                return stop(p, children);
            }
            p = next_char(bytes, p, view.hi);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn upto_and(
        &self,
        st: &mut State,
        view: View,
        scope: Option<&Scope<'_>>,
        pos: usize,
        id: PatId,
        target: PatId,
        skip: Option<PatId>,
    ) -> MResult {
        let bytes = self.source.bytes();
        let mut p = pos;
        let mut children = Vec::new();
        loop {
            if let Some(found) = self.eval(st, view, scope, p, target)? {
                let end = found.end;
                children.push(found);
                return Ok(Some(Match::with_children(id, pos, end, children)));
            }
            if p >= view.hi {
                return Ok(None);
            }
            if let Some(skip) = skip
                && let Some(skipped) = self.eval(st, view, scope, p, skip)?
                && skipped.end > p
            {
                p = skipped.end;
                children.push(skipped);
                continue;
            }
            if bytes[p] == b'\n' {
                return Ok(None);
            }
            p = next_char(bytes, p, view.hi);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn repeat(
        &self,
        st: &mut State,
        view: View,
        scope: Option<&Scope<'_>>,
        pos: usize,
        id: PatId,
        min: usize,
        max: Option<usize>,
        pat: PatId,
        sep: Option<PatId>,
    ) -> MResult {
        let mut p = pos;
        let mut reps = 0usize;
        let mut children = Vec::new();
        while max.is_none_or(|max| reps < max) {
            self.tick(st)?;
            let mut item_at = p;
            let mut sep_match = None;
            if reps > 0
                && let Some(sep) = sep
            {
                match self.eval(st, view, scope, p, sep)? {
                    Some(m) => {
                        item_at = m.end;
                        sep_match = Some(m);
                    }
                    None => break,
                }
            }
            let Some(item) = self.eval(st, view, scope, item_at, pat)? else {
                break;
            };
            let end = item.end;
            children.extend(sep_match);
            children.push(item);
            if end == p {
                // No progress: every further iteration would match the same
                // empty span, so the repetition is as satisfied as it can be.
                reps = max.unwrap_or(usize::MAX).max(min);
                break;
            }
            p = end;
            reps += 1;
        }
        if reps < min {
            return Ok(None);
        }
        Ok(Some(Match::with_children(id, pos, p, children)))
    }

    #[allow(clippy::too_many_arguments)]
    fn chain(
        &self,
        st: &mut State,
        view: View,
        scope: Option<&Scope<'_>>,
        pos: usize,
        id: PatId,
        first: PatId,
        rest: PatId,
    ) -> MResult {
        let Some(left) = self.eval(st, view, scope, pos, first)? else {
            return Ok(None);
        };
        let right = match &self.arena[left.pat].kind {
            PatKind::Capture { name: Some(name), .. } => {
                let bound = Scope {
                    name: name.as_str(),
                    capture: &left,
                    parent: scope,
                };
                self.eval(st, view, Some(&bound), left.end, rest)?
            }
            _ => self.eval(st, view, scope, left.end, rest)?,
        };
        let Some(mut right) = right else {
            return Ok(None);
        };
        let end = right.end;
        let mut children = vec![left];
        // Right-nested chains flatten into one node.
        if matches!(self.arena[right.pat].kind, PatKind::Chain(..)) {
            children.append(&mut right.children);
        } else {
            children.push(right);
        }
        Ok(Some(Match::with_children(id, pos, end, children)))
    }

    #[allow(clippy::too_many_arguments)]
    fn test(
        &self,
        st: &mut State,
        view: View,
        scope: Option<&Scope<'_>>,
        pos: usize,
        id: PatId,
        op: TextTest,
        left: PatId,
        right: PatId,
    ) -> MResult {
        let Some(subject) = self.eval(st, view, scope, pos, left)? else {
            return Ok(None);
        };
        let inner = View {
            lo: subject.start,
            hi: subject.end,
        };
        let witness = match op {
            TextTest::Equal | TextTest::NotEqual => self
                .eval(st, inner, scope, inner.lo, right)?
                .filter(|m| m.end == inner.hi),
            TextTest::Contains | TextTest::NotContains => {
                let bytes = self.source.bytes();
                let mut found = None;
                let mut p = inner.lo;
                loop {
                    if let Some(m) = self.eval(st, inner, scope, p, right)? {
                        found = Some(m);
                        break;
                    }
                    if p >= inner.hi {
                        break;
                    }
                    p = next_char(bytes, p, inner.hi);
                }
                found
            }
        };
        let wanted = matches!(op, TextTest::Equal | TextTest::Contains);
        if witness.is_some() != wanted {
            return Ok(None);
        }
        let end = subject.end;
        let mut children = vec![subject];
        children.extend(witness);
        Ok(Some(Match::with_children(id, pos, end, children)))
    }

    fn reference(
        &self,
        st: &mut State,
        view: View,
        scope: Option<&Scope<'_>>,
        pos: usize,
        id: PatId,
        name: &str,
    ) -> MResult {
        self.tick(st)?;
        if let Some(captured) = Scope::lookup(scope, name) {
            return Ok(self.backref(view, pos, id, captured));
        }
        let Some(rule) = self.defs.lookup(name) else {
            let pat = &self.arena[id];
            return Err(MatchError::UnknownIdentifier {
                name: name.to_string(),
                start: pat.start,
                end: pat.end,
            });
        };

        if let Some(entry) = st
            .left_rec
            .iter_mut()
            .rev()
            .find(|lr| lr.rule == rule && lr.at == pos)
        {
            entry.hit = true;
            // A childless stand-in for the seed; `grow` puts the seed back.
            return Ok(entry.best.as_ref().map(|best| Match::new(id, pos, best.end)));
        }

        st.left_rec.push(LeftRec {
            rule,
            at: pos,
            best: None,
            hit: false,
        });
        let grown = self.grow(st, view, scope, pos, rule, name);
        st.left_rec.pop();
        Ok(grown?.map(|body| {
            let end = body.end;
            Match::with_children(id, pos, end, vec![body])
        }))
    }

    /// Match a rule body, re-running it with the best result so far as the
    /// answer to any left-recursive call until the match stops growing.
    fn grow(&self, st: &mut State, view: View, scope: Option<&Scope<'_>>, pos: usize, rule: PatId, name: &str) -> MResult {
        let mut rounds = 0usize;
        loop {
            if let Some(entry) = st.left_rec.last_mut() {
                entry.hit = false;
            }
            let body = self.eval(st, view, scope, pos, rule)?;
            let Some(entry) = st.left_rec.last_mut() else {
                return Ok(body);
            };
            let best_end = entry.best.as_ref().map(|b| b.end);
            match body {
                Some(m) if best_end.is_none_or(|end| m.end > end) => {
                    if !entry.hit {
                        return Ok(Some(m));
                    }
                    rounds += 1;
                    log::debug!("left recursion in {name} at {pos}: grew to {} (round {rounds})", m.end);
                    let grown = match entry.best.take() {
                        Some(seed) => self.plant_seed(m, rule, pos, seed),
                        None => m,
                    };
                    entry.best = Some(grown);
                }
                _ => return Ok(entry.best.take()),
            }
        }
    }

    /// Replace the stand-ins left by left-recursive calls in `m` with `seed`.
    ///
    /// Direct left recursion (`R: R x`) reuses the seed's children, so the
    /// tree stays flat however many times the seed grows.
    fn plant_seed(&self, mut m: Match, rule: PatId, at: usize, mut seed: Match) -> Match {
        if seed.pat == m.pat
            && matches!(self.arena[m.pat].kind, PatKind::Chain(..))
            && m.children.first().is_some_and(|first| self.is_stand_in(first, rule, at))
        {
            let mut children = std::mem::take(&mut seed.children);
            children.extend(m.children.drain(1..));
            m.children = children;
            return m;
        }

        let mut paths = Vec::new();
        self.stand_in_paths(&m, rule, at, &mut Vec::new(), &mut paths);
        let mut seed = Some(seed);
        let count = paths.len();
        for (n, path) in paths.iter().enumerate() {
            let node = path.iter().fold(&mut m, |node, &i| &mut node.children[i]);
            let planted = if n + 1 == count { seed.take() } else { seed.clone() };
            node.children.extend(planted);
        }
        m
    }

    fn is_stand_in(&self, m: &Match, rule: PatId, at: usize) -> bool {
        m.start == at
            && m.children.is_empty()
            && matches!(&self.arena[m.pat].kind, PatKind::Ref(name) if self.defs.lookup(name) == Some(rule))
    }

    /// Child-index paths to every stand-in for `rule` in `m`. Only nodes
    /// starting at `at` can contain one.
    fn stand_in_paths(&self, m: &Match, rule: PatId, at: usize, path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        with_stack(|| {
            for (i, child) in m.children.iter().enumerate() {
                if child.start != at {
                    continue;
                }
                path.push(i);
                if self.is_stand_in(child, rule, at) {
                    out.push(path.clone());
                } else {
                    self.stand_in_paths(child, rule, at, path, out);
                }
                path.pop();
            }
        })
    }

    /// Match the rendered text of an earlier capture.
    fn backref(&self, view: View, pos: usize, id: PatId, captured: &Match) -> Option<Match> {
        let text = render::render(self.arena, self.source, captured);
        let end = pos + text.len();
        let bytes = self.source.bytes();
        (end <= view.hi && bytes_eq(&bytes[pos..end], &text, self.options.ignore_case))
            .then(|| Match::new(id, pos, end))
    }

    /// A newline followed by at least the current line's indentation.
    fn nodent(&self, view: View, pos: usize) -> Option<usize> {
        let bytes = self.source.bytes();
        if pos >= view.hi || bytes[pos] != b'\n' {
            return None;
        }
        let line_start = self
            .source
            .line_start(self.source.line_number(pos))
            .unwrap_or(view.lo)
            .max(view.lo);
        let indent_char = match bytes[line_start] {
            c @ (b' ' | b'\t') => c,
            _ => return Some(pos + 1),
        };
        let indent = bytes[line_start..pos]
            .iter()
            .take_while(|&&b| b == indent_char)
            .count();
        let next = pos + 1;
        let end = next + indent;
        (end <= view.hi && bytes[next..end].iter().all(|&b| b == indent_char)).then_some(end)
    }
}

/// Iterator over non-overlapping matches, in order. Yields at most one error.
pub struct Matches<'m, 'a> {
    matcher: &'m Matcher<'a>,
    pat: PatId,
    /// Span of the last match yielded.
    prev: Option<(usize, usize)>,
    done: bool,
}

impl Iterator for Matches<'_, '_> {
    type Item = Result<Match, MatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.matcher.find_after(self.pat, self.prev) {
            Ok(Some(m)) => {
                self.prev = Some((m.start, m.end));
                Some(Ok(m))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::parser::{compile_grammar, compile_pattern};

    fn run(pattern: &str, text: &str) -> Option<(usize, usize)> {
        let mut arena = PatternArena::new();
        let pat = compile_pattern(&mut arena, pattern).unwrap();
        let defs = Definitions::new();
        let src = Source::synthesize("t", text);
        let m = Matcher::new(&arena, &defs, &src).match_at(pat, 0).unwrap();
        m.map(|m| (m.start, m.end))
    }

    #[test]
    fn test_literal_and_range() {
        assert_eq!(run(r#""ab""#, "abc"), Some((0, 2)));
        assert_eq!(run(r#""ab""#, "a"), None);
        assert_eq!(run("`a-c", "b"), Some((0, 1)));
        assert_eq!(run("`a-c", "d"), None);
    }

    #[test]
    fn test_any_char_steps_codepoints() {
        assert_eq!(run(".", "é"), Some((0, 2)));
        assert_eq!(run(".", "\n"), None);
        assert_eq!(run(".", ""), None);
    }

    #[test]
    fn test_not_is_zero_width() {
        assert_eq!(run(r#"!"x" ."#, "y"), Some((0, 1)));
        assert_eq!(run(r#"!"x" ."#, "x"), None);
    }

    #[test]
    fn test_upto_stops_at_newline() {
        assert_eq!(run(r#""(" .. ")""#, "(abc)"), Some((0, 5)));
        assert_eq!(run(r#""(" .. ")""#, "(ab\nc)"), None);
        assert_eq!(run(r#""(" ..%\n ")""#, "(ab\nc)"), Some((0, 6)));
        assert_eq!(run("..", "abc\ndef"), Some((0, 3)));
    }

    #[test]
    fn test_strict_upto() {
        assert_eq!(run(r#"..=`a ";""#, "aaa;"), Some((0, 4)));
        assert_eq!(run(r#"..=`a ";""#, "aba;"), None);
    }

    #[test]
    fn test_upto_and() {
        assert_eq!(run(r#"&"end""#, "xx end yy"), Some((0, 6)));
        assert_eq!(run(r#"&"end""#, "xx\nend"), None);
    }

    #[test]
    fn test_repeat_min_max() {
        assert_eq!(run(r#"2-3 "a""#, "aaaa"), Some((0, 3)));
        assert_eq!(run(r#"2-3 "a""#, "a"), None);
        assert_eq!(run(r#"*"a" % ",""#, "a,a,a,"), Some((0, 5)));
        assert_eq!(run(r#"+"a" % ",""#, ",a"), None);
    }

    #[test]
    fn test_empty_repeat_terminates() {
        assert_eq!(run(r#"*(*"x")"#, "yyy"), Some((0, 0)));
        assert_eq!(run(r#"3-5 ("")"#, "abc"), Some((0, 0)));
    }

    #[test]
    fn test_lookaround() {
        assert_eq!(run(r#">"a" ."#, "a"), Some((0, 1)));
        assert_eq!(run(r#">"a" ."#, "b"), None);
    }

    #[test]
    fn test_lookbehind_before_start_fails() {
        assert_eq!(run(r#"<"a""#, "a"), None);
    }

    #[test]
    fn test_word_boundary() {
        assert_eq!(run(r#"{foo}"#, "foo bar"), Some((0, 3)));
        assert_eq!(run(r#"{foo}"#, "food"), None);
    }

    #[test]
    fn test_unknown_identifier_is_fatal() {
        let mut arena = PatternArena::new();
        let pat = compile_pattern(&mut arena, "missing").unwrap();
        let defs = Definitions::new();
        let src = Source::synthesize("t", "x");
        let err = Matcher::new(&arena, &defs, &src).match_at(pat, 0).unwrap_err();
        assert!(matches!(err, MatchError::UnknownIdentifier { ref name, .. } if name == "missing"));
    }

    #[test]
    fn test_direct_left_recursion() {
        let mut arena = PatternArena::new();
        let rules = compile_grammar(&mut arena, r#"R: R "a" / "a""#).unwrap();
        let defs = Definitions::new().extend(rules);
        let pat = compile_pattern(&mut arena, "R").unwrap();
        let src = Source::synthesize("t", "aaab");
        let m = Matcher::new(&arena, &defs, &src).match_at(pat, 0).unwrap().unwrap();
        assert_eq!((m.start, m.end), (0, 3));
    }

    #[test]
    fn test_matches_iterates_without_overlap() {
        let mut arena = PatternArena::new();
        let pat = compile_pattern(&mut arena, r#""aa""#).unwrap();
        let defs = Definitions::new();
        let src = Source::synthesize("t", "aaaaa");
        let spans: Vec<(usize, usize)> = Matcher::new(&arena, &defs, &src)
            .matches(pat)
            .map(|m| m.map(|m| (m.start, m.end)).unwrap())
            .collect();
        assert_eq!(spans, vec![(0, 2), (2, 4)]);
    }
}
