//! Recursive descent compiler for pattern source text.
//!
//! Precedence, loosest first: `/` choice, `=>` replacement, chains,
//! postfix `==` `!=` `~` `!~`, then prefix-anchored primaries.

use std::fmt;

use crate::source::Source;

use super::ast::*;
use super::char_class::{is_id_start, name_end, next_char, unescape};

/// What kind of problem a [`CompileError`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Syntax,
    /// Valid syntax the matcher cannot run, e.g. variable-width lookbehind.
    Unsupported,
}

/// A pattern or grammar that failed to compile, with the offending span of
/// its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub start: usize,
    pub end: usize,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

type PResult<T> = Result<T, CompileError>;

fn syntax<T>(start: usize, end: usize, message: impl Into<String>) -> PResult<T> {
    Err(CompileError {
        kind: CompileErrorKind::Syntax,
        start,
        end,
        message: message.into(),
    })
}

/// Compile one pattern expression.
pub fn compile_pattern(arena: &mut PatternArena, text: &str) -> PResult<PatId> {
    compile_pattern_source(arena, Source::synthesize("<pattern>", text))
}

/// Compile a pattern from an already-loaded source.
pub fn compile_pattern_source(arena: &mut PatternArena, source: Source) -> PResult<PatId> {
    let mut c = Compiler::new(arena, source);
    let pat = c.pattern(0, true)?;
    let pos = c.skip_ws(pat.map_or(0, |p| c.end(p)), true);
    c.expect_finished(pos)?;
    match pat {
        Some(pat) => Ok(pat),
        None => syntax(0, 0, "The pattern is empty."),
    }
}

/// Compile text that is literal by default, with `\` introducing embedded
/// patterns (`foo\n`, `x = \int`, `call\(parens)`).
pub fn compile_string_pattern(arena: &mut PatternArena, text: &str) -> PResult<PatId> {
    let mut c = Compiler::new(arena, Source::synthesize("<pattern>", text));
    c.string_pattern()
}

/// Wrap `pat` so that matches render as `template`.
pub fn compile_replacement(
    arena: &mut PatternArena,
    pat: PatId,
    template: &str,
) -> PResult<PatId> {
    let mut c = Compiler::new(arena, Source::synthesize("<replacement>", template));
    c.validate_template(0, template.as_bytes())?;
    let (min, max) = c.bounds(pat);
    Ok(c.node(
        PatKind::Replace {
            pat: Some(pat),
            template: template.as_bytes().to_vec(),
        },
        0,
        template.len(),
        min,
        max,
    ))
}

/// Compile `name: pattern;` definitions in order.
pub fn compile_grammar(arena: &mut PatternArena, text: &str) -> PResult<Vec<(String, PatId)>> {
    compile_grammar_source(arena, Source::synthesize("<grammar>", text))
}

/// Compile a grammar from an already-loaded source (e.g. a grammar file).
pub fn compile_grammar_source(
    arena: &mut PatternArena,
    source: Source,
) -> PResult<Vec<(String, PatId)>> {
    Compiler::new(arena, source).grammar()
}

struct Compiler<'a> {
    arena: &'a mut PatternArena,
    source: Source,
    sid: SourceId,
    /// Inside a string-pattern interpolation, `..` takes no target.
    string_mode: bool,
    /// The innermost enclosing pattern may continue onto following lines.
    multiline: bool,
}

impl<'a> Compiler<'a> {
    fn new(arena: &'a mut PatternArena, source: Source) -> Self {
        let sid = arena.add_source(source.clone());
        Compiler {
            arena,
            source,
            sid,
            string_mode: false,
            multiline: false,
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn len(&self) -> usize {
        self.source.bytes().len()
    }

    fn peek(&self, pos: usize) -> Option<u8> {
        self.source.bytes().get(pos).copied()
    }

    fn starts_with(&self, pos: usize, s: &[u8]) -> bool {
        self.source
            .bytes()
            .get(pos..)
            .is_some_and(|rest| rest.starts_with(s))
    }

    fn node(
        &mut self,
        kind: PatKind,
        start: usize,
        end: usize,
        min_len: usize,
        max_len: Option<usize>,
    ) -> PatId {
        self.arena.alloc(Pattern {
            kind,
            source: self.sid,
            start,
            end,
            min_len,
            max_len,
        })
    }

    fn end(&self, id: PatId) -> usize {
        self.arena[id].end
    }

    fn bounds(&self, id: PatId) -> (usize, Option<usize>) {
        let p = &self.arena[id];
        (p.min_len, p.max_len)
    }

    /// Skip spaces and tabs, plus newlines and `#` comments when `allow_nl`.
    fn skip_ws(&self, mut pos: usize, allow_nl: bool) -> usize {
        loop {
            match self.peek(pos) {
                Some(b' ' | b'\t' | b'\r') => pos += 1,
                Some(b'\n') if allow_nl => pos += 1,
                Some(b'#') if allow_nl => {
                    while !matches!(self.peek(pos), None | Some(b'\n')) {
                        pos += 1;
                    }
                }
                _ => return pos,
            }
        }
    }

    /// End of the name starting at `pos` (which must be an identifier start).
    fn name_end(&self, pos: usize) -> usize {
        name_end(self.source.bytes(), pos)
    }

    fn name_at(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(self.source.span_text(start, end)).into_owned()
    }

    fn expect_finished(&self, pos: usize) -> PResult<()> {
        match self.peek(pos) {
            None => Ok(()),
            Some(b')') => syntax(pos, pos + 1, "This parenthesis doesn't have a matching '('."),
            Some(b']') => syntax(pos, pos + 1, "This bracket doesn't have a matching '['."),
            Some(_) => syntax(
                pos,
                next_char(self.source.bytes(), pos, self.len()),
                "Could not parse this part of the pattern.",
            ),
        }
    }

    fn chain(&mut self, items: Vec<PatId>) -> Option<PatId> {
        items.into_iter().rev().reduce(|rest, first| {
            let (amin, amax) = self.bounds(first);
            let (bmin, bmax) = self.bounds(rest);
            let (start, end) = (self.arena[first].start, self.arena[rest].end);
            self.node(
                PatKind::Chain(first, rest),
                start,
                end,
                amin.saturating_add(bmin),
                add_max(amax, bmax),
            )
        })
    }

    fn either(&mut self, first: PatId, second: PatId) -> PatId {
        let (amin, amax) = self.bounds(first);
        let (bmin, bmax) = self.bounds(second);
        let (start, end) = (self.arena[first].start, self.arena[second].end);
        self.node(
            PatKind::Otherwise(first, second),
            start,
            end,
            amin.min(bmin),
            widest(amax, bmax),
        )
    }

    /// Right-nested ordered choice over a non-empty list.
    fn either_all(&mut self, alts: Vec<PatId>) -> Option<PatId> {
        alts.into_iter()
            .rev()
            .reduce(|rest, first| self.either(first, rest))
    }

    // ─── Grammar layers ──────────────────────────────────────────────────

    /// Choice of replacements of chains.
    fn pattern(&mut self, pos: usize, allow_nl: bool) -> PResult<Option<PatId>> {
        let outer = std::mem::replace(&mut self.multiline, allow_nl);
        let pat = self.choice(pos, allow_nl);
        self.multiline = outer;
        pat
    }

    fn choice(&mut self, pos: usize, allow_nl: bool) -> PResult<Option<PatId>> {
        let mut pos = self.skip_ws(pos, allow_nl);
        let mut items = Vec::new();
        while let Some(item) = self.simple(pos)? {
            items.push(item);
            pos = self.skip_ws(self.end(item), allow_nl);
        }
        let mut pat = self.chain(items);

        while self.starts_with(pos, b"=>") {
            let rep = self.replacement(pat, pos, allow_nl)?;
            pat = Some(rep);
            pos = self.skip_ws(self.end(rep), allow_nl);
        }

        if self.peek(pos) == Some(b'/') {
            let Some(first) = pat else {
                return syntax(pos, pos + 1, "There should be a pattern before this '/'.");
            };
            let Some(alt) = self.pattern(pos + 1, allow_nl)? else {
                return syntax(pos, pos + 1, "There should be a pattern here after a '/'.");
            };
            pat = Some(self.either(first, alt));
        }
        Ok(pat)
    }

    /// `pat => "template"` where `arrow` is the offset of `=>`.
    fn replacement(&mut self, pat: Option<PatId>, arrow: usize, allow_nl: bool) -> PResult<PatId> {
        let pos = self.skip_ws(arrow + 2, allow_nl);
        let (template, end) = match self.peek(pos) {
            Some(quote @ (b'"' | b'\'')) => {
                let body = pos + 1;
                let mut p = body;
                loop {
                    match self.peek(p) {
                        None => {
                            return syntax(pos, p, "This template doesn't have a closing quote.");
                        }
                        Some(b) if b == quote => break,
                        Some(b'\\') => {
                            if matches!(self.peek(p + 1), None | Some(b'\n')) {
                                return syntax(
                                    p,
                                    p + 1,
                                    "There should be an escape sequence after this backslash.",
                                );
                            }
                            p = next_char(self.source.bytes(), p + 1, self.len());
                        }
                        Some(_) => p = next_char(self.source.bytes(), p, self.len()),
                    }
                }
                let template = self.source.span_text(body, p).to_vec();
                self.validate_template(body, &template)?;
                (template, p + 1)
            }
            _ => (Vec::new(), arrow + 2),
        };
        let (start, (min, max)) = match pat {
            Some(p) => (self.arena[p].start, self.bounds(p)),
            None => (arrow, (0, Some(0))),
        };
        Ok(self.node(PatKind::Replace { pat, template }, start, end, min, max))
    }

    /// Check every `\` escape and `@{...}` reference in a template. `offset`
    /// locates the template within this compiler's source for error spans.
    fn validate_template(&self, offset: usize, template: &[u8]) -> PResult<()> {
        let mut i = 0;
        while i < template.len() {
            match template[i] {
                b'\\' => {
                    if template.get(i + 1) == Some(&b'N') {
                        i += 2;
                        continue;
                    }
                    match unescape(template, i + 1) {
                        Some((_, next)) => i = next,
                        None => {
                            return syntax(
                                offset + i,
                                offset + (i + 2).min(template.len()),
                                "This isn't a valid escape sequence.",
                            );
                        }
                    }
                }
                b'@' if template.get(i + 1) == Some(&b'@') => i += 2,
                b'@' if template.get(i + 1) == Some(&b'{') => {
                    match template[i + 2..].iter().position(|&b| b == b'}') {
                        Some(0) | None => {
                            return syntax(
                                offset + i,
                                offset + template.len(),
                                "This '@{' should contain a capture name or number and a closing '}'.",
                            );
                        }
                        Some(n) => i += n + 3,
                    }
                }
                _ => i += 1,
            }
        }
        Ok(())
    }

    /// A primary followed by any postfix text tests.
    fn simple(&mut self, pos: usize) -> PResult<Option<PatId>> {
        let pos = self.skip_ws(pos, false);
        let Some(mut pat) = self.primary(pos)? else {
            return Ok(None);
        };
        loop {
            let p = self.skip_ws(self.end(pat), false);
            let op = if self.starts_with(p, b"==") {
                TextTest::Equal
            } else if self.starts_with(p, b"!=") {
                TextTest::NotEqual
            } else if self.starts_with(p, b"!~") {
                TextTest::NotContains
            } else if self.starts_with(p, b"~") {
                TextTest::Contains
            } else {
                break;
            };
            let oplen = op.operator().len();
            let rhs_pos = self.skip_ws(p + oplen, false);
            let Some(rhs) = self.primary(rhs_pos)? else {
                return syntax(
                    p,
                    p + oplen,
                    format!(
                        "The '{}' operator expects a pattern before and after.",
                        op.operator()
                    ),
                );
            };
            let (min, max) = self.bounds(pat);
            let (start, end) = (self.arena[pat].start, self.end(rhs));
            pat = self.node(
                PatKind::Test {
                    op,
                    left: pat,
                    right: rhs,
                },
                start,
                end,
                min,
                max,
            );
        }
        Ok(Some(pat))
    }

    /// A prefix-anchored construct starting exactly at `pos`, or `None` if
    /// nothing there begins a pattern.
    fn primary(&mut self, pos: usize) -> PResult<Option<PatId>> {
        let Some(c) = self.peek(pos) else {
            return Ok(None);
        };
        let pat = match c {
            b'.' if self.peek(pos + 1) == Some(b'.') => self.upto(pos)?,
            b'.' => self.node(PatKind::AnyChar, pos, pos + 1, 1, Some(4)),
            b'`' => self.char_list(pos)?,
            b'\\' => self.escape_list(pos)?,
            b'|' => self.node(PatKind::WordBoundary, pos, pos + 1, 0, Some(0)),
            b'"' | b'\'' => self.literal(pos, c)?,
            b'{' => self.word_literal(pos)?,
            b'!' => {
                let Some(inner) = self.simple(pos + 1)? else {
                    return syntax(pos, pos + 1, "There should be a pattern after this '!'.");
                };
                let end = self.end(inner);
                self.node(PatKind::Not(inner), pos, end, 0, Some(0))
            }
            b'0'..=b'9' => self.counted_repeat(pos)?,
            b'-' if self.peek(pos + 1).is_some_and(|b| b.is_ascii_digit()) => {
                let (max, p) = self.number(pos + 1)?;
                self.repeat(pos, p, 0, Some(max))?
            }
            b'*' => self.repeat(pos, pos + 1, 0, None)?,
            b'+' => self.repeat(pos, pos + 1, 1, None)?,
            b'<' => {
                let Some(behind) = self.simple(pos + 1)? else {
                    return syntax(pos, pos + 1, "There should be a pattern after this '<'.");
                };
                let end = self.end(behind);
                if !self.arena[behind].is_fixed_width() {
                    return Err(CompileError {
                        kind: CompileErrorKind::Unsupported,
                        start: pos,
                        end,
                        message: "Sorry, variable-width lookbehind patterns like this are not supported."
                            .to_string(),
                    });
                }
                self.node(PatKind::After(behind), pos, end, 0, Some(0))
            }
            b'>' => {
                let Some(ahead) = self.simple(pos + 1)? else {
                    return syntax(pos, pos + 1, "There should be a pattern after this '>'.");
                };
                let end = self.end(ahead);
                self.node(PatKind::Before(ahead), pos, end, 0, Some(0))
            }
            b'(' if self.starts_with(pos, b"(!)") => self.error_marker(pos)?,
            b'(' => self.group(pos)?,
            b'[' => {
                let saved = std::mem::replace(&mut self.string_mode, false);
                let inner = self.pattern(pos + 1, true);
                self.string_mode = saved;
                let Some(inner) = inner? else {
                    return syntax(pos, pos + 1, "There should be a valid pattern after this '['.");
                };
                let close = self.skip_ws(self.end(inner), true);
                if self.peek(close) != Some(b']') {
                    return syntax(pos, close, "This square bracket group isn't properly closed.");
                }
                let (_, max) = self.bounds(inner);
                self.node(
                    PatKind::Repeat {
                        min: 0,
                        max: Some(1),
                        pat: inner,
                        sep: None,
                    },
                    pos,
                    close + 1,
                    0,
                    max,
                )
            }
            b'&' => self.upto_and(pos)?,
            b'@' => self.capture(pos)?,
            b'^' if self.peek(pos + 1) == Some(b'^') => {
                self.node(PatKind::StartOfFile, pos, pos + 2, 0, Some(0))
            }
            b'^' => self.node(PatKind::StartOfLine, pos, pos + 1, 0, Some(0)),
            b'$' if self.peek(pos + 1) == Some(b'$') => {
                self.node(PatKind::EndOfFile, pos, pos + 2, 0, Some(0))
            }
            b'$' => self.node(PatKind::EndOfLine, pos, pos + 1, 0, Some(0)),
            c if is_id_start(c) && c < 0x80 => {
                let end = self.name_end(pos);
                // `name:` begins the next definition rather than a reference.
                let after = self.skip_ws(end, false);
                if self.peek(after) == Some(b':') {
                    return Ok(None);
                }
                let name = self.name_at(pos, end);
                self.node(PatKind::Ref(name), pos, end, 0, None)
            }
            _ => return Ok(None),
        };
        Ok(Some(pat))
    }

    fn number(&self, pos: usize) -> PResult<(usize, usize)> {
        let mut end = pos;
        while self.peek(end).is_some_and(|b| b.is_ascii_digit()) {
            end += 1;
        }
        let text = self.name_at(pos, end);
        match text.parse::<usize>() {
            Ok(n) => Ok((n, end)),
            Err(_) => syntax(pos, end, "This isn't a valid repetition count."),
        }
    }

    /// `N p`, `N-M p`, `N- p`, `N+ p`.
    fn counted_repeat(&mut self, pos: usize) -> PResult<PatId> {
        let (n1, mut p) = self.number(pos)?;
        let (min, max) = match self.peek(p) {
            Some(b'-') if self.peek(p + 1).is_some_and(|b| b.is_ascii_digit()) => {
                let (n2, after) = self.number(p + 1)?;
                if n2 < n1 {
                    return syntax(
                        pos,
                        after,
                        "The maximum repetition count is less than the minimum.",
                    );
                }
                p = after;
                (n1, Some(n2))
            }
            Some(b'-' | b'+') => {
                p += 1;
                (n1, None)
            }
            _ => (n1, Some(n1)),
        };
        self.repeat(pos, p, min, max)
    }

    /// The repeated operand and optional `%sep` of a repetition whose prefix
    /// spans `start..pos`.
    fn repeat(&mut self, start: usize, pos: usize, min: usize, max: Option<usize>) -> PResult<PatId> {
        let Some(item) = self.simple(pos)? else {
            return syntax(start, pos, "There should be a pattern to repeat after this.");
        };
        let mut end = self.end(item);
        let mut sep = None;
        let p = self.skip_ws(end, false);
        if self.peek(p) == Some(b'%') {
            let Some(s) = self.simple(p + 1)? else {
                return syntax(p, p + 1, "There should be a separator pattern after this '%'.");
            };
            end = self.end(s);
            sep = Some(s);
        }
        let item_bounds = self.bounds(item);
        let sep_bounds = sep.map_or((0, Some(0)), |s| self.bounds(s));
        let (min_len, _) = repeat_bounds(min, item_bounds, sep_bounds);
        let max_len = max.and_then(|m| repeat_bounds(m, item_bounds, sep_bounds).1);
        Ok(self.node(
            PatKind::Repeat {
                min,
                max,
                pat: item,
                sep,
            },
            start,
            end,
            min_len,
            max_len,
        ))
    }

    /// Optional `%skip` or `=allowed` after an upto operator.
    fn upto_skip(&mut self, pos: usize) -> PResult<(Option<PatId>, bool, usize)> {
        match self.peek(pos) {
            Some(op @ (b'%' | b'=')) if !self.starts_with(pos, b"=>") => {
                let Some(skip) = self.simple(pos + 1)? else {
                    return syntax(
                        pos,
                        pos + 1,
                        format!("There should be a pattern here after the '{}'.", op as char),
                    );
                };
                Ok((Some(skip), op == b'=', self.end(skip)))
            }
            _ => Ok((None, false, pos)),
        }
    }

    /// `..target`: the target is peeked, not consumed, so the enclosing chain
    /// matches it next.
    fn upto(&mut self, pos: usize) -> PResult<PatId> {
        let (skip, strict, end) = self.upto_skip(pos + 2)?;
        let target = if self.string_mode {
            None
        } else {
            self.simple(self.skip_ws(end, self.multiline))?
        };
        Ok(self.node(
            PatKind::Upto {
                target,
                skip,
                strict,
            },
            pos,
            end,
            0,
            None,
        ))
    }

    /// `&target`: scan up to and including the target.
    fn upto_and(&mut self, pos: usize) -> PResult<PatId> {
        let (skip, _, p) = self.upto_skip(pos + 1)?;
        let Some(target) = self.simple(self.skip_ws(p, self.multiline))? else {
            return syntax(pos, p, "There should be a pattern to scan for after this '&'.");
        };
        let (min, _) = self.bounds(target);
        let end = self.end(target);
        Ok(self.node(PatKind::UptoAnd { target, skip }, pos, end, min, None))
    }

    fn literal(&mut self, pos: usize, quote: u8) -> PResult<PatId> {
        let body = pos + 1;
        let Some(len) = self
            .source
            .bytes()
            .get(body..)
            .and_then(|rest| rest.iter().position(|&b| b == quote))
        else {
            return syntax(pos, self.len(), "This string doesn't have a closing quote.");
        };
        let text = self.source.span_text(body, body + len).to_vec();
        Ok(self.node(PatKind::Literal(text), pos, body + len + 1, len, Some(len)))
    }

    /// `{text}`: a literal bounded by word boundaries.
    fn word_literal(&mut self, pos: usize) -> PResult<PatId> {
        let lit = self.literal(pos, b'}')?;
        let end = self.end(lit);
        let left = self.node(PatKind::WordBoundary, pos, pos + 1, 0, Some(0));
        let right = self.node(PatKind::WordBoundary, end - 1, end, 0, Some(0));
        Ok(self.chain(vec![left, lit, right]).unwrap_or(lit))
    }

    /// Backtick characters: `` `x ``, `` `a-z ``, `` `a,b,x-z ``.
    fn char_list(&mut self, pos: usize) -> PResult<PatId> {
        let mut alts = Vec::new();
        let mut p = pos + 1;
        loop {
            let item_start = if alts.is_empty() { pos } else { p - 1 };
            let c = match self.peek(p) {
                None | Some(b'\n') => {
                    return syntax(p, p, "There should be a character here after the '`'.");
                }
                Some(c) => c,
            };
            let char_end = next_char(self.source.bytes(), p, self.len());
            let is_range = char_end == p + 1
                && self.peek(p + 1) == Some(b'-')
                && !matches!(self.peek(p + 2), None | Some(b'\n'));
            let item = if is_range {
                let hi = self.peek(p + 2).unwrap_or(c);
                if next_char(self.source.bytes(), p + 2, self.len()) != p + 3 {
                    return syntax(item_start, p + 3, "Sorry, UTF-8 character ranges are not supported.");
                }
                if hi < c {
                    return syntax(
                        item_start,
                        p + 3,
                        "Character ranges should be low-to-high, but this is high-to-low.",
                    );
                }
                p += 3;
                self.node(PatKind::Range { low: c, high: hi }, item_start, p, 1, Some(1))
            } else {
                let text = self.source.span_text(p, char_end).to_vec();
                let len = text.len();
                p = char_end;
                self.node(PatKind::Literal(text), item_start, p, len, Some(len))
            };
            alts.push(item);
            if self.peek(p) == Some(b',') {
                p += 1;
            } else {
                break;
            }
        }
        match self.either_all(alts) {
            Some(pat) => Ok(pat),
            None => syntax(pos, p, "There should be at least one item here."),
        }
    }

    /// Backslash escapes: `\n`, `\x41`, `\x00-\x1F`, `\N`, `\i`, `\I`, `\b`,
    /// and comma lists of these.
    fn escape_list(&mut self, pos: usize) -> PResult<PatId> {
        let mut alts = Vec::new();
        let mut p = pos + 1;
        loop {
            let item_start = p - 1;
            let item = match self.peek(p) {
                None | Some(b'\n') => {
                    return syntax(
                        item_start,
                        p,
                        "There should be an escape sequence here after this backslash.",
                    );
                }
                Some(b'N') => {
                    p += 1;
                    self.node(PatKind::Nodent, item_start, p, 1, None)
                }
                Some(b'i') => {
                    p += 1;
                    self.node(PatKind::IdContinue, item_start, p, 1, Some(4))
                }
                Some(b'I') => {
                    p += 1;
                    self.node(PatKind::IdStart, item_start, p, 1, Some(4))
                }
                Some(b'b') => {
                    p += 1;
                    self.node(PatKind::WordBoundary, item_start, p, 0, Some(0))
                }
                Some(_) => {
                    let Some((low, after)) = unescape(self.source.bytes(), p) else {
                        return syntax(
                            item_start,
                            next_char(self.source.bytes(), p, self.len()),
                            "This isn't a valid escape sequence.",
                        );
                    };
                    p = after;
                    let mut high = low;
                    if self.peek(p) == Some(b'-') {
                        let hi_pos = if self.peek(p + 1) == Some(b'\\') { p + 2 } else { p + 1 };
                        let Some((h, after)) = unescape(self.source.bytes(), hi_pos) else {
                            return syntax(p, hi_pos + 1, "This value isn't a valid escape sequence.");
                        };
                        if h < low {
                            return syntax(
                                item_start,
                                after,
                                "Escape ranges should be low-to-high, but this is high-to-low.",
                            );
                        }
                        high = h;
                        p = after;
                    }
                    self.node(PatKind::Range { low, high }, item_start, p, 1, Some(1))
                }
            };
            alts.push(item);
            if self.peek(p) != Some(b',') {
                break;
            }
            // Both `\t,n` and `\t,\n` list forms are accepted.
            p += 1;
            if self.peek(p) == Some(b'\\') && !matches!(self.peek(p + 1), None | Some(b'\n')) {
                p += 1;
            }
        }
        match self.either_all(alts) {
            Some(pat) => Ok(pat),
            None => syntax(pos, p, "There should be at least one item here."),
        }
    }

    fn group(&mut self, pos: usize) -> PResult<PatId> {
        let saved = std::mem::replace(&mut self.string_mode, false);
        let inner = self.pattern(pos + 1, true);
        self.string_mode = saved;
        let Some(inner) = inner? else {
            return syntax(pos, pos + 1, "There should be a pattern inside these parentheses.");
        };
        let close = self.skip_ws(self.end(inner), true);
        if self.peek(close) != Some(b')') {
            return syntax(pos, close, "This parenthesis group isn't properly closed.");
        }
        // Same node, widened to cover the parentheses.
        let mut widened = self.arena[inner].clone();
        widened.start = pos;
        widened.end = close + 1;
        Ok(self.arena.alloc(widened))
    }

    /// `(!)`, `(!) p`, `(!) p => "message"`.
    fn error_marker(&mut self, pos: usize) -> PResult<PatId> {
        let mut end = pos + 3;
        let mut inner = self.simple(end)?;
        if let Some(p) = inner {
            end = self.end(p);
        }
        let arrow = self.skip_ws(end, false);
        if self.starts_with(arrow, b"=>") {
            let rep = self.replacement(inner, arrow, false)?;
            end = self.end(rep);
            inner = Some(rep);
        }
        let max = inner.map_or(Some(0), |p| self.bounds(p).1);
        Ok(self.node(PatKind::Error(inner), pos, end, 0, max))
    }

    /// `@p`, `@name=p`, `@[name]p`.
    fn capture(&mut self, pos: usize) -> PResult<PatId> {
        let mut p = pos + 1;
        let mut name = None;
        if self.peek(p) == Some(b'[') {
            let start = p + 1;
            let end = if self.peek(start).is_some_and(is_id_start) {
                self.name_end(start)
            } else {
                start
            };
            if end == start || self.peek(end) != Some(b']') {
                return syntax(pos, end + 1, "A capture name should look like '@[name]'.");
            }
            name = Some(self.name_at(start, end));
            p = end + 1;
        } else if self.peek(p).is_some_and(|b| is_id_start(b) && b < 0x80) {
            let end = self.name_end(p);
            let eq = self.skip_ws(end, false);
            if self.peek(eq) == Some(b'=') && !matches!(self.peek(eq + 1), Some(b'=' | b'>')) {
                name = Some(self.name_at(p, end));
                p = eq + 1;
            }
        }
        let Some(inner) = self.simple(p)? else {
            return syntax(pos, p, "There should be a valid pattern to capture after this '@'.");
        };
        let (min, max) = self.bounds(inner);
        let end = self.end(inner);
        Ok(self.node(PatKind::Capture { pat: inner, name }, pos, end, min, max))
    }

    // ─── String patterns ─────────────────────────────────────────────────

    fn string_pattern(&mut self) -> PResult<PatId> {
        let len = self.len();
        let mut items = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        let mut lit_start = 0;
        let mut pos = 0;
        while pos < len {
            if self.peek(pos) == Some(b'\\') && pos + 1 < len {
                if let Some(interp) = self.interpolation(pos)? {
                    self.flush_literal(&mut items, &mut literal, lit_start, pos);
                    pos = self.end(interp);
                    items.push(interp);
                    if self.peek(pos) == Some(b';') {
                        pos += 1;
                    }
                    lit_start = pos;
                    continue;
                }
            }
            let next = next_char(self.source.bytes(), pos, len);
            literal.extend_from_slice(self.source.span_text(pos, next));
            pos = next;
        }
        self.flush_literal(&mut items, &mut literal, lit_start, pos);
        match self.chain(items) {
            Some(pat) => Ok(pat),
            None => syntax(0, 0, "The pattern is empty."),
        }
    }

    fn flush_literal(&mut self, items: &mut Vec<PatId>, literal: &mut Vec<u8>, start: usize, end: usize) {
        if literal.is_empty() {
            return;
        }
        let text = std::mem::take(literal);
        let len = text.len();
        items.push(self.node(PatKind::Literal(text), start, end, len, Some(len)));
    }

    /// The pattern introduced by the backslash at `pos`, if any.
    fn interpolation(&mut self, pos: usize) -> PResult<Option<PatId>> {
        let Some(c) = self.peek(pos + 1) else {
            return Ok(None);
        };
        let is_escape_letter = if is_id_start(c) && c < 0x80 {
            let name_len = self.name_end(pos + 1) - (pos + 1);
            let hex_escape = c == b'x'
                && self.peek(pos + 2).is_some_and(|b| b.is_ascii_hexdigit())
                && self.peek(pos + 3).is_some_and(|b| b.is_ascii_hexdigit());
            hex_escape || (name_len == 1 && unescape(self.source.bytes(), pos + 1).is_some())
                || (name_len == 1 && matches!(c, b'N' | b'i' | b'I' | b'b'))
        } else {
            false
        };
        self.string_mode = true;
        let interp = if is_escape_letter {
            self.primary(pos)
        } else {
            self.simple(pos + 1)
        };
        self.string_mode = false;
        interp
    }

    // ─── Grammars ────────────────────────────────────────────────────────

    fn grammar(&mut self) -> PResult<Vec<(String, PatId)>> {
        let mut defs = Vec::new();
        let mut pos = self.skip_ws(0, true);
        while pos < self.len() {
            if !self.peek(pos).is_some_and(|b| is_id_start(b) && b < 0x80) {
                return syntax(
                    pos,
                    next_char(self.source.bytes(), pos, self.len()),
                    "Expected a definition here, like `name: pattern;`.",
                );
            }
            let name_end = self.name_end(pos);
            let colon = self.skip_ws(name_end, false);
            if self.peek(colon) != Some(b':') {
                return syntax(pos, name_end, "Expected a ':' after this rule name.");
            }
            let name = self.name_at(pos, name_end);
            let body = match self.pattern(colon + 1, true)? {
                Some(body) => body,
                None => self.node(PatKind::Literal(Vec::new()), colon + 1, colon + 1, 0, Some(0)),
            };
            let mut p = self.skip_ws(self.end(body), true);
            if self.peek(p) == Some(b';') {
                p += 1;
            }
            log::trace!("compiled rule {name}");
            defs.push((name, body));
            pos = self.skip_ws(p, true);
        }
        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(s: &str) -> (PatternArena, PatId) {
        let mut arena = PatternArena::new();
        let id = compile_pattern(&mut arena, s).expect("compile should succeed");
        (arena, id)
    }

    fn compile_err(s: &str) -> CompileError {
        let mut arena = PatternArena::new();
        compile_pattern(&mut arena, s).expect_err("compile should fail")
    }

    fn kind(s: &str) -> PatKind {
        let (arena, id) = compile_ok(s);
        arena[id].kind.clone()
    }

    // --- Primaries ---

    #[test]
    fn test_literal() {
        assert_eq!(kind(r#""hello""#), PatKind::Literal(b"hello".to_vec()));
        assert_eq!(kind("'hi'"), PatKind::Literal(b"hi".to_vec()));
    }

    #[test]
    fn test_any_char_bounds() {
        let (arena, id) = compile_ok(".");
        assert_eq!(arena[id].kind, PatKind::AnyChar);
        assert_eq!((arena[id].min_len, arena[id].max_len), (1, Some(4)));
    }

    #[test]
    fn test_backtick_range() {
        assert_eq!(kind("`a-z"), PatKind::Range { low: b'a', high: b'z' });
    }

    #[test]
    fn test_backtick_list_is_choice() {
        let (arena, id) = compile_ok("`a,x-z");
        match &arena[id].kind {
            PatKind::Otherwise(a, b) => {
                assert_eq!(arena[*a].kind, PatKind::Literal(b"a".to_vec()));
                assert_eq!(arena[*b].kind, PatKind::Range { low: b'x', high: b'z' });
            }
            other => panic!("expected Otherwise, got {other:?}"),
        }
    }

    #[test]
    fn test_escapes() {
        assert_eq!(kind(r"\n"), PatKind::Range { low: b'\n', high: b'\n' });
        assert_eq!(kind(r"\x00-\x1F"), PatKind::Range { low: 0, high: 0x1f });
        assert_eq!(kind(r"\N"), PatKind::Nodent);
        assert_eq!(kind(r"\b"), PatKind::WordBoundary);
    }

    #[test]
    fn test_escape_lists() {
        for src in [r"\t,n", r"\t,\n"] {
            let (arena, id) = compile_ok(src);
            let PatKind::Otherwise(a, b) = &arena[id].kind else {
                panic!("expected Otherwise for {src}");
            };
            assert_eq!(arena[*a].kind, PatKind::Range { low: b'\t', high: b'\t' });
            assert_eq!(arena[*b].kind, PatKind::Range { low: b'\n', high: b'\n' });
        }
    }

    #[test]
    fn test_anchors() {
        assert_eq!(kind("^"), PatKind::StartOfLine);
        assert_eq!(kind("^^"), PatKind::StartOfFile);
        assert_eq!(kind("$"), PatKind::EndOfLine);
        assert_eq!(kind("$$"), PatKind::EndOfFile);
    }

    #[test]
    fn test_reference() {
        assert_eq!(kind("left-paren"), PatKind::Ref("left-paren".to_string()));
    }

    // --- Quantifiers ---

    fn repeat_of(s: &str) -> (usize, Option<usize>, bool) {
        match kind(s) {
            PatKind::Repeat { min, max, sep, .. } => (min, max, sep.is_some()),
            other => panic!("expected Repeat, got {other:?}"),
        }
    }

    #[test]
    fn test_quantifiers() {
        assert_eq!(repeat_of(r#"*"a""#), (0, None, false));
        assert_eq!(repeat_of(r#"+"a""#), (1, None, false));
        assert_eq!(repeat_of(r#"3 "a""#), (3, Some(3), false));
        assert_eq!(repeat_of(r#"2-5 "a""#), (2, Some(5), false));
        assert_eq!(repeat_of(r#"2+ "a""#), (2, None, false));
        assert_eq!(repeat_of(r#"2- "a""#), (2, None, false));
        assert_eq!(repeat_of(r#"-4 "a""#), (0, Some(4), false));
        assert_eq!(repeat_of(r#"["a"]"#), (0, Some(1), false));
        assert_eq!(repeat_of(r#"*"a" % ",""#), (0, None, true));
    }

    #[test]
    fn test_repeat_bounds() {
        let (arena, id) = compile_ok(r#"2-3 "ab" % ",""#);
        assert_eq!(arena[id].min_len, 5);
        assert_eq!(arena[id].max_len, Some(8));
    }

    #[test]
    fn test_invalid_repeat_range() {
        let err = compile_err(r#"5-2 "a""#);
        assert_eq!(err.kind, CompileErrorKind::Syntax);
        assert_eq!((err.start, err.end), (0, 3));
    }

    // --- Operators ---

    #[test]
    fn test_chain_is_right_nested() {
        let (arena, id) = compile_ok(r#""a" "b" "c""#);
        match &arena[id].kind {
            PatKind::Chain(first, rest) => {
                assert_eq!(arena[*first].kind, PatKind::Literal(b"a".to_vec()));
                assert!(matches!(arena[*rest].kind, PatKind::Chain(..)));
            }
            other => panic!("expected Chain, got {other:?}"),
        }
        assert_eq!((arena[id].min_len, arena[id].max_len), (3, Some(3)));
    }

    #[test]
    fn test_choice_binds_loosest() {
        let (arena, id) = compile_ok(r#""a" "b" / "c""#);
        match &arena[id].kind {
            PatKind::Otherwise(first, _) => {
                assert!(matches!(arena[*first].kind, PatKind::Chain(..)));
            }
            other => panic!("expected Otherwise, got {other:?}"),
        }
    }

    #[test]
    fn test_replacement_wraps_chain() {
        let (arena, id) = compile_ok(r#""a" "b" => "x""#);
        match &arena[id].kind {
            PatKind::Replace { pat: Some(p), template } => {
                assert_eq!(template, b"x");
                assert!(matches!(arena[*p].kind, PatKind::Chain(..)));
            }
            other => panic!("expected Replace, got {other:?}"),
        }
    }

    #[test]
    fn test_equality_binds_tighter_than_chain() {
        let (arena, id) = compile_ok(r#""x" id == "foo""#);
        match &arena[id].kind {
            PatKind::Chain(_, rest) => match &arena[*rest].kind {
                PatKind::Test { op, .. } => assert_eq!(*op, TextTest::Equal),
                other => panic!("expected Test, got {other:?}"),
            },
            other => panic!("expected Chain, got {other:?}"),
        }
        assert!(matches!(kind("a != b"), PatKind::Test { op: TextTest::NotEqual, .. }));
        assert!(matches!(kind("a ~ b"), PatKind::Test { op: TextTest::Contains, .. }));
        assert!(matches!(kind("a !~ b"), PatKind::Test { op: TextTest::NotContains, .. }));
    }

    #[test]
    fn test_named_captures() {
        match kind(r#"@[n]("a" / "b")"#) {
            PatKind::Capture { name, .. } => assert_eq!(name.as_deref(), Some("n")),
            other => panic!("expected Capture, got {other:?}"),
        }
        match kind("@x=id") {
            PatKind::Capture { name, .. } => assert_eq!(name.as_deref(), Some("x")),
            other => panic!("expected Capture, got {other:?}"),
        }
        match kind("@id") {
            PatKind::Capture { name, .. } => assert_eq!(name, None),
            other => panic!("expected Capture, got {other:?}"),
        }
    }

    #[test]
    fn test_upto_does_not_consume_target() {
        let (arena, id) = compile_ok(r#""(" .. ")""#);
        let PatKind::Chain(_, rest) = &arena[id].kind else {
            panic!("expected Chain");
        };
        let PatKind::Chain(upto, last) = &arena[*rest].kind else {
            panic!("expected Chain");
        };
        assert!(matches!(arena[*upto].kind, PatKind::Upto { target: Some(_), .. }));
        assert_eq!(arena[*last].kind, PatKind::Literal(b")".to_vec()));
    }

    #[test]
    fn test_upto_target_across_lines_in_groups() {
        let (arena, id) = compile_ok("(\"(\" ..\n  \")\")");
        let PatKind::Chain(_, rest) = &arena[id].kind else {
            panic!("expected Chain");
        };
        let PatKind::Chain(upto, _) = &arena[*rest].kind else {
            panic!("expected Chain");
        };
        assert!(matches!(arena[*upto].kind, PatKind::Upto { target: Some(_), .. }));
    }

    #[test]
    fn test_group_span_includes_parens() {
        let (arena, id) = compile_ok(r#"("a")"#);
        assert_eq!((arena[id].start, arena[id].end), (0, 5));
        assert_eq!(arena.text(id), br#"("a")"#);
    }

    #[test]
    fn test_error_marker() {
        let (arena, id) = compile_ok(r#"(!) .. => "oops""#);
        match &arena[id].kind {
            PatKind::Error(Some(inner)) => {
                assert!(matches!(arena[*inner].kind, PatKind::Replace { .. }));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    // --- Lookbehind width ---

    #[test]
    fn test_lookbehind_fixed_width() {
        assert!(matches!(kind(r#"< "ab""#), PatKind::After(_)));
        let err = compile_err(r#"< (1-3 "x")"#);
        assert_eq!(err.kind, CompileErrorKind::Unsupported);
        let err = compile_err("<id");
        assert_eq!(err.kind, CompileErrorKind::Unsupported);
    }

    // --- Errors ---

    #[test]
    fn test_empty_pattern_is_error() {
        assert!(compile_err("").message.contains("empty"));
        assert!(compile_err("   ").message.contains("empty"));
    }

    #[test]
    fn test_unclosed_string_span() {
        let err = compile_err(r#"x "abc"#);
        assert_eq!((err.start, err.end), (2, 6));
    }

    #[test]
    fn test_unclosed_group() {
        let err = compile_err(r#"("a""#);
        assert!(err.message.contains("parenthesis"));
    }

    #[test]
    fn test_stray_close_paren() {
        let err = compile_err(r#""a")"#);
        assert_eq!((err.start, err.end), (3, 4));
    }

    #[test]
    fn test_bad_escape() {
        let err = compile_err(r"\q");
        assert_eq!((err.start, err.end), (0, 2));
    }

    #[test]
    fn test_bad_template_escape() {
        let err = compile_err(r#""a" => "x\q""#);
        assert!(err.message.contains("escape"));
    }

    #[test]
    fn test_replacement_capture_braces() {
        let (mut arena, pat) = compile_ok(r#""a""#);
        for template in ["@{1}", "@{name}", "x @{2}y", "@@{"] {
            assert!(compile_replacement(&mut arena, pat, template).is_ok(), "{template}");
        }
        for (template, start) in [("@{}", 0), ("@{1", 0), ("ab @{name", 3)] {
            let err = compile_replacement(&mut arena, pat, template).unwrap_err();
            assert_eq!(err.kind, CompileErrorKind::Syntax, "{template}");
            assert_eq!((err.start, err.end), (start, template.len()), "{template}");
        }
    }

    #[test]
    fn test_missing_operand() {
        assert!(compile_err(r#""a" /"#).message.contains("after a '/'"));
        assert!(compile_err(r#""a" =="#).message.contains("'=='"));
        assert!(compile_err("!").message.contains("'!'"));
    }

    // --- String patterns ---

    #[test]
    fn test_string_pattern_coalesces_literals() {
        let mut arena = PatternArena::new();
        let id = compile_string_pattern(&mut arena, "hello world").unwrap();
        assert_eq!(arena[id].kind, PatKind::Literal(b"hello world".to_vec()));
    }

    #[test]
    fn test_string_pattern_interpolation() {
        let mut arena = PatternArena::new();
        let id = compile_string_pattern(&mut arena, r"x = \int;!").unwrap();
        let PatKind::Chain(first, rest) = &arena[id].kind else {
            panic!("expected Chain");
        };
        assert_eq!(arena[*first].kind, PatKind::Literal(b"x = ".to_vec()));
        let PatKind::Chain(interp, last) = &arena[*rest].kind else {
            panic!("expected Chain");
        };
        assert_eq!(arena[*interp].kind, PatKind::Ref("int".to_string()));
        assert_eq!(arena[*last].kind, PatKind::Literal(b"!".to_vec()));
    }

    #[test]
    fn test_string_pattern_escape_and_bare_upto() {
        let mut arena = PatternArena::new();
        let id = compile_string_pattern(&mut arena, r"a\n\..").unwrap();
        let PatKind::Chain(_, rest) = &arena[id].kind else {
            panic!("expected Chain");
        };
        let PatKind::Chain(nl, upto) = &arena[*rest].kind else {
            panic!("expected Chain");
        };
        assert_eq!(arena[*nl].kind, PatKind::Range { low: b'\n', high: b'\n' });
        assert!(matches!(arena[*upto].kind, PatKind::Upto { target: None, .. }));
    }

    #[test]
    fn test_string_pattern_keeps_unmatched_backslash() {
        let mut arena = PatternArena::new();
        let id = compile_string_pattern(&mut arena, r"a\;").unwrap();
        assert_eq!(arena[id].kind, PatKind::Literal(br"a\;".to_vec()));
    }

    // --- Grammars ---

    #[test]
    fn test_grammar_definitions() {
        let mut arena = PatternArena::new();
        let defs = compile_grammar(
            &mut arena,
            "# comment\nfoo: \"x\" bar;\nbar: `a-z\n  / `0-9\nempty:;\nlast: foo\n",
        )
        .unwrap();
        let names: Vec<&str> = defs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["foo", "bar", "empty", "last"]);
        assert!(matches!(arena[defs[1].1].kind, PatKind::Otherwise(..)));
        assert_eq!(arena[defs[2].1].kind, PatKind::Literal(Vec::new()));
    }

    #[test]
    fn test_grammar_without_semicolons() {
        let mut arena = PatternArena::new();
        let defs = compile_grammar(&mut arena, "a: \"x\"\nb: a a").unwrap();
        assert_eq!(defs.len(), 2);
        assert!(matches!(arena[defs[1].1].kind, PatKind::Chain(..)));
    }

    #[test]
    fn test_grammar_errors() {
        let mut arena = PatternArena::new();
        let err = compile_grammar(&mut arena, "foo \"x\"").unwrap_err();
        assert!(err.message.contains("':'"));
        let err = compile_grammar(&mut arena, "foo: (\"x\"").unwrap_err();
        assert!(err.message.contains("parenthesis"));
    }
}
