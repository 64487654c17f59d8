//! Rendering match trees back to text.
//!
//! [`render`] reproduces the text of a match with every replacement inside
//! it applied. [`Printer`] writes matches for a terminal, optionally with
//! line numbers, colour and surrounding context lines.

use std::io::{self, Write};
use std::str::FromStr;

use crossterm::queue;
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};

use crate::match_tree::{CaptureId, Match, with_stack};
use crate::pattern::ast::{PatKind, PatternArena};
use crate::pattern::char_class::{name_end, unescape};
use crate::source::Source;

/// The text of `m` with replacements applied.
pub fn render(arena: &PatternArena, source: &Source, m: &Match) -> Vec<u8> {
    let mut out = Vec::with_capacity(m.len());
    render_into(arena, source, m, &mut out);
    out
}

fn render_into(arena: &PatternArena, source: &Source, m: &Match, out: &mut Vec<u8>) {
    with_stack(|| render_node(arena, source, m, out));
}

fn render_node(arena: &PatternArena, source: &Source, m: &Match, out: &mut Vec<u8>) {
    match &arena[m.pat].kind {
        PatKind::Replace { template, .. } => render_template(arena, source, m, template, out),
        // An error marker's payload is a message, not replacement text.
        PatKind::Error(_) => out.extend_from_slice(m.text(source)),
        _ => {
            let mut p = m.start;
            for child in m.content(arena) {
                if child.start < p || child.end > m.end {
                    continue;
                }
                out.extend_from_slice(source.span_text(p, child.start));
                render_into(arena, source, child, out);
                p = child.end;
            }
            out.extend_from_slice(source.span_text(p, m.end));
        }
    }
}

/// Leading spaces and tabs of the line containing `offset`.
fn indentation(source: &Source, offset: usize) -> &[u8] {
    let line = source.line_text(source.line_number(offset)).unwrap_or_default();
    let len = line
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count();
    &line[..len]
}

fn render_template(arena: &PatternArena, source: &Source, m: &Match, template: &[u8], out: &mut Vec<u8>) {
    let inner = m.children.first();
    let emit_capture = |key: &[u8], raw: &[u8], out: &mut Vec<u8>| {
        let id = std::str::from_utf8(key).ok().map(CaptureId::parse);
        match id.and_then(|id| inner.and_then(|inner| inner.get_capture(arena, id))) {
            Some(found) => render_into(arena, source, found, out),
            None if inner.is_none() && id == Some(CaptureId::Index(0)) => {}
            None => out.extend_from_slice(raw),
        }
    };

    let mut i = 0;
    while i < template.len() {
        match template[i] {
            b'@' => {
                let rest = &template[i + 1..];
                match rest.first().copied() {
                    Some(b'@') => {
                        out.push(b'@');
                        i += 2;
                    }
                    Some(b'{') => match rest.iter().position(|&b| b == b'}') {
                        Some(close) => {
                            let raw = &template[i..i + close + 2];
                            emit_capture(&rest[1..close], raw, out);
                            i += close + 2;
                        }
                        None => {
                            out.push(b'@');
                            i += 1;
                        }
                    },
                    Some(d) if d.is_ascii_digit() => {
                        let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
                        let raw = &template[i..i + 1 + digits];
                        emit_capture(&rest[..digits], raw, out);
                        i += 1 + digits;
                    }
                    Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                        let end = name_end(template, i + 1);
                        // A trailing `;` terminates the name and is dropped.
                        let next = if template.get(end) == Some(&b';') { end + 1 } else { end };
                        emit_capture(&template[i + 1..end], &template[i..next], out);
                        i = next;
                    }
                    _ => {
                        out.push(b'@');
                        i += 1;
                    }
                }
            }
            b'\\' if template.get(i + 1) == Some(&b'N') => {
                out.push(b'\n');
                out.extend_from_slice(indentation(source, m.start));
                i += 2;
            }
            b'\\' => match unescape(template, i + 1) {
                Some((b, next)) => {
                    out.push(b);
                    i = next;
                }
                None => {
                    out.push(b'\\');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
}

/// The whole source with every match replaced by its rendering.
pub fn replace_all(arena: &PatternArena, source: &Source, matches: &[Match]) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.text().len());
    let mut p = source.start();
    for m in matches {
        out.extend_from_slice(source.span_text(p, m.start));
        render_into(arena, source, m, &mut out);
        p = m.end;
    }
    out.extend_from_slice(source.span_text(p, source.end()));
    out
}

/// How much surrounding text to print around each match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// The entire file.
    All,
    /// Only the matched text.
    None,
    /// The matched lines plus this many lines either side.
    Lines(usize),
}

impl FromStr for Context {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Context::All),
            "none" => Ok(Context::None),
            n => n
                .parse()
                .map(Context::Lines)
                .map_err(|_| format!("expected a number, 'all' or 'none', not '{n}'")),
        }
    }
}

/// Terminal output settings for matches.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    pub color: bool,
    pub line_numbers: bool,
    pub context: Context,
}

impl Default for Printer {
    fn default() -> Self {
        Printer {
            color: false,
            line_numbers: false,
            context: Context::Lines(0),
        }
    }
}

impl Printer {
    /// Print `matches` (in source order) from one source.
    pub fn print_matches<W: Write>(
        &self,
        out: &mut W,
        arena: &PatternArena,
        source: &Source,
        matches: &[Match],
    ) -> io::Result<()> {
        let mut lines = LineWriter {
            out,
            printer: self,
            line: 1,
            numbered: true,
            fresh: true,
        };
        match self.context {
            Context::All => {
                lines.line = source.line_number(source.start());
                lines.region(arena, source, matches, source.start(), source.end())?;
            }
            Context::None => {
                for m in matches {
                    lines.line = source.line_number(m.start);
                    lines.numbered = true;
                    lines.highlight(&render(arena, source, m))?;
                    lines.finish_line()?;
                }
            }
            Context::Lines(n) => {
                let mut printed_to: Option<usize> = None;
                for group in group_by_lines(source, matches, n) {
                    if printed_to.is_some_and(|last| group.first > last + 1) {
                        lines.separator()?;
                    }
                    let start = source
                        .line_start(group.first)
                        .unwrap_or(source.start())
                        .max(source.start());
                    let end = source
                        .line_start(group.last + 1)
                        .unwrap_or(source.end())
                        .min(source.end());
                    lines.line = group.first;
                    lines.numbered = true;
                    lines.region(arena, source, group.matches, start, end)?;
                    printed_to = Some(group.last);
                }
            }
        }
        Ok(())
    }

    /// A file name header, printed before the matches of each file.
    pub fn print_header<W: Write>(&self, out: &mut W, name: &str) -> io::Result<()> {
        if self.color {
            queue!(out, SetForegroundColor(Color::Magenta), SetAttribute(Attribute::Bold))?;
            write!(out, "{name}")?;
            queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
            writeln!(out, ":")
        } else {
            writeln!(out, "{name}:")
        }
    }
}

/// Matches whose context windows overlap or touch, printed as one block.
struct LineGroup<'m> {
    first: usize,
    last: usize,
    matches: &'m [Match],
}

fn group_by_lines<'m>(source: &Source, matches: &'m [Match], context: usize) -> Vec<LineGroup<'m>> {
    let mut groups: Vec<LineGroup<'m>> = Vec::new();
    let max_line = source.line_number(source.end());
    for (i, m) in matches.iter().enumerate() {
        let first = source.line_number(m.start).saturating_sub(context).max(1);
        let last_byte = if m.end > m.start { m.end - 1 } else { m.start };
        let last = (source.line_number(last_byte) + context).min(max_line);
        match groups.last_mut() {
            Some(group) if first <= group.last + 1 => {
                group.last = group.last.max(last);
                let begin = i - group.matches.len();
                group.matches = &matches[begin..=i];
            }
            _ => groups.push(LineGroup {
                first,
                last,
                matches: &matches[i..=i],
            }),
        }
    }
    groups
}

/// Writes text line by line, adding a line number gutter at the start of
/// each output line.
struct LineWriter<'w, W: Write> {
    out: &'w mut W,
    printer: &'w Printer,
    /// Source line number of the next output line.
    line: usize,
    /// The next output line starts a source line (not replacement text).
    numbered: bool,
    fresh: bool,
}

impl<W: Write> LineWriter<'_, W> {
    fn gutter(&mut self) -> io::Result<()> {
        if !self.printer.line_numbers {
            return Ok(());
        }
        if self.printer.color {
            queue!(self.out, SetForegroundColor(Color::DarkGrey))?;
        }
        if self.numbered {
            write!(self.out, "{:>5}| ", self.line)?;
        } else {
            write!(self.out, "{:>5}| ", "")?;
        }
        if self.printer.color {
            queue!(self.out, ResetColor)?;
        }
        Ok(())
    }

    fn write(&mut self, text: &[u8], highlighted: bool) -> io::Result<()> {
        for piece in text.split_inclusive(|&b| b == b'\n') {
            if self.fresh {
                self.gutter()?;
                self.fresh = false;
            }
            let (body, newline) = match piece.strip_suffix(b"\n") {
                Some(body) => (body, true),
                None => (piece, false),
            };
            if highlighted && self.printer.color && !body.is_empty() {
                queue!(self.out, SetForegroundColor(Color::Yellow), SetAttribute(Attribute::Bold))?;
                self.out.write_all(body)?;
                queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
            } else {
                self.out.write_all(body)?;
            }
            if newline {
                self.out.write_all(b"\n")?;
                self.fresh = true;
                if highlighted {
                    self.numbered = false;
                } else {
                    self.line += 1;
                    self.numbered = true;
                }
            }
        }
        Ok(())
    }

    fn plain(&mut self, text: &[u8]) -> io::Result<()> {
        self.write(text, false)
    }

    fn highlight(&mut self, text: &[u8]) -> io::Result<()> {
        self.write(text, true)
    }

    /// Source text `[start, end)` with the matches inside it rendered.
    fn region(
        &mut self,
        arena: &PatternArena,
        source: &Source,
        matches: &[Match],
        start: usize,
        end: usize,
    ) -> io::Result<()> {
        let mut p = start;
        for m in matches {
            self.plain(source.span_text(p, m.start))?;
            self.highlight(&render(arena, source, m))?;
            self.line = source.line_number(m.end);
            self.numbered = true;
            p = m.end;
        }
        self.plain(source.span_text(p, end))?;
        self.finish_line()
    }

    fn finish_line(&mut self) -> io::Result<()> {
        if !self.fresh {
            self.out.write_all(b"\n")?;
            self.fresh = true;
        }
        Ok(())
    }

    fn separator(&mut self) -> io::Result<()> {
        if self.printer.color {
            queue!(self.out, SetForegroundColor(Color::DarkGrey))?;
            self.out.write_all(b"--")?;
            queue!(self.out, ResetColor)?;
            self.out.write_all(b"\n")
        } else {
            self.out.write_all(b"--\n")
        }
    }
}
