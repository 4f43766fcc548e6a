//! Command-line tokenizer and segment parser.
//!
//! A line is scanned left to right by one state machine ([`Tokens`]) which
//! yields [`Event`]s lazily. [`parse`] runs the machine twice over the same
//! input, first to size the argument vector and then to fill it, so the
//! counting and filling passes can never disagree about the rules.

use std::mem;
use thiserror::Error;

const BLANKS: [char; 2] = [' ', '\t'];

/// How a segment relates to whatever follows it on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Finished,
    Sequential,
    Piped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    In,
    Out,
}

/// One scanner step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    /// A completed argument.
    Argument(String),
    /// A completed token that followed `<` or `>`.
    Target(Redirect, String),
    /// `;` or `|` ended the segment; carries the untrimmed rest of the input.
    Continue(Continuation, &'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unbalanced quote")]
    UnbalancedQuote,
    #[error("pipe with no command after it")]
    PipeWithNoCommand,
}

/// The next command segment carved off a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSegment<'a> {
    pub arguments: Vec<String>,
    pub redirect_in: Option<String>,
    pub redirect_out: Option<String>,
    pub continuation: Continuation,
    /// Where the next segment starts, borrowed from the parsed input.
    pub remainder: Option<&'a str>,
}

impl ParsedSegment<'_> {
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    pub fn program(&self) -> Option<&str> {
        self.arguments.first().map(String::as_str)
    }
}

/// Scanner over one segment of input. Stops after the first `;`/`|`, at `#`,
/// or at the end of input.
#[derive(Debug)]
pub struct Tokens<'a> {
    input: &'a str,
    pos: usize,
    token: String,
    escaped: bool,
    quoted: bool,
    pending: Option<Redirect>,
    queued: Option<Event<'a>>,
    done: bool,
}

impl<'a> Tokens<'a> {
    pub fn new(input: &'a str) -> Self {
        Tokens {
            input,
            pos: 0,
            token: String::new(),
            escaped: false,
            quoted: false,
            pending: None,
            queued: None,
            done: false,
        }
    }

    // A token only materializes once at least one character was collected.
    fn finish_token(&mut self) -> Option<Event<'a>> {
        if self.token.is_empty() {
            return None;
        }
        let word = mem::take(&mut self.token);
        Some(match self.pending.take() {
            Some(kind) => Event::Target(kind, word),
            None => Event::Argument(word),
        })
    }

    fn end_segment(&mut self, continuation: Continuation) -> Event<'a> {
        let rest = &self.input[self.pos..];
        let stop = Event::Continue(continuation, rest);
        match self.finish_token() {
            Some(last) => {
                self.queued = Some(stop);
                last
            }
            None => {
                self.done = true;
                stop
            }
        }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Result<Event<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(stop) = self.queued.take() {
            self.done = true;
            return Some(Ok(stop));
        }
        while let Some(c) = self.input[self.pos..].chars().next() {
            self.pos += c.len_utf8();
            // An escaped quote still toggles quoting: the quote check wins over the escape.
            if self.escaped && c != '"' {
                self.token.push(c);
                self.escaped = false;
                continue;
            }
            match c {
                '\\' => self.escaped = true,
                '"' => {
                    self.quoted = !self.quoted;
                    self.escaped = false;
                }
                c if self.quoted => self.token.push(c),
                ' ' | '\t' => {
                    if let Some(word) = self.finish_token() {
                        return Some(Ok(word));
                    }
                }
                ';' => return Some(Ok(self.end_segment(Continuation::Sequential))),
                '|' => return Some(Ok(self.end_segment(Continuation::Piped))),
                '#' => {
                    self.pos = self.input.len();
                    break;
                }
                '<' | '>' => {
                    let word = self.finish_token();
                    self.pending = Some(if c == '<' { Redirect::In } else { Redirect::Out });
                    if let Some(word) = word {
                        return Some(Ok(word));
                    }
                }
                c => self.token.push(c),
            }
        }
        self.done = true;
        if self.quoted {
            return Some(Err(ParseError::UnbalancedQuote));
        }
        self.finish_token().map(Ok)
    }
}

/// Number of arguments the next segment of `input` holds.
pub fn count_arguments(input: &str) -> Result<usize, ParseError> {
    Tokens::new(input).try_fold(0, |n, event| match event? {
        Event::Argument(_) => Ok(n + 1),
        _ => Ok(n),
    })
}

/// Carves the next segment off `input`.
///
/// On error nothing is returned but the error: no partially filled segment
/// ever escapes.
pub fn parse(input: &str) -> Result<ParsedSegment<'_>, ParseError> {
    let mut segment = ParsedSegment {
        arguments: Vec::with_capacity(count_arguments(input)?),
        redirect_in: None,
        redirect_out: None,
        continuation: Continuation::Finished,
        remainder: None,
    };
    for event in Tokens::new(input) {
        match event? {
            Event::Argument(word) => segment.arguments.push(word),
            Event::Target(Redirect::In, path) => segment.redirect_in = Some(path),
            Event::Target(Redirect::Out, path) => segment.redirect_out = Some(path),
            Event::Continue(continuation, rest) => {
                let rest = rest.trim_matches(&BLANKS[..]);
                // a pipe must feed a command, checked before the left side runs
                if continuation == Continuation::Piped && count_arguments(rest)? == 0 {
                    return Err(ParseError::PipeWithNoCommand);
                }
                if !rest.is_empty() {
                    segment.continuation = continuation;
                    segment.remainder = Some(rest);
                }
            }
        }
    }
    Ok(segment)
}
