//! Program text to expression trees.
//!
//! The reader keeps every leaf as its source text (`"abc"` keeps its quotes,
//! `#\a` its prefix); classifying leaves is the compiler's job. The quote
//! prefixes `'`, `` ` ``, `,` and `,@` expand to their long forms.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn atom(text: impl Into<String>) -> Self {
        Sexp::Atom(text.into())
    }

    pub fn list(items: impl IntoIterator<Item = Sexp>) -> Self {
        Sexp::List(items.into_iter().collect())
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(text) => Some(text),
            Sexp::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            Sexp::Atom(_) => None,
        }
    }

    pub fn is_atom(&self, text: &str) -> bool {
        self.as_atom() == Some(text)
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Atom(text) => f.write_str(text),
            Sexp::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

fn delimited(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\'' | '`' | ',')
}

pub struct Reader<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn lexical_error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(Error::Read {
            line: self.line,
            message: message.into(),
        })
    }

    fn get_char(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn lookahead_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.lookahead_char() {
            if c == ';' {
                while let Some(c) = self.get_char() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c.is_whitespace() {
                self.get_char();
            } else {
                break;
            }
        }
    }

    pub fn finished(&mut self) -> bool {
        self.skip_whitespace();
        self.lookahead_char().is_none()
    }

    /// Reads the next complete expression, or `None` at end of input.
    pub fn read(&mut self) -> Result<Option<Sexp>> {
        self.skip_whitespace();
        let Some(c) = self.get_char() else {
            return Ok(None);
        };

        let expr = match c {
            '(' => self.read_list()?,
            ')' => return self.lexical_error("unexpected `)`"),
            '\'' => self.read_prefixed("quote")?,
            '`' => self.read_prefixed("quasiquote")?,
            ',' => {
                if self.lookahead_char() == Some('@') {
                    self.get_char();
                    self.read_prefixed("unquote-splicing")?
                } else {
                    self.read_prefixed("unquote")?
                }
            }
            '"' => self.read_string()?,
            '#' if self.lookahead_char() == Some('\\') => {
                self.get_char();
                let mut text = String::from("#\\");
                match self.get_char() {
                    Some(c) => text.push(c),
                    None => return Err(Error::Incomplete("unterminated character literal")),
                }
                self.read_symbol_rest(&mut text);
                Sexp::Atom(text)
            }
            c => {
                let mut text = String::from(c);
                self.read_symbol_rest(&mut text);
                Sexp::Atom(text)
            }
        };

        Ok(Some(expr))
    }

    fn read_prefixed(&mut self, name: &str) -> Result<Sexp> {
        match self.read()? {
            Some(expr) => Ok(Sexp::List(vec![Sexp::atom(name), expr])),
            None => Err(Error::Incomplete("expected an expression after a quote prefix")),
        }
    }

    fn read_list(&mut self) -> Result<Sexp> {
        let mut items = vec![];
        loop {
            self.skip_whitespace();
            match self.lookahead_char() {
                None => return Err(Error::Incomplete("unterminated list")),
                Some(')') => {
                    self.get_char();
                    return Ok(Sexp::List(items));
                }
                Some(_) => {
                    if let Some(item) = self.read()? {
                        items.push(item);
                    }
                }
            }
        }
    }

    fn read_string(&mut self) -> Result<Sexp> {
        let mut text = String::from('"');
        loop {
            match self.get_char() {
                None => return Err(Error::Incomplete("unterminated string")),
                Some('\\') => {
                    text.push('\\');
                    match self.get_char() {
                        Some(c) => text.push(c),
                        None => return Err(Error::Incomplete("unterminated string")),
                    }
                }
                Some('"') => {
                    text.push('"');
                    return Ok(Sexp::Atom(text));
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn read_symbol_rest(&mut self, text: &mut String) {
        while let Some(c) = self.lookahead_char() {
            if delimited(c) {
                break;
            }
            text.push(c);
            self.get_char();
        }
    }
}

/// Reads every top-level expression in `source`.
pub fn read(source: &str) -> Result<Vec<Sexp>> {
    let mut reader = Reader::new(source);
    let mut exprs = vec![];
    while let Some(expr) = reader.read()? {
        exprs.push(expr);
    }
    Ok(exprs)
}
