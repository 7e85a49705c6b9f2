//! S-expressions as read back from an SMT-LIB solver.
use std::fmt;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Atom {
    /// A simple symbol, keyword or numeral, e.g. `sat`, `:reason-unknown`, `1.5`
    S(String),
    /// A `|quoted|` symbol, stored without the bars
    Q(String),
    /// A string literal, stored unescaped
    Str(String),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Sexp {
    Atom(Atom),
    List(Vec<Sexp>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub msg: String,
    pub pos: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.msg, self.pos)
    }
}

impl Sexp {
    pub fn atom(s: impl Into<String>) -> Sexp {
        Sexp::Atom(Atom::S(s.into()))
    }

    /// The name of a symbol, quoted or not.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Sexp::Atom(Atom::S(s) | Atom::Q(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexp]> {
        if let Sexp::List(items) = self { Some(items) } else { None }
    }

    /// Whether this is a list whose head is the symbol `head`.
    pub fn is_app(&self, head: &str) -> bool {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(Sexp::as_symbol)
            .is_some_and(|s| s == head)
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Atom(Atom::S(s)) => write!(f, "{s}"),
            Sexp::Atom(Atom::Q(s)) => write!(f, "|{s}|"),
            Sexp::Atom(Atom::Str(s)) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Sexp::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

pub struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input: input.as_bytes(), pos: 0 }
    }

    fn err<T>(&self, msg: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError { msg: msg.into(), pos: self.pos })
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else if c == b';' {
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_trivia();
        self.pos >= self.input.len()
    }

    pub fn parse(&mut self) -> Result<Sexp, ParseError> {
        self.skip_trivia();
        match self.peek() {
            None => self.err("unexpected end of input"),
            Some(b'(') => {
                self.pos += 1;
                let mut items = vec![];
                loop {
                    self.skip_trivia();
                    match self.peek() {
                        None => return self.err("unclosed list"),
                        Some(b')') => {
                            self.pos += 1;
                            return Ok(Sexp::List(items));
                        }
                        Some(_) => items.push(self.parse()?),
                    }
                }
            }
            Some(b')') => self.err("unexpected `)`"),
            Some(b'|') => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != b'|') {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return self.err("unclosed quoted symbol");
                }
                let sym = self.text(start, self.pos)?;
                self.pos += 1;
                Ok(Sexp::Atom(Atom::Q(sym)))
            }
            Some(b'"') => {
                self.pos += 1;
                let mut bytes = vec![];
                loop {
                    match self.peek() {
                        None => return self.err("unclosed string literal"),
                        Some(b'"') if self.input.get(self.pos + 1) == Some(&b'"') => {
                            bytes.push(b'"');
                            self.pos += 2;
                        }
                        Some(b'"') => {
                            self.pos += 1;
                            break;
                        }
                        Some(c) => {
                            bytes.push(c);
                            self.pos += 1;
                        }
                    }
                }
                match String::from_utf8(bytes) {
                    Ok(s) => Ok(Sexp::Atom(Atom::Str(s))),
                    Err(_) => self.err("invalid utf-8 in string literal"),
                }
            }
            Some(_) => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| !c.is_ascii_whitespace() && !matches!(c, b'(' | b')' | b';'))
                {
                    self.pos += 1;
                }
                Ok(Sexp::Atom(Atom::S(self.text(start, self.pos)?)))
            }
        }
    }

    fn text(&self, start: usize, end: usize) -> Result<String, ParseError> {
        match std::str::from_utf8(&self.input[start..end]) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => self.err("invalid utf-8"),
        }
    }
}

/// Parses exactly one s-expression.
pub fn parse(input: &str) -> Result<Sexp, ParseError> {
    let mut parser = Parser::new(input);
    let sexp = parser.parse()?;
    if !parser.at_end() {
        return parser.err("trailing input after s-expression");
    }
    Ok(sexp)
}

/// Whether `input` holds at least one complete s-expression, i.e., parentheses are balanced and
/// no string literal or quoted symbol is left open.
pub fn is_complete(input: &str) -> bool {
    let mut depth = 0usize;
    let mut seen_token = false;
    let mut in_string = false;
    let mut in_quote = false;
    let mut in_comment = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if in_comment {
            in_comment = c != '\n';
        } else if in_string {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    in_string = false;
                }
            }
        } else if in_quote {
            in_quote = c != '|';
        } else {
            match c {
                ';' => in_comment = true,
                '"' => in_string = true,
                '|' => in_quote = true,
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                c if c.is_whitespace() => {}
                _ => {}
            }
            if !c.is_whitespace() && c != ';' {
                seen_token = true;
            }
        }
    }
    seen_token && depth == 0 && !in_string && !in_quote
}
