//! Reservation regexp IR and the parser for reservation source strings.
//!
//! The grammar, with `,` binding loosest and `*` tightest:
//!
//! ```text
//! expr  := seq
//! seq   := oneof ("," oneof)*
//! oneof := all ("|" all)*
//! all   := rep ("+" rep)*
//! rep   := el ("*" NUMBER)*
//! el    := NAME | "nothing" | "(" expr ")"
//! ```
//!
//! A `,` separates consecutive cycles, `|` separates alternatives, `+`
//! composes units reserved in parallel and `*` repeats a subexpression over
//! that many cycles.

use std::fmt;

use crate::pdsl::UnitId;

/// A reservation expression. The set of shapes is closed; all passes match
/// exhaustively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Regexp {
    /// An unresolved name: either a unit or a `define_reservation`. None of
    /// these survive the resolution pass.
    Name(String),
    /// A resolved functional unit.
    Unit(UnitId),
    /// The empty reservation for one cycle.
    Nothing,
    /// Consecutive cycles.
    Sequence(Vec<Regexp>),
    /// `n` copies of the child, cycle-wise.
    Repeat(Box<Regexp>, u32),
    /// Parallel composition on the same cycle(s).
    AllOf(Vec<Regexp>),
    /// Alternatives.
    OneOf(Vec<Regexp>),
}

impl fmt::Display for Regexp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Regexp::Name(name) => write!(f, "{name}"),
            Regexp::Unit(unit) => write!(f, "{unit}"),
            Regexp::Nothing => write!(f, "nothing"),
            Regexp::Sequence(elements) => write_joined(f, elements, ", "),
            Regexp::Repeat(child, count) => write!(f, "({child})*{count}"),
            Regexp::AllOf(children) => write_joined(f, children, "+"),
            Regexp::OneOf(children) => write_joined(f, children, "|"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter, children: &[Regexp], sep: &str) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        // Parenthesize children that bind looser than this operator.
        let nested = matches!(child, Regexp::Sequence(_) | Regexp::OneOf(_)) && sep != ", ";
        if nested {
            write!(f, "({child})")?;
        } else {
            write!(f, "{child}")?;
        }
    }
    Ok(())
}

/// Parse a reservation source string.
pub fn parse(src: &str) -> Result<Regexp, String> {
    let mut parser = Parser {
        bytes: src.as_bytes(),
        pos: 0,
    };
    parser.skip_whitespace();
    if parser.at_end() {
        return Err("empty reservation string".to_string());
    }
    let regexp = parser.expr()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(format!(
            "junk `{}` after reservation expression",
            parser.rest()
        ));
    }
    Ok(regexp)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn rest(&self) -> &'a str {
        std::str::from_utf8(&self.bytes[self.pos..]).unwrap_or("")
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Consume `b` if it is the next non-whitespace byte.
    fn eat(&mut self, b: u8) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Regexp, String> {
        self.seq()
    }

    fn seq(&mut self) -> Result<Regexp, String> {
        let mut elements = vec![self.oneof()?];
        while self.eat(b',') {
            elements.push(self.oneof()?);
        }
        Ok(if elements.len() == 1 {
            elements.pop().unwrap()
        } else {
            Regexp::Sequence(elements)
        })
    }

    fn oneof(&mut self) -> Result<Regexp, String> {
        let mut alternatives = vec![self.all()?];
        while self.eat(b'|') {
            alternatives.push(self.all()?);
        }
        Ok(if alternatives.len() == 1 {
            alternatives.pop().unwrap()
        } else {
            Regexp::OneOf(alternatives)
        })
    }

    fn all(&mut self) -> Result<Regexp, String> {
        let mut children = vec![self.rep()?];
        while self.eat(b'+') {
            children.push(self.rep()?);
        }
        Ok(if children.len() == 1 {
            children.pop().unwrap()
        } else {
            Regexp::AllOf(children)
        })
    }

    fn rep(&mut self) -> Result<Regexp, String> {
        let mut child = self.el()?;
        while self.eat(b'*') {
            let count = self.number()?;
            if count <= 1 {
                return Err(format!("repetition count {count} is out of range"));
            }
            child = Regexp::Repeat(Box::new(child), count);
        }
        Ok(child)
    }

    fn el(&mut self) -> Result<Regexp, String> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if !self.eat(b')') {
                    return Err("unbalanced parentheses in reservation".to_string());
                }
                Ok(inner)
            }
            Some(b) if b == b'_' || b.is_ascii_alphabetic() => {
                let name = self.name();
                if name == "nothing" {
                    Ok(Regexp::Nothing)
                } else {
                    Ok(Regexp::Name(name))
                }
            }
            Some(b) => Err(format!("unexpected `{}` in reservation", b as char)),
            None => Err("truncated reservation expression".to_string()),
        }
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'_' || b == b'-' || b.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn number(&mut self) -> Result<u32, String> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err("missing repetition count".to_string());
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .unwrap()
            .parse::<u32>()
            .map_err(|_| "repetition count does not fit in 32 bits".to_string())
    }
}
