//! Search query parser
//!
//! Mixxx-compatible grammar:
//!
//! ```text
//! query      := or_group ('|' or_group)*
//! or_group   := term ( WS+ term )*
//! term       := '-'? atom
//! atom       := field ':' value
//!             | field ':=' value
//!             | field ':' cmp value
//!             | field ':' number '-' number
//!             | QUOTED | BARE_WORD
//! cmp        := '>' | '>=' | '<' | '<='
//! ```
//!
//! `|` is left-associative and binds looser than whitespace
//! conjunction. A leading `-` negates the following atom. `:=` is
//! case-insensitive exact equality, `:""` tests for empty/null, and
//! `lo-hi` ranges are only recognized on numeric fields.

use std::fmt;
use thiserror::Error;

/// Parse failure with a byte position into the query string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Searchable metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Artist,
    Title,
    Album,
    Genre,
    Bpm,
    Rating,
    Key,
    Year,
    Tracknumber,
    Comment,
    Color,
    File,
    Crate,
}

impl Field {
    pub fn parse(name: &str) -> Option<Field> {
        Some(match name {
            "artist" => Field::Artist,
            "title" => Field::Title,
            "album" => Field::Album,
            "genre" => Field::Genre,
            "bpm" => Field::Bpm,
            "rating" => Field::Rating,
            "key" => Field::Key,
            "year" => Field::Year,
            "tracknumber" => Field::Tracknumber,
            "comment" => Field::Comment,
            "color" => Field::Color,
            "file" => Field::File,
            "crate" => Field::Crate,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Field::Artist => "artist",
            Field::Title => "title",
            Field::Album => "album",
            Field::Genre => "genre",
            Field::Bpm => "bpm",
            Field::Rating => "rating",
            Field::Key => "key",
            Field::Year => "year",
            Field::Tracknumber => "tracknumber",
            Field::Comment => "comment",
            Field::Color => "color",
            Field::File => "file",
            Field::Crate => "crate",
        }
    }

    /// Fields supporting numeric comparison and ranges.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Field::Bpm | Field::Rating | Field::Year | Field::Tracknumber
        )
    }
}

/// Operation applied by a field filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Case-insensitive substring match (numeric equality when the
    /// field is numeric and the value parses as a number).
    Contains(String),
    /// Case-insensitive whole-value equality.
    Equals(String),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    /// Inclusive numeric range.
    Range(f64, f64),
    /// Field is null or the empty string.
    IsEmpty,
}

/// Parsed query AST.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchNode {
    /// Full-text term over the mirror.
    Text(String),
    Filter { field: Field, op: FieldOp },
    Not(Box<SearchNode>),
    And(Vec<SearchNode>),
    Or(Vec<SearchNode>),
}

struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Read a double-quoted string starting at the opening quote.
    fn read_quoted(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some(_) => {
                    let ch = self.input[self.pos..].chars().next().unwrap();
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
                None => return Err(ParseError::new("unterminated quote", start)),
            }
        }
    }

    /// Read an unquoted run up to whitespace or `|`.
    fn read_bare(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b == b'|' {
                break;
            }
            self.pos += 1;
        }
        self.input[start..self.pos].to_string()
    }

    /// Read a value: quoted string or bare word.
    fn read_value(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(b'"') => self.read_quoted(),
            _ => Ok(self.read_bare()),
        }
    }

    /// Read an identifier-like run (letters only, the field-name shape).
    fn read_word(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }
}

/// Recognize `lo-hi` where both sides are numbers.
fn parse_range(value: &str) -> Option<(f64, f64)> {
    // Split on a '-' that is not the leading sign.
    let sep = value
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '-')
        .map(|(i, _)| i)?;
    let lo = value[..sep].parse::<f64>().ok()?;
    let hi = value[sep + 1..].parse::<f64>().ok()?;
    Some((lo, hi))
}

fn parse_atom(lexer: &mut Lexer) -> Result<SearchNode, ParseError> {
    if lexer.peek() == Some(b'"') {
        let phrase = lexer.read_quoted()?;
        return Ok(SearchNode::Text(phrase));
    }

    let word_start = lexer.pos;
    let word = lexer.read_word();

    if lexer.peek() == Some(b':') && !word.is_empty() {
        let Some(field) = Field::parse(&word) else {
            return Err(ParseError::new(format!("unknown field '{word}'"), word_start));
        };
        lexer.pos += 1; // ':'
        let op = parse_field_op(lexer, field)?;
        return Ok(SearchNode::Filter { field, op });
    }

    // Not a field filter; the rest of the run is a bare text term.
    let rest = lexer.read_bare();
    let term = format!("{word}{rest}");
    if term.is_empty() {
        return Err(ParseError::new("expected search term", word_start));
    }
    Ok(SearchNode::Text(term))
}

fn parse_field_op(lexer: &mut Lexer, field: Field) -> Result<FieldOp, ParseError> {
    let op_start = lexer.pos;
    match lexer.peek() {
        Some(b'=') => {
            lexer.pos += 1;
            let value = lexer.read_value()?;
            Ok(FieldOp::Equals(value))
        }
        Some(b'>') | Some(b'<') => {
            let cmp_char = lexer.peek().unwrap();
            lexer.pos += 1;
            let or_equal = lexer.peek() == Some(b'=');
            if or_equal {
                lexer.pos += 1;
            }
            if !field.is_numeric() {
                return Err(ParseError::new(
                    format!("field '{}' does not support comparison", field.name()),
                    op_start,
                ));
            }
            let raw = lexer.read_value()?;
            let number = raw.parse::<f64>().map_err(|_| {
                ParseError::new(format!("expected a number, found '{raw}'"), op_start)
            })?;
            Ok(match (cmp_char, or_equal) {
                (b'>', false) => FieldOp::Gt(number),
                (b'>', true) => FieldOp::Gte(number),
                (b'<', false) => FieldOp::Lt(number),
                (b'<', true) => FieldOp::Lte(number),
                _ => unreachable!(),
            })
        }
        Some(b'"') => {
            let value = lexer.read_quoted()?;
            if value.is_empty() {
                Ok(FieldOp::IsEmpty)
            } else {
                Ok(FieldOp::Contains(value))
            }
        }
        _ => {
            let value = lexer.read_bare();
            if value.is_empty() {
                return Err(ParseError::new(
                    format!("missing value for field '{}'", field.name()),
                    op_start,
                ));
            }
            if field.is_numeric() {
                if let Some((lo, hi)) = parse_range(&value) {
                    return Ok(FieldOp::Range(lo, hi));
                }
            }
            Ok(FieldOp::Contains(value))
        }
    }
}

/// Parse a query string into its AST. An empty or whitespace-only
/// query parses to a match-all conjunction.
pub fn parse_query(input: &str) -> Result<SearchNode, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut groups: Vec<SearchNode> = Vec::new();
    let mut terms: Vec<SearchNode> = Vec::new();

    loop {
        lexer.skip_whitespace();
        match lexer.peek() {
            None => break,
            Some(b'|') => {
                if terms.is_empty() {
                    return Err(ParseError::new("empty OR group", lexer.pos));
                }
                groups.push(group_node(std::mem::take(&mut terms)));
                lexer.pos += 1;
            }
            Some(_) => {
                let negated = if lexer.peek() == Some(b'-') {
                    lexer.pos += 1;
                    true
                } else {
                    false
                };
                let atom = parse_atom(&mut lexer)?;
                terms.push(if negated {
                    SearchNode::Not(Box::new(atom))
                } else {
                    atom
                });
            }
        }
    }

    if groups.is_empty() {
        return Ok(group_node(terms));
    }
    if terms.is_empty() {
        return Err(ParseError::new("empty OR group", lexer.pos));
    }
    groups.push(group_node(terms));
    Ok(SearchNode::Or(groups))
}

fn group_node(mut terms: Vec<SearchNode>) -> SearchNode {
    if terms.len() == 1 {
        terms.pop().unwrap()
    } else {
        SearchNode::And(terms)
    }
}

fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn fmt_value(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '|' || c == '"') {
        format!("\"{}\"", value.replace('"', ""))
    } else {
        value.to_string()
    }
}

impl fmt::Display for SearchNode {
    /// Canonical serialization; re-parsing the output yields an equal
    /// AST.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchNode::Text(term) => write!(f, "{}", fmt_value(term)),
            SearchNode::Filter { field, op } => match op {
                FieldOp::Contains(v) => write!(f, "{}:{}", field.name(), fmt_value(v)),
                FieldOp::Equals(v) => write!(f, "{}:={}", field.name(), fmt_value(v)),
                FieldOp::Gt(n) => write!(f, "{}:>{}", field.name(), fmt_number(*n)),
                FieldOp::Gte(n) => write!(f, "{}:>={}", field.name(), fmt_number(*n)),
                FieldOp::Lt(n) => write!(f, "{}:<{}", field.name(), fmt_number(*n)),
                FieldOp::Lte(n) => write!(f, "{}:<={}", field.name(), fmt_number(*n)),
                FieldOp::Range(lo, hi) => {
                    write!(f, "{}:{}-{}", field.name(), fmt_number(*lo), fmt_number(*hi))
                }
                FieldOp::IsEmpty => write!(f, "{}:\"\"", field.name()),
            },
            SearchNode::Not(child) => write!(f, "-{child}"),
            SearchNode::And(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "{}", parts.join(" "))
            }
            SearchNode::Or(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
        }
    }
}
