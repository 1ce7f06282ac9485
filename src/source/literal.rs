/// Literal-only parser for `var name = <literal>;` payloads
///
/// The upstream answers with a script instead of data. Nothing in it is ever
/// executed: the text is parsed as a single variable assignment whose right
/// hand side may only be an object, array, string, number, boolean or null.
/// Any other construct is rejected with the byte offset where it starts.
use crate::error::{Result, SyncError};

/// Nesting limit for arrays and objects
const MAX_DEPTH: usize = 64;

/// Field name reported for syntax errors
const SCRIPT_FIELD: &str = "script";

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Literal>),
    /// Keys keep their source order
    Object(Vec<(String, Literal)>),
}

impl Literal {
    /// Look up a key of an object literal
    pub fn get(&self, key: &str) -> Option<&Literal> {
        match self {
            Literal::Object(entries) => entries
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Literal]> {
        match self {
            Literal::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Bool(_) => "boolean",
            Literal::Number(_) => "number",
            Literal::String(_) => "string",
            Literal::Array(_) => "array",
            Literal::Object(_) => "object",
        }
    }
}

/// A parsed `var <name> = <value>` statement
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Literal,
}

/// Parse a payload that must consist of exactly one literal assignment
pub fn parse_assignment(source: &str) -> Result<Assignment> {
    let mut parser = Parser::new(source);
    let assignment = parser.assignment()?;
    parser.skip_whitespace();
    if parser.peek() == Some(';') {
        parser.bump();
        parser.skip_whitespace();
    }
    if !parser.at_end() {
        return Err(parser.error("unexpected input after the assignment"));
    }
    Ok(assignment)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser { src, pos: 0, depth: 0 }
    }

    fn error(&self, message: &str) -> SyncError {
        let found = match self.peek() {
            Some(c) => format!("'{}'", c),
            None => "end of input".to_string(),
        };
        SyncError::deserialization(
            SCRIPT_FIELD,
            format!("{} at offset {} (found {})", message, self.pos, found),
        )
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_whitespace(&mut self) {
        // The BOM shows up in front of some responses
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '\u{feff}' {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    fn assignment(&mut self) -> Result<Assignment> {
        self.skip_whitespace();
        let keyword_at = self.pos;
        let keyword = self.identifier();
        if keyword.as_deref() != Some("var") {
            self.pos = keyword_at;
            return Err(self.error("expected 'var'"));
        }
        if !self.peek().map_or(false, char::is_whitespace) {
            return Err(self.error("expected whitespace after 'var'"));
        }
        self.skip_whitespace();
        let name = self
            .identifier()
            .ok_or_else(|| self.error("expected a variable name"))?;
        self.skip_whitespace();
        self.expect('=')?;
        self.skip_whitespace();
        let value = self.value()?;
        Ok(Assignment { name, value })
    }

    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                self.bump();
            }
            _ => return None,
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                self.bump();
            } else {
                break;
            }
        }
        Some(self.src[start..self.pos].to_string())
    }

    fn value(&mut self) -> Result<Literal> {
        match self.peek() {
            Some('{') => self.nested(Self::object),
            Some('[') => self.nested(Self::array),
            Some('"') | Some('\'') => Ok(Literal::String(self.string()?)),
            Some(c) if c == '-' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = self.pos;
                match self.identifier().as_deref() {
                    Some("true") => Ok(Literal::Bool(true)),
                    Some("false") => Ok(Literal::Bool(false)),
                    Some("null") => Ok(Literal::Null),
                    _ => {
                        self.pos = start;
                        Err(self.error("only literals are allowed, not identifiers or calls"))
                    }
                }
            }
            _ => Err(self.error("expected a literal")),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Literal>) -> Result<Literal> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("literal is nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn object(&mut self) -> Result<Literal> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.bump();
                return Ok(Literal::Object(entries));
            }
            let key = match self.peek() {
                Some('"') | Some('\'') => self.string()?,
                _ => self
                    .identifier()
                    .ok_or_else(|| self.error("expected an object key"))?,
            };
            self.skip_whitespace();
            self.expect(':')?;
            self.skip_whitespace();
            let value = self.value()?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn array(&mut self) -> Result<Literal> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(Literal::Array(items));
            }
            items.push(self.value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {}
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn number(&mut self) -> Result<Literal> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        let mut digits = 0;
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.bump();
            digits += 1;
        }
        if self.peek() == Some('.') {
            self.bump();
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.bump();
                digits += 1;
            }
        }
        if digits == 0 {
            self.pos = start;
            return Err(self.error("malformed number"));
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            let exponent_start = self.pos;
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.bump();
            }
            if self.pos == exponent_start {
                return Err(self.error("malformed number exponent"));
            }
        }

        let text = &self.src[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Literal::Number(n)),
            _ => {
                self.pos = start;
                Err(self.error(&format!("number '{}' is out of range", text)))
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected a string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\n') | Some('\r') => {
                    return Err(self.error("line break inside a string"));
                }
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<()> {
        match self.bump() {
            None => Err(self.error("unterminated escape")),
            Some('n') => {
                out.push('\n');
                Ok(())
            }
            Some('r') => {
                out.push('\r');
                Ok(())
            }
            Some('t') => {
                out.push('\t');
                Ok(())
            }
            Some('b') => {
                out.push('\u{8}');
                Ok(())
            }
            Some('f') => {
                out.push('\u{c}');
                Ok(())
            }
            Some('u') => {
                let c = self.unicode_escape()?;
                out.push(c);
                Ok(())
            }
            // \" \' \\ \/ and unknown escapes stand for the character itself
            Some(c) => {
                out.push(c);
                Ok(())
            }
        }
    }

    fn hex4(&mut self) -> Result<u32> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("malformed \\u escape"))?;
            self.bump();
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn unicode_escape(&mut self) -> Result<char> {
        let high = self.hex4()?;
        if (0xD800..0xDC00).contains(&high) {
            if self.src[self.pos..].starts_with("\\u") {
                self.pos += 2;
                let low = self.hex4()?;
                if (0xDC00..0xE000).contains(&low) {
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(code).ok_or_else(|| self.error("invalid surrogate pair"));
                }
            }
            return Err(self.error("unpaired surrogate in \\u escape"));
        }
        char::from_u32(high).ok_or_else(|| self.error("invalid \\u escape"))
    }
}
