//! Minimal JavaScript tokenizer.
//!
//! Only precise enough to know where strings, comments, template literals and
//! regular expressions begin and end, so that import matching never looks
//! inside them. Comments are dropped; every other token keeps its byte span.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Punct(u8),
    /// Single- or double-quoted string literal, quotes included in the span.
    Str,
    /// A string literal cut off by a newline or the end of input.
    UnterminatedStr,
    /// One chunk of a template literal (between backtick / `${` / `}` edges).
    Template,
    Regex,
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl Token {
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.span.clone()]
    }

    pub fn is_ident(&self, source: &str, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(source) == name
    }

    pub fn is_punct(&self, ch: u8) -> bool {
        self.kind == TokenKind::Punct(ch)
    }
}

/// Keywords after which a `/` starts a regular expression.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "instanceof", "new", "void", "delete",
    "throw", "yield", "await", "of",
];

pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
        depth: 0,
        template_depths: Vec::new(),
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer<'s> {
    source: &'s str,
    bytes: &'s [u8],
    pos: usize,
    /// Current `{` nesting depth.
    depth: usize,
    /// Depths at which an open `${` substitution will be closed by `}`.
    template_depths: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn run(mut self) -> Vec<Token> {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            match b {
                b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c => self.pos += 1,
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment(),
                b'/' if self.regex_allowed() => self.regex(),
                b'\'' | b'"' => self.string(b),
                b'`' => {
                    self.pos += 1;
                    self.template(self.pos - 1);
                }
                b'{' => {
                    self.depth += 1;
                    self.single(TokenKind::Punct(b));
                }
                b'}' => {
                    if self.template_depths.last() == Some(&self.depth) {
                        self.template_depths.pop();
                        self.depth -= 1;
                        self.pos += 1;
                        self.template(self.pos - 1);
                    } else {
                        self.depth = self.depth.saturating_sub(1);
                        self.single(TokenKind::Punct(b));
                    }
                }
                b'0'..=b'9' => self.number(),
                _ if is_ident_start(b) => self.ident(),
                _ => self.single(TokenKind::Punct(b)),
            }
        }
        self.tokens
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: start..self.pos,
        });
    }

    fn single(&mut self, kind: TokenKind) {
        let start = self.pos;
        self.pos += 1;
        self.push(kind, start);
    }

    fn skip_line_comment(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos] == b'*' && self.peek(1) == Some(b'/') {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }

    fn string(&mut self, quote: u8) {
        let start = self.pos;
        self.pos += 1;
        let mut kind = TokenKind::UnterminatedStr;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'\n' => break,
                b if b == quote => {
                    self.pos += 1;
                    kind = TokenKind::Str;
                    break;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(self.bytes.len());
        self.push(kind, start);
    }

    /// Scan template text from `self.pos` until the closing backtick or a `${`.
    fn template(&mut self, start: usize) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'`' => {
                    self.pos += 1;
                    break;
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.depth += 1;
                    self.template_depths.push(self.depth);
                    break;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(self.bytes.len());
        self.push(TokenKind::Template, start);
    }

    fn regex_allowed(&self) -> bool {
        let Some(prev) = self.tokens.last() else {
            return true;
        };
        match prev.kind {
            TokenKind::Punct(b')') | TokenKind::Punct(b']') => false,
            TokenKind::Punct(_) => true,
            TokenKind::Ident => REGEX_PRECEDING_KEYWORDS.contains(&prev.text(self.source)),
            TokenKind::Template => {
                // A chunk ending in `${` opens an expression position.
                self.source[prev.span.clone()].ends_with("${")
            }
            TokenKind::Str | TokenKind::UnterminatedStr | TokenKind::Regex | TokenKind::Number => {
                false
            }
        }
    }

    fn regex(&mut self) {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'\n' => break,
                b'[' => {
                    in_class = true;
                    self.pos += 1;
                }
                b']' => {
                    in_class = false;
                    self.pos += 1;
                }
                b'/' if !in_class => {
                    self.pos += 1;
                    while self.pos < self.bytes.len() && is_ident_part(self.bytes[self.pos]) {
                        self.pos += 1;
                    }
                    break;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(self.bytes.len());
        self.push(TokenKind::Regex, start);
    }

    fn number(&mut self) {
        let start = self.pos;
        while self.pos < self.bytes.len()
            && (is_ident_part(self.bytes[self.pos]) || self.bytes[self.pos] == b'.')
        {
            self.pos += 1;
        }
        self.push(TokenKind::Number, start);
    }

    fn ident(&mut self) {
        let start = self.pos;
        while self.pos < self.bytes.len() && is_ident_part(self.bytes[self.pos]) {
            self.pos += 1;
        }
        self.push(TokenKind::Ident, start);
    }
}

// Non-ASCII bytes are treated as identifier characters; token edges therefore
// always fall on ASCII bytes and stay on char boundaries.
fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}
