//! Tokenizer for Go source files.
//!
//! Produces just enough structure for declaration scanning: identifiers
//! (keywords included), literals, punctuation and semicolons, with Go's
//! automatic semicolon insertion applied at line ends.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
  #[error("line {line}: unexpected character {ch:?}")]
  UnexpectedChar { line: usize, ch: char },

  #[error("line {line}: unterminated {what}")]
  Unterminated { line: usize, what: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
  Ident(String),
  Literal(String),
  Punct(&'static str),
  /// An explicit `;` or one inserted at a line end.
  Semi,
  Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub line: usize,
}

impl Token {
  pub fn is_punct(&self, p: &str) -> bool {
    matches!(&self.kind, TokenKind::Punct(q) if *q == p)
  }

  pub fn is_ident(&self, name: &str) -> bool {
    matches!(&self.kind, TokenKind::Ident(s) if s == name)
  }

  pub fn describe(&self) -> String {
    match &self.kind {
      TokenKind::Ident(s) | TokenKind::Literal(s) => format!("'{}'", s),
      TokenKind::Punct(p) => format!("'{}'", p),
      TokenKind::Semi => "';' or newline".to_string(),
      TokenKind::Eof => "end of file".to_string(),
    }
  }
}

pub const KEYWORDS: &[&str] = &[
  "break",
  "case",
  "chan",
  "const",
  "continue",
  "default",
  "defer",
  "else",
  "fallthrough",
  "for",
  "func",
  "go",
  "goto",
  "if",
  "import",
  "interface",
  "map",
  "package",
  "range",
  "return",
  "select",
  "struct",
  "switch",
  "type",
  "var",
];

pub fn is_keyword(s: &str) -> bool {
  KEYWORDS.contains(&s)
}

// longest first, so the first prefix match wins
const PUNCTUATION: &[&str] = &[
  "<<=", ">>=", "&^=", "...", "&&", "||", "<-", "++", "--", "==", "!=", "<=", ">=", ":=", "+=", "-=", "*=", "/=",
  "%=", "&=", "|=", "^=", "<<", ">>", "&^", "+", "-", "*", "/", "%", "&", "|", "^", "<", ">", "=", "!", "(", ")",
  "[", "]", "{", "}", ",", ".", ":", "~",
];

/// Tokenize a whole source file. The last token is always [`TokenKind::Eof`].
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
  Lexer::new(src).run()
}

struct Lexer<'a> {
  src: &'a str,
  pos: usize,
  line: usize,
  tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
  fn new(src: &'a str) -> Self {
    let src = src.strip_prefix('\u{feff}').unwrap_or(src);
    Self {
      src,
      pos: 0,
      line: 1,
      tokens: Vec::new(),
    }
  }

  fn rest(&self) -> &'a str {
    &self.src[self.pos..]
  }

  fn peek(&self) -> Option<char> {
    self.rest().chars().next()
  }

  fn bump(&mut self) -> Option<char> {
    let ch = self.peek()?;
    self.pos += ch.len_utf8();
    if ch == '\n' {
      self.line += 1;
    }
    Some(ch)
  }

  fn push(&mut self, kind: TokenKind, line: usize) {
    self.tokens.push(Token { kind, line });
  }

  /// Go inserts a semicolon at a line end when the line's last token could end a statement.
  fn needs_semicolon(&self) -> bool {
    match self.tokens.last().map(|t| &t.kind) {
      Some(TokenKind::Ident(s)) => {
        !is_keyword(s) || matches!(s.as_str(), "break" | "continue" | "fallthrough" | "return")
      }
      Some(TokenKind::Literal(_)) => true,
      Some(TokenKind::Punct(p)) => matches!(*p, "++" | "--" | ")" | "]" | "}"),
      _ => false,
    }
  }

  fn newline(&mut self, line: usize) {
    if self.needs_semicolon() {
      self.push(TokenKind::Semi, line);
    }
  }

  fn run(mut self) -> Result<Vec<Token>, LexError> {
    while let Some(ch) = self.peek() {
      let line = self.line;
      match ch {
        '\n' => {
          self.bump();
          self.newline(line);
        }
        c if c.is_whitespace() => {
          self.bump();
        }
        '/' if self.rest().starts_with("//") => {
          while let Some(c) = self.peek() {
            if c == '\n' {
              break;
            }
            self.bump();
          }
        }
        '/' if self.rest().starts_with("/*") => {
          let Some(end) = self.rest()[2..].find("*/") else {
            return Err(LexError::Unterminated { line, what: "comment" });
          };
          let comment = &self.rest()[..end + 4];
          let spans_lines = comment.contains('\n');
          for _ in 0..comment.chars().count() {
            self.bump();
          }
          if spans_lines {
            self.newline(line);
          }
        }
        ';' => {
          self.bump();
          self.push(TokenKind::Semi, line);
        }
        '"' => {
          let text = self.quoted('"', "string literal")?;
          self.push(TokenKind::Literal(text), line);
        }
        '\'' => {
          let text = self.quoted('\'', "rune literal")?;
          self.push(TokenKind::Literal(text), line);
        }
        '`' => {
          let start = self.pos;
          self.bump();
          loop {
            match self.bump() {
              Some('`') => break,
              Some(_) => {}
              None => return Err(LexError::Unterminated { line, what: "raw string" }),
            }
          }
          let text = self.src[start..self.pos].to_string();
          self.push(TokenKind::Literal(text), line);
        }
        c if c.is_ascii_digit() || (c == '.' && self.rest()[1..].starts_with(|d: char| d.is_ascii_digit())) => {
          let text = self.number();
          self.push(TokenKind::Literal(text), line);
        }
        c if c == '_' || c.is_alphabetic() => {
          let start = self.pos;
          while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
              self.bump();
            } else {
              break;
            }
          }
          let text = self.src[start..self.pos].to_string();
          self.push(TokenKind::Ident(text), line);
        }
        _ => {
          let Some(punct) = PUNCTUATION.iter().find(|p| self.rest().starts_with(**p)) else {
            return Err(LexError::UnexpectedChar { line, ch });
          };
          self.pos += punct.len();
          self.push(TokenKind::Punct(punct), line);
        }
      }
    }

    let line = self.line;
    self.newline(line);
    self.push(TokenKind::Eof, line);
    Ok(self.tokens)
  }

  fn quoted(&mut self, quote: char, what: &'static str) -> Result<String, LexError> {
    let line = self.line;
    let start = self.pos;
    self.bump();
    loop {
      match self.bump() {
        Some('\\') => {
          self.bump();
        }
        Some('\n') | None => return Err(LexError::Unterminated { line, what }),
        Some(c) if c == quote => break,
        Some(_) => {}
      }
    }
    Ok(self.src[start..self.pos].to_string())
  }

  fn number(&mut self) -> String {
    let start = self.pos;
    let mut prev = '\0';
    while let Some(c) = self.peek() {
      let exponent_sign = (c == '+' || c == '-') && matches!(prev, 'e' | 'E' | 'p' | 'P');
      if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
        prev = c;
        self.bump();
      } else {
        break;
      }
    }
    self.src[start..self.pos].to_string()
  }
}
