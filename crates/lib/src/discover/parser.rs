//! Declaration-level parser for Go source files.
//!
//! Reads the package clause and the signature of every top-level `func`.
//! Function bodies and all other declarations are skipped by bracket
//! matching, so only their token structure has to be valid.

use thiserror::Error;

use super::lexer::{self, LexError, Token, TokenKind, is_keyword};
use super::signature::{FuncSignature, TypeRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error(transparent)]
  Lex(#[from] LexError),

  #[error("line {line}: expected {expected}, found {found}")]
  Unexpected {
    line: usize,
    expected: &'static str,
    found: String,
  },

  #[error("line {line}: {message}")]
  Invalid { line: usize, message: &'static str },
}

/// The parts of a source file discovery cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
  pub package: String,
  pub functions: Vec<FuncDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDecl {
  pub signature: FuncSignature,
  /// Methods carry a receiver and are never handlers.
  pub has_receiver: bool,
  pub line: usize,
}

pub fn parse_file(src: &str) -> Result<SourceFile, ParseError> {
  let tokens = lexer::tokenize(src)?;
  Parser { tokens, pos: 0 }.file()
}

enum FieldEntry {
  /// A lone identifier: a parameter name or a type name, decided by its neighbours.
  Lone(String),
  Named(TypeRef),
  Type(TypeRef),
}

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> &Token {
    self.peek_at(0)
  }

  fn peek_at(&self, offset: usize) -> &Token {
    let last = self.tokens.len() - 1;
    &self.tokens[(self.pos + offset).min(last)]
  }

  fn next(&mut self) -> Token {
    let token = self.peek().clone();
    if token.kind != TokenKind::Eof {
      self.pos += 1;
    }
    token
  }

  fn unexpected(token: &Token, expected: &'static str) -> ParseError {
    ParseError::Unexpected {
      line: token.line,
      expected,
      found: token.describe(),
    }
  }

  fn expect_punct(&mut self, punct: &'static str) -> Result<(), ParseError> {
    let token = self.next();
    if token.is_punct(punct) {
      Ok(())
    } else {
      Err(Self::unexpected(&token, punct))
    }
  }

  fn ident(&mut self, expected: &'static str) -> Result<String, ParseError> {
    let token = self.next();
    match token.kind {
      TokenKind::Ident(name) if !is_keyword(&name) => Ok(name),
      _ => Err(Self::unexpected(&token, expected)),
    }
  }

  fn end_of_decl(&mut self) -> Result<(), ParseError> {
    let token = self.next();
    match token.kind {
      TokenKind::Semi | TokenKind::Eof => Ok(()),
      _ => Err(Self::unexpected(&token, "';' or newline")),
    }
  }

  fn file(&mut self) -> Result<SourceFile, ParseError> {
    while self.peek().kind == TokenKind::Semi {
      self.next();
    }

    let clause = self.next();
    if !clause.is_ident("package") {
      return Err(Self::unexpected(&clause, "package clause"));
    }
    let package = self.ident("package name")?;
    if package == "_" {
      return Err(ParseError::Invalid {
        line: clause.line,
        message: "package name must not be the blank identifier",
      });
    }
    self.end_of_decl()?;

    let mut functions = Vec::new();
    loop {
      let token = self.peek().clone();
      match &token.kind {
        TokenKind::Eof => break,
        TokenKind::Semi => {
          self.next();
        }
        TokenKind::Ident(kw) if matches!(kw.as_str(), "import" | "const" | "var" | "type") => {
          self.next();
          self.skip_decl()?;
        }
        TokenKind::Ident(kw) if kw == "func" => {
          self.next();
          functions.push(self.func_decl(token.line)?);
        }
        _ => return Err(Self::unexpected(&token, "declaration")),
      }
    }

    Ok(SourceFile { package, functions })
  }

  fn func_decl(&mut self, line: usize) -> Result<FuncDecl, ParseError> {
    let has_receiver = self.peek().is_punct("(");
    if has_receiver {
      self.skip_group()?;
    }

    let name = self.ident("function name")?;
    if self.peek().is_punct("[") {
      self.skip_group()?;
    }

    let (params, results) = self.signature()?;
    if self.peek().is_punct("{") {
      self.skip_group()?;
    }
    self.end_of_decl()?;

    Ok(FuncDecl {
      signature: FuncSignature { name, params, results },
      has_receiver,
      line,
    })
  }

  fn signature(&mut self) -> Result<(Vec<TypeRef>, Vec<TypeRef>), ParseError> {
    self.expect_punct("(")?;
    let params = self.field_list()?;

    let results = if self.peek().is_punct("(") {
      self.next();
      self.field_list()?
    } else if self.starts_type() {
      vec![self.parse_type()?]
    } else {
      Vec::new()
    };

    Ok((params, results))
  }

  /// Parameters or results after the opening parenthesis, through the closing one.
  fn field_list(&mut self) -> Result<Vec<TypeRef>, ParseError> {
    let line = self.peek().line;
    let mut entries = Vec::new();

    loop {
      if self.peek().is_punct(")") {
        self.next();
        break;
      }
      entries.push(self.field_entry()?);
      if self.peek().is_punct(",") {
        self.next();
        continue;
      }
      self.expect_punct(")")?;
      break;
    }

    resolve_fields(entries, line)
  }

  fn field_entry(&mut self) -> Result<FieldEntry, ParseError> {
    let leading_ident = match &self.peek().kind {
      TokenKind::Ident(name) if !is_keyword(name) => Some(name.clone()),
      _ => None,
    };

    if let Some(name) = leading_ident {
      let after = self.peek_at(1);

      if after.is_punct(",") || after.is_punct(")") {
        self.next();
        return Ok(FieldEntry::Lone(name));
      }

      let starts_named = if after.is_punct(".") {
        false
      } else if after.is_punct("[") {
        // `a [N]T` names a parameter; `List[T]` instantiates a generic type
        match self.closing_offset(1) {
          Some(close) => self.starts_type_at(close + 1),
          None => false,
        }
      } else {
        true
      };

      if starts_named {
        self.next();
        return Ok(FieldEntry::Named(self.variadic_or_type()?));
      }
    }

    Ok(FieldEntry::Type(self.variadic_or_type()?))
  }

  fn variadic_or_type(&mut self) -> Result<TypeRef, ParseError> {
    if self.peek().is_punct("...") {
      self.next();
      let elem = self.parse_type()?;
      return Ok(TypeRef::Other(format!("...{}", elem)));
    }
    self.parse_type()
  }

  fn starts_type(&self) -> bool {
    self.starts_type_at(0)
  }

  fn starts_type_at(&self, offset: usize) -> bool {
    match &self.peek_at(offset).kind {
      TokenKind::Ident(name) => {
        !is_keyword(name) || matches!(name.as_str(), "func" | "interface" | "struct" | "map" | "chan")
      }
      TokenKind::Punct(p) => matches!(*p, "*" | "[" | "(" | "<-"),
      _ => false,
    }
  }

  fn parse_type(&mut self) -> Result<TypeRef, ParseError> {
    let token = self.next();
    match &token.kind {
      TokenKind::Punct("*") => Ok(TypeRef::pointer(self.parse_type()?)),
      TokenKind::Punct("(") => {
        let inner = self.parse_type()?;
        self.expect_punct(")")?;
        Ok(inner)
      }
      TokenKind::Punct("[") => {
        let prefix = if self.peek().is_punct("]") {
          self.next();
          "[]"
        } else {
          self.skip_group_rest()?;
          "[N]"
        };
        Ok(TypeRef::Other(format!("{}{}", prefix, self.parse_type()?)))
      }
      TokenKind::Punct("<-") => {
        let chan = self.next();
        if !chan.is_ident("chan") {
          return Err(Self::unexpected(&chan, "'chan'"));
        }
        Ok(TypeRef::Other(format!("<-chan {}", self.parse_type()?)))
      }
      TokenKind::Ident(word) => match word.as_str() {
        "map" => {
          self.expect_punct("[")?;
          let key = self.parse_type()?;
          self.expect_punct("]")?;
          let value = self.parse_type()?;
          Ok(TypeRef::Other(format!("map[{}]{}", key, value)))
        }
        "chan" => {
          let send_only = self.peek().is_punct("<-");
          if send_only {
            self.next();
          }
          let elem = self.parse_type()?;
          Ok(TypeRef::Other(format!("chan{} {}", if send_only { "<-" } else { "" }, elem)))
        }
        "func" => {
          let (params, results) = self.signature()?;
          Ok(TypeRef::Other(render_func_type(&params, &results)))
        }
        "interface" => {
          self.expect_punct("{")?;
          if self.peek().is_punct("}") {
            self.next();
            return Ok(TypeRef::EmptyInterface);
          }
          self.skip_group_rest()?;
          Ok(TypeRef::Other("interface{...}".to_string()))
        }
        "struct" => {
          self.expect_punct("{")?;
          self.skip_group_rest()?;
          Ok(TypeRef::Other("struct{...}".to_string()))
        }
        keyword if is_keyword(keyword) => Err(Self::unexpected(&token, "type")),
        name => {
          let ty = if self.peek().is_punct(".") {
            self.next();
            TypeRef::qualified(name, self.ident("type name")?)
          } else {
            TypeRef::named(name)
          };
          if self.peek().is_punct("[") {
            self.skip_group()?;
          }
          Ok(ty)
        }
      },
      _ => Err(Self::unexpected(&token, "type")),
    }
  }

  /// Offset of the bracket closing the one at `open`, without consuming anything.
  fn closing_offset(&self, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut offset = open;
    loop {
      match self.peek_at(offset).kind {
        TokenKind::Punct("(" | "[" | "{") => depth += 1,
        TokenKind::Punct(")" | "]" | "}") => {
          depth = depth.checked_sub(1)?;
          if depth == 0 {
            return Some(offset);
          }
        }
        TokenKind::Eof => return None,
        _ => {}
      }
      offset += 1;
    }
  }

  /// Skip a bracketed group starting at the current opening token.
  fn skip_group(&mut self) -> Result<(), ParseError> {
    let open = self.next();
    if !(open.is_punct("(") || open.is_punct("[") || open.is_punct("{")) {
      return Err(Self::unexpected(&open, "opening bracket"));
    }
    self.skip_group_rest()
  }

  /// Skip tokens until the bracket that closes an already consumed opening one.
  fn skip_group_rest(&mut self) -> Result<(), ParseError> {
    let mut depth = 1usize;
    while depth > 0 {
      let token = self.next();
      match token.kind {
        TokenKind::Punct("(" | "[" | "{") => depth += 1,
        TokenKind::Punct(")" | "]" | "}") => depth -= 1,
        TokenKind::Eof => return Err(Self::unexpected(&token, "closing bracket")),
        _ => {}
      }
    }
    Ok(())
  }

  /// Skip a non-function declaration through its terminating semicolon.
  fn skip_decl(&mut self) -> Result<(), ParseError> {
    loop {
      let token = self.peek().clone();
      match token.kind {
        TokenKind::Semi => {
          self.next();
          return Ok(());
        }
        TokenKind::Eof => return Ok(()),
        TokenKind::Punct("(" | "[" | "{") => self.skip_group()?,
        TokenKind::Punct(")" | "]" | "}") => {
          return Err(ParseError::Invalid {
            line: token.line,
            message: "unbalanced closing bracket",
          });
        }
        _ => {
          self.next();
        }
      }
    }
  }
}

/// Expand `a, b int` style groups to one type per parameter.
fn resolve_fields(entries: Vec<FieldEntry>, line: usize) -> Result<Vec<TypeRef>, ParseError> {
  let mixed = ParseError::Invalid {
    line,
    message: "mixed named and unnamed parameters",
  };

  if !entries.iter().any(|e| matches!(e, FieldEntry::Named(_))) {
    return Ok(
      entries
        .into_iter()
        .map(|entry| match entry {
          FieldEntry::Lone(name) => TypeRef::Named(name),
          FieldEntry::Named(ty) | FieldEntry::Type(ty) => ty,
        })
        .collect(),
    );
  }

  let mut types = Vec::new();
  let mut pending = 0;
  for entry in entries {
    match entry {
      FieldEntry::Lone(_) => pending += 1,
      FieldEntry::Named(ty) => {
        types.extend(std::iter::repeat_n(ty.clone(), pending));
        pending = 0;
        types.push(ty);
      }
      FieldEntry::Type(_) => return Err(mixed),
    }
  }
  if pending > 0 {
    return Err(mixed);
  }

  Ok(types)
}

fn render_func_type(params: &[TypeRef], results: &[TypeRef]) -> String {
  let join = |types: &[TypeRef]| types.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
  match results {
    [] => format!("func({})", join(params)),
    [single] => format!("func({}) {}", join(params), single),
    _ => format!("func({}) ({})", join(params), join(results)),
  }
}
