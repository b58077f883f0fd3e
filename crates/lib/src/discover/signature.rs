//! Signature descriptors for top-level Go functions and the handler acceptance rule.

use std::fmt;

use tracing::debug;

/// A parameter or result type as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
  /// A bare identifier: `Event`, `error`, `int`.
  Named(String),
  /// A package-qualified identifier: `nuclio.Context`.
  Qualified { package: String, name: String },
  /// `*T`
  Pointer(Box<TypeRef>),
  /// `interface{}` with no methods.
  EmptyInterface,
  /// Any other type expression (slices, maps, funcs, non-empty interfaces, ...), kept as text.
  Other(String),
}

impl TypeRef {
  pub fn named(name: impl Into<String>) -> Self {
    TypeRef::Named(name.into())
  }

  pub fn qualified(package: impl Into<String>, name: impl Into<String>) -> Self {
    TypeRef::Qualified {
      package: package.into(),
      name: name.into(),
    }
  }

  pub fn pointer(inner: TypeRef) -> Self {
    TypeRef::Pointer(Box::new(inner))
  }

  /// The type name this reference resolves to.
  ///
  /// Pointers resolve to their pointee, qualified names to their selector.
  /// Composite types have no name.
  pub fn resolved_name(&self) -> Option<&str> {
    match self {
      TypeRef::Named(name) => Some(name),
      TypeRef::Qualified { name, .. } => Some(name),
      TypeRef::Pointer(inner) => inner.resolved_name(),
      TypeRef::EmptyInterface | TypeRef::Other(_) => None,
    }
  }

  /// `interface{}` or its predeclared alias `any`.
  pub fn is_empty_interface(&self) -> bool {
    match self {
      TypeRef::EmptyInterface => true,
      TypeRef::Named(name) => name == "any",
      _ => false,
    }
  }
}

impl fmt::Display for TypeRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TypeRef::Named(name) => f.write_str(name),
      TypeRef::Qualified { package, name } => write!(f, "{}.{}", package, name),
      TypeRef::Pointer(inner) => write!(f, "*{}", inner),
      TypeRef::EmptyInterface => f.write_str("interface{}"),
      TypeRef::Other(text) => f.write_str(text),
    }
  }
}

/// Signature of one top-level function declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSignature {
  pub name: String,
  /// One entry per declared parameter; `a, b int` counts twice.
  pub params: Vec<TypeRef>,
  pub results: Vec<TypeRef>,
}

impl FuncSignature {
  /// Exported names start with an upper-case letter.
  pub fn is_exported(&self) -> bool {
    self.name.chars().next().is_some_and(char::is_uppercase)
  }

  pub fn param_count(&self) -> usize {
    self.params.len()
  }

  pub fn result_count(&self) -> usize {
    self.results.len()
  }

  pub fn param_names(&self) -> Vec<Option<&str>> {
    self.params.iter().map(TypeRef::resolved_name).collect()
  }

  pub fn result_names(&self) -> Vec<Option<&str>> {
    self.results.iter().map(TypeRef::resolved_name).collect()
  }

  /// Whether this function can serve as an event handler:
  /// `func Name(ctx *Context, event Event) (interface{}, error)`.
  ///
  /// The second result is not enforced; any type is accepted there.
  pub fn is_handler(&self) -> bool {
    if !self.is_exported() {
      return false;
    }

    let [context, event] = self.params.as_slice() else {
      return false;
    };
    if context.resolved_name() != Some("Context") || event.resolved_name() != Some("Event") {
      return false;
    }

    let [response, second] = self.results.as_slice() else {
      return false;
    };
    if !response.is_empty_interface() {
      return false;
    }

    if second.resolved_name() != Some("error") {
      debug!(function = %self.name, result = %second, "handler's second result is not 'error'");
    }
    true
  }
}
