//! Generation of the handler registration source.
//!
//! The processor binary links every user function through a generated file
//! in its main package. The file imports the copied function package and
//! registers the handler under the function name when the program starts.

use std::fs;
use std::path::{Path, PathBuf};

use tera::{Context, Tera};
use thiserror::Error;
use tracing::debug;

const TEMPLATE_NAME: &str = "registry.go";

/// File name prefix of generated registration sources.
pub const REGISTRY_FILE_PREFIX: &str = "nuclio_user_functions__";

const REGISTRY_TEMPLATE: &str = r#"// Code generated by procbuild. DO NOT EDIT.

package main

import (
	golangruntimeeventhandler "{{ platform_module }}/pkg/processor/runtime/golang"

	{{ package }} "{{ platform_module }}/{{ user_functions_dir }}/{{ function_name }}"
)

func init() {
	golangruntimeeventhandler.EventHandlers.Add("{{ function_name }}", {{ package }}.{{ handler }})
}
"#;

#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("failed to render registry template for function '{function}': {source}")]
  Render {
    function: String,
    #[source]
    source: tera::Error,
  },

  #[error("failed to write registry file {}: {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Inputs of the registration source.
#[derive(Debug, Clone)]
pub struct RegistryEntry<'a> {
  pub function_name: &'a str,
  pub package: &'a str,
  pub handler: &'a str,
  /// Go module path of the platform source tree.
  pub platform_module: &'a str,
  /// Directory of user functions relative to the platform root, `/`-separated.
  pub user_functions_dir: &'a str,
}

/// File name of the registration source for `function_name`.
pub fn registry_file_name(function_name: &str) -> String {
  format!("{}{}.go", REGISTRY_FILE_PREFIX, function_name.to_lowercase())
}

pub fn render_registry(entry: &RegistryEntry<'_>) -> Result<String, TemplateError> {
  let render_err = |source| TemplateError::Render {
    function: entry.function_name.to_string(),
    source,
  };

  let mut tera = Tera::default();
  tera.add_raw_template(TEMPLATE_NAME, REGISTRY_TEMPLATE).map_err(render_err)?;

  let mut context = Context::new();
  context.insert("function_name", entry.function_name);
  context.insert("package", entry.package);
  context.insert("handler", entry.handler);
  context.insert("platform_module", entry.platform_module);
  context.insert("user_functions_dir", entry.user_functions_dir);

  tera.render(TEMPLATE_NAME, &context).map_err(render_err)
}

/// Render the registration source and write it into `dir`. Returns the written path.
pub fn write_registry(dir: &Path, entry: &RegistryEntry<'_>) -> Result<PathBuf, TemplateError> {
  let rendered = render_registry(entry)?;
  let path = dir.join(registry_file_name(entry.function_name));

  debug!(path = %path.display(), handler = entry.handler, "writing registry file");
  fs::write(&path, rendered).map_err(|source| TemplateError::Write {
    path: path.clone(),
    source,
  })?;

  Ok(path)
}
