//! procbuild-lib: build nuclio processor images and binaries from function sources
//!
//! A build runs in stages:
//! - `config`: resolve the function and build descriptors into a `FunctionConfig`
//! - `discover`: find the handler functions in the function's Go sources
//! - `workspace`: stage the platform source with the function wired into it
//! - `orchestrate`: run the container image builds and extract the processor binary
//! - `builder`: sequence all of the above and deliver the output
//!
//! Container engines are reached through the `backend::ContainerBackend` trait.

pub mod backend;
pub mod builder;
pub mod cmd;
pub mod config;
pub mod consts;
pub mod discover;
pub mod extract;
pub mod orchestrate;
pub mod util;
pub mod workspace;

pub use builder::{BuildError, BuildOptions, BuildReport, Builder, OutputKind};
