mod build;

pub use build::{BuildArgs, cmd_build};
