//! Fixed names shared across the build pipeline.
//!
//! These are the defaults; the orchestrator and workspace builder take them
//! through `OrchestratorConfig` and `WorkspaceLayout` so tests can override them.

pub const APP_NAME: &str = "procbuild";

/// Base image used for the output image when no build descriptor overrides it.
pub const DEFAULT_BUILD_IMAGE: &str = "alpine";

/// Function descriptor, also the runtime descriptor copied into the output image.
pub const FUNCTION_DESCRIPTOR_FILE: &str = "processor.yaml";

/// Optional build descriptor next to the function descriptor.
pub const BUILD_DESCRIPTOR_FILE: &str = "build.yaml";

/// OS package list consumed by the packages-capable Dockerfile.
pub const DEPS_FILE: &str = ".deps";

/// Default platform source repository.
pub const DEFAULT_PLATFORM_URL: &str = "https://github.com/nuclio/nuclio.git";

/// Go import path of the platform source tree.
pub const PLATFORM_MODULE: &str = "github.com/nuclio/nuclio";

/// Prefix of synthesized output names.
pub const OUTPUT_NAME_PREFIX: &str = "nuclio_processor";

/// Name of the compiled binary inside the workspace and the output image context.
pub const BINARY_NAME: &str = "processor";

pub const ONBUILD_IMAGE: &str = "nuclio/nuclio:onbuild";
pub const BUILDER_IMAGE: &str = "nuclio/builder-output";
