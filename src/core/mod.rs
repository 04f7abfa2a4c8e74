// Public modules
pub mod builder;
pub mod compiler;
pub mod config;
pub mod error;
pub mod gcp;
pub mod gpu;
pub mod network;
pub mod overlay;
pub mod pipeline;

// Internal modules - not part of public API
pub(crate) mod validation;

// Re-export common types for convenience
pub use builder::{build_template, BuildReport};
pub use compiler::{JsonTemplateCompiler, TemplateCompiler};
pub use config::{BuildConfig, ConfigInput};
pub use error::{Error, ErrorCode, Result};
pub use gcp::{CloudProvider, FilestoreInstance, GcpClient};
pub use gpu::GpuType;
pub use network::{resolve_network_info, NetworkInfo};
pub use overlay::{build_environment_overlay, EnvironmentOverlay};
pub use pipeline::{resolve_callable, PipelineDefinition, PipelineRegistry};
