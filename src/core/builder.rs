//! One template build, start to finish.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

use crate::compiler::TemplateCompiler;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::gcp::CloudProvider;
use crate::network::{resolve_network_info, NetworkInfo};
use crate::overlay::{build_environment_overlay, EnvironmentOverlay};
use crate::pipeline::{resolve_callable, PipelineRegistry, PipelineSettings};

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub pipeline_name: String,
    pub pipeline_fun: String,
    pub template_path: PathBuf,
    pub network: NetworkInfo,
    pub overlay: EnvironmentOverlay,
    pub task_count: usize,
    pub template_sha256: String,
}

/// Resolve the Filestore network, build the overlay, look up the pipeline
/// function and compile it to `config.pipeline_template_path`.
///
/// Stops at the first failure. A template written before a later failure
/// is left in place.
pub fn build_template(
    config: &BuildConfig,
    provider: &dyn CloudProvider,
    registry: &PipelineRegistry,
    compiler: &dyn TemplateCompiler,
) -> Result<BuildReport> {
    let network = resolve_network_info(
        provider,
        &config.project_id,
        &config.filestore_instance_id,
        &config.filestore_instance_location,
    )?;
    crate::log_status!("network", "NFS server {} on {}", network.ip_address, network.network);

    let overlay = build_environment_overlay(config, &network);

    let entry = resolve_callable(registry, &config.pipeline_fun)?;
    let settings = PipelineSettings::from_overlay(&overlay)?;
    let pipeline = (entry.build)(&settings)?;
    crate::log_status!(
        "compile",
        "Compiling {} ({} tasks)",
        pipeline.name,
        pipeline.tasks.len()
    );

    compiler.compile(&pipeline, &config.pipeline_template_path)?;
    let template_sha256 = file_sha256(&config.pipeline_template_path)?;
    crate::log_status!("compile", "Wrote {}", config.pipeline_template_path.display());

    Ok(BuildReport {
        pipeline_name: pipeline.name,
        pipeline_fun: entry.dotted_path(),
        template_path: config.pipeline_template_path.clone(),
        network,
        overlay,
        task_count: pipeline.tasks.len(),
        template_sha256,
    })
}

fn file_sha256(path: &std::path::Path) -> Result<String> {
    let content = fs::read(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read template {}", path.display())))
    })?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}
