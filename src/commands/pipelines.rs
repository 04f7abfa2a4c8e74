use clap::Args;
use serde::Serialize;

use afpipe::pipeline::{PipelineRegistry, RegisteredPipeline};

use super::CmdResult;

#[derive(Args)]
pub struct PipelinesArgs {
    /// Only list functions registered under this module
    #[arg(long)]
    module: Option<String>,
}

#[derive(Serialize)]
pub struct PipelinesOutput {
    pub pipelines: Vec<PipelineEntry>,
}

#[derive(Serialize)]
pub struct PipelineEntry {
    /// Value to pass as `--pipeline_fun`
    pub pipeline_fun: String,
    #[serde(flatten)]
    pub registered: RegisteredPipeline,
}

pub fn run(args: PipelinesArgs) -> CmdResult<PipelinesOutput> {
    let registry = PipelineRegistry::builtin();
    let pipelines = registry
        .entries()
        .iter()
        .filter(|e| args.module.as_deref().map_or(true, |m| e.module == m))
        .map(|e| PipelineEntry {
            pipeline_fun: e.dotted_path(),
            registered: e.clone(),
        })
        .collect();

    Ok((PipelinesOutput { pipelines }, 0))
}
