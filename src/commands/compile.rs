use clap::Args;

use afpipe::{
    build_template, BuildConfig, BuildReport, ConfigInput, GcpClient, JsonTemplateCompiler,
    PipelineRegistry,
};

use super::CmdResult;

/// Flags keep the snake_case names existing deployment scripts pass;
/// kebab-case spellings are accepted as aliases.
#[derive(Args, Debug, Default)]
pub struct CompileArgs {
    /// Google Cloud project id
    #[arg(long = "project_id", alias = "project-id", value_name = "ID")]
    pub project_id: Option<String>,

    /// Filestore instance id
    #[arg(long = "filestore_instance_id", alias = "filestore-instance-id", value_name = "ID")]
    pub filestore_instance_id: Option<String>,

    /// Filestore instance location (zone or region)
    #[arg(
        long = "filestore_instance_location",
        alias = "filestore-instance-location",
        value_name = "LOCATION"
    )]
    pub filestore_instance_location: Option<String>,

    /// Filestore share exported to the jobs
    #[arg(long = "filestore_share", alias = "filestore-share", value_name = "SHARE")]
    pub filestore_share: Option<String>,

    /// Where to write the compiled template
    #[arg(long = "pipeline_template_path", alias = "pipeline-template-path", value_name = "PATH")]
    pub pipeline_template_path: Option<String>,

    /// Pipeline function, e.g. src.pipelines.alphafold_optimized_monomer.alphafold_monomer_pipeline
    #[arg(long = "pipeline_fun", alias = "pipeline-fun", value_name = "MODULE.FUNCTION")]
    pub pipeline_fun: Option<String>,

    /// Container image for the pipeline components
    #[arg(
        long = "alphafold_components_image",
        alias = "alphafold-components-image",
        value_name = "IMAGE"
    )]
    pub alphafold_components_image: Option<String>,

    /// GCS location of the AlphaFold model parameters
    #[arg(long = "model_params_path", alias = "model-params-path", value_name = "GCS_PATH")]
    pub model_params_path: Option<String>,

    /// GPU for prediction: nvidia-tesla-t4 or nvidia-tesla-a100
    #[arg(long = "predict_gpu", alias = "predict-gpu", value_name = "GPU")]
    pub predict_gpu: Option<String>,

    /// GPU for relaxation: nvidia-tesla-t4 or nvidia-tesla-a100
    #[arg(long = "relax_gpu", alias = "relax-gpu", value_name = "GPU")]
    pub relax_gpu: Option<String>,

    /// Machine type for the data pipeline step
    #[arg(
        long = "data_pipeline_machine_type",
        alias = "data-pipeline-machine-type",
        value_name = "TYPE"
    )]
    pub data_pipeline_machine_type: Option<String>,

    /// JSON config file with the same keys; flags take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// OAuth access token for the Google Cloud APIs
    #[arg(long = "access_token", alias = "access-token", value_name = "TOKEN")]
    pub access_token: Option<String>,
}

impl CompileArgs {
    fn into_input(self) -> (Option<String>, ConfigInput) {
        let input = ConfigInput {
            project_id: self.project_id,
            filestore_instance_id: self.filestore_instance_id,
            filestore_instance_location: self.filestore_instance_location,
            filestore_share: self.filestore_share,
            pipeline_template_path: self.pipeline_template_path,
            pipeline_fun: self.pipeline_fun,
            alphafold_components_image: self.alphafold_components_image,
            model_params_path: self.model_params_path,
            predict_gpu: self.predict_gpu,
            relax_gpu: self.relax_gpu,
            data_pipeline_machine_type: self.data_pipeline_machine_type,
            access_token: self.access_token,
            ..Default::default()
        };
        (self.config, input)
    }
}

pub fn run(args: CompileArgs) -> CmdResult<BuildReport> {
    let (config_path, overrides) = args.into_input();

    let base = match config_path {
        Some(path) => ConfigInput::load_file(&path)?,
        None => ConfigInput::default(),
    };
    let config = BuildConfig::from_input(base.merge(overrides))?;

    let client = GcpClient::new(config.provider.clone())?;
    let report = build_template(
        &config,
        &client,
        &PipelineRegistry::builtin(),
        &JsonTemplateCompiler::new(),
    )?;

    Ok((report, 0))
}
