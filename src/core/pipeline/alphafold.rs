//! The AlphaFold inference pipelines shipped in the registry.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::Result;

use super::components::{self, gpu_job, nfs_job};
use super::dsl::{
    ArtifactType, Binding, ImporterSpec, ParameterType, PipelineDefinition, Task, IMPORTER_OUTPUT,
};
use super::settings::PipelineSettings;

pub const SEQUENTIAL_NAME: &str = "alphafold-inference-pipeline";
pub const SEQUENTIAL_DESCRIPTION: &str =
    "AlphaFold inference using original data pipeline and sequential prediction and relaxation.";

pub const MONOMER_NAME: &str = "alphafold-monomer-optimized";
pub const MONOMER_DESCRIPTION: &str = "AlphaFold monomer inference using parallized MSA search.";

/// Parameter shared by both pipelines that gates relaxation.
const RUN_RELAX: &str = "relax";

fn model_parameters(settings: &PipelineSettings) -> Task {
    Task::importer(
        "Model parameters",
        ImporterSpec {
            artifact_uri: settings.model_params_location.clone(),
            artifact_type: ArtifactType::Artifact,
            reimport: true,
            metadata: BTreeMap::new(),
        },
    )
}

fn reference_databases(settings: &PipelineSettings) -> Task {
    let metadata = settings
        .reference_databases
        .iter()
        .map(|(name, path)| (name.clone(), Value::String(path.clone())))
        .collect();

    Task::importer(
        "Reference databases",
        ImporterSpec {
            artifact_uri: settings.nfs_mount_point.clone(),
            artifact_type: ArtifactType::Dataset,
            reimport: false,
            metadata,
        },
    )
}

fn with_job_location(task: Task) -> Task {
    task.arg("project", Binding::param("project"))
        .arg("location", Binding::param("region"))
}

/// Original data pipeline followed by one job that predicts and relaxes
/// every model in sequence.
pub fn alphafold_inference_pipeline_seq(settings: &PipelineSettings) -> Result<PipelineDefinition> {
    let image = settings.components_image.as_str();

    let mut pipeline = PipelineDefinition::new(SEQUENTIAL_NAME, SEQUENTIAL_DESCRIPTION)
        .parameter("sequence_path", ParameterType::String, None)
        .parameter("project", ParameterType::String, None)
        .parameter("region", ParameterType::String, None)
        .parameter("max_template_date", ParameterType::String, None)
        .parameter("model_preset", ParameterType::String, Some(json!("monomer")))
        .parameter("use_small_bfd", ParameterType::Boolean, Some(json!(true)))
        .parameter(
            "num_multimer_predictions_per_model",
            ParameterType::Integer,
            Some(json!(5)),
        )
        .parameter("is_run_relax", ParameterType::String, Some(json!(RUN_RELAX)));

    let run_config = pipeline.add_task(
        Task::container("Configure Pipeline Run", components::configure_run(image))
            .arg("sequence_path", Binding::param("sequence_path"))
            .arg("model_preset", Binding::param("model_preset"))
            .arg(
                "num_multimer_predictions_per_model",
                Binding::param("num_multimer_predictions_per_model"),
            ),
    )?;
    let model_params = pipeline.add_task(model_parameters(settings))?;
    let ref_dbs = pipeline.add_task(reference_databases(settings))?;

    let features = pipeline.add_task(
        with_job_location(Task::container(
            "Prepare Features",
            components::data_pipeline(image),
        ))
        .arg("ref_databases", Binding::output(&ref_dbs, IMPORTER_OUTPUT))
        .arg("sequence", Binding::output(&run_config, "sequence"))
        .arg("max_template_date", Binding::param("max_template_date"))
        .arg(
            "run_multimer_system",
            Binding::output(&run_config, "run_multimer_system"),
        )
        .arg("use_small_bfd", Binding::param("use_small_bfd"))
        .custom_job(nfs_job("Data Pipeline", &settings.data_pipeline, settings)),
    )?;

    pipeline.add_task(
        with_job_location(Task::container(
            "Predict/Relax",
            components::predict_relax(image),
        ))
        .arg("model_features", Binding::output(&features, "features"))
        .arg("model_params", Binding::output(&model_params, IMPORTER_OUTPUT))
        .arg(
            "prediction_runners",
            Binding::output(&run_config, "model_runners"),
        )
        .arg(
            "run_multimer_system",
            Binding::output(&run_config, "run_multimer_system"),
        )
        .arg("num_ensemble", Binding::output(&run_config, "num_ensemble"))
        .arg("is_run_relax", Binding::param("is_run_relax"))
        .arg(
            "tf_force_unified_memory",
            Binding::constant(settings.tf_force_unified_memory.as_str()),
        )
        .arg(
            "xla_python_client_mem_fraction",
            Binding::constant(settings.xla_python_client_mem_fraction.as_str()),
        )
        .custom_job(gpu_job("Predict/Relax", &settings.predict))
        .resources(settings.predict_resources.clone()),
    )?;

    Ok(pipeline)
}

/// Monomer pipeline with the MSA searches split into parallel jobs and one
/// predict (and optional relax) job per model runner.
pub fn alphafold_monomer_pipeline(settings: &PipelineSettings) -> Result<PipelineDefinition> {
    let image = settings.components_image.as_str();

    let mut pipeline = PipelineDefinition::new(MONOMER_NAME, MONOMER_DESCRIPTION)
        .parameter("sequence_path", ParameterType::String, None)
        .parameter("project", ParameterType::String, None)
        .parameter("region", ParameterType::String, None)
        .parameter("max_template_date", ParameterType::String, None)
        .parameter(
            "uniref_max_hits",
            ParameterType::Integer,
            Some(json!(settings.uniref_max_hits)),
        )
        .parameter(
            "mgnify_max_hits",
            ParameterType::Integer,
            Some(json!(settings.mgnify_max_hits)),
        )
        .parameter("is_run_relax", ParameterType::String, Some(json!(RUN_RELAX)));

    let run_config = pipeline.add_task(
        Task::container("Configure Pipeline Run", components::configure_run(image))
            .arg("sequence_path", Binding::param("sequence_path"))
            .arg("model_preset", Binding::constant("monomer")),
    )?;
    let model_params = pipeline.add_task(model_parameters(settings))?;
    let ref_dbs = pipeline.add_task(reference_databases(settings))?;

    let search_input = |task: Task| {
        with_job_location(task)
            .arg("ref_databases", Binding::output(&ref_dbs, IMPORTER_OUTPUT))
            .arg("sequence", Binding::output(&run_config, "sequence"))
    };

    let search_uniref = pipeline.add_task(
        search_input(Task::container("Search Uniref", components::jackhmmer(image)))
            .arg("database", Binding::constant("uniref90"))
            .arg("maxseq", Binding::param("uniref_max_hits"))
            .custom_job(nfs_job("Jackhmmer", &settings.jackhmmer, settings)),
    )?;

    let search_mgnify = pipeline.add_task(
        search_input(Task::container("Search Mgnify", components::jackhmmer(image)))
            .arg("database", Binding::constant("mgnify"))
            .arg("maxseq", Binding::param("mgnify_max_hits"))
            .custom_job(nfs_job("Jackhmmer", &settings.jackhmmer, settings)),
    )?;

    let search_uniclust = pipeline.add_task(
        search_input(Task::container("Search Uniclust", components::hhblits(image)))
            .arg("databases", Binding::constant(json!(["uniref30"])))
            .custom_job(nfs_job("HHblits", &settings.hhblits, settings)),
    )?;

    let search_bfd = pipeline.add_task(
        search_input(Task::container("Search BFD", components::hhblits(image)))
            .arg("databases", Binding::constant(json!(["bfd"])))
            .custom_job(nfs_job("HHblits", &settings.hhblits, settings)),
    )?;

    let search_pdb = pipeline.add_task(
        search_input(Task::container("Search Pdb", components::hhsearch(image)))
            .arg("template_dbs", Binding::constant(json!(["pdb70"])))
            .arg("mmcif_db", Binding::constant("pdb_mmcif"))
            .arg("obsolete_db", Binding::constant("pdb_obsolete"))
            .arg("max_template_date", Binding::param("max_template_date"))
            .arg("msa", Binding::output(&search_uniref, "msa"))
            .custom_job(nfs_job("HHsearch", &settings.hhsearch, settings)),
    )?;

    let features = pipeline.add_task(
        Task::container("Aggregate features", components::aggregate_features(image))
            .arg("sequence", Binding::output(&run_config, "sequence"))
            .arg("msa1", Binding::output(&search_uniref, "msa"))
            .arg("msa2", Binding::output(&search_mgnify, "msa"))
            .arg("msa3", Binding::output(&search_bfd, "msa"))
            .arg("msa4", Binding::output(&search_uniclust, "msa"))
            .arg(
                "template_features",
                Binding::output(&search_pdb, "template_features"),
            ),
    )?;

    let prediction_loop = pipeline.add_loop(
        Binding::output(&run_config, "model_runners"),
        settings.parallelism,
    )?;

    let predict = pipeline.add_task(
        with_job_location(Task::container("Predict", components::predict(image)))
            .in_loop(&prediction_loop)
            .arg("model_features", Binding::output(&features, "features"))
            .arg("model_params", Binding::output(&model_params, IMPORTER_OUTPUT))
            .arg("model_name", Binding::item("model_name"))
            .arg("prediction_index", Binding::item("prediction_index"))
            .arg("random_seed", Binding::item("random_seed"))
            .arg(
                "run_multimer_system",
                Binding::output(&run_config, "run_multimer_system"),
            )
            .arg("num_ensemble", Binding::output(&run_config, "num_ensemble"))
            .arg(
                "tf_force_unified_memory",
                Binding::constant(settings.tf_force_unified_memory.as_str()),
            )
            .arg(
                "xla_python_client_mem_fraction",
                Binding::constant(settings.xla_python_client_mem_fraction.as_str()),
            )
            .custom_job(gpu_job("Predict", &settings.predict))
            .resources(settings.predict_resources.clone()),
    )?;

    pipeline.add_task(
        with_job_location(Task::container("Relax protein", components::relax(image)))
            .in_loop(&prediction_loop)
            .when_equals("is_run_relax", RUN_RELAX)
            .arg(
                "unrelaxed_protein",
                Binding::output(&predict, "unrelaxed_protein"),
            )
            .arg("use_gpu", Binding::constant(true))
            .arg(
                "tf_force_unified_memory",
                Binding::constant(settings.tf_force_unified_memory.as_str()),
            )
            .arg(
                "xla_python_client_mem_fraction",
                Binding::constant(settings.xla_python_client_mem_fraction.as_str()),
            )
            .custom_job(gpu_job("Relax", &settings.relax))
            .resources(settings.relax_resources.clone()),
    )?;

    Ok(pipeline)
}
