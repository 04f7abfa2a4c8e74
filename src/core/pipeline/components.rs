//! Component specs for the AlphaFold steps. Every component runs from the
//! same components image.

use super::dsl::{ArtifactType, ComponentSpec, CustomJobSpec, NfsMount, ParameterType};
use super::settings::{MachineSpec, PipelineSettings};

use ArtifactType::Artifact;
use ParameterType::{Boolean, Integer, List, String as Str};

pub fn configure_run(image: &str) -> ComponentSpec {
    ComponentSpec::new("configure_run", image)
        .input("sequence_path", Str)
        .input("model_preset", Str)
        .optional_input("random_seed", Integer)
        .optional_input("num_multimer_predictions_per_model", Integer)
        .output_artifact("sequence", Artifact)
        .output("sequence_path", Str)
        .output("model_runners", List)
        .output("run_multimer_system", Boolean)
        .output("num_ensemble", Integer)
}

pub fn data_pipeline(image: &str) -> ComponentSpec {
    as_custom_job(
        ComponentSpec::new("data_pipeline", image)
            .input_artifact("sequence", Artifact)
            .input_artifact("ref_databases", Artifact)
            .input("run_multimer_system", Boolean)
            .input("use_small_bfd", Boolean)
            .input("max_template_date", Str)
            .output_artifact("msas", Artifact)
            .output_artifact("features", Artifact),
    )
}

pub fn jackhmmer(image: &str) -> ComponentSpec {
    as_custom_job(
        ComponentSpec::new("jackhmmer", image)
            .input_artifact("sequence", Artifact)
            .input_artifact("ref_databases", Artifact)
            .input("database", Str)
            .optional_input("n_cpu", Integer)
            .optional_input("maxseq", Integer)
            .output_artifact("msa", Artifact),
    )
}

pub fn hhblits(image: &str) -> ComponentSpec {
    as_custom_job(
        ComponentSpec::new("hhblits", image)
            .input_artifact("sequence", Artifact)
            .input_artifact("ref_databases", Artifact)
            .input("databases", List)
            .optional_input("n_cpu", Integer)
            .optional_input("maxseq", Integer)
            .output_artifact("msa", Artifact),
    )
}

pub fn hhsearch(image: &str) -> ComponentSpec {
    as_custom_job(
        ComponentSpec::new("hhsearch", image)
            .input_artifact("sequence", Artifact)
            .input_artifact("ref_databases", Artifact)
            .input_artifact("msa", Artifact)
            .input("template_dbs", List)
            .input("mmcif_db", Str)
            .input("obsolete_db", Str)
            .input("max_template_date", Str)
            .optional_input("max_template_hits", Integer)
            .optional_input("maxseq", Integer)
            .output_artifact("template_hits", Artifact)
            .output_artifact("template_features", Artifact),
    )
}

pub fn aggregate_features(image: &str) -> ComponentSpec {
    ComponentSpec::new("aggregate_features", image)
        .input_artifact("sequence", Artifact)
        .input_artifact("msa1", Artifact)
        .input_artifact("msa2", Artifact)
        .input_artifact("msa3", Artifact)
        .input_artifact("msa4", Artifact)
        .input_artifact("template_features", Artifact)
        .output_artifact("features", Artifact)
}

pub fn predict(image: &str) -> ComponentSpec {
    as_custom_job(
        ComponentSpec::new("predict", image)
            .input_artifact("model_features", Artifact)
            .input_artifact("model_params", Artifact)
            .input("model_name", Str)
            .input("prediction_index", Integer)
            .input("num_ensemble", Integer)
            .input("run_multimer_system", Boolean)
            .input("random_seed", Integer)
            .input("tf_force_unified_memory", Str)
            .input("xla_python_client_mem_fraction", Str)
            .output_artifact("raw_prediction", Artifact)
            .output_artifact("unrelaxed_protein", Artifact),
    )
}

pub fn relax(image: &str) -> ComponentSpec {
    as_custom_job(
        ComponentSpec::new("relax", image)
            .input_artifact("unrelaxed_protein", Artifact)
            .optional_input("max_iterations", Integer)
            .optional_input("tolerance", ParameterType::Double)
            .optional_input("stiffness", ParameterType::Double)
            .optional_input("exclude_residues", List)
            .optional_input("max_outer_iterations", Integer)
            .optional_input("use_gpu", Boolean)
            .optional_input("tf_force_unified_memory", Str)
            .optional_input("xla_python_client_mem_fraction", Str)
            .output_artifact("relaxed_protein", Artifact),
    )
}

pub fn predict_relax(image: &str) -> ComponentSpec {
    as_custom_job(
        ComponentSpec::new("predict_relax", image)
            .input_artifact("model_features", Artifact)
            .input_artifact("model_params", Artifact)
            .input("prediction_runners", List)
            .input("num_ensemble", Integer)
            .input("run_multimer_system", Boolean)
            .input("is_run_relax", Str)
            .input("tf_force_unified_memory", Str)
            .input("xla_python_client_mem_fraction", Str)
            .output_artifact("raw_predictions", Artifact)
            .output_artifact("unrelaxed_proteins", Artifact)
            .output_artifact("relaxed_proteins", Artifact),
    )
}

/// Custom-job wrapped components also take the project and region the job
/// is launched in.
fn as_custom_job(component: ComponentSpec) -> ComponentSpec {
    component.input("project", Str).input("location", Str)
}

/// Custom job on the shared Filestore share, peered into the Filestore VPC.
pub fn nfs_job(display_name: &str, machine: &MachineSpec, settings: &PipelineSettings) -> CustomJobSpec {
    CustomJobSpec {
        display_name: display_name.to_string(),
        machine_type: machine.machine_type.clone(),
        accelerator_type: machine.accelerator_type.clone(),
        accelerator_count: machine.accelerator_count,
        nfs_mounts: vec![NfsMount {
            server: settings.nfs_server.clone(),
            path: settings.nfs_path.clone(),
            mount_point: settings.nfs_mount_point.clone(),
        }],
        network: Some(settings.network.clone()),
    }
}

/// Custom job with no NFS mount (prediction and relaxation stages).
pub fn gpu_job(display_name: &str, machine: &MachineSpec) -> CustomJobSpec {
    CustomJobSpec {
        display_name: display_name.to_string(),
        machine_type: machine.machine_type.clone(),
        accelerator_type: machine.accelerator_type.clone(),
        accelerator_count: machine.accelerator_count,
        nfs_mounts: Vec::new(),
        network: None,
    }
}
