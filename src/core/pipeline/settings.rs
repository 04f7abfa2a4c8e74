//! Values the pipeline builders read from the overlay, with the stock
//! AlphaFold defaults for anything the overlay does not set.

use heck::ToShoutySnakeCase;

use crate::error::{Error, Result};
use crate::overlay::{self, EnvironmentOverlay, OverlayLimits, PREDICT_KEYS, RELAX_KEYS};

use super::dsl::ContainerResources;

pub const NFS_MOUNT_POINT: &str = "NFS_MOUNT_POINT";

/// Relative paths of the reference databases under the NFS mount point,
/// keyed by the name the components look them up with.
pub const REFERENCE_DATABASES: [(&str, &str, &str); 10] = [
    ("uniref90", "UNIREF90_PATH", "uniref90/uniref90.fasta"),
    ("mgnify", "MGNIFY_PATH", "mgnify/mgy_clusters_2022_05.fa"),
    (
        "bfd",
        "BFD_PATH",
        "bfd/bfd_metaclust_clu_complete_id30_c90_final_seq.sorted_opt",
    ),
    (
        "small_bfd",
        "SMALL_BFD_PATH",
        "small_bfd/bfd-first_non_consensus_sequences.fasta",
    ),
    ("uniref30", "UNIREF30_PATH", "uniref30/UniRef30_2021_03"),
    ("pdb70", "PDB70_PATH", "pdb70/pdb70"),
    ("pdb_mmcif", "PDB_MMCIF_PATH", "pdb_mmcif/mmcif_files"),
    ("pdb_obsolete", "PDB_OBSOLETE_PATH", "pdb_mmcif/obsolete.dat"),
    ("pdb_seqres", "PDB_SEQRES_PATH", "pdb_seqres/pdb_seqres.txt"),
    ("uniprot", "UNIPROT_PATH", "uniprot/uniprot.fasta"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSpec {
    pub machine_type: String,
    pub accelerator_type: Option<String>,
    pub accelerator_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub components_image: String,
    pub nfs_server: String,
    pub nfs_path: String,
    pub nfs_mount_point: String,
    pub network: String,
    pub model_params_location: String,
    /// `(metadata key, relative path)` per reference database.
    pub reference_databases: Vec<(String, String)>,
    pub uniref_max_hits: i64,
    pub mgnify_max_hits: i64,
    pub data_pipeline: MachineSpec,
    pub jackhmmer: MachineSpec,
    pub hhsearch: MachineSpec,
    pub hhblits: MachineSpec,
    pub predict: MachineSpec,
    pub relax: MachineSpec,
    pub parallelism: u32,
    pub xla_python_client_mem_fraction: String,
    pub tf_force_unified_memory: String,
    pub predict_resources: Option<ContainerResources>,
    pub relax_resources: Option<ContainerResources>,
}

impl PipelineSettings {
    pub fn from_overlay(vars: &EnvironmentOverlay) -> Result<Self> {
        let reference_databases = REFERENCE_DATABASES
            .iter()
            .map(|(name, key, default)| (name.to_string(), or_default(vars, key, default)))
            .collect();

        let predict_resources = to_resources(vars.stage_limits(&PREDICT_KEYS), "predict")?;
        let relax_resources = to_resources(vars.stage_limits(&RELAX_KEYS), "relax")?;

        Ok(Self {
            components_image: required(vars, overlay::ALPHAFOLD_COMPONENTS_IMAGE)?,
            nfs_server: required(vars, overlay::NFS_SERVER)?,
            nfs_path: required(vars, overlay::NFS_PATH)?,
            nfs_mount_point: or_default(vars, NFS_MOUNT_POINT, "/mnt/nfs/alphafold"),
            network: required(vars, overlay::NETWORK)?,
            model_params_location: required(vars, overlay::MODEL_PARAMS_GCS_LOCATION)?,
            reference_databases,
            uniref_max_hits: parse_number(vars, "UNIREF_MAX_HITS", "10000")?,
            mgnify_max_hits: parse_number(vars, "MGNIFY_MAX_HITS", "501")?,
            data_pipeline: MachineSpec {
                machine_type: or_default(vars, overlay::DATA_PIPELINE_MACHINE_TYPE, "c2-standard-16"),
                accelerator_type: None,
                accelerator_count: None,
            },
            jackhmmer: cpu_machine(vars, "JACKHMMER_MACHINE_TYPE", "n1-standard-8"),
            hhsearch: cpu_machine(vars, "HHSEARCH_MACHINE_TYPE", "c2-standard-16"),
            hhblits: cpu_machine(vars, "HHBLITS_MACHINE_TYPE", "c2-standard-16"),
            predict: gpu_machine(vars, "PREDICT", predict_resources.as_ref())?,
            relax: gpu_machine(vars, "RELAX", relax_resources.as_ref())?,
            parallelism: parse_number(vars, "PARALLELISM", "5")?,
            xla_python_client_mem_fraction: or_default(vars, "XLA_PYTHON_CLIENT_MEM_FRACTION", "4.0"),
            tf_force_unified_memory: or_default(vars, "TF_FORCE_UNIFIED_MEMORY", "1"),
            predict_resources,
            relax_resources,
        })
    }
}

fn required(vars: &EnvironmentOverlay, key: &str) -> Result<String> {
    vars.get(key)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::config_missing_key(key, None))
}

fn or_default(vars: &EnvironmentOverlay, key: &str, default: &str) -> String {
    vars.get(key).unwrap_or(default).to_string()
}

fn parse_number<T: std::str::FromStr>(vars: &EnvironmentOverlay, key: &str, default: &str) -> Result<T> {
    let raw = vars.get(key).unwrap_or(default);
    raw.trim().parse().map_err(|_| {
        Error::config_invalid_value(key, Some(raw.to_string()), format!("{} must be a whole number", key))
    })
}

fn cpu_machine(vars: &EnvironmentOverlay, key: &str, default: &str) -> MachineSpec {
    MachineSpec {
        machine_type: or_default(vars, key, default),
        accelerator_type: None,
        accelerator_count: None,
    }
}

/// Machine for a GPU stage. When the stage carries container limits the
/// accelerator comes from those limits, so the custom job and the container
/// ask for the same GPU.
fn gpu_machine(
    vars: &EnvironmentOverlay,
    stage: &str,
    resources: Option<&ContainerResources>,
) -> Result<MachineSpec> {
    let machine_key = format!("{}_MACHINE_TYPE", stage);

    if let Some(resources) = resources {
        let count: u32 = resources.accelerator_count.trim().parse().map_err(|_| {
            Error::config_invalid_value(
                format!("{}.gpu_limit", stage.to_lowercase()),
                Some(resources.accelerator_count.clone()),
                format!("{} gpu_limit must be a whole number", stage.to_lowercase()),
            )
        })?;
        return Ok(MachineSpec {
            machine_type: vars
                .get(&machine_key)
                .map(str::to_string)
                .unwrap_or_else(|| format!("a2-highgpu-{}g", count)),
            accelerator_type: Some(resources.accelerator_type.to_shouty_snake_case()),
            accelerator_count: Some(count),
        });
    }

    Ok(MachineSpec {
        machine_type: or_default(vars, &machine_key, "g2-standard-8"),
        accelerator_type: Some(or_default(vars, &format!("{}_ACCELERATOR_TYPE", stage), "NVIDIA_L4")),
        accelerator_count: Some(parse_number(vars, &format!("{}_ACCELERATOR_COUNT", stage), "1")?),
    })
}

fn to_resources(limits: Option<OverlayLimits>, stage: &str) -> Result<Option<ContainerResources>> {
    let Some(limits) = limits else {
        return Ok(None);
    };

    let parse = |value: &str, what: &str| -> Result<f64> {
        value.trim().parse::<f64>().map_err(|_| {
            Error::config_invalid_value(
                format!("{}.{}", stage, what),
                Some(value.to_string()),
                format!("{} {} must be numeric", stage, what),
            )
        })
    };

    Ok(Some(ContainerResources {
        cpu_limit: parse(&limits.cpu_limit, "cpu_limit")?,
        memory_limit: parse(&limits.memory_limit, "memory_limit")?,
        accelerator_type: limits.gpu_type,
        accelerator_count: limits.gpu_limit,
    }))
}
