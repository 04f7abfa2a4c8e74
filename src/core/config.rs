//! Build configuration: command-line flags layered over an optional JSON file.
//!
//! Every field is optional at the input layer so the two sources can be
//! merged; required-field checks run on the merged result, before any
//! remote call is made.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::gcp::ProviderConfig;
use crate::gpu::GpuType;
use crate::overlay;
use crate::validation;

pub const DEFAULT_DATA_PIPELINE_MACHINE_TYPE: &str = "c2-standard-16";

/// Unvalidated configuration as read from flags or a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigInput {
    pub project_id: Option<String>,
    pub filestore_instance_id: Option<String>,
    pub filestore_instance_location: Option<String>,
    pub filestore_share: Option<String>,
    pub pipeline_template_path: Option<String>,
    pub pipeline_fun: Option<String>,
    pub alphafold_components_image: Option<String>,
    pub model_params_path: Option<String>,
    pub predict_gpu: Option<String>,
    pub relax_gpu: Option<String>,
    pub data_pipeline_machine_type: Option<String>,

    /// Extra overlay entries (e.g. `NFS_MOUNT_POINT`, `UNIREF_MAX_HITS`).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,

    pub resource_manager_endpoint: Option<String>,
    pub filestore_endpoint: Option<String>,
    pub access_token: Option<String>,
}

impl ConfigInput {
    /// Load a JSON config file. `~` is expanded.
    pub fn load_file(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();
        let raw = fs::read_to_string(Path::new(&expanded)).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read config {}", expanded)))
        })?;
        serde_json::from_str(&raw).map_err(|e| Error::config_invalid_json(expanded, e))
    }

    /// Layer `overrides` on top of `self`. Present override values win;
    /// settings maps are merged key by key.
    pub fn merge(self, overrides: ConfigInput) -> ConfigInput {
        let mut settings = self.settings;
        settings.extend(overrides.settings);

        ConfigInput {
            project_id: overrides.project_id.or(self.project_id),
            filestore_instance_id: overrides.filestore_instance_id.or(self.filestore_instance_id),
            filestore_instance_location: overrides
                .filestore_instance_location
                .or(self.filestore_instance_location),
            filestore_share: overrides.filestore_share.or(self.filestore_share),
            pipeline_template_path: overrides
                .pipeline_template_path
                .or(self.pipeline_template_path),
            pipeline_fun: overrides.pipeline_fun.or(self.pipeline_fun),
            alphafold_components_image: overrides
                .alphafold_components_image
                .or(self.alphafold_components_image),
            model_params_path: overrides.model_params_path.or(self.model_params_path),
            predict_gpu: overrides.predict_gpu.or(self.predict_gpu),
            relax_gpu: overrides.relax_gpu.or(self.relax_gpu),
            data_pipeline_machine_type: overrides
                .data_pipeline_machine_type
                .or(self.data_pipeline_machine_type),
            settings,
            resource_manager_endpoint: overrides
                .resource_manager_endpoint
                .or(self.resource_manager_endpoint),
            filestore_endpoint: overrides.filestore_endpoint.or(self.filestore_endpoint),
            access_token: overrides.access_token.or(self.access_token),
        }
    }
}

/// Validated, immutable configuration for one build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub project_id: String,
    pub filestore_instance_id: String,
    pub filestore_instance_location: String,
    pub filestore_share: String,
    pub pipeline_template_path: PathBuf,
    pub pipeline_fun: String,
    pub alphafold_components_image: String,
    pub model_params_path: String,
    pub predict_gpu: GpuType,
    pub relax_gpu: GpuType,
    pub data_pipeline_machine_type: String,
    pub settings: BTreeMap<String, String>,
    pub provider: ProviderConfig,
}

impl BuildConfig {
    pub fn from_input(input: ConfigInput) -> Result<Self> {
        let missing = validation::missing_fields(&[
            ("project_id", input.project_id.as_deref()),
            ("filestore_instance_id", input.filestore_instance_id.as_deref()),
            (
                "filestore_instance_location",
                input.filestore_instance_location.as_deref(),
            ),
            ("filestore_share", input.filestore_share.as_deref()),
            ("pipeline_template_path", input.pipeline_template_path.as_deref()),
            ("pipeline_fun", input.pipeline_fun.as_deref()),
            (
                "alphafold_components_image",
                input.alphafold_components_image.as_deref(),
            ),
            ("model_params_path", input.model_params_path.as_deref()),
        ]);
        if !missing.is_empty() {
            return Err(Error::validation_missing_argument(missing));
        }

        let predict_gpu = match input.predict_gpu.as_deref() {
            Some(value) => GpuType::parse_field(value, "predict_gpu")?,
            None => GpuType::default(),
        };
        let relax_gpu = match input.relax_gpu.as_deref() {
            Some(value) => GpuType::parse_field(value, "relax_gpu")?,
            None => GpuType::default(),
        };

        for key in input.settings.keys() {
            if overlay::is_reserved_key(key) {
                return Err(Error::config_invalid_value(
                    format!("settings.{}", key),
                    input.settings.get(key).cloned(),
                    format!(
                        "'{}' is derived from flags and cannot be set through settings",
                        key
                    ),
                ));
            }
        }

        let template_path = input.pipeline_template_path.unwrap_or_default();
        let template_path = shellexpand::tilde(template_path.trim()).to_string();

        let mut provider = ProviderConfig::default();
        if let Some(endpoint) = input.resource_manager_endpoint {
            provider.resource_manager_endpoint = endpoint;
        }
        if let Some(endpoint) = input.filestore_endpoint {
            provider.filestore_endpoint = endpoint;
        }
        provider.access_token = input.access_token.filter(|t| !t.trim().is_empty());

        Ok(Self {
            project_id: trimmed(input.project_id),
            filestore_instance_id: trimmed(input.filestore_instance_id),
            filestore_instance_location: trimmed(input.filestore_instance_location),
            filestore_share: trimmed(input.filestore_share),
            pipeline_template_path: PathBuf::from(template_path),
            pipeline_fun: trimmed(input.pipeline_fun),
            alphafold_components_image: trimmed(input.alphafold_components_image),
            model_params_path: trimmed(input.model_params_path),
            predict_gpu,
            relax_gpu,
            data_pipeline_machine_type: input
                .data_pipeline_machine_type
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_DATA_PIPELINE_MACHINE_TYPE.to_string()),
            settings: input.settings,
            provider,
        })
    }
}

fn trimmed(value: Option<String>) -> String {
    value.map(|s| s.trim().to_string()).unwrap_or_default()
}
