//! The environment overlay: variables derived from configuration and the
//! resolved network, handed explicitly to the pipeline builder.
//!
//! The process environment is never touched. Each build starts from an empty
//! overlay, so nothing carries over between runs.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::BuildConfig;
use crate::gpu::{GpuType, StageLimits};
use crate::network::NetworkInfo;

pub const ALPHAFOLD_COMPONENTS_IMAGE: &str = "ALPHAFOLD_COMPONENTS_IMAGE";
pub const NFS_SERVER: &str = "NFS_SERVER";
pub const NFS_PATH: &str = "NFS_PATH";
pub const NETWORK: &str = "NETWORK";
pub const MODEL_PARAMS_GCS_LOCATION: &str = "MODEL_PARAMS_GCS_LOCATION";
pub const DATA_PIPELINE_MACHINE_TYPE: &str = "DATA_PIPELINE_MACHINE_TYPE";

/// Variable names for one stage's GPU-tier limits.
#[derive(Debug, Clone, Copy)]
pub struct StageKeys {
    pub memory_limit: &'static str,
    pub cpu_limit: &'static str,
    pub gpu_limit: &'static str,
    pub gpu_type: &'static str,
}

pub const PREDICT_KEYS: StageKeys = StageKeys {
    memory_limit: "MEMORY_LIMIT",
    cpu_limit: "CPU_LIMIT",
    gpu_limit: "GPU_LIMIT",
    gpu_type: "GPU_TYPE",
};

pub const RELAX_KEYS: StageKeys = StageKeys {
    memory_limit: "RELAX_MEMORY_LIMIT",
    cpu_limit: "RELAX_CPU_LIMIT",
    gpu_limit: "RELAX_GPU_LIMIT",
    gpu_type: "RELAX_GPU_TYPE",
};

impl StageKeys {
    fn all(&self) -> [&'static str; 4] {
        [self.memory_limit, self.cpu_limit, self.gpu_limit, self.gpu_type]
    }
}

/// Keys the overlay derives itself; `settings` may not supply them.
pub fn is_reserved_key(key: &str) -> bool {
    [
        ALPHAFOLD_COMPONENTS_IMAGE,
        NFS_SERVER,
        NFS_PATH,
        NETWORK,
        MODEL_PARAMS_GCS_LOCATION,
        DATA_PIPELINE_MACHINE_TYPE,
    ]
    .contains(&key)
        || PREDICT_KEYS.all().contains(&key)
        || RELAX_KEYS.all().contains(&key)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EnvironmentOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvironmentOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Read the limits recorded for a stage, if its GPU tier set them.
    pub fn stage_limits(&self, keys: &StageKeys) -> Option<OverlayLimits> {
        Some(OverlayLimits {
            memory_limit: self.get(keys.memory_limit)?.to_string(),
            cpu_limit: self.get(keys.cpu_limit)?.to_string(),
            gpu_limit: self.get(keys.gpu_limit)?.to_string(),
            gpu_type: self.get(keys.gpu_type)?.to_string(),
        })
    }

    fn apply_stage(&mut self, keys: &StageKeys, gpu: GpuType) {
        // Lower tier leaves the keys absent rather than writing a baseline.
        if let Some(StageLimits {
            memory_limit,
            cpu_limit,
            gpu_limit,
            gpu_type,
        }) = gpu.stage_limits()
        {
            self.set(keys.memory_limit, memory_limit);
            self.set(keys.cpu_limit, cpu_limit);
            self.set(keys.gpu_limit, gpu_limit);
            self.set(keys.gpu_type, gpu_type);
        }
    }
}

/// Stage limits as read back out of an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLimits {
    pub memory_limit: String,
    pub cpu_limit: String,
    pub gpu_limit: String,
    pub gpu_type: String,
}

pub fn build_environment_overlay(config: &BuildConfig, network: &NetworkInfo) -> EnvironmentOverlay {
    let mut overlay = EnvironmentOverlay::new();

    for (key, value) in &config.settings {
        overlay.set(key, value);
    }

    overlay.set(ALPHAFOLD_COMPONENTS_IMAGE, &config.alphafold_components_image);
    overlay.set(NFS_SERVER, &network.ip_address);
    overlay.set(NFS_PATH, &config.filestore_share);
    overlay.set(NETWORK, &network.network);
    overlay.set(MODEL_PARAMS_GCS_LOCATION, &config.model_params_path);
    overlay.set(DATA_PIPELINE_MACHINE_TYPE, &config.data_pipeline_machine_type);

    overlay.apply_stage(&PREDICT_KEYS, config.predict_gpu);
    overlay.apply_stage(&RELAX_KEYS, config.relax_gpu);

    overlay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigInput;

    fn config(predict: &str, relax: &str) -> BuildConfig {
        BuildConfig::from_input(ConfigInput {
            project_id: Some("my-proj".to_string()),
            filestore_instance_id: Some("af".to_string()),
            filestore_instance_location: Some("us-central1-a".to_string()),
            filestore_share: Some("/datasets".to_string()),
            pipeline_template_path: Some("/tmp/out.json".to_string()),
            pipeline_fun: Some("pipelines.alphafold_monomer_pipeline".to_string()),
            alphafold_components_image: Some("gcr.io/my-proj/af-components".to_string()),
            model_params_path: Some("gs://bucket/params".to_string()),
            predict_gpu: Some(predict.to_string()),
            relax_gpu: Some(relax.to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn network() -> NetworkInfo {
        NetworkInfo {
            ip_address: "10.0.0.2".to_string(),
            network: "projects/123456/global/networks/default".to_string(),
        }
    }

    #[test]
    fn a100_predict_sets_four_limits() {
        let overlay = build_environment_overlay(&config("nvidia-tesla-a100", "nvidia-tesla-t4"), &network());
        assert_eq!(overlay.get("MEMORY_LIMIT"), Some("85"));
        assert_eq!(overlay.get("CPU_LIMIT"), Some("12"));
        assert_eq!(overlay.get("GPU_LIMIT"), Some("1"));
        assert_eq!(overlay.get("GPU_TYPE"), Some("nvidia-tesla-a100"));
        for key in RELAX_KEYS.all() {
            assert!(!overlay.contains(key), "{} should be absent", key);
        }
    }

    #[test]
    fn a100_relax_sets_four_relax_limits() {
        let overlay = build_environment_overlay(&config("nvidia-tesla-t4", "nvidia-tesla-a100"), &network());
        assert_eq!(overlay.get("RELAX_MEMORY_LIMIT"), Some("85"));
        assert_eq!(overlay.get("RELAX_CPU_LIMIT"), Some("12"));
        assert_eq!(overlay.get("RELAX_GPU_LIMIT"), Some("1"));
        assert_eq!(overlay.get("RELAX_GPU_TYPE"), Some("nvidia-tesla-a100"));
        for key in PREDICT_KEYS.all() {
            assert!(!overlay.contains(key), "{} should be absent", key);
        }
    }

    #[test]
    fn t4_sets_only_the_six_direct_variables() {
        let overlay = build_environment_overlay(&config("nvidia-tesla-t4", "nvidia-tesla-t4"), &network());
        assert_eq!(overlay.len(), 6);
        assert_eq!(overlay.get(NFS_SERVER), Some("10.0.0.2"));
        assert_eq!(overlay.get(NFS_PATH), Some("/datasets"));
        assert_eq!(
            overlay.get(NETWORK),
            Some("projects/123456/global/networks/default")
        );
        assert_eq!(overlay.get(MODEL_PARAMS_GCS_LOCATION), Some("gs://bucket/params"));
        assert_eq!(overlay.get(DATA_PIPELINE_MACHINE_TYPE), Some("c2-standard-16"));
        assert_eq!(
            overlay.get(ALPHAFOLD_COMPONENTS_IMAGE),
            Some("gcr.io/my-proj/af-components")
        );
        assert!(overlay.stage_limits(&PREDICT_KEYS).is_none());
    }

    #[test]
    fn settings_are_a_base_layer() {
        let mut cfg = config("nvidia-tesla-t4", "nvidia-tesla-t4");
        cfg.settings
            .insert("NFS_MOUNT_POINT".to_string(), "/mnt/custom".to_string());
        let overlay = build_environment_overlay(&cfg, &network());
        assert_eq!(overlay.get("NFS_MOUNT_POINT"), Some("/mnt/custom"));
        assert_eq!(overlay.len(), 7);
    }

    #[test]
    fn reserved_keys_cover_gpu_limits() {
        assert!(is_reserved_key("GPU_TYPE"));
        assert!(is_reserved_key("RELAX_CPU_LIMIT"));
        assert!(is_reserved_key("NFS_SERVER"));
        assert!(!is_reserved_key("NFS_MOUNT_POINT"));
    }
}
