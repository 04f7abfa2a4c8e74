//! Pipeline definitions and the registry that maps dotted function
//! references (`module.function`) to the builders that produce them.

pub mod alphafold;
pub mod components;
pub mod dsl;
pub mod settings;

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::validation;

pub use dsl::PipelineDefinition;
pub use settings::PipelineSettings;

pub type PipelineFn = fn(&PipelineSettings) -> Result<PipelineDefinition>;

const SEQUENTIAL_MODULE: &str = "src.pipelines.alphafold_inference_pipeline_sequential";
const MONOMER_MODULE: &str = "src.pipelines.alphafold_optimized_monomer";
const ALIAS_MODULE: &str = "pipelines";

static DOTTED_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+$").unwrap()
});

#[derive(Clone, Serialize)]
pub struct RegisteredPipeline {
    pub module: String,
    pub function: String,
    pub pipeline_name: String,
    pub description: String,
    #[serde(skip)]
    pub build: PipelineFn,
}

impl std::fmt::Debug for RegisteredPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPipeline")
            .field("module", &self.module)
            .field("function", &self.function)
            .field("pipeline_name", &self.pipeline_name)
            .finish_non_exhaustive()
    }
}

impl RegisteredPipeline {
    pub fn dotted_path(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    entries: Vec<RegisteredPipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the AlphaFold pipelines, under their source module paths
    /// and under the short `pipelines` module.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for module in [SEQUENTIAL_MODULE, ALIAS_MODULE] {
            registry.register(
                module,
                "alphafold_inference_pipeline_seq",
                alphafold::SEQUENTIAL_NAME,
                alphafold::SEQUENTIAL_DESCRIPTION,
                alphafold::alphafold_inference_pipeline_seq,
            );
        }
        for module in [MONOMER_MODULE, ALIAS_MODULE] {
            registry.register(
                module,
                "alphafold_monomer_pipeline",
                alphafold::MONOMER_NAME,
                alphafold::MONOMER_DESCRIPTION,
                alphafold::alphafold_monomer_pipeline,
            );
        }
        registry
    }

    pub fn register(
        &mut self,
        module: &str,
        function: &str,
        pipeline_name: &str,
        description: &str,
        build: PipelineFn,
    ) {
        self.entries.retain(|e| !(e.module == module && e.function == function));
        self.entries.push(RegisteredPipeline {
            module: module.to_string(),
            function: function.to_string(),
            pipeline_name: pipeline_name.to_string(),
            description: description.to_string(),
            build,
        });
    }

    pub fn entries(&self) -> &[RegisteredPipeline] {
        &self.entries
    }

    fn modules(&self) -> Vec<String> {
        let mut modules: Vec<String> = self.entries.iter().map(|e| e.module.clone()).collect();
        modules.sort();
        modules.dedup();
        modules
    }

    fn functions_in(&self, module: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.module == module)
            .map(|e| e.function.clone())
            .collect()
    }
}

/// Resolve `module.submodule.function` to a registered pipeline builder.
///
/// The path is split on its last `.`; the module part must be registered and
/// must export the function part.
pub fn resolve_callable<'a>(
    registry: &'a PipelineRegistry,
    dotted_path: &str,
) -> Result<&'a RegisteredPipeline> {
    let path = validation::require_non_empty(
        dotted_path,
        "pipeline_fun",
        "Pipeline function reference is empty",
    )?;

    let (module, function) = path
        .rsplit_once('.')
        .filter(|(m, f)| !m.is_empty() && !f.is_empty())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                "pipeline_fun",
                format!(
                    "Invalid pipeline function reference '{}': expected '<module>.<function>'",
                    path
                ),
                Some(path.to_string()),
                None,
            )
        })?;

    if !DOTTED_IDENTIFIER.is_match(path) {
        return Err(Error::validation_invalid_argument(
            "pipeline_fun",
            format!(
                "Invalid pipeline function reference '{}': each segment must be an identifier",
                path
            ),
            Some(path.to_string()),
            None,
        ));
    }

    let functions = registry.functions_in(module);
    if functions.is_empty() {
        return Err(Error::pipeline_module_not_found(module, registry.modules()));
    }

    registry
        .entries
        .iter()
        .find(|e| e.module == module && e.function == function)
        .ok_or_else(|| Error::pipeline_function_not_found(path, functions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn make_pipeline(_settings: &PipelineSettings) -> Result<PipelineDefinition> {
        Ok(PipelineDefinition::new("made", "test pipeline"))
    }

    #[test]
    fn resolves_function_from_module() {
        let mut registry = PipelineRegistry::new();
        registry.register("pkg.mod", "make_pipeline", "made", "test", make_pipeline);

        let entry = resolve_callable(&registry, "pkg.mod.make_pipeline").unwrap();
        assert_eq!(entry.module, "pkg.mod");
        assert_eq!(entry.function, "make_pipeline");
        assert_eq!(entry.dotted_path(), "pkg.mod.make_pipeline");
    }

    #[test]
    fn path_without_dot_fails_fast() {
        let registry = PipelineRegistry::builtin();
        let err = resolve_callable(&registry, "alphafold_monomer_pipeline").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
        assert!(err.message.contains("expected '<module>.<function>'"));
    }

    #[test]
    fn trailing_dot_fails_fast() {
        let registry = PipelineRegistry::builtin();
        let err = resolve_callable(&registry, "pipelines.").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn non_identifier_segment_rejected() {
        let registry = PipelineRegistry::builtin();
        let err = resolve_callable(&registry, "pipelines.alpha-fold").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn identifier_pattern_accepts_nested_modules() {
        assert!(DOTTED_IDENTIFIER.is_match("src.pipelines.alphafold_optimized_monomer.f"));
        assert!(DOTTED_IDENTIFIER.is_match("_private.fn_1"));
        assert!(!DOTTED_IDENTIFIER.is_match("pkg.1mod.f"));
        assert!(!DOTTED_IDENTIFIER.is_match("pkg..f"));
    }

    #[test]
    fn unknown_module_lists_modules() {
        let registry = PipelineRegistry::builtin();
        let err = resolve_callable(&registry, "src.nope.alphafold_monomer_pipeline").unwrap_err();
        assert_eq!(err.code, ErrorCode::PipelineModuleNotFound);
        assert_eq!(err.details["id"], "src.nope");
        assert!(err.details["available"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m == "pipelines"));
    }

    #[test]
    fn unknown_function_lists_module_functions() {
        let registry = PipelineRegistry::builtin();
        let err = resolve_callable(&registry, "src.pipelines.alphafold_optimized_monomer.nope")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PipelineFunctionNotFound);
        assert_eq!(
            err.details["available"],
            serde_json::json!(["alphafold_monomer_pipeline"])
        );
    }

    #[test]
    fn builtin_registers_source_paths_and_aliases() {
        let registry = PipelineRegistry::builtin();
        let seq = resolve_callable(
            &registry,
            "src.pipelines.alphafold_inference_pipeline_sequential.alphafold_inference_pipeline_seq",
        )
        .unwrap();
        assert_eq!(seq.pipeline_name, "alphafold-inference-pipeline");

        let alias = resolve_callable(&registry, "pipelines.alphafold_monomer_pipeline").unwrap();
        assert_eq!(alias.pipeline_name, "alphafold-monomer-optimized");
        assert_eq!(registry.entries().len(), 4);
    }

    #[test]
    fn register_replaces_existing_entry() {
        let mut registry = PipelineRegistry::new();
        registry.register("pkg.mod", "make_pipeline", "first", "", make_pipeline);
        registry.register("pkg.mod", "make_pipeline", "second", "", make_pipeline);
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].pipeline_name, "second");
    }
}
