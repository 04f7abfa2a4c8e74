//! In-memory pipeline definitions: parameters, components, tasks and the
//! bindings between them.
//!
//! Definitions are plain data. `PipelineDefinition::add_task` checks that
//! every binding points at a declared parameter or at an output an earlier
//! task actually produces, so the compiler never sees a dangling reference.
//! Tasks that run once per list item join a loop declared with
//! `PipelineDefinition::add_loop`; every task in one loop shares the same
//! iteration.

use heck::ToKebabCase;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParameterType {
    String,
    Integer,
    Double,
    Boolean,
    List,
    Struct,
}

impl ParameterType {
    pub fn ir_name(&self) -> &'static str {
        match self {
            ParameterType::String => "STRING",
            ParameterType::Integer => "NUMBER_INTEGER",
            ParameterType::Double => "NUMBER_DOUBLE",
            ParameterType::Boolean => "BOOLEAN",
            ParameterType::List => "LIST",
            ParameterType::Struct => "STRUCT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArtifactType {
    Artifact,
    Dataset,
}

impl ArtifactType {
    pub fn schema_title(&self) -> &'static str {
        match self {
            ArtifactType::Artifact => "system.Artifact",
            ArtifactType::Dataset => "system.Dataset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IoKind {
    Parameter(ParameterType),
    Artifact(ArtifactType),
}

/// A pipeline-level input parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterType,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentIo {
    pub name: String,
    pub kind: IoKind,
    pub optional: bool,
}

/// A containerized step: image, entrypoint and typed inputs/outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub inputs: Vec<ComponentIo>,
    pub outputs: Vec<ComponentIo>,
}

impl ComponentSpec {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "kfp.dsl.executor_main".to_string(),
            ],
            args: vec![
                "--executor_input".to_string(),
                "{{$}}".to_string(),
                "--function_to_execute".to_string(),
                name.to_string(),
            ],
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, name: &str, kind: ParameterType) -> Self {
        self.inputs.push(ComponentIo {
            name: name.to_string(),
            kind: IoKind::Parameter(kind),
            optional: false,
        });
        self
    }

    pub fn optional_input(mut self, name: &str, kind: ParameterType) -> Self {
        self.inputs.push(ComponentIo {
            name: name.to_string(),
            kind: IoKind::Parameter(kind),
            optional: true,
        });
        self
    }

    pub fn input_artifact(mut self, name: &str, kind: ArtifactType) -> Self {
        self.inputs.push(ComponentIo {
            name: name.to_string(),
            kind: IoKind::Artifact(kind),
            optional: false,
        });
        self
    }

    pub fn output(mut self, name: &str, kind: ParameterType) -> Self {
        self.outputs.push(ComponentIo {
            name: name.to_string(),
            kind: IoKind::Parameter(kind),
            optional: false,
        });
        self
    }

    pub fn output_artifact(mut self, name: &str, kind: ArtifactType) -> Self {
        self.outputs.push(ComponentIo {
            name: name.to_string(),
            kind: IoKind::Artifact(kind),
            optional: false,
        });
        self
    }

    pub fn input_kind(&self, name: &str) -> Option<IoKind> {
        self.inputs.iter().find(|i| i.name == name).map(|i| i.kind)
    }
}

/// Imports an existing artifact by URI instead of running a container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImporterSpec {
    pub artifact_uri: String,
    pub artifact_type: ArtifactType,
    pub reimport: bool,
    pub metadata: BTreeMap<String, Value>,
}

/// Output key of an importer task.
pub const IMPORTER_OUTPUT: &str = "artifact";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TaskKind {
    Container(ComponentSpec),
    Importer(ImporterSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Binding {
    PipelineParam(String),
    TaskOutput { task: String, output: String },
    Constant(Value),
    LoopItem { field: String },
}

impl Binding {
    pub fn param(name: &str) -> Self {
        Binding::PipelineParam(name.to_string())
    }

    pub fn output(task: &str, output: &str) -> Self {
        Binding::TaskOutput {
            task: task.to_string(),
            output: output.to_string(),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Binding::Constant(value.into())
    }

    pub fn item(field: &str) -> Self {
        Binding::LoopItem {
            field: field.to_string(),
        }
    }
}

/// Per-container limits for GPU-tier stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerResources {
    pub cpu_limit: f64,
    pub memory_limit: f64,
    pub accelerator_type: String,
    pub accelerator_count: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NfsMount {
    pub server: String,
    pub path: String,
    pub mount_point: String,
}

/// Placement of a step as a Vertex AI custom job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomJobSpec {
    pub display_name: String,
    pub machine_type: String,
    pub accelerator_type: Option<String>,
    pub accelerator_count: Option<u32>,
    pub nfs_mounts: Vec<NfsMount>,
    pub network: Option<String>,
}

/// A parallel-for over a list. Tasks placed in the loop run once per item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSpec {
    pub name: String,
    pub items: Binding,
    pub parallelism: u32,
}

/// Run a task only when a pipeline parameter equals a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub param: String,
    pub equals: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub name: String,
    pub display_name: String,
    pub kind: TaskKind,
    pub arguments: BTreeMap<String, Binding>,
    pub resources: Option<ContainerResources>,
    pub custom_job: Option<CustomJobSpec>,
    pub loop_name: Option<String>,
    pub condition: Option<Condition>,
    pub depends_on: Vec<String>,
}

impl Task {
    fn with_kind(display_name: &str, kind: TaskKind) -> Self {
        Self {
            name: display_name.to_kebab_case(),
            display_name: display_name.to_string(),
            kind,
            arguments: BTreeMap::new(),
            resources: None,
            custom_job: None,
            loop_name: None,
            condition: None,
            depends_on: Vec::new(),
        }
    }

    pub fn container(display_name: &str, component: ComponentSpec) -> Self {
        Self::with_kind(display_name, TaskKind::Container(component))
    }

    pub fn importer(display_name: &str, spec: ImporterSpec) -> Self {
        Self::with_kind(display_name, TaskKind::Importer(spec))
    }

    pub fn arg(mut self, name: &str, binding: Binding) -> Self {
        self.arguments.insert(name.to_string(), binding);
        self
    }

    pub fn resources(mut self, resources: Option<ContainerResources>) -> Self {
        self.resources = resources;
        self
    }

    pub fn custom_job(mut self, spec: CustomJobSpec) -> Self {
        self.custom_job = Some(spec);
        self
    }

    /// Run this task inside a loop returned by `PipelineDefinition::add_loop`.
    pub fn in_loop(mut self, loop_name: &str) -> Self {
        self.loop_name = Some(loop_name.to_string());
        self
    }

    pub fn when_equals(mut self, param: &str, value: &str) -> Self {
        self.condition = Some(Condition {
            param: param.to_string(),
            equals: value.to_string(),
        });
        self
    }

    pub fn component(&self) -> Option<&ComponentSpec> {
        match &self.kind {
            TaskKind::Container(component) => Some(component),
            TaskKind::Importer(_) => None,
        }
    }

    /// Kind of one of this task's outputs, if it has it.
    pub fn output_kind(&self, output: &str) -> Option<IoKind> {
        match &self.kind {
            TaskKind::Container(component) => component
                .outputs
                .iter()
                .find(|o| o.name == output)
                .map(|o| o.kind),
            TaskKind::Importer(spec) if output == IMPORTER_OUTPUT => {
                Some(IoKind::Artifact(spec.artifact_type))
            }
            TaskKind::Importer(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub tasks: Vec<Task>,
    pub loops: Vec<LoopSpec>,
}

impl PipelineDefinition {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            tasks: Vec::new(),
            loops: Vec::new(),
        }
    }

    pub fn parameter(mut self, name: &str, kind: ParameterType, default: Option<Value>) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            kind,
            default,
        });
        self
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    pub fn parameter_kind(&self, name: &str) -> Option<ParameterType> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.kind)
    }

    pub fn loop_spec(&self, name: &str) -> Option<&LoopSpec> {
        self.loops.iter().find(|l| l.name == name)
    }

    /// Declare a loop over `items`, run at most `parallelism` iterations at
    /// a time. Returns the loop name to pass to `Task::in_loop`.
    pub fn add_loop(&mut self, items: Binding, parallelism: u32) -> Result<String> {
        let name = format!("for-loop-{}", self.loops.len() + 1);

        match &items {
            Binding::PipelineParam(param) => {
                if !self.has_parameter(param) {
                    return Err(Error::compile_failed(format!(
                        "loop '{}' iterates over undeclared parameter '{}'",
                        name, param
                    )));
                }
            }
            Binding::TaskOutput { task: producer, output } => {
                let upstream = self.task(producer).ok_or_else(|| {
                    Error::compile_failed(format!(
                        "loop '{}' iterates over unknown task '{}'",
                        name, producer
                    ))
                })?;
                if !matches!(upstream.output_kind(output), Some(IoKind::Parameter(_))) {
                    return Err(Error::compile_failed(format!(
                        "loop '{}' iterates over '{}.{}', which is not a list parameter",
                        name, producer, output
                    )));
                }
                if upstream.loop_name.is_some() {
                    return Err(Error::compile_failed(format!(
                        "loop '{}' iterates over '{}.{}' produced inside another loop",
                        name, producer, output
                    )));
                }
            }
            Binding::Constant(value) => {
                if !value.is_array() {
                    return Err(Error::compile_failed(format!(
                        "loop '{}' iterates over a constant that is not a list",
                        name
                    )));
                }
            }
            Binding::LoopItem { .. } => {
                return Err(Error::compile_failed(format!(
                    "loop '{}' cannot iterate over a loop item",
                    name
                )));
            }
        }

        self.loops.push(LoopSpec {
            name: name.clone(),
            items,
            parallelism,
        });
        Ok(name)
    }

    /// Append a task, deriving its dependencies from its bindings. Returns
    /// the task's name for use in downstream bindings.
    pub fn add_task(&mut self, mut task: Task) -> Result<String> {
        if self.task(&task.name).is_some() {
            return Err(Error::compile_failed(format!(
                "duplicate task name '{}' in pipeline '{}'",
                task.name, self.name
            )));
        }

        if let Some(component) = task.component() {
            for arg in task.arguments.keys() {
                if component.input_kind(arg).is_none() {
                    return Err(Error::compile_failed(format!(
                        "task '{}' binds unknown input '{}'",
                        task.name, arg
                    )));
                }
            }
            for input in component.inputs.iter().filter(|i| !i.optional) {
                if !task.arguments.contains_key(&input.name) {
                    return Err(Error::compile_failed(format!(
                        "task '{}' leaves required input '{}' unbound",
                        task.name, input.name
                    )));
                }
            }
        }

        if let Some(loop_name) = &task.loop_name {
            if self.loop_spec(loop_name).is_none() {
                return Err(Error::compile_failed(format!(
                    "task '{}' joins undeclared loop '{}'",
                    task.name, loop_name
                )));
            }
        }

        let mut depends_on = Vec::new();
        for binding in task.arguments.values() {
            match binding {
                Binding::PipelineParam(name) => {
                    if !self.has_parameter(name) {
                        return Err(Error::compile_failed(format!(
                            "task '{}' references undeclared parameter '{}'",
                            task.name, name
                        )));
                    }
                }
                Binding::TaskOutput { task: producer, output } => {
                    let upstream = self.task(producer).ok_or_else(|| {
                        Error::compile_failed(format!(
                            "task '{}' depends on unknown task '{}'",
                            task.name, producer
                        ))
                    })?;
                    if upstream.output_kind(output).is_none() {
                        return Err(Error::compile_failed(format!(
                            "task '{}' has no output '{}'",
                            producer, output
                        )));
                    }
                    if upstream.loop_name.is_some() && upstream.loop_name != task.loop_name {
                        return Err(Error::compile_failed(format!(
                            "task '{}' reads '{}.{}' from outside its loop",
                            task.name, producer, output
                        )));
                    }
                    if !depends_on.contains(producer) {
                        depends_on.push(producer.clone());
                    }
                }
                Binding::LoopItem { .. } => {
                    if task.loop_name.is_none() {
                        return Err(Error::compile_failed(format!(
                            "task '{}' uses a loop item outside a loop",
                            task.name
                        )));
                    }
                }
                Binding::Constant(_) => {}
            }
        }

        if let Some(condition) = &task.condition {
            if !self.has_parameter(&condition.param) {
                return Err(Error::compile_failed(format!(
                    "task '{}' conditions on undeclared parameter '{}'",
                    task.name, condition.param
                )));
            }
        }

        depends_on.sort();
        task.depends_on = depends_on;
        let name = task.name.clone();
        self.tasks.push(task);
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn producer() -> ComponentSpec {
        ComponentSpec::new("configure_run", "img")
            .input("sequence_path", ParameterType::String)
            .output("model_runners", ParameterType::List)
            .output_artifact("sequence", ArtifactType::Artifact)
    }

    fn consumer() -> ComponentSpec {
        ComponentSpec::new("predict", "img")
            .input_artifact("sequence", ArtifactType::Artifact)
            .input("model_name", ParameterType::String)
    }

    fn pipeline() -> PipelineDefinition {
        PipelineDefinition::new("p", "d").parameter("sequence_path", ParameterType::String, None)
    }

    #[test]
    fn task_names_are_kebab_case() {
        let task = Task::container("Configure Pipeline Run", producer());
        assert_eq!(task.name, "configure-pipeline-run");
    }

    fn relax() -> ComponentSpec {
        ComponentSpec::new("relax", "img")
            .input_artifact("unrelaxed_protein", ArtifactType::Artifact)
            .output_artifact("relaxed_protein", ArtifactType::Artifact)
    }

    fn predict_with_output() -> ComponentSpec {
        consumer().output_artifact("unrelaxed_protein", ArtifactType::Artifact)
    }

    #[test]
    fn add_task_derives_dependencies() {
        let mut p = pipeline();
        let first = p
            .add_task(
                Task::container("Configure", producer())
                    .arg("sequence_path", Binding::param("sequence_path")),
            )
            .unwrap();
        let runners = p.add_loop(Binding::output(&first, "model_runners"), 5).unwrap();
        p.add_task(
            Task::container("Predict", consumer())
                .in_loop(&runners)
                .arg("sequence", Binding::output(&first, "sequence"))
                .arg("model_name", Binding::item("model_name")),
        )
        .unwrap();

        assert_eq!(runners, "for-loop-1");
        assert_eq!(p.loop_spec(&runners).unwrap().parallelism, 5);
        assert_eq!(p.task("predict").unwrap().depends_on, vec!["configure".to_string()]);
    }

    #[test]
    fn tasks_in_one_loop_may_chain() {
        let mut p = pipeline();
        let runners = p.add_loop(Binding::constant(json!(["model_1", "model_2"])), 2).unwrap();
        p.add_task(
            Task::container("Configure", producer())
                .arg("sequence_path", Binding::param("sequence_path")),
        )
        .unwrap();
        p.add_task(
            Task::container("Predict", predict_with_output())
                .in_loop(&runners)
                .arg("sequence", Binding::output("configure", "sequence"))
                .arg("model_name", Binding::item("model_name")),
        )
        .unwrap();
        p.add_task(
            Task::container("Relax", relax())
                .in_loop(&runners)
                .arg("unrelaxed_protein", Binding::output("predict", "unrelaxed_protein")),
        )
        .unwrap();

        let relax = p.task("relax").unwrap();
        assert_eq!(relax.loop_name.as_deref(), Some("for-loop-1"));
        assert_eq!(relax.depends_on, vec!["predict".to_string()]);
    }

    #[test]
    fn loop_outputs_stay_inside_the_loop() {
        let mut p = pipeline();
        p.add_task(
            Task::container("Configure", producer())
                .arg("sequence_path", Binding::param("sequence_path")),
        )
        .unwrap();
        let runners = p.add_loop(Binding::output("configure", "model_runners"), 5).unwrap();
        p.add_task(
            Task::container("Predict", predict_with_output())
                .in_loop(&runners)
                .arg("sequence", Binding::output("configure", "sequence"))
                .arg("model_name", Binding::item("model_name")),
        )
        .unwrap();

        let err = p
            .add_task(
                Task::container("Relax", relax())
                    .arg("unrelaxed_protein", Binding::output("predict", "unrelaxed_protein")),
            )
            .unwrap_err();
        assert!(err.message.contains("from outside its loop"));
    }

    #[test]
    fn add_loop_rejects_artifact_items() {
        let mut p = pipeline();
        p.add_task(
            Task::container("Configure", producer())
                .arg("sequence_path", Binding::param("sequence_path")),
        )
        .unwrap();
        let err = p.add_loop(Binding::output("configure", "sequence"), 5).unwrap_err();
        assert!(err.message.contains("not a list parameter"));

        let err = p.add_loop(Binding::constant("model_1"), 5).unwrap_err();
        assert!(err.message.contains("not a list"));
        assert!(p.loops.is_empty());
    }

    #[test]
    fn task_cannot_join_undeclared_loop() {
        let mut p = pipeline();
        let err = p
            .add_task(
                Task::container("Configure", producer())
                    .in_loop("for-loop-7")
                    .arg("sequence_path", Binding::param("sequence_path")),
            )
            .unwrap_err();
        assert!(err.message.contains("undeclared loop 'for-loop-7'"));
    }

    #[test]
    fn add_task_rejects_unknown_output() {
        let mut p = pipeline();
        p.add_task(
            Task::container("Configure", producer())
                .arg("sequence_path", Binding::param("sequence_path")),
        )
        .unwrap();
        let err = p
            .add_task(
                Task::container("Predict", consumer())
                    .arg("sequence", Binding::output("configure", "features"))
                    .arg("model_name", Binding::constant("model_1")),
            )
            .unwrap_err();
        assert!(err.message.contains("no output 'features'"));
    }

    #[test]
    fn add_task_rejects_unbound_required_input() {
        let mut p = pipeline();
        let err = p.add_task(Task::container("Configure", producer())).unwrap_err();
        assert!(err.message.contains("required input 'sequence_path'"));
    }

    #[test]
    fn add_task_rejects_loop_item_without_loop() {
        let mut p = pipeline();
        p.add_task(
            Task::container("Configure", producer())
                .arg("sequence_path", Binding::param("sequence_path")),
        )
        .unwrap();
        let err = p
            .add_task(
                Task::container("Predict", consumer())
                    .arg("sequence", Binding::output("configure", "sequence"))
                    .arg("model_name", Binding::item("model_name")),
            )
            .unwrap_err();
        assert!(err.message.contains("outside a loop"));
    }

    #[test]
    fn importer_exposes_single_artifact_output() {
        let task = Task::importer(
            "Model parameters",
            ImporterSpec {
                artifact_uri: "gs://bucket/params".to_string(),
                artifact_type: ArtifactType::Artifact,
                reimport: true,
                metadata: BTreeMap::new(),
            },
        );
        assert_eq!(
            task.output_kind(IMPORTER_OUTPUT),
            Some(IoKind::Artifact(ArtifactType::Artifact))
        );
        assert_eq!(task.output_kind("other"), None);
    }
}
