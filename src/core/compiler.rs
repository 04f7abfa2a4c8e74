//! Pipeline compilation to a JSON `PipelineJob` template.
//!
//! The layout follows the Vertex AI pipeline spec: one component and one
//! executor per task, a root DAG wiring the tasks, and a runtime config with
//! parameter defaults. Each loop becomes a `for-loop-N` component whose own
//! DAG holds the loop's tasks, driven from the root by a `parameterIterator`.
//! Conditions sit on the task as a `triggerPolicy`.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pipeline::dsl::{
    ArtifactType, Binding, ComponentIo, ContainerResources, CustomJobSpec, ImporterSpec, IoKind,
    LoopSpec, ParameterType, PipelineDefinition, Task, TaskKind, IMPORTER_OUTPUT,
};

pub const SCHEMA_VERSION: &str = "2.1.0";

/// Prefix for values handed to a task from outside its own component
/// inputs: loop items, condition operands and anything a loop body reads
/// from the enclosing DAG.
const CHANNEL_PREFIX: &str = "pipelinechannel--";

/// Turns a pipeline definition into a template file.
pub trait TemplateCompiler {
    fn compile(&self, pipeline: &PipelineDefinition, output_path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTemplateCompiler;

impl JsonTemplateCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Build the template document without writing it.
    pub fn render(&self, pipeline: &PipelineDefinition) -> Result<Value> {
        let mut components = Map::new();
        let mut executors = Map::new();
        let mut dag_tasks = Map::new();

        for task in &pipeline.tasks {
            components.insert(component_key(&task.name), render_component(task));
            executors.insert(executor_key(&task.name), render_executor(task));
            match &task.loop_name {
                None => {
                    dag_tasks.insert(task.name.clone(), render_dag_task(pipeline, task, None)?);
                }
                Some(loop_name) if pipeline.loop_spec(loop_name).is_none() => {
                    return Err(Error::compile_failed(format!(
                        "task '{}' joins undeclared loop '{}'",
                        task.name, loop_name
                    )));
                }
                Some(_) => {}
            }
        }

        for spec in &pipeline.loops {
            let (component, task) = render_loop(pipeline, spec)?;
            components.insert(component_key(&spec.name), component);
            dag_tasks.insert(spec.name.clone(), task);
        }

        let mut root_parameters = Map::new();
        let mut parameter_values = Map::new();
        for parameter in &pipeline.parameters {
            let mut definition = Map::new();
            definition.insert("parameterType".into(), json!(parameter.kind.ir_name()));
            if let Some(default) = &parameter.default {
                definition.insert("defaultValue".into(), default.clone());
                definition.insert("isOptional".into(), json!(true));
                parameter_values.insert(parameter.name.clone(), default.clone());
            }
            root_parameters.insert(parameter.name.clone(), Value::Object(definition));
        }

        Ok(json!({
            "displayName": pipeline.name,
            "pipelineSpec": {
                "pipelineInfo": {
                    "name": pipeline.name,
                    "description": pipeline.description,
                },
                "schemaVersion": SCHEMA_VERSION,
                "sdkVersion": format!("afpipe-{}", env!("CARGO_PKG_VERSION")),
                "components": components,
                "deploymentSpec": { "executors": executors },
                "root": {
                    "inputDefinitions": { "parameters": root_parameters },
                    "dag": { "tasks": dag_tasks },
                },
            },
            "runtimeConfig": { "parameterValues": parameter_values },
        }))
    }
}

impl TemplateCompiler for JsonTemplateCompiler {
    /// Write the rendered template to `output_path`, replacing any existing
    /// file. Parent directories must already exist.
    fn compile(&self, pipeline: &PipelineDefinition, output_path: &Path) -> Result<()> {
        let document = self.render(pipeline)?;
        let mut content = serde_json::to_string_pretty(&document).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize pipeline template".to_string()))
        })?;
        content.push('\n');

        fs::write(output_path, content).map_err(|e| {
            Error::internal_io(
                e.to_string(),
                Some(format!("write template {}", output_path.display())),
            )
        })
    }
}

fn component_key(task: &str) -> String {
    format!("comp-{}", task)
}

fn executor_key(task: &str) -> String {
    format!("exec-{}", task)
}

fn channel(name: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, name)
}

fn render_component(task: &Task) -> Value {
    let (inputs, outputs) = match &task.kind {
        TaskKind::Container(component) => (
            render_io_definitions(&component.inputs),
            render_io_definitions(&component.outputs),
        ),
        TaskKind::Importer(spec) => (
            json!({ "parameters": { "uri": { "parameterType": ParameterType::String.ir_name() } } }),
            json!({ "artifacts": { IMPORTER_OUTPUT: artifact_type(spec.artifact_type.schema_title()) } }),
        ),
    };

    let mut component = Map::new();
    component.insert("executorLabel".into(), json!(executor_key(&task.name)));
    if !is_empty_object(&inputs) {
        component.insert("inputDefinitions".into(), inputs);
    }
    if !is_empty_object(&outputs) {
        component.insert("outputDefinitions".into(), outputs);
    }
    Value::Object(component)
}

fn render_io_definitions(io: &[ComponentIo]) -> Value {
    let mut parameters = Map::new();
    let mut artifacts = Map::new();

    for item in io {
        match item.kind {
            IoKind::Parameter(kind) => {
                let mut definition = Map::new();
                definition.insert("parameterType".into(), json!(kind.ir_name()));
                if item.optional {
                    definition.insert("isOptional".into(), json!(true));
                }
                parameters.insert(item.name.clone(), Value::Object(definition));
            }
            IoKind::Artifact(kind) => {
                artifacts.insert(item.name.clone(), artifact_type(kind.schema_title()));
            }
        }
    }

    let mut definitions = Map::new();
    if !parameters.is_empty() {
        definitions.insert("parameters".into(), Value::Object(parameters));
    }
    if !artifacts.is_empty() {
        definitions.insert("artifacts".into(), Value::Object(artifacts));
    }
    Value::Object(definitions)
}

fn artifact_type(schema_title: &str) -> Value {
    json!({ "artifactType": { "schemaTitle": schema_title, "schemaVersion": "0.0.1" } })
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(Map::is_empty)
}

fn render_executor(task: &Task) -> Value {
    match &task.kind {
        TaskKind::Container(component) => {
            let mut container = Map::new();
            container.insert("image".into(), json!(component.image));
            container.insert("command".into(), json!(component.command));
            container.insert("args".into(), json!(component.args));
            if let Some(resources) = &task.resources {
                container.insert("resources".into(), render_resources(resources));
            }

            let mut executor = Map::new();
            executor.insert("container".into(), Value::Object(container));
            if let Some(job) = &task.custom_job {
                executor.insert("customJob".into(), render_custom_job(job));
            }
            Value::Object(executor)
        }
        TaskKind::Importer(spec) => render_importer(spec),
    }
}

fn render_resources(resources: &ContainerResources) -> Value {
    json!({
        "cpuLimit": resources.cpu_limit,
        "memoryLimit": resources.memory_limit,
        "accelerator": {
            "type": resources.accelerator_type,
            "count": resources.accelerator_count,
        },
    })
}

fn render_custom_job(job: &CustomJobSpec) -> Value {
    let mut machine_spec = Map::new();
    machine_spec.insert("machineType".into(), json!(job.machine_type));
    if let Some(accelerator) = &job.accelerator_type {
        machine_spec.insert("acceleratorType".into(), json!(accelerator));
    }
    if let Some(count) = job.accelerator_count {
        machine_spec.insert("acceleratorCount".into(), json!(count));
    }

    let mut pool = Map::new();
    pool.insert("machineSpec".into(), Value::Object(machine_spec));
    pool.insert("replicaCount".into(), json!(1));
    if !job.nfs_mounts.is_empty() {
        let mounts: Vec<Value> = job
            .nfs_mounts
            .iter()
            .map(|m| json!({ "server": m.server, "path": m.path, "mountPoint": m.mount_point }))
            .collect();
        pool.insert("nfsMounts".into(), Value::Array(mounts));
    }

    let mut spec = Map::new();
    spec.insert("displayName".into(), json!(job.display_name));
    spec.insert("workerPoolSpecs".into(), json!([Value::Object(pool)]));
    if let Some(network) = &job.network {
        spec.insert("network".into(), json!(network));
    }
    Value::Object(spec)
}

fn render_importer(spec: &ImporterSpec) -> Value {
    let mut importer = Map::new();
    importer.insert(
        "artifactUri".into(),
        json!({ "runtimeParameter": "uri" }),
    );
    importer.insert(
        "typeSchema".into(),
        json!({ "schemaTitle": spec.artifact_type.schema_title(), "schemaVersion": "0.0.1" }),
    );
    importer.insert("reimport".into(), json!(spec.reimport));
    if !spec.metadata.is_empty() {
        importer.insert("metadata".into(), json!(spec.metadata));
    }
    json!({ "importer": importer })
}

/// What a loop body reads from the enclosing DAG. Each external value is
/// declared as a loop component input and fed from the root loop task.
struct LoopScope<'a> {
    spec: &'a LoopSpec,
    items_channel: String,
    parameters: Map<String, Value>,
    artifacts: Map<String, Value>,
    parameter_sources: Map<String, Value>,
    artifact_sources: Map<String, Value>,
    dependent_tasks: BTreeSet<String>,
}

impl<'a> LoopScope<'a> {
    fn new(spec: &'a LoopSpec, items_channel: String) -> Self {
        Self {
            spec,
            items_channel,
            parameters: Map::new(),
            artifacts: Map::new(),
            parameter_sources: Map::new(),
            artifact_sources: Map::new(),
            dependent_tasks: BTreeSet::new(),
        }
    }

    fn pass_parameter(&mut self, name: String, kind: ParameterType, source: Value) -> Value {
        self.parameters
            .insert(name.clone(), json!({ "parameterType": kind.ir_name() }));
        self.parameter_sources.insert(name.clone(), source);
        json!({ "componentInputParameter": name })
    }

    fn pass_artifact(&mut self, name: String, kind: ArtifactType, source: Value) -> Value {
        self.artifacts
            .insert(name.clone(), artifact_type(kind.schema_title()));
        self.artifact_sources.insert(name.clone(), source);
        json!({ "componentInputArtifact": name })
    }
}

/// Render a loop as its component (inputs plus the body DAG) and the root
/// task that iterates it.
fn render_loop(pipeline: &PipelineDefinition, spec: &LoopSpec) -> Result<(Value, Value)> {
    let (items_channel, items_source, items_producer) = loop_items(pipeline, spec)?;
    let item_input = format!("{}-loop-item", items_channel);

    let mut scope = LoopScope::new(spec, items_channel.clone());
    let mut body = Map::new();
    for task in pipeline
        .tasks
        .iter()
        .filter(|t| t.loop_name.as_deref() == Some(spec.name.as_str()))
    {
        let rendered = render_dag_task(pipeline, task, Some(&mut scope))?;
        body.insert(task.name.clone(), rendered);
    }
    if body.is_empty() {
        return Err(Error::compile_failed(format!(
            "loop '{}' has no tasks",
            spec.name
        )));
    }

    let mut parameters = scope.parameters;
    parameters.insert(
        items_channel.clone(),
        json!({ "parameterType": ParameterType::List.ir_name() }),
    );
    parameters.insert(
        item_input.clone(),
        json!({ "parameterType": ParameterType::Struct.ir_name() }),
    );
    let mut definitions = Map::new();
    definitions.insert("parameters".into(), Value::Object(parameters));
    if !scope.artifacts.is_empty() {
        definitions.insert("artifacts".into(), Value::Object(scope.artifacts));
    }
    let component = json!({
        "inputDefinitions": definitions,
        "dag": { "tasks": body },
    });

    let mut dependent_tasks = scope.dependent_tasks;
    if let Some(producer) = items_producer {
        dependent_tasks.insert(producer);
    }
    let mut parameter_sources = scope.parameter_sources;
    parameter_sources.insert(items_channel.clone(), items_source);
    let mut inputs = Map::new();
    inputs.insert("parameters".into(), Value::Object(parameter_sources));
    if !scope.artifact_sources.is_empty() {
        inputs.insert("artifacts".into(), Value::Object(scope.artifact_sources));
    }

    let mut task = Map::new();
    task.insert("taskInfo".into(), json!({ "name": spec.name }));
    task.insert("componentRef".into(), json!({ "name": component_key(&spec.name) }));
    if !dependent_tasks.is_empty() {
        task.insert("dependentTasks".into(), json!(dependent_tasks));
    }
    task.insert("inputs".into(), Value::Object(inputs));
    task.insert(
        "parameterIterator".into(),
        json!({
            "items": { "inputParameter": items_channel },
            "itemInput": item_input,
        }),
    );
    task.insert(
        "iteratorPolicy".into(),
        json!({ "parallelismLimit": spec.parallelism }),
    );

    Ok((component, Value::Object(task)))
}

/// Channel the loop iterates over, the binding that feeds it from the root
/// DAG, and the task producing the items, if any.
fn loop_items(
    pipeline: &PipelineDefinition,
    spec: &LoopSpec,
) -> Result<(String, Value, Option<String>)> {
    match &spec.items {
        Binding::PipelineParam(name) => {
            if !pipeline.has_parameter(name) {
                return Err(Error::compile_failed(format!(
                    "loop '{}' iterates over undeclared parameter '{}'",
                    spec.name, name
                )));
            }
            Ok((channel(name), json!({ "componentInputParameter": name }), None))
        }
        Binding::TaskOutput { task: producer, output } => {
            let upstream = pipeline.task(producer);
            match upstream.and_then(|t| t.output_kind(output)) {
                Some(IoKind::Parameter(_))
                    if upstream.is_some_and(|t| t.loop_name.is_none()) =>
                {
                    Ok((
                        channel(&format!("{}-{}", producer, output)),
                        json!({
                            "taskOutputParameter": { "producerTask": producer, "outputParameterKey": output },
                        }),
                        Some(producer.clone()),
                    ))
                }
                _ => Err(Error::compile_failed(format!(
                    "loop '{}' iterates over '{}.{}', which is not a list parameter of the root DAG",
                    spec.name, producer, output
                ))),
            }
        }
        Binding::Constant(value) => Ok((
            channel(&format!("{}-items", spec.name)),
            json!({ "runtimeValue": { "constant": value } }),
            None,
        )),
        Binding::LoopItem { .. } => Err(Error::compile_failed(format!(
            "loop '{}' cannot iterate over a loop item",
            spec.name
        ))),
    }
}

fn render_dag_task(
    pipeline: &PipelineDefinition,
    task: &Task,
    mut scope: Option<&mut LoopScope>,
) -> Result<Value> {
    let mut parameters = Map::new();
    let mut artifacts = Map::new();

    match &task.kind {
        TaskKind::Container(component) => {
            for (input, binding) in &task.arguments {
                let kind = component.input_kind(input).ok_or_else(|| {
                    Error::compile_failed(format!(
                        "task '{}' binds unknown input '{}'",
                        task.name, input
                    ))
                })?;
                let rendered = render_binding(pipeline, task, binding, kind, scope.as_deref_mut())?;
                match kind {
                    IoKind::Parameter(_) => parameters.insert(input.clone(), rendered),
                    IoKind::Artifact(_) => artifacts.insert(input.clone(), rendered),
                };
            }
        }
        TaskKind::Importer(spec) => {
            parameters.insert(
                "uri".into(),
                json!({ "runtimeValue": { "constant": spec.artifact_uri } }),
            );
        }
    }

    // Only producers in the same DAG are dependencies here. A loop body's
    // outside producers become dependencies of the loop task instead.
    let current_loop = scope.as_ref().map(|s| s.spec.name.as_str());
    let depends_on: Vec<&String> = task
        .depends_on
        .iter()
        .filter(|producer| {
            pipeline
                .task(producer)
                .is_some_and(|t| t.loop_name.as_deref() == current_loop)
        })
        .collect();

    let mut rendered = Map::new();
    rendered.insert("taskInfo".into(), json!({ "name": task.display_name }));
    rendered.insert(
        "componentRef".into(),
        json!({ "name": component_key(&task.name) }),
    );
    if !depends_on.is_empty() {
        rendered.insert("dependentTasks".into(), json!(depends_on));
    }
    rendered.insert("cachingOptions".into(), json!({ "enableCache": true }));

    if let Some(condition) = &task.condition {
        let kind = pipeline.parameter_kind(&condition.param).ok_or_else(|| {
            Error::compile_failed(format!(
                "task '{}' conditions on undeclared parameter '{}'",
                task.name, condition.param
            ))
        })?;
        let operand = channel(&condition.param);
        let source = json!({ "componentInputParameter": condition.param });
        let value = match scope.as_deref_mut() {
            Some(inner) => inner.pass_parameter(operand.clone(), kind, source),
            None => source,
        };
        parameters.insert(operand.clone(), value);
        rendered.insert(
            "triggerPolicy".into(),
            json!({
                "condition": format!(
                    "inputs.parameter_values['{}'] == '{}'",
                    operand, condition.equals
                ),
            }),
        );
    }

    let mut inputs = Map::new();
    if !parameters.is_empty() {
        inputs.insert("parameters".into(), Value::Object(parameters));
    }
    if !artifacts.is_empty() {
        inputs.insert("artifacts".into(), Value::Object(artifacts));
    }
    if !inputs.is_empty() {
        rendered.insert("inputs".into(), Value::Object(inputs));
    }

    Ok(Value::Object(rendered))
}

fn render_binding(
    pipeline: &PipelineDefinition,
    task: &Task,
    binding: &Binding,
    kind: IoKind,
    scope: Option<&mut LoopScope>,
) -> Result<Value> {
    match binding {
        Binding::PipelineParam(name) => {
            let parameter_kind = pipeline.parameter_kind(name).ok_or_else(|| {
                Error::compile_failed(format!(
                    "task '{}' references undeclared parameter '{}'",
                    task.name, name
                ))
            })?;
            let source = json!({ "componentInputParameter": name });
            Ok(match scope {
                Some(inner) => inner.pass_parameter(channel(name), parameter_kind, source),
                None => source,
            })
        }
        Binding::TaskOutput { task: producer, output } => {
            let upstream = pipeline.task(producer);
            let produced = upstream
                .and_then(|t| t.output_kind(output))
                .ok_or_else(|| {
                    Error::compile_failed(format!(
                        "task '{}' reads missing output '{}.{}'",
                        task.name, producer, output
                    ))
                })?;
            let direct = match (kind, produced) {
                (IoKind::Artifact(_), IoKind::Artifact(_)) => json!({
                    "taskOutputArtifact": { "producerTask": producer, "outputArtifactKey": output },
                }),
                (IoKind::Parameter(_), IoKind::Parameter(_)) => json!({
                    "taskOutputParameter": { "producerTask": producer, "outputParameterKey": output },
                }),
                _ => {
                    return Err(Error::compile_failed(format!(
                        "task '{}' binds '{}.{}' to an input of a different kind",
                        task.name, producer, output
                    )))
                }
            };

            let producer_loop = upstream.and_then(|t| t.loop_name.as_deref());
            let same_dag = producer_loop == scope.as_ref().map(|s| s.spec.name.as_str());
            match scope {
                _ if same_dag => Ok(direct),
                Some(inner) if producer_loop.is_none() => {
                    let name = channel(&format!("{}-{}", producer, output));
                    inner.dependent_tasks.insert(producer.clone());
                    Ok(match produced {
                        IoKind::Artifact(artifact) => inner.pass_artifact(name, artifact, direct),
                        IoKind::Parameter(parameter) => {
                            inner.pass_parameter(name, parameter, direct)
                        }
                    })
                }
                _ => Err(Error::compile_failed(format!(
                    "task '{}' reads '{}.{}' from outside its loop",
                    task.name, producer, output
                ))),
            }
        }
        Binding::Constant(value) => {
            if matches!(kind, IoKind::Artifact(_)) {
                return Err(Error::compile_failed(format!(
                    "task '{}' binds a constant to an artifact input",
                    task.name
                )));
            }
            Ok(json!({ "runtimeValue": { "constant": value } }))
        }
        Binding::LoopItem { field } => {
            let inner = scope.ok_or_else(|| {
                Error::compile_failed(format!(
                    "task '{}' uses a loop item outside a loop",
                    task.name
                ))
            })?;
            Ok(json!({
                "componentInputParameter": format!("{}-loop-item", inner.items_channel),
                "parameterExpressionSelector": format!("parseJson(string_value)[\"{}\"]", field),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::overlay::EnvironmentOverlay;
    use crate::pipeline::alphafold;
    use crate::pipeline::PipelineSettings;

    fn settings(vars: &[(&str, &str)]) -> PipelineSettings {
        let mut overlay = EnvironmentOverlay::new();
        overlay.set("ALPHAFOLD_COMPONENTS_IMAGE", "gcr.io/p/af");
        overlay.set("NFS_SERVER", "10.0.0.2");
        overlay.set("NFS_PATH", "/datasets");
        overlay.set("NETWORK", "projects/1/global/networks/default");
        overlay.set("MODEL_PARAMS_GCS_LOCATION", "gs://b/params");
        for (key, value) in vars {
            overlay.set(*key, *value);
        }
        PipelineSettings::from_overlay(&overlay).unwrap()
    }

    fn executors(document: &Value) -> &Map<String, Value> {
        document["pipelineSpec"]["deploymentSpec"]["executors"]
            .as_object()
            .unwrap()
    }

    #[test]
    fn renders_components_executors_and_dag() {
        let pipeline = alphafold::alphafold_inference_pipeline_seq(&settings(&[])).unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();
        let spec = &document["pipelineSpec"];

        assert_eq!(spec["pipelineInfo"]["name"], "alphafold-inference-pipeline");
        assert_eq!(spec["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(spec["components"].as_object().unwrap().len(), 5);
        assert_eq!(executors(&document).len(), 5);

        let prepare = &spec["root"]["dag"]["tasks"]["prepare-features"];
        assert_eq!(prepare["componentRef"]["name"], "comp-prepare-features");
        assert_eq!(
            prepare["inputs"]["artifacts"]["sequence"]["taskOutputArtifact"]["producerTask"],
            "configure-pipeline-run"
        );
        assert_eq!(
            prepare["inputs"]["parameters"]["run_multimer_system"]["taskOutputParameter"]
                ["outputParameterKey"],
            "run_multimer_system"
        );
        assert_eq!(
            prepare["inputs"]["parameters"]["use_small_bfd"]["componentInputParameter"],
            "use_small_bfd"
        );
    }

    #[test]
    fn custom_job_carries_nfs_mount_and_network() {
        let pipeline = alphafold::alphafold_inference_pipeline_seq(&settings(&[])).unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();
        let job = &executors(&document)["exec-prepare-features"]["customJob"];

        assert_eq!(job["network"], "projects/1/global/networks/default");
        let pool = &job["workerPoolSpecs"][0];
        assert_eq!(pool["machineSpec"]["machineType"], "c2-standard-16");
        assert_eq!(pool["nfsMounts"][0]["server"], "10.0.0.2");
        assert_eq!(pool["nfsMounts"][0]["path"], "/datasets");
    }

    #[test]
    fn importer_resolves_artifact_uri_at_runtime() {
        let pipeline = alphafold::alphafold_inference_pipeline_seq(&settings(&[])).unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();

        let importer = &executors(&document)["exec-model-parameters"]["importer"];
        assert_eq!(importer["reimport"], true);
        let task = &document["pipelineSpec"]["root"]["dag"]["tasks"]["model-parameters"];
        assert_eq!(
            task["inputs"]["parameters"]["uri"]["runtimeValue"]["constant"],
            "gs://b/params"
        );
    }

    #[test]
    fn resource_limits_only_on_a100_stages() {
        let pipeline = alphafold::alphafold_monomer_pipeline(&settings(&[
            ("RELAX_MEMORY_LIMIT", "85"),
            ("RELAX_CPU_LIMIT", "12"),
            ("RELAX_GPU_LIMIT", "1"),
            ("RELAX_GPU_TYPE", "nvidia-tesla-a100"),
        ]))
        .unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();
        let executors = executors(&document);

        let relax = &executors["exec-relax-protein"]["container"]["resources"];
        assert_eq!(relax["cpuLimit"], 12.0);
        assert_eq!(relax["memoryLimit"], 85.0);
        assert_eq!(relax["accelerator"]["type"], "nvidia-tesla-a100");
        assert_eq!(relax["accelerator"]["count"], "1");

        let with_resources: Vec<&String> = executors
            .iter()
            .filter(|(_, e)| e["container"].get("resources").is_some())
            .map(|(k, _)| k)
            .collect();
        assert_eq!(with_resources, vec!["exec-relax-protein"]);
    }

    #[test]
    fn prediction_loop_renders_as_sub_dag() {
        let pipeline = alphafold::alphafold_monomer_pipeline(&settings(&[])).unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();
        let spec = &document["pipelineSpec"];
        let root = &spec["root"]["dag"]["tasks"];

        assert!(root.get("predict").is_none());
        assert!(root.get("relax-protein").is_none());

        let for_loop = &root["for-loop-1"];
        let items = "pipelinechannel--configure-pipeline-run-model_runners";
        assert_eq!(for_loop["componentRef"]["name"], "comp-for-loop-1");
        assert_eq!(for_loop["parameterIterator"]["items"]["inputParameter"], items);
        assert_eq!(
            for_loop["parameterIterator"]["itemInput"],
            format!("{}-loop-item", items)
        );
        assert_eq!(for_loop["iteratorPolicy"]["parallelismLimit"], 5);
        assert_eq!(
            for_loop["inputs"]["parameters"][items]["taskOutputParameter"]["producerTask"],
            "configure-pipeline-run"
        );
        assert_eq!(
            for_loop["inputs"]["artifacts"]["pipelinechannel--aggregate-features-features"]
                ["taskOutputArtifact"]["producerTask"],
            "aggregate-features"
        );
        assert_eq!(
            for_loop["dependentTasks"],
            json!(["aggregate-features", "configure-pipeline-run", "model-parameters"])
        );

        let body = &spec["components"]["comp-for-loop-1"];
        assert!(body.get("executorLabel").is_none());
        let definitions = &body["inputDefinitions"];
        assert_eq!(definitions["parameters"][items]["parameterType"], "LIST");
        assert_eq!(
            definitions["parameters"][format!("{}-loop-item", items)]["parameterType"],
            "STRUCT"
        );
        assert_eq!(
            definitions["parameters"]["pipelinechannel--is_run_relax"]["parameterType"],
            "STRING"
        );

        let predict = &body["dag"]["tasks"]["predict"];
        assert!(predict.get("dependentTasks").is_none());
        assert_eq!(
            predict["inputs"]["parameters"]["model_name"]["componentInputParameter"],
            format!("{}-loop-item", items)
        );
        assert_eq!(
            predict["inputs"]["artifacts"]["model_features"]["componentInputArtifact"],
            "pipelinechannel--aggregate-features-features"
        );
        assert_eq!(
            predict["inputs"]["parameters"]["project"]["componentInputParameter"],
            "pipelinechannel--project"
        );
    }

    #[test]
    fn relax_reads_predict_within_the_same_iteration() {
        let pipeline = alphafold::alphafold_monomer_pipeline(&settings(&[])).unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();
        let body = &document["pipelineSpec"]["components"]["comp-for-loop-1"]["dag"]["tasks"];

        let relax = &body["relax-protein"];
        assert_eq!(
            relax["inputs"]["artifacts"]["unrelaxed_protein"]["taskOutputArtifact"],
            json!({ "producerTask": "predict", "outputArtifactKey": "unrelaxed_protein" })
        );
        assert_eq!(relax["dependentTasks"], json!(["predict"]));
        assert!(relax.get("parameterIterator").is_none());
        assert_eq!(
            relax["triggerPolicy"]["condition"],
            "inputs.parameter_values['pipelinechannel--is_run_relax'] == 'relax'"
        );
        assert_eq!(
            relax["inputs"]["parameters"]["pipelinechannel--is_run_relax"]["componentInputParameter"],
            "pipelinechannel--is_run_relax"
        );

        let loops: Vec<&String> = document["pipelineSpec"]["root"]["dag"]["tasks"]
            .as_object()
            .unwrap()
            .keys()
            .filter(|name| name.starts_with("for-loop-"))
            .collect();
        assert_eq!(loops, vec!["for-loop-1"]);
        assert_eq!(
            document["pipelineSpec"]["root"]["dag"]["tasks"]["for-loop-1"]["inputs"]["parameters"]
                ["pipelinechannel--is_run_relax"]["componentInputParameter"],
            "is_run_relax"
        );
    }

    #[test]
    fn a100_custom_job_matches_container_accelerator() {
        let pipeline = alphafold::alphafold_monomer_pipeline(&settings(&[
            ("MEMORY_LIMIT", "85"),
            ("CPU_LIMIT", "12"),
            ("GPU_LIMIT", "1"),
            ("GPU_TYPE", "nvidia-tesla-a100"),
        ]))
        .unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();
        let predict = &executors(&document)["exec-predict"];

        let accelerator = &predict["container"]["resources"]["accelerator"];
        let machine = &predict["customJob"]["workerPoolSpecs"][0]["machineSpec"];
        assert_eq!(
            machine["acceleratorType"],
            accelerator["type"].as_str().unwrap().to_uppercase().replace('-', "_")
        );
        assert_eq!(
            machine["acceleratorCount"].to_string(),
            accelerator["count"].as_str().unwrap()
        );
        assert_eq!(machine["machineType"], "a2-highgpu-1g");

        let relax = &executors(&document)["exec-relax-protein"]["customJob"];
        assert_eq!(
            relax["workerPoolSpecs"][0]["machineSpec"]["acceleratorType"],
            "NVIDIA_L4"
        );
    }

    #[test]
    fn empty_loop_fails_compile() {
        let mut pipeline = alphafold::alphafold_monomer_pipeline(&settings(&[])).unwrap();
        pipeline.tasks.retain(|t| t.loop_name.is_none());

        let err = JsonTemplateCompiler::new().render(&pipeline).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompileFailed);
        assert!(err.message.contains("loop 'for-loop-1' has no tasks"));
    }

    #[test]
    fn defaults_land_in_runtime_config() {
        let pipeline = alphafold::alphafold_monomer_pipeline(&settings(&[])).unwrap();
        let document = JsonTemplateCompiler::new().render(&pipeline).unwrap();

        let values = &document["runtimeConfig"]["parameterValues"];
        assert_eq!(values["is_run_relax"], "relax");
        assert_eq!(values["uniref_max_hits"], 10000);
        assert!(values.get("sequence_path").is_none());

        let root = &document["pipelineSpec"]["root"]["inputDefinitions"]["parameters"];
        assert_eq!(root["sequence_path"]["parameterType"], "STRING");
        assert!(root["sequence_path"].get("isOptional").is_none());
    }

    #[test]
    fn compile_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, "stale").unwrap();

        let pipeline = alphafold::alphafold_inference_pipeline_seq(&settings(&[])).unwrap();
        JsonTemplateCompiler::new().compile(&pipeline, &path).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["displayName"], "alphafold-inference-pipeline");
    }

    #[test]
    fn compile_into_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("pipeline.json");

        let pipeline = alphafold::alphafold_inference_pipeline_seq(&settings(&[])).unwrap();
        let err = JsonTemplateCompiler::new()
            .compile(&pipeline, &path)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalIoError);
    }

    #[test]
    fn hand_built_dangling_output_fails_compile() {
        let mut pipeline = alphafold::alphafold_inference_pipeline_seq(&settings(&[])).unwrap();
        pipeline.tasks.retain(|t| t.name != "configure-pipeline-run");

        let err = JsonTemplateCompiler::new().render(&pipeline).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompileFailed);
    }
}
