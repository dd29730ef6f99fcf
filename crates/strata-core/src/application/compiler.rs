//! Workflow compiler.
//!
//! Turns a declarative stack definition into persisted-ready actions and a
//! flat, deterministic step list. Input placeholders are substituted here;
//! runtime placeholders are left for the resolver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::backend::ResourceBackend;
use crate::domain::action::{Action, ActionDeclaration, ResourceDescriptor};
use crate::domain::job::Job;
use crate::domain::reference::{self, Reference};
use crate::domain::stack::{InputDeclaration, Stack, StackType};
use crate::domain::step::{Step, WorkflowKind};
use crate::{CoreError, ParamBag, ResourceId};

/// Parameter key carrying the compiled actions to the materialize step
pub const ACTIONS_PARAM: &str = "actions";

/// Parameter key carrying the delete workflow's preserve flag
pub const PRESERVE_PARAM: &str = "preserve";

/// Declarative description of a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDefinition {
    /// Unique stack name
    pub name: String,
    /// Declared stack type
    pub stack_type: StackType,
    /// Declared inputs with defaults
    #[serde(default)]
    pub inputs: Vec<InputDeclaration>,
    /// Caller supplied input values, overriding defaults
    #[serde(default)]
    pub input_values: Map<String, Value>,
    /// Output templates
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Actions in execution order
    #[serde(default)]
    pub actions: Vec<ActionDeclaration>,
    /// Initial stack attributes
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Steps run after the actions and before the post step
    #[serde(default)]
    pub additional_steps: Vec<Step>,
}

impl StackDefinition {
    /// Empty definition
    pub fn new(name: impl Into<String>, stack_type: StackType) -> Self {
        Self {
            name: name.into(),
            stack_type,
            inputs: Vec::new(),
            input_values: Map::new(),
            outputs: BTreeMap::new(),
            actions: Vec::new(),
            attributes: Map::new(),
            additional_steps: Vec::new(),
        }
    }

    /// Parse a definition from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(yaml).map_err(|e| CoreError::ValidationError(e.to_string()))
    }

    /// Builder-style input declaration
    pub fn with_input(mut self, input: InputDeclaration) -> Self {
        self.inputs.push(input);
        self
    }

    /// Builder-style input value
    pub fn with_input_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_values.insert(name.into(), value.into());
        self
    }

    /// Builder-style output template
    pub fn with_output(mut self, name: impl Into<String>, template: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), template.into());
        self
    }

    /// Builder-style action
    pub fn with_action(mut self, action: ActionDeclaration) -> Self {
        self.actions.push(action);
        self
    }

    /// Builder-style attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder-style additional step
    pub fn with_additional_step(mut self, step: Step) -> Self {
        self.additional_steps.push(step);
        self
    }
}

/// Actions to append to an existing stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDefinition {
    /// New actions in execution order
    #[serde(default)]
    pub actions: Vec<ActionDeclaration>,
    /// Steps run after the actions and before the post step
    #[serde(default)]
    pub additional_steps: Vec<Step>,
}

impl UpdateDefinition {
    /// Builder-style action
    pub fn with_action(mut self, action: ActionDeclaration) -> Self {
        self.actions.push(action);
        self
    }

    /// Builder-style additional step
    pub fn with_additional_step(mut self, step: Step) -> Self {
        self.additional_steps.push(step);
        self
    }
}

/// Compiler output
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    /// Workflow kind
    pub kind: WorkflowKind,
    /// The stack (new for create/import, updated copy otherwise)
    pub stack: Stack,
    /// Newly compiled actions
    pub actions: Vec<Action>,
    /// Ordered step list
    pub steps: Vec<Step>,
    /// Initial parameter bag for the job
    pub params: ParamBag,
}

impl CompiledWorkflow {
    /// Build the job that runs this workflow
    pub fn to_job(&self) -> Job {
        Job::new(
            self.stack.id.clone(),
            self.kind,
            self.steps.clone(),
            self.params.clone(),
        )
    }
}

/// Compiles stack definitions into step lists
#[derive(Debug, Clone)]
pub struct WorkflowCompiler {
    known_resource_types: Vec<String>,
}

impl WorkflowCompiler {
    /// Create a compiler accepting the given resource types
    pub fn new(known_resource_types: Vec<String>) -> Self {
        Self {
            known_resource_types,
        }
    }

    /// Create a compiler accepting whatever the backend can create
    pub fn for_backend(backend: &dyn ResourceBackend) -> Self {
        Self::new(backend.resource_types())
    }

    /// Compile a definition into a new stack and its create workflow
    pub fn compile_for_create(&self, definition: &StackDefinition) -> Result<CompiledWorkflow, CoreError> {
        self.compile_new(definition, WorkflowKind::Create)
    }

    /// Like create, but the named action binds an existing resource
    pub fn compile_for_import(
        &self,
        definition: &StackDefinition,
        action: &str,
        resource_id: ResourceId,
    ) -> Result<CompiledWorkflow, CoreError> {
        let mut compiled = self.compile_new(definition, WorkflowKind::Import)?;
        let target = compiled
            .actions
            .iter_mut()
            .find(|a| a.short_name == action || a.name == action)
            .ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "Import target action '{}' is not declared",
                    action
                ))
            })?;
        target.descriptor = ResourceDescriptor::Import { resource_id };
        compiled.params = actions_param(&compiled.actions)?;
        Ok(compiled)
    }

    /// Append actions to an active stack
    pub fn compile_for_update(
        &self,
        stack: &Stack,
        existing: &[Action],
        update: &UpdateDefinition,
    ) -> Result<CompiledWorkflow, CoreError> {
        self.compile_append(stack, existing, update, WorkflowKind::Update)
    }

    /// Compile a post-creation operation into a workflow
    pub fn compile_for_operation(
        &self,
        stack: &Stack,
        existing: &[Action],
        update: &UpdateDefinition,
    ) -> Result<CompiledWorkflow, CoreError> {
        self.compile_append(stack, existing, update, WorkflowKind::Operation)
    }

    /// Step list tearing a stack down; actions are expunged newest first
    pub fn compile_for_delete(&self, stack: &Stack, existing: &[Action]) -> Vec<Step> {
        let mut ordered: Vec<&Action> = existing.iter().collect();
        ordered.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        let mut steps = Vec::with_capacity(ordered.len() + 4);
        steps.push(Step::Pre {
            workflow: WorkflowKind::Delete,
        });
        steps.extend(ordered.into_iter().map(|action| Step::ExpungeAction {
            action: action.name.clone(),
        }));
        steps.push(Step::UnlinkTopology);
        steps.push(Step::ReleaseStack);
        steps.push(Step::Post {
            workflow: WorkflowKind::Delete,
        });

        debug!(stack = %stack.name, steps = steps.len(), "Compiled delete workflow");
        steps
    }

    fn compile_new(
        &self,
        definition: &StackDefinition,
        kind: WorkflowKind,
    ) -> Result<CompiledWorkflow, CoreError> {
        if definition.name.trim().is_empty() {
            return Err(CoreError::ValidationError("Stack name must not be empty".to_string()));
        }

        let mut stack = Stack::new(definition.name.clone(), definition.stack_type);
        stack.inputs = effective_inputs(&definition.inputs, &definition.input_values)?;
        stack.attributes = definition.attributes.clone();

        for (name, template) in &definition.outputs {
            let value = substitute_inputs(template, &stack)
                .map_err(|e| with_context(e, &format!("output '{}'", name)))?;
            stack.outputs.insert(name.clone(), value);
        }

        let actions = self.build_actions(&stack, &definition.actions, 0, &HashSet::new())?;
        let resolve_outputs = outputs_need_resolution(&stack);
        let steps = workflow_steps(kind, &actions, resolve_outputs, &definition.additional_steps);
        let params = actions_param(&actions)?;

        debug!(stack = %stack.name, kind = %kind, actions = actions.len(), steps = steps.len(), "Compiled workflow");

        Ok(CompiledWorkflow {
            kind,
            stack,
            actions,
            steps,
            params,
        })
    }

    fn compile_append(
        &self,
        stack: &Stack,
        existing: &[Action],
        update: &UpdateDefinition,
        kind: WorkflowKind,
    ) -> Result<CompiledWorkflow, CoreError> {
        let taken: HashSet<String> = existing.iter().map(|a| a.name.clone()).collect();
        let next_sequence = existing
            .iter()
            .map(|a| a.sequence + 1)
            .max()
            .unwrap_or(0);

        let actions = self.build_actions(stack, &update.actions, next_sequence, &taken)?;
        let resolve_outputs = outputs_need_resolution(stack);
        let steps = workflow_steps(kind, &actions, resolve_outputs, &update.additional_steps);
        let params = actions_param(&actions)?;

        debug!(stack = %stack.name, kind = %kind, actions = actions.len(), steps = steps.len(), "Compiled workflow");

        Ok(CompiledWorkflow {
            kind,
            stack: stack.clone(),
            actions,
            steps,
            params,
        })
    }

    fn build_actions(
        &self,
        stack: &Stack,
        declarations: &[ActionDeclaration],
        first_sequence: u32,
        taken: &HashSet<String>,
    ) -> Result<Vec<Action>, CoreError> {
        let mut seen: HashSet<String> = HashSet::with_capacity(declarations.len());
        let mut actions = Vec::with_capacity(declarations.len());

        for (offset, declaration) in declarations.iter().enumerate() {
            if declaration.name.trim().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "Action #{} has no name",
                    offset
                )));
            }
            let full_name = stack.action_name(&declaration.name);
            if taken.contains(&full_name) || !seen.insert(full_name.clone()) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate action name: {}",
                    full_name
                )));
            }

            let context = format!("action '{}'", declaration.name);
            let descriptor = declaration
                .resource
                .to_descriptor(&self.known_resource_types)
                .map_err(|e| with_context(e, &context))?;
            let params = substitute_inputs(&declaration.params.to_value(), stack)
                .and_then(ParamBag::from_value)
                .map_err(|e| with_context(e, &context))?;

            actions.push(Action::new(
                stack,
                declaration,
                descriptor,
                params,
                first_sequence + offset as u32,
            ));
        }

        Ok(actions)
    }
}

fn workflow_steps(
    kind: WorkflowKind,
    actions: &[Action],
    resolve_outputs: bool,
    additional: &[Step],
) -> Vec<Step> {
    let mut steps = Vec::with_capacity(actions.len() + additional.len() + 4);
    steps.push(Step::Pre { workflow: kind });
    steps.push(Step::MaterializeActions);
    steps.extend(actions.iter().map(|action| Step::RunAction {
        action: action.name.clone(),
    }));
    if resolve_outputs {
        steps.push(Step::ResolveOutputs);
    }
    steps.extend(additional.iter().cloned());
    steps.push(Step::Post { workflow: kind });
    steps
}

fn effective_inputs(
    declared: &[InputDeclaration],
    supplied: &Map<String, Value>,
) -> Result<Vec<InputDeclaration>, CoreError> {
    let mut names = HashSet::with_capacity(declared.len());
    for input in declared {
        if !names.insert(input.name.as_str()) {
            return Err(CoreError::ValidationError(format!(
                "Duplicate input: {}",
                input.name
            )));
        }
    }
    if let Some(unknown) = supplied.keys().find(|k| !names.contains(k.as_str())) {
        return Err(CoreError::ValidationError(format!(
            "Value supplied for undeclared input '{}'",
            unknown
        )));
    }

    declared
        .iter()
        .map(|input| {
            let value = supplied
                .get(&input.name)
                .cloned()
                .or_else(|| input.default.clone())
                .ok_or_else(|| {
                    CoreError::ValidationError(format!(
                        "Input '{}' has no default and no value was supplied",
                        input.name
                    ))
                })?;
            Ok(InputDeclaration {
                name: input.name.clone(),
                default: Some(value),
            })
        })
        .collect()
}

fn substitute_inputs(value: &Value, stack: &Stack) -> Result<Value, CoreError> {
    reference::substitute(value, &mut |r: &Reference| match r {
        Reference::Input { name } => stack.input(name).cloned().map(Some).ok_or_else(|| {
            CoreError::ValidationError(format!("Placeholder references undeclared input '{}'", name))
        }),
        _ => Ok(None),
    })
}

fn outputs_need_resolution(stack: &Stack) -> bool {
    stack.outputs.values().any(reference::has_runtime_references)
}

fn actions_param(actions: &[Action]) -> Result<ParamBag, CoreError> {
    Ok(ParamBag::new().with(ACTIONS_PARAM, serde_json::to_value(actions)?))
}

fn with_context(error: CoreError, context: &str) -> CoreError {
    match error {
        CoreError::ValidationError(msg) => CoreError::ValidationError(format!("{}: {}", context, msg)),
        other => other,
    }
}
