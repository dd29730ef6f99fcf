use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::domain::job::JobId;
use crate::domain::link::LinkKind;
use crate::domain::stack::StackId;
use crate::ParamBag;

/// Kind of workflow a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Provision a new stack
    Create,
    /// Bind a stack to an existing resource
    Import,
    /// Append actions to an active stack
    Update,
    /// Tear a stack down
    Delete,
    /// Post-creation operation on an active stack
    Operation,
}

impl WorkflowKind {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Create => "create",
            WorkflowKind::Import => "import",
            WorkflowKind::Update => "update",
            WorkflowKind::Delete => "delete",
            WorkflowKind::Operation => "operation",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named unit of work in a job's step list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Opens a workflow
    Pre {
        /// Workflow kind
        workflow: WorkflowKind,
    },
    /// Persist the compiled actions carried in the parameter bag
    MaterializeActions,
    /// Execute one action
    RunAction {
        /// Full action name
        action: String,
    },
    /// Resolve outputs that still hold runtime placeholders
    ResolveOutputs,
    /// Merge a patch into the stack attributes
    SetAttributes {
        /// Attribute patch; `null` removes a key
        patch: Map<String, Value>,
    },
    /// Link this stack to another in both directions
    LinkStacks {
        /// The other stack
        master: StackId,
        /// Edge kind from this stack to the other
        kind: LinkKind,
    },
    /// Remove the edges between this stack and another
    UnlinkStacks {
        /// The other stack
        master: StackId,
        /// Edge kind from this stack to the other
        kind: LinkKind,
    },
    /// Remove one action and, unless preserved, its backing resource
    ExpungeAction {
        /// Full action name
        action: String,
    },
    /// Remove every stack-to-stack edge touching this stack
    UnlinkTopology,
    /// Drop remaining resource links and mark the stack deleted
    ReleaseStack,
    /// Closes a workflow
    Post {
        /// Workflow kind
        workflow: WorkflowKind,
    },
}

impl Step {
    /// Stable label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Step::Pre { .. } => "pre",
            Step::MaterializeActions => "materialize_actions",
            Step::RunAction { .. } => "run_action",
            Step::ResolveOutputs => "resolve_outputs",
            Step::SetAttributes { .. } => "set_attributes",
            Step::LinkStacks { .. } => "link_stacks",
            Step::UnlinkStacks { .. } => "unlink_stacks",
            Step::ExpungeAction { .. } => "expunge_action",
            Step::UnlinkTopology => "unlink_topology",
            Step::ReleaseStack => "release_stack",
            Step::Post { .. } => "post",
        }
    }

    /// Identifier used in progress messages and logs
    pub fn id(&self) -> String {
        match self {
            Step::Pre { workflow } => format!("pre_{}", workflow),
            Step::Post { workflow } => format!("post_{}", workflow),
            Step::RunAction { action } => format!("run_action:{}", action),
            Step::ExpungeAction { action } => format!("expunge_action:{}", action),
            Step::LinkStacks { master, .. } => format!("link_stacks:{}", master),
            Step::UnlinkStacks { master, .. } => format!("unlink_stacks:{}", master),
            other => other.label().to_string(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Everything a step receives; steps keep no state between invocations
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Job being run
    pub job_id: JobId,
    /// Stack the job runs against
    pub stack_id: StackId,
    /// Workflow kind of the job
    pub workflow: WorkflowKind,
    /// Position of the step in the job
    pub step_index: usize,
    /// Parameter bag accumulated so far
    pub params: ParamBag,
}

/// What a step hands back to the runner
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Updated parameter bag
    pub params: ParamBag,
    /// Primary result value
    pub result: Value,
    /// Human readable progress messages
    pub progress: Vec<String>,
}

impl StepOutcome {
    /// Outcome carrying the bag forward unchanged
    pub fn unchanged(params: &ParamBag) -> Self {
        Self {
            params: params.clone(),
            result: Value::Null,
            progress: Vec::new(),
        }
    }

    /// Builder-style result
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    /// Builder-style progress message
    pub fn with_progress(mut self, message: impl Into<String>) -> Self {
        self.progress.push(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_ids() {
        assert_eq!(
            Step::Pre {
                workflow: WorkflowKind::Create
            }
            .id(),
            "pre_create"
        );
        assert_eq!(
            Step::RunAction {
                action: "db1-vm".to_string()
            }
            .id(),
            "run_action:db1-vm"
        );
        assert_eq!(Step::ResolveOutputs.id(), "resolve_outputs");
    }

    #[test]
    fn test_step_serialization_is_tagged() {
        let step = Step::RunAction {
            action: "db1-vm".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&step).unwrap(),
            json!({"step": "run_action", "action": "db1-vm"})
        );
        let back: Step = serde_json::from_value(json!({"step": "unlink_topology"})).unwrap();
        assert_eq!(back, Step::UnlinkTopology);
    }

    #[test]
    fn test_link_step_keeps_its_edge_kind() {
        let step = Step::LinkStacks {
            master: StackId("stack-m".to_string()),
            kind: LinkKind::ReplicaOf,
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["step"], json!("link_stacks"));
        let back: Step = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }
}
