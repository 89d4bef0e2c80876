//! Generic multi-stage approval workflows.
//!
//! A [`WorkflowDefinition`] lists ordered stages for a `(module, entity type)`
//! pair. Each run is a [`WorkflowInstance`] with one [`WorkflowApproval`] row
//! per reached stage. The initiator of a run can never decide on it.

pub mod approval;
pub mod definition;
pub mod instance;
pub mod resolver;

pub use approval::{ApprovalStatus, WorkflowApproval, WorkflowApprovalId};
pub use definition::{WorkflowDefinition, WorkflowDefinitionId, WorkflowStage};
pub use instance::{
    Decision, InstanceStatus, StartWorkflow, WorkflowCommand, WorkflowEvent, WorkflowInstance,
    WorkflowInstanceId,
};
pub use resolver::{ApproverResolver, RoleDirectory};
