//! Workflow instance state machine.
//!
//! Per stage: `pending -> approved | rejected`. Approving the last stage
//! approves the instance; rejecting any stage rejects it immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{
    typed_id, Aggregate, AggregateRoot, BranchId, BranchOwned, DomainError, DomainResult, TenantId,
    UserId,
};
use branchledger_events::Event;

use crate::approval::{WorkflowApproval, WorkflowApprovalId};
use crate::definition::{WorkflowDefinition, WorkflowDefinitionId, WorkflowStage};

typed_id!(WorkflowInstanceId, "WorkflowInstanceId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWorkflow {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub entity_id: String,
    pub initiated_by: UserId,
    /// Approver chosen for the first stage.
    pub first_approver: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowCommand {
    /// Decide on `approval`, the stored row as last read by the caller.
    Decide {
        approval: WorkflowApproval,
        actor: UserId,
        decision: Decision,
        comment: Option<String>,
        /// Approver for the following stage, resolved by the caller.
        next_approver: Option<UserId>,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Started {
        instance_id: WorkflowInstanceId,
        definition_id: WorkflowDefinitionId,
        entity_type: String,
        entity_id: String,
        stage: String,
        approval_id: WorkflowApprovalId,
        approver_id: Option<UserId>,
        initiated_by: UserId,
        occurred_at: DateTime<Utc>,
    },
    StageDecided {
        instance_id: WorkflowInstanceId,
        approval_id: WorkflowApprovalId,
        stage: String,
        decision: Decision,
        decided_by: UserId,
        comment: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    StageAdvanced {
        instance_id: WorkflowInstanceId,
        from_stage: String,
        to_stage: String,
        approval_id: WorkflowApprovalId,
        approver_id: Option<UserId>,
        occurred_at: DateTime<Utc>,
    },
    Completed {
        instance_id: WorkflowInstanceId,
        status: InstanceStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for WorkflowEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::Started { .. } => "workflow.instance.started",
            WorkflowEvent::StageDecided { .. } => "workflow.stage.decided",
            WorkflowEvent::StageAdvanced { .. } => "workflow.stage.advanced",
            WorkflowEvent::Completed { .. } => "workflow.instance.completed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WorkflowEvent::Started { occurred_at, .. }
            | WorkflowEvent::StageDecided { occurred_at, .. }
            | WorkflowEvent::StageAdvanced { occurred_at, .. }
            | WorkflowEvent::Completed { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Aggregate root: WorkflowInstance.
///
/// Stages are copied from the definition at start, so editing a definition
/// never changes runs already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    id: WorkflowInstanceId,
    tenant_id: TenantId,
    branch_id: BranchId,
    definition_id: WorkflowDefinitionId,
    module_name: String,
    entity_type: String,
    entity_id: String,
    stages: Vec<WorkflowStage>,
    current_stage: String,
    status: InstanceStatus,
    initiated_by: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl WorkflowInstance {
    /// Open a run at the definition's first stage, with its pending approval.
    pub fn start(
        definition: &WorkflowDefinition,
        cmd: StartWorkflow,
    ) -> DomainResult<(Self, WorkflowApproval, WorkflowEvent)> {
        if cmd.entity_id.trim().is_empty() {
            return Err(DomainError::validation("entity id cannot be empty"));
        }
        let first = definition
            .first_stage()
            .ok_or_else(|| DomainError::invariant("workflow definition has no stages"))?;

        let id = WorkflowInstanceId::new();
        let approval = WorkflowApproval::pending(
            WorkflowApprovalId::new(),
            id,
            cmd.branch_id,
            first.name.clone(),
            cmd.first_approver,
            cmd.occurred_at,
        );
        let event = WorkflowEvent::Started {
            instance_id: id,
            definition_id: definition.id,
            entity_type: definition.entity_type.clone(),
            entity_id: cmd.entity_id.clone(),
            stage: first.name.clone(),
            approval_id: approval.id,
            approver_id: cmd.first_approver,
            initiated_by: cmd.initiated_by,
            occurred_at: cmd.occurred_at,
        };
        let instance = Self {
            id,
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            definition_id: definition.id,
            module_name: definition.module_name.clone(),
            entity_type: definition.entity_type.clone(),
            entity_id: cmd.entity_id,
            stages: definition.stages().to_vec(),
            current_stage: first.name.clone(),
            status: InstanceStatus::Pending,
            initiated_by: cmd.initiated_by,
            created_at: cmd.occurred_at,
            updated_at: cmd.occurred_at,
            version: 1,
        };

        Ok((instance, approval, event))
    }

    pub fn id_typed(&self) -> WorkflowInstanceId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn current_stage(&self) -> &str {
        &self.current_stage
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn initiated_by(&self) -> UserId {
        self.initiated_by
    }

    pub fn is_pending(&self) -> bool {
        self.status == InstanceStatus::Pending
    }

    /// Stage after the current one, `None` at the last stage.
    pub fn next_stage(&self) -> Option<&WorkflowStage> {
        let pos = self.stages.iter().position(|s| s.name == self.current_stage)?;
        self.stages.get(pos + 1)
    }

    /// Rules every decision must pass, in the order they are reported.
    fn check_decision(&self, approval: &WorkflowApproval, actor: UserId) -> DomainResult<()> {
        if approval.instance_id != self.id {
            return Err(DomainError::validation("approval belongs to another workflow instance"));
        }
        if actor == self.initiated_by {
            return Err(DomainError::SelfApprovalError);
        }
        if !approval.is_pending() || !self.is_pending() {
            return Err(DomainError::AlreadyDecided);
        }
        if approval.stage_name != self.current_stage {
            return Err(DomainError::StageMismatch {
                approval_stage: approval.stage_name.clone(),
                current_stage: self.current_stage.clone(),
            });
        }
        Ok(())
    }
}

impl AggregateRoot for WorkflowInstance {
    type Id = WorkflowInstanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl BranchOwned for WorkflowInstance {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}

impl Aggregate for WorkflowInstance {
    type Command = WorkflowCommand;
    type Event = WorkflowEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WorkflowEvent::Started { .. } => {}
            WorkflowEvent::StageDecided { occurred_at, .. } => {
                self.updated_at = *occurred_at;
            }
            WorkflowEvent::StageAdvanced {
                to_stage,
                occurred_at,
                ..
            } => {
                self.current_stage = to_stage.clone();
                self.updated_at = *occurred_at;
            }
            WorkflowEvent::Completed {
                status,
                occurred_at,
                ..
            } => {
                self.status = *status;
                self.updated_at = *occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WorkflowCommand::Decide {
                approval,
                actor,
                decision,
                comment,
                next_approver,
                occurred_at,
            } => {
                self.check_decision(approval, *actor)?;

                let mut events = vec![WorkflowEvent::StageDecided {
                    instance_id: self.id,
                    approval_id: approval.id,
                    stage: approval.stage_name.clone(),
                    decision: *decision,
                    decided_by: *actor,
                    comment: comment.clone(),
                    occurred_at: *occurred_at,
                }];

                let next = match decision {
                    Decision::Approve => self.next_stage(),
                    Decision::Reject => None,
                };
                match (decision, next) {
                    (Decision::Approve, Some(stage)) => events.push(WorkflowEvent::StageAdvanced {
                        instance_id: self.id,
                        from_stage: self.current_stage.clone(),
                        to_stage: stage.name.clone(),
                        approval_id: WorkflowApprovalId::new(),
                        approver_id: *next_approver,
                        occurred_at: *occurred_at,
                    }),
                    (Decision::Approve, None) => events.push(WorkflowEvent::Completed {
                        instance_id: self.id,
                        status: InstanceStatus::Approved,
                        occurred_at: *occurred_at,
                    }),
                    (Decision::Reject, _) => events.push(WorkflowEvent::Completed {
                        instance_id: self.id,
                        status: InstanceStatus::Rejected,
                        occurred_at: *occurred_at,
                    }),
                }

                Ok(events)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchledger_core::execute;

    fn definition(stages: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition::new(
            TenantId::new(),
            "purchasing",
            "purchase_order",
            stages
                .iter()
                .enumerate()
                .map(|(i, name)| WorkflowStage::new(*name, i as u32, "manager"))
                .collect(),
        )
        .unwrap()
    }

    fn start(def: &WorkflowDefinition, initiator: UserId, approver: UserId) -> (WorkflowInstance, WorkflowApproval) {
        let (instance, approval, _) = WorkflowInstance::start(
            def,
            StartWorkflow {
                tenant_id: def.tenant_id,
                branch_id: BranchId::new(),
                entity_id: "PO-1001".into(),
                initiated_by: initiator,
                first_approver: Some(approver),
                occurred_at: Utc::now(),
            },
        )
        .unwrap();
        (instance, approval)
    }

    fn decide(actor: UserId, approval: &WorkflowApproval, decision: Decision) -> WorkflowCommand {
        WorkflowCommand::Decide {
            approval: approval.clone(),
            actor,
            decision,
            comment: None,
            next_approver: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn initiator_cannot_approve_even_when_assigned() {
        let def = definition(&["manager"]);
        let u = UserId::new();
        let (mut instance, approval) = start(&def, u, u);

        let err = execute(&mut instance, &decide(u, &approval, Decision::Approve)).unwrap_err();
        assert_eq!(err, DomainError::SelfApprovalError);
        assert!(instance.is_pending());

        execute(&mut instance, &decide(UserId::new(), &approval, Decision::Approve)).unwrap();
        assert_eq!(instance.status(), InstanceStatus::Approved);
    }

    #[test]
    fn approval_advances_through_stages() {
        let def = definition(&["branch", "finance"]);
        let (mut instance, approval) = start(&def, UserId::new(), UserId::new());

        let events = execute(&mut instance, &decide(UserId::new(), &approval, Decision::Approve)).unwrap();
        assert!(matches!(
            &events[1],
            WorkflowEvent::StageAdvanced { to_stage, .. } if to_stage == "finance"
        ));
        assert_eq!(instance.current_stage(), "finance");
        assert!(instance.is_pending());
    }

    #[test]
    fn stale_stage_approval_is_rejected() {
        let def = definition(&["branch", "finance"]);
        let (mut instance, approval) = start(&def, UserId::new(), UserId::new());
        execute(&mut instance, &decide(UserId::new(), &approval, Decision::Approve)).unwrap();

        // The first-stage row as it was before the decision was stored.
        let err = execute(&mut instance, &decide(UserId::new(), &approval, Decision::Approve)).unwrap_err();
        assert_eq!(
            err,
            DomainError::StageMismatch {
                approval_stage: "branch".into(),
                current_stage: "finance".into(),
            }
        );
    }

    #[test]
    fn decided_rows_cannot_be_decided_again() {
        let def = definition(&["only"]);
        let (mut instance, mut approval) = start(&def, UserId::new(), UserId::new());
        let who = UserId::new();
        execute(&mut instance, &decide(who, &approval, Decision::Approve)).unwrap();
        approval.record(Decision::Approve, who, None, Utc::now());

        let err = execute(&mut instance, &decide(UserId::new(), &approval, Decision::Reject)).unwrap_err();
        assert_eq!(err, DomainError::AlreadyDecided);
    }

    #[test]
    fn rejection_is_terminal_at_any_stage() {
        let def = definition(&["branch", "finance", "ceo"]);
        let (mut instance, approval) = start(&def, UserId::new(), UserId::new());
        let events = execute(&mut instance, &decide(UserId::new(), &approval, Decision::Reject)).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(instance.status(), InstanceStatus::Rejected);
        assert_eq!(instance.current_stage(), "branch");
        assert_eq!(instance.next_stage().map(|s| s.name.as_str()), Some("finance"));
    }
}
