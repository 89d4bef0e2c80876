//! Multi-stage approval runs over arbitrary entities.
//!
//! Deciding is a compare-and-swap on the approval row: the caller passes the
//! version it read, and exactly one of two concurrent deciders wins.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use branchledger_auth::{capabilities, Actor, EntityKind};
use branchledger_core::{execute, AggregateRoot, BranchId, BranchOwned, DomainError, ExpectedVersion};
use branchledger_workflow::{
    ApproverResolver, Decision, StartWorkflow, WorkflowApproval, WorkflowApprovalId, WorkflowCommand,
    WorkflowDefinition, WorkflowEvent, WorkflowInstance, WorkflowInstanceId, WorkflowStage,
};

use crate::audit::{audited, AuditRecord};
use crate::context::{permit, CoreContext, Outbox};
use crate::error::{ServiceError, ServiceResult, StorageError};
use crate::storage::Tx;

#[derive(Clone)]
pub struct WorkflowService {
    ctx: CoreContext,
    approvers: Arc<dyn ApproverResolver>,
}

impl core::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkflowService").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}

impl WorkflowService {
    pub fn new(ctx: CoreContext, approvers: Arc<dyn ApproverResolver>) -> Self {
        Self { ctx, approvers }
    }

    /// Register the stages for `(module_name, entity_type)`. One definition
    /// per pair and tenant.
    #[instrument(skip(self, actor, stages), fields(tenant_id = %actor.tenant_id))]
    pub fn define_workflow(
        &self,
        actor: &Actor,
        module_name: &str,
        entity_type: &str,
        stages: Vec<WorkflowStage>,
    ) -> ServiceResult<WorkflowDefinition> {
        permit(actor, &capabilities::WORKFLOW_DEFINE, actor.tenant_id)?;
        let definition = WorkflowDefinition::new(actor.tenant_id, module_name, entity_type, stages)?;
        self.ctx
            .db()
            .transaction(|tx| tx.insert_workflow_definition(definition.clone()))
            .map_err(|err| match err {
                StorageError::UniqueViolation { .. } => ServiceError::from(DomainError::conflict(
                    format!("workflow already defined for {module_name}/{entity_type}"),
                )),
                other => other.into(),
            })?;
        info!(definition_id = %definition.id, stages = definition.stages().len(), "workflow defined");
        Ok(definition)
    }

    /// Open a run for an entity. At most one pending run per entity.
    #[instrument(skip(self, actor), fields(tenant_id = %actor.tenant_id))]
    pub fn start_workflow(
        &self,
        actor: &Actor,
        module_name: &str,
        entity_type: &str,
        entity_id: &str,
        branch_id: BranchId,
    ) -> ServiceResult<(WorkflowInstance, WorkflowApproval)> {
        permit(actor, &capabilities::WORKFLOW_START, actor.tenant_id)?;
        self.ctx.scope(actor).ensure_write(branch_id)?;
        let now = Utc::now();

        let mut outbox = Outbox::default();
        let started = self
            .ctx
            .db()
            .transaction(|tx| -> ServiceResult<(WorkflowInstance, WorkflowApproval)> {
                let definition = tx
                    .workflow_definition(actor.tenant_id, module_name, entity_type)?
                    .ok_or(StorageError::NotFound { entity: "workflow definition" })?;
                let first_approver = definition
                    .first_stage()
                    .and_then(|stage| self.approvers.resolve(branch_id, &stage.approver_role, actor.user_id));

                let (instance, approval, event) = WorkflowInstance::start(
                    &definition,
                    StartWorkflow {
                        tenant_id: actor.tenant_id,
                        branch_id,
                        entity_id: entity_id.to_string(),
                        initiated_by: actor.user_id,
                        first_approver,
                        occurred_at: now,
                    },
                )?;
                tx.insert_workflow_instance(instance.clone())?;
                tx.insert_workflow_approval(approval.clone())?;
                outbox.push(actor.tenant_id, branch_id, &event);
                Ok((instance, approval))
            })
            .map_err(|err| {
                if err.is_unique_violation() {
                    ServiceError::from(DomainError::conflict(format!(
                        "{entity_type} {entity_id} already has a pending workflow"
                    )))
                } else {
                    err
                }
            })?;
        self.ctx.publish(outbox);

        let (instance, approval) = &started;
        if approval.approver_id.is_none() {
            warn!(instance_id = %instance.id_typed(), stage = %approval.stage_name, "no approver found for stage");
        }
        info!(instance_id = %instance.id_typed(), "workflow started");
        Ok(started)
    }

    pub fn approve(
        &self,
        actor: &Actor,
        approval_id: WorkflowApprovalId,
        expected: ExpectedVersion,
        comment: Option<String>,
    ) -> ServiceResult<WorkflowInstance> {
        self.decide(actor, approval_id, expected, Decision::Approve, comment)
    }

    pub fn reject(
        &self,
        actor: &Actor,
        approval_id: WorkflowApprovalId,
        expected: ExpectedVersion,
        comment: Option<String>,
    ) -> ServiceResult<WorkflowInstance> {
        self.decide(actor, approval_id, expected, Decision::Reject, comment)
    }

    pub fn get_instance(
        &self,
        actor: &Actor,
        instance_id: WorkflowInstanceId,
    ) -> ServiceResult<WorkflowInstance> {
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<WorkflowInstance> {
            let instance = instance_in(t, actor, instance_id)?;
            scope.ensure_read(EntityKind::WorkflowInstance, &instance)?;
            Ok(instance)
        })
    }

    /// Approval rows of a run, oldest first.
    pub fn approvals_for(
        &self,
        actor: &Actor,
        instance_id: WorkflowInstanceId,
    ) -> ServiceResult<Vec<WorkflowApproval>> {
        let scope = self.ctx.scope(actor);
        self.ctx.db().read(|t| -> ServiceResult<Vec<WorkflowApproval>> {
            let instance = instance_in(t, actor, instance_id)?;
            scope.ensure_read(EntityKind::WorkflowInstance, &instance)?;
            Ok(t.approvals_for_instance(instance_id)?)
        })
    }

    #[instrument(skip(self, actor, comment), fields(tenant_id = %actor.tenant_id))]
    fn decide(
        &self,
        actor: &Actor,
        approval_id: WorkflowApprovalId,
        expected: ExpectedVersion,
        decision: Decision,
        comment: Option<String>,
    ) -> ServiceResult<WorkflowInstance> {
        permit(actor, &capabilities::WORKFLOW_DECIDE, actor.tenant_id)?;
        let scope = self.ctx.scope(actor);
        let now = Utc::now();

        let mut outbox = Outbox::default();
        let instance = audited(
            self.ctx.audit(),
            || {
                self.ctx.db().transaction(|tx| -> ServiceResult<WorkflowInstance> {
                    let mut approval = tx
                        .workflow_approval(approval_id)?
                        .ok_or(StorageError::NotFound { entity: "workflow approval" })?;
                    let before = instance_in(tx, actor, approval.instance_id)?;
                    scope.ensure_write(before.branch_id())?;
                    expected.check(approval.version)?;

                    let next_approver = match decision {
                        Decision::Approve => before.next_stage().and_then(|stage| {
                            self.approvers
                                .resolve(before.branch_id(), &stage.approver_role, before.initiated_by())
                        }),
                        Decision::Reject => None,
                    };

                    let mut after = before.clone();
                    let events = execute(
                        &mut after,
                        &WorkflowCommand::Decide {
                            approval: approval.clone(),
                            actor: actor.user_id,
                            decision,
                            comment: comment.clone(),
                            next_approver,
                            occurred_at: now,
                        },
                    )?;

                    for event in &events {
                        match event {
                            WorkflowEvent::StageDecided { decided_by, comment, .. } => {
                                let read_version = approval.version;
                                approval.record(decision, *decided_by, comment.clone(), now);
                                tx.update_workflow_approval(approval.clone(), read_version)?;
                            }
                            WorkflowEvent::StageAdvanced {
                                to_stage,
                                approval_id,
                                approver_id,
                                ..
                            } => {
                                tx.insert_workflow_approval(WorkflowApproval::pending(
                                    *approval_id,
                                    before.id_typed(),
                                    before.branch_id(),
                                    to_stage.clone(),
                                    *approver_id,
                                    now,
                                ))?;
                            }
                            WorkflowEvent::Started { .. } | WorkflowEvent::Completed { .. } => {}
                        }
                        outbox.push(actor.tenant_id, before.branch_id(), event);
                    }
                    tx.update_workflow_instance(after.clone(), before.version())?;
                    Ok(after)
                })
            },
            |instance| AuditRecord {
                tenant_id: actor.tenant_id,
                branch_id: instance.branch_id(),
                actor: actor.user_id,
                action: capabilities::WORKFLOW_DECIDE.as_str().to_string(),
                entity_id: approval_id.to_string(),
                at: now,
            },
        )?;
        self.ctx.publish(outbox);

        info!(
            instance_id = %instance.id_typed(),
            status = ?instance.status(),
            stage = %instance.current_stage(),
            "workflow decision recorded"
        );
        Ok(instance)
    }
}

fn instance_in(
    t: &mut dyn Tx,
    actor: &Actor,
    instance_id: WorkflowInstanceId,
) -> ServiceResult<WorkflowInstance> {
    t.workflow_instance(instance_id)?
        .filter(|i| i.tenant_id() == actor.tenant_id)
        .ok_or_else(|| StorageError::NotFound { entity: "workflow instance" }.into())
}
