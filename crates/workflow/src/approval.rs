use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchledger_core::{typed_id, BranchId, BranchOwned, Entity, UserId};

use crate::instance::{Decision, WorkflowInstanceId};

typed_id!(WorkflowApprovalId, "WorkflowApprovalId");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One stage's sign-off request within an instance.
///
/// `version` is the compare-and-swap token used when a decision is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowApproval {
    pub id: WorkflowApprovalId,
    pub instance_id: WorkflowInstanceId,
    pub branch_id: BranchId,
    pub stage_name: String,
    /// Assigned approver, if the resolver found one. Any holder of the
    /// decide capability other than the initiator may act on the row.
    pub approver_id: Option<UserId>,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<UserId>,
    pub comment: Option<String>,
    pub version: u64,
}

impl WorkflowApproval {
    pub fn pending(
        id: WorkflowApprovalId,
        instance_id: WorkflowInstanceId,
        branch_id: BranchId,
        stage_name: impl Into<String>,
        approver_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            instance_id,
            branch_id,
            stage_name: stage_name.into(),
            approver_id,
            status: ApprovalStatus::Pending,
            requested_at: at,
            decided_at: None,
            decided_by: None,
            comment: None,
            version: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn record(
        &mut self,
        decision: Decision,
        by: UserId,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        };
        self.decided_by = Some(by);
        self.decided_at = Some(at);
        self.comment = comment;
        self.version += 1;
    }
}

impl Entity for WorkflowApproval {
    type Id = WorkflowApprovalId;

    fn id(&self) -> &WorkflowApprovalId {
        &self.id
    }
}

impl BranchOwned for WorkflowApproval {
    fn branch_id(&self) -> BranchId {
        self.branch_id
    }
}
