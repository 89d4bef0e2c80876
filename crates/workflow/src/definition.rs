use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use branchledger_core::{typed_id, DomainError, DomainResult, TenantId};

typed_id!(WorkflowDefinitionId, "WorkflowDefinitionId");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub name: String,
    pub order: u32,
    /// Role whose holders may be assigned this stage's approval.
    pub approver_role: String,
}

impl WorkflowStage {
    pub fn new(name: impl Into<String>, order: u32, approver_role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order,
            approver_role: approver_role.into(),
        }
    }
}

/// Ordered approval stages for one `(module_name, entity_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub tenant_id: TenantId,
    pub module_name: String,
    pub entity_type: String,
    stages: Vec<WorkflowStage>,
}

impl WorkflowDefinition {
    /// Stages are sorted by `order`; names and orders must be unique.
    pub fn new(
        tenant_id: TenantId,
        module_name: impl Into<String>,
        entity_type: impl Into<String>,
        mut stages: Vec<WorkflowStage>,
    ) -> DomainResult<Self> {
        if stages.is_empty() {
            return Err(DomainError::validation("workflow needs at least one stage"));
        }
        let mut names = HashSet::new();
        let mut orders = HashSet::new();
        for stage in &stages {
            if stage.name.trim().is_empty() {
                return Err(DomainError::validation("stage name cannot be empty"));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(DomainError::validation(format!("duplicate stage '{}'", stage.name)));
            }
            if !orders.insert(stage.order) {
                return Err(DomainError::validation(format!("duplicate stage order {}", stage.order)));
            }
        }
        stages.sort_by_key(|s| s.order);

        Ok(Self {
            id: WorkflowDefinitionId::new(),
            tenant_id,
            module_name: module_name.into(),
            entity_type: entity_type.into(),
            stages,
        })
    }

    pub fn stages(&self) -> &[WorkflowStage] {
        &self.stages
    }

    pub fn first_stage(&self) -> Option<&WorkflowStage> {
        self.stages.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        let def = WorkflowDefinition::new(
            TenantId::new(),
            "purchasing",
            "purchase_order",
            vec![
                WorkflowStage::new("finance", 20, "finance_manager"),
                WorkflowStage::new("branch", 10, "branch_manager"),
            ],
        )
        .unwrap();
        assert_eq!(def.first_stage().map(|s| s.name.as_str()), Some("branch"));
        assert_eq!(def.stages()[1].name, "finance");
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let t = TenantId::new();
        assert!(WorkflowDefinition::new(t, "m", "e", vec![]).is_err());
        assert!(WorkflowDefinition::new(
            t,
            "m",
            "e",
            vec![WorkflowStage::new("a", 1, "r"), WorkflowStage::new("a", 2, "r")]
        )
        .is_err());
        assert!(WorkflowDefinition::new(
            t,
            "m",
            "e",
            vec![WorkflowStage::new("a", 1, "r"), WorkflowStage::new("b", 1, "r")]
        )
        .is_err());
    }
}
