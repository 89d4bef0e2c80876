use std::collections::HashMap;

use branchledger_core::{BranchId, UserId};

/// Chooses who is asked to approve a stage.
pub trait ApproverResolver: Send + Sync {
    fn resolve(&self, branch_id: BranchId, role: &str, initiated_by: UserId) -> Option<UserId>;
}

/// Role holders per branch, in registration order.
///
/// Prefers a holder other than the initiator; falls back to the initiator
/// when they are the only holder (the decision-time check still blocks
/// them from deciding).
#[derive(Debug, Default, Clone)]
pub struct RoleDirectory {
    holders: HashMap<(BranchId, String), Vec<UserId>>,
}

impl RoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, branch_id: BranchId, role: impl Into<String>, user: UserId) {
        let users = self.holders.entry((branch_id, role.into())).or_default();
        if !users.contains(&user) {
            users.push(user);
        }
    }
}

impl ApproverResolver for RoleDirectory {
    fn resolve(&self, branch_id: BranchId, role: &str, initiated_by: UserId) -> Option<UserId> {
        let users = self.holders.get(&(branch_id, role.to_string()))?;
        users
            .iter()
            .copied()
            .find(|u| *u != initiated_by)
            .or_else(|| users.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_someone_other_than_the_initiator() {
        let branch = BranchId::new();
        let (a, b) = (UserId::new(), UserId::new());
        let mut dir = RoleDirectory::new();
        dir.assign(branch, "manager", a);
        dir.assign(branch, "manager", b);

        assert_eq!(dir.resolve(branch, "manager", a), Some(b));
        assert_eq!(dir.resolve(branch, "manager", UserId::new()), Some(a));
        assert_eq!(dir.resolve(BranchId::new(), "manager", a), None);
    }
}
