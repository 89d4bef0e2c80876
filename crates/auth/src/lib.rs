//! `branchledger-auth`: who is acting, what they may do, and which branches
//! they may touch.
//!
//! Decoupled from HTTP and storage: callers build an [`Actor`] from whatever
//! session mechanism they use and hand it to the services.

pub mod actor;
pub mod authorize;
pub mod permissions;
pub mod scope;

pub use actor::Actor;
pub use authorize::{authorize, ensure_tenant, AuthzError};
pub use permissions::{capabilities, Permission};
pub use scope::{ActorBranches, BranchContext, BranchScope, EntityKind, ScopeResolver};
