//! `branchledger-core`: shared domain building blocks.
//!
//! Pure primitives only: identifiers, the domain error, aggregate traits and
//! exact-decimal value types. No storage or transport concerns.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{execute, Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::{BranchOwned, Entity};
pub use error::{DomainError, DomainResult};
pub use id::{BranchId, TenantId, UserId};
pub use money::{Money, Percentage, Quantity, MONEY_SCALE};
pub use value_object::ValueObject;

pub use rust_decimal::Decimal;
