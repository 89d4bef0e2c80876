//! Strongly-typed identifiers used across the stock core.

pub use uuid::Uuid;

/// Declare a UUID-backed identifier newtype.
///
/// Generated types are `Copy`, hashable, serde-transparent, and parse from
/// their canonical string form (parse failures become
/// [`DomainError::InvalidId`](crate::DomainError::InvalidId)).
#[macro_export]
macro_rules! typed_id {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t($crate::id::Uuid);

        impl $t {
            /// Create a new identifier (UUIDv7, time-ordered).
            pub fn new() -> Self {
                Self($crate::id::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: $crate::id::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &$crate::id::Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$crate::id::Uuid> for $t {
            fn from(value: $crate::id::Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for $crate::id::Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = <$crate::id::Uuid as core::str::FromStr>::from_str(s)
                    .map_err(|e| $crate::DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

typed_id!(
    /// Identifier of a tenant (company-level isolation boundary).
    TenantId,
    "TenantId"
);

typed_id!(
    /// Identifier of a user (actor identity).
    UserId,
    "UserId"
);

typed_id!(
    /// Identifier of a branch (location-level scoping unit inside a tenant).
    BranchId,
    "BranchId"
);

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn parses_canonical_form() {
        let id = BranchId::new();
        let parsed = BranchId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_failure_names_the_type() {
        let err = UserId::from_str("not-a-uuid").unwrap_err();
        assert!(err.to_string().contains("UserId"));
    }
}
