//! Infrastructure layer: transactional storage, runtime configuration and
//! the services that tie the domain crates together.

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod services;
pub mod settings;
pub mod storage;


pub use audit::{AuditRecord, AuditSink, InMemoryAuditLog, NullAudit};
pub use config::{AppConfig, ConfigError, LogFormat};
pub use context::CoreContext;
pub use error::{ServiceError, ServiceResult, StorageError};
pub use settings::{SettingsProvider, StaticSettings};
pub use storage::{Database, InMemoryDatabase, PostgresDatabase, StorageResult, Tx};
