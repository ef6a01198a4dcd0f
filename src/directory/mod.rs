//! Read-only view of the employee directory: which employee holds a tag,
//! and which blocks exist.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;

use crate::error::DirectoryError;
use crate::model::employee::Employee;

/// Result of resolving a physical tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Employee(String),
    Unknown,
}

#[async_trait]
pub trait TagDirectory: Send + Sync {
    /// Resolve a tag to the active employee holding it.
    async fn resolve(&self, tag: &str) -> Result<Resolution, DirectoryError>;

    async fn employee(&self, employee_id: &str) -> Result<Option<Employee>, DirectoryError>;

    /// Whether `block` is a registered location.
    async fn block_registered(&self, block: &str) -> Result<bool, DirectoryError>;
}
