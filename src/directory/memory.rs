use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::directory::{Resolution, TagDirectory};
use crate::error::DirectoryError;
use crate::model::employee::Employee;

/// Shape of the JSON seed file.
#[derive(Debug, Deserialize)]
struct DirectorySeed {
    employees: Vec<Employee>,
    #[serde(default)]
    blocks: Vec<String>,
}

/// Fixed directory loaded once, e.g. from a JSON seed file.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    by_tag: HashMap<String, String>,
    by_id: HashMap<String, Employee>,
    blocks: HashSet<String>,
}

impl InMemoryDirectory {
    pub fn from_employees(employees: impl IntoIterator<Item = Employee>) -> Self {
        let mut directory = Self::default();
        for employee in employees {
            if employee.is_active {
                directory
                    .by_tag
                    .insert(employee.rfid_tag.clone(), employee.employee_id.clone());
            }
            directory.by_id.insert(employee.employee_id.clone(), employee);
        }
        directory
    }

    pub fn with_blocks<I, S>(mut self, blocks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocks.extend(blocks.into_iter().map(Into::into));
        self
    }

    /// Load `{"employees": [...], "blocks": [...]}` from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading tag directory {}", path.display()))?;
        let seed: DirectorySeed = serde_json::from_str(&raw)
            .with_context(|| format!("parsing tag directory {}", path.display()))?;
        Ok(Self::from_employees(seed.employees).with_blocks(seed.blocks))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[async_trait]
impl TagDirectory for InMemoryDirectory {
    async fn resolve(&self, tag: &str) -> Result<Resolution, DirectoryError> {
        Ok(match self.by_tag.get(tag) {
            Some(employee_id) => Resolution::Employee(employee_id.clone()),
            None => Resolution::Unknown,
        })
    }

    async fn employee(&self, employee_id: &str) -> Result<Option<Employee>, DirectoryError> {
        Ok(self.by_id.get(employee_id).cloned())
    }

    async fn block_registered(&self, block: &str) -> Result<bool, DirectoryError> {
        Ok(self.blocks.contains(block))
    }
}
