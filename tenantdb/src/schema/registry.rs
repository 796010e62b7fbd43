use std::collections::HashSet;

use super::error::MigrationError;

/// Alias accepted wherever a target revision is expected.
pub const HEAD: &str = "head";

/// One schema revision and how to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub revision: String,
    /// Revision this one applies on top of, `None` for the first one.
    pub down_revision: Option<String>,
    pub description: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl Migration {
    pub fn new(revision: impl Into<String>, down_revision: Option<&str>, description: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            down_revision: down_revision.map(str::to_string),
            description: description.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn up(mut self, statement: impl Into<String>) -> Self {
        self.up.push(statement.into());
        self
    }

    pub fn down(mut self, statement: impl Into<String>) -> Self {
        self.down.push(statement.into());
        self
    }
}

/// Ordered, validated chain of migrations.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Validates that `migrations` form one contiguous chain in order.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        if migrations.is_empty() {
            return Err(MigrationError::InvalidRegistry("no migrations registered".to_string()));
        }

        let mut seen = HashSet::new();
        let mut parent: Option<&str> = None;
        for migration in &migrations {
            if migration.revision.is_empty() || migration.revision == HEAD {
                return Err(MigrationError::InvalidRegistry(format!(
                    "'{}' is not a valid revision id",
                    migration.revision
                )));
            }
            if !seen.insert(migration.revision.as_str()) {
                return Err(MigrationError::InvalidRegistry(format!("duplicate revision '{}'", migration.revision)));
            }
            if migration.down_revision.as_deref() != parent {
                return Err(MigrationError::InvalidRegistry(format!(
                    "revision '{}' has parent {:?}, expected {:?}",
                    migration.revision, migration.down_revision, parent
                )));
            }
            parent = Some(migration.revision.as_str());
        }

        Ok(Self { migrations })
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn head(&self) -> &str {
        // non-empty by construction
        self.migrations.last().map(|m| m.revision.as_str()).unwrap_or_default()
    }

    pub fn get(&self, revision: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.revision == revision)
    }

    pub fn contains(&self, revision: &str) -> bool {
        self.position(revision).is_some()
    }

    fn position(&self, revision: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.revision == revision)
    }

    fn require_position(&self, revision: &str) -> Result<usize, MigrationError> {
        self.position(revision).ok_or_else(|| MigrationError::UnknownRevision(revision.to_string()))
    }

    /// Resolves the `head` alias and checks that the revision exists.
    pub fn resolve(&self, target: &str) -> Result<String, MigrationError> {
        if target == HEAD {
            return Ok(self.head().to_string());
        }
        self.require_position(target)?;
        Ok(target.to_string())
    }

    /// Migrations to apply, ascending, to go from `current` (none = empty database) to `target`.
    pub fn migrations_between(&self, current: Option<&str>, target: &str) -> Result<Vec<&Migration>, MigrationError> {
        let target_idx = self.require_position(target)?;
        let start = match current {
            None => 0,
            Some(current) => {
                let current_idx = self.require_position(current)?;
                if target_idx < current_idx {
                    return Err(MigrationError::TargetBehindCurrent {
                        current: current.to_string(),
                        target: target.to_string(),
                    });
                }
                current_idx + 1
            }
        };
        Ok(self.migrations[start..=target_idx].iter().collect())
    }

    /// Migrations to undo, descending, to go from `current` back to `target`.
    ///
    /// Those are the revisions after `target` up to and including `current`.
    pub fn rollback_path(&self, current: &str, target: &str) -> Result<Vec<&Migration>, MigrationError> {
        let current_idx = self.require_position(current)?;
        let target_idx = self.require_position(target)?;
        if target_idx > current_idx {
            return Err(MigrationError::TargetAheadOfCurrent {
                current: current.to_string(),
                target: target.to_string(),
            });
        }
        Ok(self.migrations[target_idx + 1..=current_idx].iter().rev().collect())
    }
}
