//! Import of externally generated tree documents
//!
//! An AI provider (or any other tool) can produce a full tree as JSON: name,
//! description, tags, and skills carrying negative placeholder ids. The
//! document is validated here — same root invariant as a regular save, plus
//! placeholder-only ids — before it may be turned into a save call against an
//! existing tree. A document that fails any check is discarded whole; nothing
//! is partially imported.

use crate::db::{DbError, Result};
use crate::save::{is_root_skill_valid, SkillSave, TreeSave};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A generated tree document, as produced by an external generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTree {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub skills: Vec<GeneratedSkill>,
}

/// A skill inside a generated document; ids are client-local placeholders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSkill {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_root: bool,
    #[serde(default)]
    pub unlock_ids: Vec<i32>,
}

impl GeneratedTree {
    /// Parse a document from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DbError::Validation(format!("malformed generated tree: {}", e)))
    }

    /// Validate the document's shape.
    ///
    /// Every id must be a fresh negative placeholder, unique within the
    /// document; every unlock id must point at a skill in the document; the
    /// root structure must pass the same check a manual save gets.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DbError::Validation(
                "generated tree has an empty name".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for skill in &self.skills {
            if skill.id >= 0 {
                return Err(DbError::Validation(format!(
                    "generated skill '{}' must use a negative placeholder id, got {}",
                    skill.name, skill.id
                )));
            }
            if !seen.insert(skill.id) {
                return Err(DbError::Validation(format!(
                    "duplicate placeholder id {} in generated tree",
                    skill.id
                )));
            }
        }
        for skill in &self.skills {
            for unlock in &skill.unlock_ids {
                if !seen.contains(unlock) {
                    return Err(DbError::Validation(format!(
                        "unlock id {} does not refer to a skill in the document",
                        unlock
                    )));
                }
            }
        }

        let as_saves = self.to_skill_saves();
        if !is_root_skill_valid(&as_saves) {
            return Err(DbError::Validation(
                "generated tree must have exactly one root skill that is never an unlock target"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Convert a validated document into a save call against `tree_id`
    pub fn into_tree_save(self, tree_id: i32) -> Result<TreeSave> {
        self.validate()?;
        let skills = self.to_skill_saves();
        Ok(TreeSave {
            id: tree_id,
            name: self.name,
            description: self.description,
            tags: self.tags,
            skills,
        })
    }

    fn to_skill_saves(&self) -> Vec<SkillSave> {
        self.skills
            .iter()
            .map(|s| SkillSave {
                id: s.id,
                name: s.name.clone(),
                description: s.description.clone(),
                is_root: s.is_root,
                linked_tree_id: None,
                unlock_ids: s.unlock_ids.clone(),
            })
            .collect()
    }
}
