//! Transactional whole-tree save
//!
//! The client sends the full desired state of a tree: metadata, tags, and
//! every skill with its unlock edges. Skills the client just created carry
//! negative placeholder ids; everything is reconciled against durable ids in
//! one transaction. Afterward the tree's skill set and edge set exactly equal
//! the desired state, or nothing changed at all.

use crate::db::{
    last_insert_rowid, now_utc, Database, DbError, NewSkill, NewSkillDependency, Result,
    SkillRow, SkillTreeRow,
};
use crate::schema::{skill_dependencies, skill_trees, skills};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Desired state of one skill within a save call.
///
/// `id < 0` is a client-local placeholder for a skill that does not exist
/// yet; `id > 0` refers to a persisted skill. Unlock ids may themselves be
/// placeholders referring to other skills in the same call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSave {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_root: bool,
    #[serde(default)]
    pub linked_tree_id: Option<i32>,
    #[serde(default)]
    pub unlock_ids: Vec<i32>,
}

/// Full desired state of a tree for one save call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSave {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub skills: Vec<SkillSave>,
}

/// Placeholder-to-durable id mapping built during a save.
///
/// Inserting the new skills first and recording their assigned rowids here
/// lets the edge-rewrite stage treat every id uniformly: placeholders map,
/// durable ids pass through.
#[derive(Debug, Default)]
pub struct IdMap {
    map: HashMap<i32, i32>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the durable id assigned to a placeholder
    pub fn record(&mut self, placeholder: i32, durable: i32) {
        self.map.insert(placeholder, durable);
    }

    /// Map a placeholder to its durable id; ids with no entry pass through
    /// unchanged (they were already durable)
    pub fn resolve(&self, id: i32) -> i32 {
        *self.map.get(&id).unwrap_or(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Root-structure validation:
///
/// - an empty list is valid (a tree may be saved empty)
/// - a non-empty list needs exactly one skill with `is_root = true`
/// - the root's id must not appear in any skill's unlock list
///
/// This deliberately only guards the direct root-as-target case; deeper
/// cycles between non-root skills are not detected.
pub fn is_root_skill_valid(skills: &[SkillSave]) -> bool {
    let root_count = skills.iter().filter(|s| s.is_root).count();
    if root_count > 1 || (root_count == 0 && !skills.is_empty()) {
        return false;
    }
    if let Some(root) = skills.iter().find(|s| s.is_root) {
        if skills.iter().any(|s| s.unlock_ids.contains(&root.id)) {
            return false;
        }
    }
    true
}

impl Database {
    /// Persist the full desired state of a tree, atomically.
    ///
    /// Validation happens before any mutation; every mutation runs inside one
    /// transaction, so a failure at any step (missing tree, dangling skill
    /// id, name collision) leaves the tree exactly as it was.
    pub fn save_tree(&self, save: &TreeSave) -> Result<()> {
        if !is_root_skill_valid(&save.skills) {
            return Err(DbError::Validation(
                "there must be exactly one root skill and it cannot be an unlock of another skill"
                    .to_string(),
            ));
        }
        let tag_names = crate::tags::normalize_tags(&save.tags)?;

        let mut conn = self.get_conn()?;
        conn.transaction::<_, DbError, _>(|conn| {
            // The tree must already exist; saving never creates one
            skill_trees::table
                .filter(skill_trees::id.eq(save.id))
                .first::<SkillTreeRow>(conn)
                .optional()?
                .ok_or_else(|| DbError::NotFound(format!("skill tree {} not found", save.id)))?;

            diesel::update(skill_trees::table.filter(skill_trees::id.eq(save.id)))
                .set((
                    skill_trees::name.eq(&save.name),
                    skill_trees::description.eq(save.description.as_deref()),
                ))
                .execute(conn)
                .map_err(|e| match DbError::from(e) {
                    DbError::Conflict(_) => DbError::Conflict(format!(
                        "a skill tree named '{}' already exists",
                        save.name
                    )),
                    other => other,
                })?;

            // If the root moved, drop the flag on the previous root so the
            // one-root-per-tree index never sees two simultaneously
            if let Some(desired_root) = save.skills.iter().find(|s| s.is_root) {
                let current_root = skills::table
                    .filter(skills::skill_tree_id.eq(save.id))
                    .filter(skills::is_root.eq(true))
                    .first::<SkillRow>(conn)
                    .optional()?;
                if let Some(current) = current_root {
                    if current.id != desired_root.id {
                        diesel::update(skills::table.filter(skills::id.eq(current.id)))
                            .set(skills::is_root.eq(false))
                            .execute(conn)?;
                    }
                }
            }

            let now = now_utc();
            let mut ids = IdMap::new();
            let mut final_ids: HashSet<i32> = HashSet::new();

            // New skills first: inserting assigns the durable ids the
            // edge-rewrite stage needs
            for skill in save.skills.iter().filter(|s| s.id < 0) {
                let new_skill = NewSkill {
                    name: &skill.name,
                    description: skill.description.as_deref(),
                    skill_tree_id: save.id,
                    is_root: skill.is_root,
                    linked_tree_id: skill.linked_tree_id,
                    created_at: &now,
                };
                diesel::insert_into(skills::table)
                    .values(&new_skill)
                    .execute(conn)?;
                let durable = last_insert_rowid(conn)?;
                ids.record(skill.id, durable);
                final_ids.insert(durable);
            }

            // Existing skills: overwrite scalar fields and tree reference
            for skill in save.skills.iter().filter(|s| s.id > 0) {
                let exists = skills::table
                    .filter(skills::id.eq(skill.id))
                    .first::<SkillRow>(conn)
                    .optional()?;
                if exists.is_none() {
                    return Err(DbError::NotFound(format!(
                        "skill {} not found",
                        skill.id
                    )));
                }
                diesel::update(skills::table.filter(skills::id.eq(skill.id)))
                    .set((
                        skills::name.eq(&skill.name),
                        skills::description.eq(skill.description.as_deref()),
                        skills::skill_tree_id.eq(save.id),
                        skills::is_root.eq(skill.is_root),
                        skills::linked_tree_id.eq(skill.linked_tree_id),
                    ))
                    .execute(conn)?;
                final_ids.insert(skill.id);
            }

            // Full replace of every desired skill's outgoing edge set, with
            // placeholder unlock ids remapped through the IdMap
            for skill in &save.skills {
                let source = ids.resolve(skill.id);
                diesel::delete(
                    skill_dependencies::table.filter(skill_dependencies::skill_id.eq(source)),
                )
                .execute(conn)?;
                for unlock in &skill.unlock_ids {
                    let edge = NewSkillDependency {
                        skill_id: source,
                        unlock_id: ids.resolve(*unlock),
                    };
                    diesel::insert_into(skill_dependencies::table)
                        .values(&edge)
                        .execute(conn)?;
                }
            }

            // Orphan removal: skills of this tree absent from the desired
            // list go away, their edges cascading
            let current: Vec<i32> = skills::table
                .filter(skills::skill_tree_id.eq(save.id))
                .select(skills::id)
                .load(conn)?;
            for skill_id in current {
                if !final_ids.contains(&skill_id) {
                    diesel::delete(skills::table.filter(skills::id.eq(skill_id)))
                        .execute(conn)?;
                }
            }

            crate::tags::sync_tags(conn, save.id, &tag_names)?;
            Ok(())
        })
    }
}
