//! Arbor - skill-tree authoring and discovery backend
//!
//! Users author directed dependency graphs of skills grouped into named
//! trees, tag and favorite them, and mark skills as acquired. Saving a tree
//! is a single transactional operation that reconciles client-local
//! placeholder ids against durable ids and replaces the whole edge set.
//!
//! # Tree shape
//!
//! A non-empty tree has exactly one root skill; the root is never the target
//! of an unlock edge. Skills unlock other skills within the same tree and may
//! point at a different tree entirely via a linked-tree reference.
//!
//! # Quick Start
//!
//! ```no_run
//! use arbor::{Database, SkillSave, TreeSave};
//!
//! let db = Database::new("arbor.db").unwrap();
//! db.create_user("alice", "alice@example.com", "secret").unwrap();
//! let tree = db.create_skill_tree("Learn Rust", None, "alice", &[]).unwrap();
//!
//! // Save the full desired state; -1/-2 are client placeholders
//! db.save_tree(&TreeSave {
//!     id: tree.id,
//!     name: "Learn Rust".to_string(),
//!     description: None,
//!     tags: vec!["rust".to_string()],
//!     skills: vec![
//!         SkillSave {
//!             id: -1,
//!             name: "Ownership".to_string(),
//!             description: None,
//!             is_root: true,
//!             linked_tree_id: None,
//!             unlock_ids: vec![-2],
//!         },
//!         SkillSave {
//!             id: -2,
//!             name: "Borrowing".to_string(),
//!             description: None,
//!             is_root: false,
//!             linked_tree_id: None,
//!             unlock_ids: vec![],
//!         },
//!     ],
//! }).unwrap();
//!
//! let detail = db.get_tree_detail(tree.id).unwrap();
//! println!("Skills: {}", detail.skills.len());
//! ```

pub mod config;
pub mod db;
pub mod import;
pub mod save;
pub mod schema;
pub mod serve;
pub mod tags;
pub mod trending;

pub use config::Config;
pub use db::{
    Database, DbError, SkillDetail, SkillRow, SkillTreeDetail, SkillTreeRow, SkillTreeSummary,
    TagRow, User, now_utc,
};
pub use import::{GeneratedSkill, GeneratedTree};
pub use save::{is_root_skill_valid, IdMap, SkillSave, TreeSave};
pub use tags::normalize_tags;
pub use trending::{TrendingTree, TrendingWindow};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify core types are re-exported from crate root
        let _ = TrendingWindow::default();
        let _ = IdMap::new();
    }
}
