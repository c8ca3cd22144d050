//! Tag normalization and synchronization
//!
//! Tags live in a global dictionary (`tags`) shared across trees through the
//! `skill_tree_tags` join table. Sync is a full replace of a tree's
//! associations, never a diff; tag rows themselves are created lazily and
//! never deleted.

use crate::db::{DbError, NewSkillTreeTag, NewTag, Result, TagRow};
use crate::schema::{skill_tree_tags, tags};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use lazy_static::lazy_static;
use regex::Regex;

/// Maximum length of a normalized tag name
pub const MAX_TAG_LEN: usize = 30;

/// Maximum number of tags on one tree
pub const MAX_TAGS_PER_TREE: usize = 10;

lazy_static! {
    // Lowercase alphanumeric tokens joined by single internal hyphens
    static ref TAG_NAME: Regex = Regex::new("^[a-z0-9]+(-[a-z0-9]+)*$").unwrap();
}

/// Normalize a raw tag list: trim, lowercase, dedupe preserving first
/// occurrence, then validate charset, length, and count.
pub fn normalize_tags(raw: &[String]) -> Result<Vec<String>> {
    let mut seen = Vec::new();
    for name in raw {
        let normalized = name.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if seen.contains(&normalized) {
            continue;
        }
        if normalized.len() > MAX_TAG_LEN {
            return Err(DbError::Validation(format!(
                "tag '{}' exceeds {} characters",
                normalized, MAX_TAG_LEN
            )));
        }
        if !TAG_NAME.is_match(&normalized) {
            return Err(DbError::Validation(format!(
                "tag '{}' is invalid: lowercase letters, digits, and single hyphens only",
                normalized
            )));
        }
        seen.push(normalized);
    }
    if seen.len() > MAX_TAGS_PER_TREE {
        return Err(DbError::Validation(format!(
            "too many tags: {} (max {})",
            seen.len(),
            MAX_TAGS_PER_TREE
        )));
    }
    Ok(seen)
}

/// Make the tree's tag associations equal `names`.
///
/// Expects normalized names and an open transaction on `conn`; missing tag
/// rows are created, current associations are dropped and reinserted.
pub fn sync_tags(conn: &mut SqliteConnection, tree_id: i32, names: &[String]) -> Result<()> {
    if names.is_empty() {
        diesel::delete(
            skill_tree_tags::table.filter(skill_tree_tags::skill_tree_id.eq(tree_id)),
        )
        .execute(conn)?;
        return Ok(());
    }

    // Upsert: fetch existing tag rows, create the missing ones
    let existing: Vec<TagRow> = tags::table
        .filter(tags::name.eq_any(names))
        .load(conn)?;
    let mut id_by_name: std::collections::HashMap<String, i32> = existing
        .into_iter()
        .map(|t| (t.name, t.id))
        .collect();

    for name in names {
        if !id_by_name.contains_key(name) {
            diesel::insert_into(tags::table)
                .values(&NewTag { name })
                .execute(conn)?;
            let id = crate::db::last_insert_rowid(conn)?;
            id_by_name.insert(name.clone(), id);
        }
    }

    // Full replace of the associations
    diesel::delete(skill_tree_tags::table.filter(skill_tree_tags::skill_tree_id.eq(tree_id)))
        .execute(conn)?;
    for name in names {
        let assoc = NewSkillTreeTag {
            skill_tree_id: tree_id,
            tag_id: id_by_name[name],
        };
        diesel::insert_into(skill_tree_tags::table)
            .values(&assoc)
            .execute(conn)?;
    }

    Ok(())
}

/// Current tag names for a tree, alphabetical
pub fn tags_for_tree(conn: &mut SqliteConnection, tree_id: i32) -> Result<Vec<String>> {
    let names = tags::table
        .inner_join(skill_tree_tags::table.on(skill_tree_tags::tag_id.eq(tags::id)))
        .filter(skill_tree_tags::skill_tree_id.eq(tree_id))
        .select(tags::name)
        .order(tags::name.asc())
        .load::<String>(conn)?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_lowercases_and_dedupes() {
        let out = normalize_tags(&raw(&["a", "a", "B"])).unwrap();
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn test_normalize_preserves_first_occurrence_order() {
        let out = normalize_tags(&raw(&["rust", "systems", "Rust", "cli"])).unwrap();
        assert_eq!(out, vec!["rust", "systems", "cli"]);
    }

    #[test]
    fn test_normalize_trims_and_skips_empty() {
        let out = normalize_tags(&raw(&["  rust  ", "", "   "])).unwrap();
        assert_eq!(out, vec!["rust"]);
    }

    #[test]
    fn test_normalize_accepts_internal_hyphens() {
        let out = normalize_tags(&raw(&["machine-learning", "web-3"])).unwrap();
        assert_eq!(out, vec!["machine-learning", "web-3"]);
    }

    #[test]
    fn test_normalize_rejects_bad_charset() {
        assert!(normalize_tags(&raw(&["no spaces"])).is_err());
        assert!(normalize_tags(&raw(&["-leading"])).is_err());
        assert!(normalize_tags(&raw(&["trailing-"])).is_err());
        assert!(normalize_tags(&raw(&["double--hyphen"])).is_err());
        assert!(normalize_tags(&raw(&["émoji"])).is_err());
    }

    #[test]
    fn test_normalize_rejects_too_long() {
        let long = "x".repeat(MAX_TAG_LEN + 1);
        assert!(normalize_tags(&[long]).is_err());
    }

    #[test]
    fn test_normalize_rejects_too_many() {
        let many: Vec<String> = (0..=MAX_TAGS_PER_TREE).map(|i| format!("t{}", i)).collect();
        assert!(normalize_tags(&many).is_err());
    }

    #[test]
    fn test_normalize_count_applies_after_dedup() {
        // 12 raw entries deduping to 2 is fine
        let many = raw(&["a", "A", "a ", "b", "B", "b", "a", "b", "a", "b", "a", "b"]);
        let out = normalize_tags(&many).unwrap();
        assert_eq!(out, vec!["a", "b"]);
    }
}
