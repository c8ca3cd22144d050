//! Trending ranking over favorite and checked-skill events
//!
//! A tree's score in a window is the number of distinct users who favorited
//! it plus the number of distinct users who checked at least one of its
//! skills. Trees with no qualifying events are not returned at all.

use crate::db::{Database, Result};
use diesel::prelude::*;
use serde::Serialize;

/// Time window selector for the trending ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrendingWindow {
    Day,
    #[default]
    Week,
    Month,
}

impl TrendingWindow {
    /// Parse the API's `timestamp` code; anything unrecognized falls back to
    /// the weekly window rather than erroring
    pub fn from_code(code: &str) -> Self {
        match code {
            "d" => TrendingWindow::Day,
            "m" => TrendingWindow::Month,
            _ => TrendingWindow::Week,
        }
    }

    fn days(self) -> i64 {
        match self {
            TrendingWindow::Day => 1,
            TrendingWindow::Week => 7,
            TrendingWindow::Month => 30,
        }
    }

    /// Lower bound of the window as fixed-format UTC RFC 3339 text, directly
    /// comparable to stored event timestamps
    pub fn cutoff(self) -> String {
        (chrono::Utc::now() - chrono::Duration::days(self.days()))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }
}

/// A tree in the trending ranking, annotated with score and current tags
#[derive(Debug, Clone, Serialize)]
pub struct TrendingTree {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub creator_username: String,
    pub created_at: String,
    pub score: i64,
    pub tags: Vec<String>,
}

#[derive(QueryableByName, Debug)]
struct TrendingRow {
    #[diesel(sql_type = diesel::sql_types::Integer)]
    id: i32,
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    description: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Text)]
    creator_username: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    created_at: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    score: i64,
}

impl Database {
    /// Trees ranked descending by windowed popularity score.
    ///
    /// Ties keep whatever order SQLite produces; no secondary sort key is
    /// applied.
    pub fn trending(&self, window: TrendingWindow) -> Result<Vec<TrendingTree>> {
        let mut conn = self.get_conn()?;
        let cutoff = window.cutoff();

        let rows: Vec<TrendingRow> = diesel::sql_query(
            r#"
            SELECT skill_trees.id, skill_trees.name, skill_trees.description,
                   skill_trees.creator_username, skill_trees.created_at,
                   SUM(nb_users) AS score
            FROM (
                SELECT skill_tree_id, COUNT(DISTINCT user_id) AS nb_users
                FROM user_favorite_trees
                WHERE created_at >= ?
                GROUP BY skill_tree_id

                UNION ALL

                SELECT skills.skill_tree_id, COUNT(DISTINCT user_check_skill.user_id) AS nb_users
                FROM user_check_skill
                INNER JOIN skills ON user_check_skill.skill_id = skills.id
                WHERE user_check_skill.created_at >= ?
                GROUP BY skills.skill_tree_id
            ) AS combined
            INNER JOIN skill_trees ON combined.skill_tree_id = skill_trees.id
            GROUP BY skill_trees.id
            ORDER BY score DESC
            "#,
        )
        .bind::<diesel::sql_types::Text, _>(&cutoff)
        .bind::<diesel::sql_types::Text, _>(&cutoff)
        .load(&mut conn)?;

        let mut trees = Vec::with_capacity(rows.len());
        for row in rows {
            let tag_names = crate::tags::tags_for_tree(&mut conn, row.id)?;
            trees.push(TrendingTree {
                id: row.id,
                name: row.name,
                description: row.description,
                creator_username: row.creator_username,
                created_at: row.created_at,
                score: row.score,
                tags: tag_names,
            });
        }
        Ok(trees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_codes() {
        assert_eq!(TrendingWindow::from_code("d"), TrendingWindow::Day);
        assert_eq!(TrendingWindow::from_code("w"), TrendingWindow::Week);
        assert_eq!(TrendingWindow::from_code("m"), TrendingWindow::Month);
        // Unrecognized codes fall back to the default week
        assert_eq!(TrendingWindow::from_code("x"), TrendingWindow::Week);
        assert_eq!(TrendingWindow::default(), TrendingWindow::Week);
    }

    #[test]
    fn test_cutoff_ordering() {
        // Day cutoff is later than week cutoff, which is later than month
        let d = TrendingWindow::Day.cutoff();
        let w = TrendingWindow::Week.cutoff();
        let m = TrendingWindow::Month.cutoff();
        assert!(d > w);
        assert!(w > m);
    }
}
