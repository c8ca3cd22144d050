//! SQLite database with Diesel ORM
//!
//! Stores users, skill trees, skills and their unlock edges, tags, and the
//! favorite/checked-skill events that feed the trending ranking.

use crate::schema::*;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

/// Session token lifetime in hours
const TOKEN_TTL_HOURS: i64 = 24;

/// Current timestamp as fixed-format UTC RFC 3339 text.
///
/// Fixed format means lexicographic comparison on stored timestamps equals
/// chronological comparison, which the trending cutoff relies on.
pub fn now_utc() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Walk up directory tree to find .arbor folder (like git finds .git)
/// Can be overridden with ARBOR_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("ARBOR_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    // Walk up directory tree to find .arbor folder
    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let arbor_dir = dir.join(".arbor");
            if arbor_dir.exists() && arbor_dir.is_dir() {
                return arbor_dir.join("arbor.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break, // Reached filesystem root
            }
        }
    }

    // No .arbor found - default to current directory
    // (arbor init will create it here)
    std::path::PathBuf::from(".arbor/arbor.db")
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable user
#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub created_at: &'a str,
}

/// Queryable user
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

/// Insertable session token
#[derive(Insertable)]
#[diesel(table_name = tokens)]
pub struct NewToken<'a> {
    pub user_id: i32,
    pub token: &'a str,
    pub expires_at: &'a str,
}

/// Queryable session token
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = tokens)]
pub struct Token {
    pub id: i32,
    pub user_id: i32,
    pub token: String,
    pub expires_at: String,
}

/// Insertable skill tree
#[derive(Insertable)]
#[diesel(table_name = skill_trees)]
pub struct NewSkillTree<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub creator_username: &'a str,
    pub created_at: &'a str,
}

/// Queryable skill tree
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = skill_trees)]
pub struct SkillTreeRow {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub creator_username: String,
    pub created_at: String,
}

/// Insertable skill
#[derive(Insertable)]
#[diesel(table_name = skills)]
pub struct NewSkill<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub skill_tree_id: i32,
    pub is_root: bool,
    pub linked_tree_id: Option<i32>,
    pub created_at: &'a str,
}

/// Queryable skill
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = skills)]
pub struct SkillRow {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub skill_tree_id: i32,
    pub is_root: bool,
    pub linked_tree_id: Option<i32>,
    pub created_at: String,
}

/// Insertable unlock edge
#[derive(Insertable)]
#[diesel(table_name = skill_dependencies)]
pub struct NewSkillDependency {
    pub skill_id: i32,
    pub unlock_id: i32,
}

/// Insertable tag
#[derive(Insertable)]
#[diesel(table_name = tags)]
pub struct NewTag<'a> {
    pub name: &'a str,
}

/// Queryable tag
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = tags)]
pub struct TagRow {
    pub id: i32,
    pub name: String,
}

/// Insertable tree/tag association
#[derive(Insertable)]
#[diesel(table_name = skill_tree_tags)]
pub struct NewSkillTreeTag {
    pub skill_tree_id: i32,
    pub tag_id: i32,
}

/// Insertable favorite event
#[derive(Insertable)]
#[diesel(table_name = user_favorite_trees)]
pub struct NewFavorite<'a> {
    pub user_id: i32,
    pub skill_tree_id: i32,
    pub created_at: &'a str,
}

/// Insertable checked-skill event
#[derive(Insertable)]
#[diesel(table_name = user_check_skill)]
pub struct NewCheckedSkill<'a> {
    pub user_id: i32,
    pub skill_id: i32,
    pub created_at: &'a str,
}

// ============================================================================
// API-facing views
// ============================================================================

/// A skill tree in list views, annotated with its current tag names
#[derive(Debug, Clone, serde::Serialize)]
pub struct SkillTreeSummary {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub creator_username: String,
    pub created_at: String,
    pub tags: Vec<String>,
}

/// A skill in the detail view, with its outgoing unlock edge targets
#[derive(Debug, Clone, serde::Serialize)]
pub struct SkillDetail {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub is_root: bool,
    pub linked_tree_id: Option<i32>,
    pub unlock_ids: Vec<i32>,
}

/// Full skill tree detail: metadata, skills with edges, tags
#[derive(Debug, Clone, serde::Serialize)]
pub struct SkillTreeDetail {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub creator_username: String,
    pub created_at: String,
    pub skills: Vec<SkillDetail>,
    pub tags: Vec<String>,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub(crate) type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Enables foreign key enforcement on every pooled connection.
///
/// SQLite ships with `foreign_keys` off; cascade deletes (tree -> skills ->
/// edges) and the linked-tree SET NULL depend on it being on.
#[derive(Debug)]
struct ForeignKeyPragma;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ForeignKeyPragma {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
    /// Request rejected before any mutation (malformed root structure, bad tags)
    Validation(String),
    /// Tree, skill, or user does not exist
    NotFound(String),
    /// Missing or expired session token
    Unauthorized(String),
    /// Caller is not the tree's creator
    Forbidden(String),
    /// Uniqueness collision surfaced at commit time
    Conflict(String),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
            DbError::Validation(msg) => write!(f, "{}", msg),
            DbError::NotFound(msg) => write!(f, "{}", msg),
            DbError::Unauthorized(msg) => write!(f, "{}", msg),
            DbError::Forbidden(msg) => write!(f, "{}", msg),
            DbError::Conflict(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        // Integrity violations are caught here, once, so every caller that
        // wraps a save in a transaction gets the same taxonomy.
        match e {
            diesel::result::Error::NotFound => DbError::NotFound("record not found".to_string()),
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                DbError::Conflict(format!("duplicate value: {}", info.message()))
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                DbError::Validation(format!("unknown reference: {}", info.message()))
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                DbError::Validation(format!("constraint violated: {}", info.message()))
            }
            other => DbError::Query(other),
        }
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Fetch the rowid assigned by the most recent INSERT on this connection
pub(crate) fn last_insert_rowid(conn: &mut SqliteConnection) -> QueryResult<i32> {
    diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .first(conn)
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at default path (respects ARBOR_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(ForeignKeyPragma))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        // Run raw SQL to create tables if they don't exist
        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                username TEXT NOT NULL UNIQUE CHECK (length(username) <= 30),
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL,
                token TEXT NOT NULL UNIQUE,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS skill_trees (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE CHECK (length(name) <= 100),
                description TEXT,
                creator_username TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (creator_username) REFERENCES users(username) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS skills (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL CHECK (length(name) <= 100),
                description TEXT,
                skill_tree_id INTEGER NOT NULL,
                is_root INTEGER NOT NULL DEFAULT 0,
                linked_tree_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (skill_tree_id) REFERENCES skill_trees(id) ON DELETE CASCADE,
                FOREIGN KEY (linked_tree_id) REFERENCES skill_trees(id) ON DELETE SET NULL,
                UNIQUE(name, skill_tree_id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS skill_dependencies (
                skill_id INTEGER NOT NULL,
                unlock_id INTEGER NOT NULL,
                PRIMARY KEY (skill_id, unlock_id),
                FOREIGN KEY (skill_id) REFERENCES skills(id) ON DELETE CASCADE,
                FOREIGN KEY (unlock_id) REFERENCES skills(id) ON DELETE CASCADE,
                CHECK (skill_id != unlock_id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL UNIQUE CHECK (length(name) <= 30)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS skill_tree_tags (
                skill_tree_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (skill_tree_id, tag_id),
                FOREIGN KEY (skill_tree_id) REFERENCES skill_trees(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS user_favorite_trees (
                user_id INTEGER NOT NULL,
                skill_tree_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, skill_tree_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (skill_tree_id) REFERENCES skill_trees(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS user_check_skill (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL,
                skill_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, skill_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (skill_id) REFERENCES skills(id) ON DELETE CASCADE
            )
        "#).execute(&mut conn)?;

        // Create indexes
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_skills_skill_tree_id ON skills(skill_tree_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_deps_skill ON skill_dependencies(skill_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_deps_unlock ON skill_dependencies(unlock_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_favorites_created ON user_favorite_trees(created_at)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_checks_created ON user_check_skill(created_at)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tokens_token ON tokens(token)").execute(&mut conn)?;

        // Storage backstop for the application-level root check: at most one
        // root skill per tree, enforced by a partial unique index.
        diesel::sql_query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_skills_one_root_per_tree \
             ON skills(skill_tree_id) WHERE is_root = 1"
        ).execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Users & Sessions
    // ========================================================================

    /// Register a new user with a salted password digest
    pub fn create_user(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let mut conn = self.get_conn()?;
        let now = now_utc();
        let salt = Uuid::new_v4().simple().to_string();
        let hash = hash_password(password, &salt);

        let new_user = NewUser {
            username,
            email,
            password_hash: &hash,
            created_at: &now,
        };

        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(&mut conn)
            .map_err(|e| match DbError::from(e) {
                DbError::Conflict(_) => {
                    DbError::Conflict("username or email already taken".to_string())
                }
                other => other,
            })?;

        let id = last_insert_rowid(&mut conn)?;
        let user = users::table.filter(users::id.eq(id)).first::<User>(&mut conn)?;
        Ok(user)
    }

    /// Verify credentials and issue a fresh session token
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let mut conn = self.get_conn()?;

        let user = users::table
            .filter(users::username.eq(username))
            .first::<User>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::Unauthorized("invalid credentials".to_string()))?;

        if !verify_password(password, &user.password_hash) {
            return Err(DbError::Unauthorized("invalid credentials".to_string()));
        }

        // Expired tokens would otherwise accumulate forever
        diesel::delete(tokens::table.filter(tokens::expires_at.lt(now_utc())))
            .execute(&mut conn)?;

        let token = Uuid::new_v4().to_string();
        let expires_at = (chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let new_token = NewToken {
            user_id: user.id,
            token: &token,
            expires_at: &expires_at,
        };

        diesel::insert_into(tokens::table)
            .values(&new_token)
            .execute(&mut conn)?;

        Ok(token)
    }

    /// Resolve a session token to its user, rejecting expired tokens
    pub fn user_for_token(&self, token: &str) -> Result<User> {
        let mut conn = self.get_conn()?;

        let row = tokens::table
            .filter(tokens::token.eq(token))
            .first::<Token>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::Unauthorized("invalid token".to_string()))?;

        if row.expires_at < now_utc() {
            return Err(DbError::Unauthorized("token expired".to_string()));
        }

        let user = users::table
            .filter(users::id.eq(row.user_id))
            .first::<User>(&mut conn)?;
        Ok(user)
    }

    /// Look up a user by username
    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        let mut conn = self.get_conn()?;
        users::table
            .filter(users::username.eq(username))
            .first::<User>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("user '{}' not found", username)))
    }

    // ========================================================================
    // Authorization Gate
    // ========================================================================

    /// Whether `username` is the creator of the tree.
    ///
    /// Advisory: callers must consult this before any mutating tree operation.
    /// Fails with not-found if the tree does not exist.
    pub fn is_user_authorized_for_editing(&self, tree_id: i32, username: &str) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let tree = skill_trees::table
            .filter(skill_trees::id.eq(tree_id))
            .first::<SkillTreeRow>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("skill tree {} not found", tree_id)))?;
        Ok(tree.creator_username == username)
    }

    // ========================================================================
    // Skill Tree CRUD
    // ========================================================================

    /// Create an empty skill tree with normalized tags
    pub fn create_skill_tree(
        &self,
        name: &str,
        description: Option<&str>,
        creator_username: &str,
        tag_names: &[String],
    ) -> Result<SkillTreeSummary> {
        let normalized = crate::tags::normalize_tags(tag_names)?;
        let mut conn = self.get_conn()?;
        let now = now_utc();

        let id = conn.transaction::<_, DbError, _>(|conn| {
            let new_tree = NewSkillTree {
                name,
                description,
                creator_username,
                created_at: &now,
            };
            diesel::insert_into(skill_trees::table)
                .values(&new_tree)
                .execute(conn)
                .map_err(|e| match DbError::from(e) {
                    DbError::Conflict(_) => {
                        DbError::Conflict(format!("a skill tree named '{}' already exists", name))
                    }
                    other => other,
                })?;
            let id = last_insert_rowid(conn)?;
            crate::tags::sync_tags(conn, id, &normalized)?;
            Ok(id)
        })?;

        self.tree_summary(id)
    }

    /// Update tree metadata and/or tags; fields left as None are untouched
    pub fn update_skill_tree(
        &self,
        tree_id: i32,
        name: Option<&str>,
        description: Option<&str>,
        tag_names: Option<&[String]>,
    ) -> Result<SkillTreeSummary> {
        let normalized = match tag_names {
            Some(raw) => Some(crate::tags::normalize_tags(raw)?),
            None => None,
        };
        let mut conn = self.get_conn()?;

        conn.transaction::<_, DbError, _>(|conn| {
            let tree = skill_trees::table
                .filter(skill_trees::id.eq(tree_id))
                .first::<SkillTreeRow>(conn)
                .optional()?
                .ok_or_else(|| DbError::NotFound(format!("skill tree {} not found", tree_id)))?;

            let new_name = name.unwrap_or(&tree.name);
            let new_description = description.or(tree.description.as_deref());
            diesel::update(skill_trees::table.filter(skill_trees::id.eq(tree_id)))
                .set((
                    skill_trees::name.eq(new_name),
                    skill_trees::description.eq(new_description),
                ))
                .execute(conn)
                .map_err(|e| match DbError::from(e) {
                    DbError::Conflict(_) => {
                        DbError::Conflict(format!("a skill tree named '{}' already exists", new_name))
                    }
                    other => other,
                })?;

            if let Some(ref names) = normalized {
                crate::tags::sync_tags(conn, tree_id, names)?;
            }
            Ok(())
        })?;

        self.tree_summary(tree_id)
    }

    /// Delete a tree; skills and edges cascade, linked-tree pointers elsewhere
    /// are set to null by the storage layer
    pub fn delete_skill_tree(&self, tree_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(skill_trees::table.filter(skill_trees::id.eq(tree_id)))
            .execute(&mut conn)?;
        if deleted == 0 {
            return Err(DbError::NotFound(format!("skill tree {} not found", tree_id)));
        }
        Ok(())
    }

    /// List all trees, optionally filtered to those carrying a tag
    pub fn list_skill_trees(&self, tag: Option<&str>) -> Result<Vec<SkillTreeSummary>> {
        let mut conn = self.get_conn()?;

        let rows: Vec<SkillTreeRow> = match tag {
            Some(raw) => {
                let wanted = raw.trim().to_lowercase();
                skill_trees::table
                    .inner_join(
                        skill_tree_tags::table
                            .on(skill_tree_tags::skill_tree_id.eq(skill_trees::id)),
                    )
                    .inner_join(tags::table.on(tags::id.eq(skill_tree_tags::tag_id)))
                    .filter(tags::name.eq(wanted))
                    .select(SkillTreeRow::as_select())
                    .load(&mut conn)?
            }
            None => skill_trees::table
                .order(skill_trees::created_at.asc())
                .load::<SkillTreeRow>(&mut conn)?,
        };

        rows.into_iter()
            .map(|row| self.summarize(&mut conn, row))
            .collect()
    }

    /// List trees created by a user
    pub fn list_skill_trees_by_creator(&self, username: &str) -> Result<Vec<SkillTreeSummary>> {
        let mut conn = self.get_conn()?;
        let rows = skill_trees::table
            .filter(skill_trees::creator_username.eq(username))
            .order(skill_trees::created_at.asc())
            .load::<SkillTreeRow>(&mut conn)?;
        rows.into_iter()
            .map(|row| self.summarize(&mut conn, row))
            .collect()
    }

    /// List a user's favorite trees
    pub fn list_favorite_trees(&self, user_id: i32) -> Result<Vec<SkillTreeSummary>> {
        let mut conn = self.get_conn()?;
        let rows = skill_trees::table
            .inner_join(
                user_favorite_trees::table
                    .on(user_favorite_trees::skill_tree_id.eq(skill_trees::id)),
            )
            .filter(user_favorite_trees::user_id.eq(user_id))
            .select(SkillTreeRow::as_select())
            .load(&mut conn)?;
        rows.into_iter()
            .map(|row| self.summarize(&mut conn, row))
            .collect()
    }

    /// Full tree detail: metadata, every skill with its unlock ids, tags
    pub fn get_tree_detail(&self, tree_id: i32) -> Result<SkillTreeDetail> {
        let mut conn = self.get_conn()?;

        let tree = skill_trees::table
            .filter(skill_trees::id.eq(tree_id))
            .first::<SkillTreeRow>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("skill tree {} not found", tree_id)))?;

        let skill_rows = skills::table
            .filter(skills::skill_tree_id.eq(tree_id))
            .order(skills::id.asc())
            .load::<SkillRow>(&mut conn)?;

        let mut detail_skills = Vec::with_capacity(skill_rows.len());
        for skill in skill_rows {
            let unlock_ids: Vec<i32> = skill_dependencies::table
                .filter(skill_dependencies::skill_id.eq(skill.id))
                .select(skill_dependencies::unlock_id)
                .order(skill_dependencies::unlock_id.asc())
                .load(&mut conn)?;
            detail_skills.push(SkillDetail {
                id: skill.id,
                name: skill.name,
                description: skill.description,
                is_root: skill.is_root,
                linked_tree_id: skill.linked_tree_id,
                unlock_ids,
            });
        }

        let tag_names = crate::tags::tags_for_tree(&mut conn, tree_id)?;

        Ok(SkillTreeDetail {
            id: tree.id,
            name: tree.name,
            description: tree.description,
            creator_username: tree.creator_username,
            created_at: tree.created_at,
            skills: detail_skills,
            tags: tag_names,
        })
    }

    /// Look up a single skill
    pub fn get_skill(&self, skill_id: i32) -> Result<SkillRow> {
        let mut conn = self.get_conn()?;
        skills::table
            .filter(skills::id.eq(skill_id))
            .first::<SkillRow>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("skill {} not found", skill_id)))
    }

    /// Single skill with its outgoing unlock edge targets
    pub fn get_skill_detail(&self, skill_id: i32) -> Result<SkillDetail> {
        let mut conn = self.get_conn()?;
        let skill = skills::table
            .filter(skills::id.eq(skill_id))
            .first::<SkillRow>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("skill {} not found", skill_id)))?;
        let unlock_ids: Vec<i32> = skill_dependencies::table
            .filter(skill_dependencies::skill_id.eq(skill.id))
            .select(skill_dependencies::unlock_id)
            .order(skill_dependencies::unlock_id.asc())
            .load(&mut conn)?;
        Ok(SkillDetail {
            id: skill.id,
            name: skill.name,
            description: skill.description,
            is_root: skill.is_root,
            linked_tree_id: skill.linked_tree_id,
            unlock_ids,
        })
    }

    /// Add a single non-root skill to a tree
    pub fn create_skill(
        &self,
        tree_id: i32,
        name: &str,
        description: Option<&str>,
    ) -> Result<SkillRow> {
        let mut conn = self.get_conn()?;
        let now = now_utc();
        let new_skill = NewSkill {
            name,
            description,
            skill_tree_id: tree_id,
            is_root: false,
            linked_tree_id: None,
            created_at: &now,
        };
        diesel::insert_into(skills::table)
            .values(&new_skill)
            .execute(&mut conn)
            .map_err(|e| match DbError::from(e) {
                DbError::Conflict(_) => DbError::Conflict(format!(
                    "a skill named '{}' already exists in this tree",
                    name
                )),
                other => other,
            })?;
        let id = last_insert_rowid(&mut conn)?;
        skills::table
            .filter(skills::id.eq(id))
            .first::<SkillRow>(&mut conn)
            .map_err(DbError::from)
    }

    /// Update a single skill; fields left as None are untouched.
    ///
    /// The skill's outgoing edge set is always replaced with `unlock_ids`, so
    /// an update that omits them clears the skill's edges.
    pub fn update_skill(
        &self,
        skill_id: i32,
        name: Option<&str>,
        description: Option<&str>,
        is_root: Option<bool>,
        unlock_ids: &[i32],
    ) -> Result<SkillDetail> {
        let mut conn = self.get_conn()?;

        conn.transaction::<_, DbError, _>(|conn| {
            let skill = skills::table
                .filter(skills::id.eq(skill_id))
                .first::<SkillRow>(conn)
                .optional()?
                .ok_or_else(|| DbError::NotFound(format!("skill {} not found", skill_id)))?;

            let new_name = name.unwrap_or(&skill.name);
            let new_description = description.or(skill.description.as_deref());
            // Promoting a second root trips the one-root-per-tree index and
            // surfaces as a conflict
            let new_is_root = is_root.unwrap_or(skill.is_root);
            diesel::update(skills::table.filter(skills::id.eq(skill_id)))
                .set((
                    skills::name.eq(new_name),
                    skills::description.eq(new_description),
                    skills::is_root.eq(new_is_root),
                ))
                .execute(conn)?;

            diesel::delete(
                skill_dependencies::table.filter(skill_dependencies::skill_id.eq(skill_id)),
            )
            .execute(conn)?;
            for unlock in unlock_ids {
                let edge = NewSkillDependency {
                    skill_id,
                    unlock_id: *unlock,
                };
                diesel::insert_into(skill_dependencies::table)
                    .values(&edge)
                    .execute(conn)?;
            }
            Ok(())
        })?;

        self.get_skill_detail(skill_id)
    }

    /// Delete a single skill; its edges cascade
    pub fn delete_skill(&self, skill_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        let deleted = diesel::delete(skills::table.filter(skills::id.eq(skill_id)))
            .execute(&mut conn)?;
        if deleted == 0 {
            return Err(DbError::NotFound(format!("skill {} not found", skill_id)));
        }
        Ok(())
    }

    fn tree_summary(&self, tree_id: i32) -> Result<SkillTreeSummary> {
        let mut conn = self.get_conn()?;
        let tree = skill_trees::table
            .filter(skill_trees::id.eq(tree_id))
            .first::<SkillTreeRow>(&mut conn)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("skill tree {} not found", tree_id)))?;
        self.summarize(&mut conn, tree)
    }

    fn summarize(&self, conn: &mut SqliteConnection, tree: SkillTreeRow) -> Result<SkillTreeSummary> {
        let tag_names = crate::tags::tags_for_tree(conn, tree.id)?;
        Ok(SkillTreeSummary {
            id: tree.id,
            name: tree.name,
            description: tree.description,
            creator_username: tree.creator_username,
            created_at: tree.created_at,
            tags: tag_names,
        })
    }

    // ========================================================================
    // Favorites & Checked Skills
    // ========================================================================

    /// Add a tree to a user's favorites (idempotent)
    pub fn add_favorite(&self, user_id: i32, tree_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now_utc();
        let fav = NewFavorite {
            user_id,
            skill_tree_id: tree_id,
            created_at: &now,
        };
        diesel::insert_or_ignore_into(user_favorite_trees::table)
            .values(&fav)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Remove a tree from a user's favorites
    pub fn remove_favorite(&self, user_id: i32, tree_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::delete(
            user_favorite_trees::table
                .filter(user_favorite_trees::user_id.eq(user_id))
                .filter(user_favorite_trees::skill_tree_id.eq(tree_id)),
        )
        .execute(&mut conn)?;
        Ok(())
    }

    /// Mark a skill as acquired by a user (idempotent)
    pub fn check_skill(&self, user_id: i32, skill_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now_utc();
        let row = NewCheckedSkill {
            user_id,
            skill_id,
            created_at: &now,
        };
        diesel::insert_or_ignore_into(user_check_skill::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Unmark an acquired skill
    pub fn uncheck_skill(&self, user_id: i32, skill_id: i32) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::delete(
            user_check_skill::table
                .filter(user_check_skill::user_id.eq(user_id))
                .filter(user_check_skill::skill_id.eq(skill_id)),
        )
        .execute(&mut conn)?;
        Ok(())
    }

    /// Skill ids the user has marked acquired within a tree
    pub fn checked_skills_in_tree(&self, user_id: i32, tree_id: i32) -> Result<Vec<i32>> {
        let mut conn = self.get_conn()?;
        let ids = user_check_skill::table
            .inner_join(skills::table.on(skills::id.eq(user_check_skill::skill_id)))
            .filter(user_check_skill::user_id.eq(user_id))
            .filter(skills::skill_tree_id.eq(tree_id))
            .select(user_check_skill::skill_id)
            .load::<i32>(&mut conn)?;
        Ok(ids)
    }
}

// ============================================================================
// Password digests
// ============================================================================

/// Salted SHA-256 digest, stored as `salt$hex`
fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{}${:x}", salt, hasher.finalize())
}

fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, _)) => hash_password(password, salt) == stored,
        None => false,
    }
}
