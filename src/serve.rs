//! HTTP API server for the skill-tree backend
//!
//! `arbor serve` → JSON API over tiny_http. Mutating tree routes require a
//! bearer token and pass the ownership gate before anything touches storage.

use crate::db::{Database, DbError, User};
use crate::save::TreeSave;
use crate::trending::TrendingWindow;
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(error: String) -> ApiResponse<()> {
        ApiResponse {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Start the API server
pub fn start_server(db: Database, port: u16) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;

    eprintln!("\n\x1b[1;32m🌳 Arbor\x1b[0m");
    eprintln!("   API: http://localhost:{}/api", port);
    eprintln!("   Press Ctrl+C to stop\n");

    serve_requests(db, server)
}

/// Request loop on an already-bound listener
pub fn serve_requests(db: Database, server: Server) -> std::io::Result<()> {
    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&db, request) {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

/// HTTP status for each error category
fn status_for(e: &DbError) -> u16 {
    match e {
        DbError::Validation(_) => 400,
        DbError::Unauthorized(_) => 401,
        DbError::Forbidden(_) => 403,
        DbError::NotFound(_) => 404,
        DbError::Conflict(_) => 409,
        DbError::Connection(_) | DbError::Query(_) | DbError::Pool(_) => 500,
    }
}

fn respond_json<T: Serialize>(
    request: Request,
    status: u16,
    body: &ApiResponse<T>,
) -> std::io::Result<()> {
    let json = serde_json::to_string(body)?;
    let response = Response::from_string(json)
        .with_status_code(status)
        .with_header(Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap());
    request.respond(response)
}

fn respond_ok<T: Serialize>(request: Request, data: T) -> std::io::Result<()> {
    respond_json(request, 200, &ApiResponse::success(data))
}

fn respond_err(request: Request, e: &DbError) -> std::io::Result<()> {
    respond_json(request, status_for(e), &ApiResponse::<()>::failure(e.to_string()))
}

fn respond_or_err<T: Serialize>(
    request: Request,
    result: crate::db::Result<T>,
) -> std::io::Result<()> {
    match result {
        Ok(data) => respond_ok(request, data),
        Err(e) => respond_err(request, &e),
    }
}

/// Resolve the caller from the `Authorization: Bearer <token>` header
fn authenticate(db: &Database, request: &Request) -> crate::db::Result<User> {
    let header = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string())
        .ok_or_else(|| DbError::Unauthorized("missing Authorization header".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| DbError::Unauthorized("expected a bearer token".to_string()))?;

    db.user_for_token(token)
}

fn read_body<T: for<'de> Deserialize<'de>>(request: &mut Request) -> crate::db::Result<T> {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .map_err(|e| DbError::Validation(format!("failed to read body: {}", e)))?;
    serde_json::from_str(&body).map_err(|e| DbError::Validation(format!("invalid JSON: {}", e)))
}

fn handle_request(db: &Database, request: Request) -> std::io::Result<()> {
    let url = request.url().to_string();
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (url, String::new()),
    };
    let method = request.method().clone();
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::Post, ["api", "users", "register"]) => handle_register(db, request),
        (&Method::Post, ["api", "users", "login"]) => handle_login(db, request),
        (&Method::Get, ["api", "users", username]) => {
            let username = username.to_string();
            respond_or_err(request, db.get_user_by_username(&username))
        }

        (&Method::Get, ["api", "skill-trees"]) => {
            let params: ListParams = serde_urlencoded::from_str(&query).unwrap_or_default();
            respond_or_err(request, db.list_skill_trees(params.tag.as_deref()))
        }
        (&Method::Get, ["api", "skill-trees", "trendings"]) => {
            let params: TrendingParams = serde_urlencoded::from_str(&query).unwrap_or_default();
            let window = params
                .timestamp
                .as_deref()
                .map(TrendingWindow::from_code)
                .unwrap_or_default();
            respond_or_err(request, db.trending(window))
        }
        (&Method::Get, ["api", "skill-trees", "mine"]) => match authenticate(db, &request) {
            Ok(user) => respond_or_err(request, db.list_skill_trees_by_creator(&user.username)),
            Err(e) => respond_err(request, &e),
        },
        (&Method::Get, ["api", "skill-trees", "favorites"]) => match authenticate(db, &request) {
            Ok(user) => respond_or_err(request, db.list_favorite_trees(user.id)),
            Err(e) => respond_err(request, &e),
        },
        (&Method::Get, ["api", "skill-trees", id, "checked"]) => {
            let parsed = id.parse::<i32>();
            match (parsed, authenticate(db, &request)) {
                (Ok(tree_id), Ok(user)) => {
                    respond_or_err(request, db.checked_skills_in_tree(user.id, tree_id))
                }
                (Err(_), _) => respond_err(
                    request,
                    &DbError::Validation("tree id must be an integer".to_string()),
                ),
                (_, Err(e)) => respond_err(request, &e),
            }
        }
        (&Method::Get, ["api", "skill-trees", id]) => match id.parse::<i32>() {
            Ok(id) => respond_or_err(request, db.get_tree_detail(id)),
            Err(_) => respond_err(
                request,
                &DbError::Validation("tree id must be an integer".to_string()),
            ),
        },
        (&Method::Post, ["api", "skill-trees"]) => handle_create_tree(db, request),
        (&Method::Put, ["api", "skill-trees", "save", id]) => {
            let id = id.to_string();
            handle_save_tree(db, request, &id)
        }
        (&Method::Patch, ["api", "skill-trees", id]) => {
            let id = id.to_string();
            handle_update_tree(db, request, &id)
        }
        (&Method::Delete, ["api", "skill-trees", id]) => {
            let id = id.to_string();
            handle_delete_tree(db, request, &id)
        }

        (&Method::Get, ["api", "skills", id]) => match id.parse::<i32>() {
            Ok(id) => respond_or_err(request, db.get_skill_detail(id)),
            Err(_) => respond_err(
                request,
                &DbError::Validation("skill id must be an integer".to_string()),
            ),
        },
        (&Method::Post, ["api", "skills"]) => handle_create_skill(db, request),
        (&Method::Patch, ["api", "skills", id]) => {
            let id = id.to_string();
            handle_update_skill(db, request, &id)
        }
        (&Method::Delete, ["api", "skills", id]) => {
            let id = id.to_string();
            handle_delete_skill(db, request, &id)
        }

        (&Method::Post, ["api", "favorites", id]) => {
            let id = id.to_string();
            handle_favorite(db, request, &id, true)
        }
        (&Method::Delete, ["api", "favorites", id]) => {
            let id = id.to_string();
            handle_favorite(db, request, &id, false)
        }
        (&Method::Post, ["api", "checked-skills", id]) => {
            let id = id.to_string();
            handle_check_skill(db, request, &id, true)
        }
        (&Method::Delete, ["api", "checked-skills", id]) => {
            let id = id.to_string();
            handle_check_skill(db, request, &id, false)
        }

        // 404
        _ => {
            let response = Response::from_string("Not found").with_status_code(404);
            request.respond(response)
        }
    }
}

#[derive(Deserialize, Default)]
struct ListParams {
    tag: Option<String>,
}

#[derive(Deserialize, Default)]
struct TrendingParams {
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RegisterBody {
    username: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenBody {
    token: String,
}

#[derive(Deserialize)]
struct CreateTreeBody {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct UpdateTreeBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct CreateSkillBody {
    name: String,
    #[serde(default)]
    description: Option<String>,
    skill_tree_id: i32,
}

#[derive(Deserialize)]
struct UpdateSkillBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_root: Option<bool>,
    #[serde(default)]
    unlock_ids: Vec<i32>,
}

fn handle_register(db: &Database, mut request: Request) -> std::io::Result<()> {
    let body: RegisterBody = match read_body(&mut request) {
        Ok(b) => b,
        Err(e) => return respond_err(request, &e),
    };
    respond_or_err(
        request,
        db.create_user(&body.username, &body.email, &body.password),
    )
}

fn handle_login(db: &Database, mut request: Request) -> std::io::Result<()> {
    let body: LoginBody = match read_body(&mut request) {
        Ok(b) => b,
        Err(e) => return respond_err(request, &e),
    };
    match db.login(&body.username, &body.password) {
        Ok(token) => respond_ok(request, TokenBody { token }),
        Err(e) => respond_err(request, &e),
    }
}

fn handle_create_tree(db: &Database, mut request: Request) -> std::io::Result<()> {
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let body: CreateTreeBody = match read_body(&mut request) {
        Ok(b) => b,
        Err(e) => return respond_err(request, &e),
    };
    respond_or_err(
        request,
        db.create_skill_tree(
            &body.name,
            body.description.as_deref(),
            &user.username,
            &body.tags,
        ),
    )
}

/// Owner-only whole-tree save. The path id and the body id must agree.
fn handle_save_tree(db: &Database, mut request: Request, raw_id: &str) -> std::io::Result<()> {
    let tree_id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return respond_err(
                request,
                &DbError::Validation("tree id must be an integer".to_string()),
            )
        }
    };
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let body: TreeSave = match read_body(&mut request) {
        Ok(b) => b,
        Err(e) => return respond_err(request, &e),
    };
    if body.id != tree_id {
        return respond_err(
            request,
            &DbError::Validation(format!(
                "body tree id {} does not match path id {}",
                body.id, tree_id
            )),
        );
    }

    let result = db
        .is_user_authorized_for_editing(tree_id, &user.username)
        .and_then(|authorized| {
            if !authorized {
                return Err(DbError::Forbidden(
                    "only the tree's creator may save it".to_string(),
                ));
            }
            db.save_tree(&body)?;
            db.get_tree_detail(tree_id)
        });
    respond_or_err(request, result)
}

/// Owner-only metadata/tag update; fields left out of the body are untouched
fn handle_update_tree(db: &Database, mut request: Request, raw_id: &str) -> std::io::Result<()> {
    let tree_id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return respond_err(
                request,
                &DbError::Validation("tree id must be an integer".to_string()),
            )
        }
    };
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let body: UpdateTreeBody = match read_body(&mut request) {
        Ok(b) => b,
        Err(e) => return respond_err(request, &e),
    };
    let result = db
        .is_user_authorized_for_editing(tree_id, &user.username)
        .and_then(|authorized| {
            if !authorized {
                return Err(DbError::Forbidden(
                    "only the tree's creator may update it".to_string(),
                ));
            }
            db.update_skill_tree(
                tree_id,
                body.name.as_deref(),
                body.description.as_deref(),
                body.tags.as_deref(),
            )
        });
    respond_or_err(request, result)
}

fn handle_delete_tree(db: &Database, request: Request, raw_id: &str) -> std::io::Result<()> {
    let tree_id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return respond_err(
                request,
                &DbError::Validation("tree id must be an integer".to_string()),
            )
        }
    };
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let result = db
        .is_user_authorized_for_editing(tree_id, &user.username)
        .and_then(|authorized| {
            if !authorized {
                return Err(DbError::Forbidden(
                    "only the tree's creator may delete it".to_string(),
                ));
            }
            db.delete_skill_tree(tree_id)?;
            Ok(true)
        });
    respond_or_err(request, result)
}

fn handle_create_skill(db: &Database, mut request: Request) -> std::io::Result<()> {
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let body: CreateSkillBody = match read_body(&mut request) {
        Ok(b) => b,
        Err(e) => return respond_err(request, &e),
    };
    let result = db
        .is_user_authorized_for_editing(body.skill_tree_id, &user.username)
        .and_then(|authorized| {
            if !authorized {
                return Err(DbError::Forbidden(
                    "only the tree's creator may add skills".to_string(),
                ));
            }
            db.create_skill(body.skill_tree_id, &body.name, body.description.as_deref())
        });
    respond_or_err(request, result)
}

/// Owner-only skill update. The edge set is always replaced with the body's
/// `unlock_ids`, so omitting them clears the skill's edges.
fn handle_update_skill(db: &Database, mut request: Request, raw_id: &str) -> std::io::Result<()> {
    let skill_id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return respond_err(
                request,
                &DbError::Validation("skill id must be an integer".to_string()),
            )
        }
    };
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let body: UpdateSkillBody = match read_body(&mut request) {
        Ok(b) => b,
        Err(e) => return respond_err(request, &e),
    };
    let result = db.get_skill(skill_id).and_then(|skill| {
        if !db.is_user_authorized_for_editing(skill.skill_tree_id, &user.username)? {
            return Err(DbError::Forbidden(
                "only the tree's creator may update its skills".to_string(),
            ));
        }
        db.update_skill(
            skill_id,
            body.name.as_deref(),
            body.description.as_deref(),
            body.is_root,
            &body.unlock_ids,
        )
    });
    respond_or_err(request, result)
}

fn handle_delete_skill(db: &Database, request: Request, raw_id: &str) -> std::io::Result<()> {
    let skill_id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return respond_err(
                request,
                &DbError::Validation("skill id must be an integer".to_string()),
            )
        }
    };
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let result = db.get_skill(skill_id).and_then(|skill| {
        if !db.is_user_authorized_for_editing(skill.skill_tree_id, &user.username)? {
            return Err(DbError::Forbidden(
                "only the tree's creator may delete its skills".to_string(),
            ));
        }
        db.delete_skill(skill_id)?;
        Ok(true)
    });
    respond_or_err(request, result)
}

fn handle_favorite(
    db: &Database,
    request: Request,
    raw_id: &str,
    add: bool,
) -> std::io::Result<()> {
    let tree_id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return respond_err(
                request,
                &DbError::Validation("tree id must be an integer".to_string()),
            )
        }
    };
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let result = if add {
        db.add_favorite(user.id, tree_id).map(|_| true)
    } else {
        db.remove_favorite(user.id, tree_id).map(|_| true)
    };
    respond_or_err(request, result)
}

fn handle_check_skill(
    db: &Database,
    request: Request,
    raw_id: &str,
    check: bool,
) -> std::io::Result<()> {
    let skill_id: i32 = match raw_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return respond_err(
                request,
                &DbError::Validation("skill id must be an integer".to_string()),
            )
        }
    };
    let user = match authenticate(db, &request) {
        Ok(u) => u,
        Err(e) => return respond_err(request, &e),
    };
    let result = if check {
        // Surface a 404 rather than a silent no-op on unknown skills
        db.get_skill(skill_id)
            .and_then(|_| db.check_skill(user.id, skill_id))
            .map(|_| true)
    } else {
        db.uncheck_skill(user.id, skill_id).map(|_| true)
    };
    respond_or_err(request, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    // === ApiResponse Tests ===

    #[test]
    fn test_api_response_success() {
        let response: ApiResponse<String> = ApiResponse::success("hello".to_string());
        assert!(response.ok);
        assert_eq!(response.data, Some("hello".to_string()));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_serializes_to_json() {
        let response: ApiResponse<String> = ApiResponse::success("test".to_string());
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("\"data\":\"test\""));
        assert!(json.contains("\"error\":null"));
    }

    #[test]
    fn test_api_response_failure() {
        let response = ApiResponse::<()>::failure("nope".to_string());
        assert!(!response.ok);
        assert!(response.data.is_none());
        assert_eq!(response.error, Some("nope".to_string()));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&DbError::Validation("x".into())), 400);
        assert_eq!(status_for(&DbError::Unauthorized("x".into())), 401);
        assert_eq!(status_for(&DbError::Forbidden("x".into())), 403);
        assert_eq!(status_for(&DbError::NotFound("x".into())), 404);
        assert_eq!(status_for(&DbError::Conflict("x".into())), 409);
        assert_eq!(status_for(&DbError::Connection("x".into())), 500);
    }

    #[test]
    fn test_trending_params_parse() {
        let params: TrendingParams = serde_urlencoded::from_str("timestamp=m").unwrap();
        assert_eq!(params.timestamp.as_deref(), Some("m"));
        let empty: TrendingParams = serde_urlencoded::from_str("").unwrap();
        assert!(empty.timestamp.is_none());
    }
}
