//! Route-level tests for the HTTP API
//!
//! Each test binds a real server on an ephemeral port and talks to it over a
//! plain TCP socket, covering auth, ownership gating, and status mapping for
//! the tree-metadata and skill endpoints.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

use arbor::Database;
use tempfile::TempDir;
use tiny_http::Server;

struct Api {
    _dir: TempDir,
    addr: SocketAddr,
}

fn start(setup: impl FnOnce(&Database)) -> Api {
    let dir = TempDir::new().unwrap();
    let db = Database::open_at(dir.path().join("arbor.db")).unwrap();
    setup(&db);

    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    std::thread::spawn(move || arbor::serve::serve_requests(db, server));

    Api { _dir: dir, addr }
}

/// Minimal one-shot HTTP client: returns (status, parsed JSON body)
fn call(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> (u16, serde_json::Value) {
    let mut request = format!("{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n", method, path);
    if let Some(token) = token {
        request.push_str(&format!("Authorization: Bearer {}\r\n", token));
    }
    match body {
        Some(body) => {
            request.push_str(&format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            ));
        }
        None => request.push_str("\r\n"),
    }

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();

    let status: u16 = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
    let json = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[test]
fn test_patch_tree_route_updates_metadata_owner_only() {
    let mut tree_id = 0;
    let mut alice_token = String::new();
    let mut bob_token = String::new();
    let api = start(|db| {
        db.create_user("alice", "alice@example.com", "secret").unwrap();
        db.create_user("bob", "bob@example.com", "secret").unwrap();
        tree_id = db.create_skill_tree("Main", None, "alice", &[]).unwrap().id;
        alice_token = db.login("alice", "secret").unwrap();
        bob_token = db.login("bob", "secret").unwrap();
    });

    let path = format!("/api/skill-trees/{}", tree_id);
    let (status, json) = call(
        api.addr,
        "PATCH",
        &path,
        Some(&alice_token),
        Some(r#"{"name": "Renamed", "tags": ["fresh"]}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(json["ok"], true);
    assert_eq!(json["data"]["name"], "Renamed");
    assert_eq!(json["data"]["tags"][0], "fresh");

    // Partial body leaves the rest untouched
    let (status, json) = call(
        api.addr,
        "PATCH",
        &path,
        Some(&alice_token),
        Some(r#"{"description": "now described"}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(json["data"]["name"], "Renamed");
    assert_eq!(json["data"]["description"], "now described");

    // Not the creator
    let (status, json) = call(
        api.addr,
        "PATCH",
        &path,
        Some(&bob_token),
        Some(r#"{"name": "Hijacked"}"#),
    );
    assert_eq!(status, 403);
    assert_eq!(json["ok"], false);

    // No token
    let (status, _) = call(api.addr, "PATCH", &path, None, Some(r#"{"name": "X"}"#));
    assert_eq!(status, 401);

    // Missing tree
    let (status, _) = call(
        api.addr,
        "PATCH",
        "/api/skill-trees/9999",
        Some(&alice_token),
        Some(r#"{"name": "Ghost"}"#),
    );
    assert_eq!(status, 404);
}

#[test]
fn test_skill_routes_crud() {
    let mut tree_id = 0;
    let mut alice_token = String::new();
    let api = start(|db| {
        db.create_user("alice", "alice@example.com", "secret").unwrap();
        tree_id = db.create_skill_tree("Main", None, "alice", &[]).unwrap().id;
        alice_token = db.login("alice", "secret").unwrap();
    });

    let create = |name: &str| {
        call(
            api.addr,
            "POST",
            "/api/skills",
            Some(&alice_token),
            Some(&format!(
                r#"{{"name": "{}", "skill_tree_id": {}}}"#,
                name, tree_id
            )),
        )
    };

    let (status, json) = create("First");
    assert_eq!(status, 200);
    let first = json["data"]["id"].as_i64().unwrap();
    let (status, json) = create("Second");
    assert_eq!(status, 200);
    let second = json["data"]["id"].as_i64().unwrap();

    // Duplicate name within the tree
    let (status, _) = create("First");
    assert_eq!(status, 409);

    // Rename and point an edge at the second skill
    let (status, json) = call(
        api.addr,
        "PATCH",
        &format!("/api/skills/{}", first),
        Some(&alice_token),
        Some(&format!(r#"{{"name": "First!", "unlock_ids": [{}]}}"#, second)),
    );
    assert_eq!(status, 200);
    assert_eq!(json["data"]["name"], "First!");
    assert_eq!(json["data"]["unlock_ids"][0].as_i64().unwrap(), second);

    // Read endpoint needs no auth and reflects the edge
    let (status, json) = call(api.addr, "GET", &format!("/api/skills/{}", first), None, None);
    assert_eq!(status, 200);
    assert_eq!(json["data"]["unlock_ids"][0].as_i64().unwrap(), second);

    // An update without unlock ids clears the edge set
    let (status, json) = call(
        api.addr,
        "PATCH",
        &format!("/api/skills/{}", first),
        Some(&alice_token),
        Some("{}"),
    );
    assert_eq!(status, 200);
    assert_eq!(json["data"]["unlock_ids"].as_array().unwrap().len(), 0);

    let (status, _) = call(
        api.addr,
        "DELETE",
        &format!("/api/skills/{}", second),
        Some(&alice_token),
        None,
    );
    assert_eq!(status, 200);
    let (status, _) = call(api.addr, "GET", &format!("/api/skills/{}", second), None, None);
    assert_eq!(status, 404);
}

#[test]
fn test_skill_mutations_are_owner_gated() {
    let mut tree_id = 0;
    let mut alice_token = String::new();
    let mut bob_token = String::new();
    let api = start(|db| {
        db.create_user("alice", "alice@example.com", "secret").unwrap();
        db.create_user("bob", "bob@example.com", "secret").unwrap();
        tree_id = db.create_skill_tree("Main", None, "alice", &[]).unwrap().id;
        alice_token = db.login("alice", "secret").unwrap();
        bob_token = db.login("bob", "secret").unwrap();
    });

    let (status, json) = call(
        api.addr,
        "POST",
        "/api/skills",
        Some(&alice_token),
        Some(&format!(r#"{{"name": "Guarded", "skill_tree_id": {}}}"#, tree_id)),
    );
    assert_eq!(status, 200);
    let skill_id = json["data"]["id"].as_i64().unwrap();

    let (status, _) = call(
        api.addr,
        "POST",
        "/api/skills",
        Some(&bob_token),
        Some(&format!(r#"{{"name": "Intruder", "skill_tree_id": {}}}"#, tree_id)),
    );
    assert_eq!(status, 403);

    let (status, _) = call(
        api.addr,
        "PATCH",
        &format!("/api/skills/{}", skill_id),
        Some(&bob_token),
        Some(r#"{"name": "Defaced"}"#),
    );
    assert_eq!(status, 403);

    let (status, _) = call(
        api.addr,
        "DELETE",
        &format!("/api/skills/{}", skill_id),
        Some(&bob_token),
        None,
    );
    assert_eq!(status, 403);

    // The skill is untouched
    let (status, json) = call(api.addr, "GET", &format!("/api/skills/{}", skill_id), None, None);
    assert_eq!(status, 200);
    assert_eq!(json["data"]["name"], "Guarded");
}
