//! End-to-end pipeline scenarios
//!
//! Each test builds a config against a file-backed sqlite database, seeds
//! tables through the raw pool, and drives the built router with real
//! requests. Covered here:
//! - parameter mapping with numeric coercion
//! - mapping-driven client rejection (400)
//! - inter-step references through the opaque context
//! - envelope-driven status, headers, and body selection
//! - multi-valued query parameter expansion into IN lists
//! - rollback of every transaction on step failure, commit on success

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use chisel::config::Config;
use chisel::db::Databases;
use chisel::server;

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    router: Router,
    dbs: Arc<Databases>,
    // Keeps the database file alive for the test's duration.
    _dir: TempDir,
}

async fn setup(endpoints: Value) -> Harness {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());

    let conf: Config = serde_json::from_value(json!({
        "databases": {"main": {"url": url}},
        "endpoints": endpoints,
    }))
    .unwrap();
    conf.validate().unwrap();

    let dbs = Arc::new(Databases::open_all(&conf.databases).await.unwrap());
    let router = server::build_router(&conf, dbs.clone(), 0).unwrap();
    Harness {
        router,
        dbs,
        _dir: dir,
    }
}

async fn exec(h: &Harness, sql: &str) {
    let db = h.dbs.get("main").unwrap();
    sqlx::query(sql).execute(&db.pool).await.unwrap();
}

async fn count(h: &Harness, sql: &str) -> i64 {
    use sqlx::Row;
    let db = h.dbs.get("main").unwrap();
    let row = sqlx::query(sql).fetch_one(&db.pool).await.unwrap();
    row.get::<i64, _>(0)
}

async fn get(h: &Harness, uri: &str) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let resp = h
        .router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec(), headers)
}

fn body_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

// =============================================================================
// Parameter mapping
// =============================================================================

/// Path parameter coerced to a number and used as a bound argument.
#[tokio::test]
async fn test_path_param_numeric_coercion() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/foo/:id",
        "path_params": {"id": {"map": ["tonumber"]}},
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{
                "query": "SELECT id, name FROM foo WHERE id = ? LIMIT 1",
                "args": [{"path": "id"}],
                "map": ["first"]
            }]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE foo (id INTEGER, name TEXT)").await;
    exec(&h, "INSERT INTO foo VALUES (42, 'x')").await;

    let (status, body, _) = get(&h, "/foo/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body), json!({"id": 42, "name": "x"}));
}

/// A mapping that raises rejects the request with a 400 naming the value.
#[tokio::test]
async fn test_mapping_error_rejects_with_400() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/foo/:id",
        "path_params": {"id": {"map": [
            "tonumber",
            "if . <= 0 then error(\"bad\") else . end"
        ]}},
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{
                "query": "SELECT * FROM foo WHERE id = ?",
                "args": [{"path": "id"}]
            }]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE foo (id INTEGER, name TEXT)").await;

    let (status, body, _) = get(&h, "/foo/0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("bad"), "{text}");
    assert!(text.contains("\"id\""), "{text}");
}

// =============================================================================
// Inter-step data flow
// =============================================================================

/// Step 1 reads step 0's mapped output through `$context.outputs`.
#[tokio::test]
async fn test_inter_step_reference() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/builds/:id",
        "path_params": {"id": {"map": ["tonumber"]}},
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [
                {
                    "query": "SELECT id, name FROM builds WHERE id = ? LIMIT 1",
                    "args": [{"path": "id"}],
                    "map": ["first"]
                },
                {
                    "query": "SELECT path FROM artifacts WHERE build_id = ? ORDER BY path",
                    "args": [{"expr": "$context.outputs[0].id"}],
                    "map": ["{data: ($context.outputs[0] + {artifacts: .})}"]
                }
            ]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE builds (id INTEGER, name TEXT)").await;
    exec(&h, "CREATE TABLE artifacts (build_id INTEGER, path TEXT)").await;
    exec(&h, "INSERT INTO builds VALUES (7, 'release')").await;
    exec(&h, "INSERT INTO artifacts VALUES (7, 'a.tar'), (7, 'b.tar'), (8, 'c.tar')").await;

    let (status, body, _) = get(&h, "/builds/7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body_json(&body),
        json!({"data": {
            "id": 7,
            "name": "release",
            "artifacts": [{"path": "a.tar"}, {"path": "b.tar"}]
        }})
    );
}

// =============================================================================
// Response envelope
// =============================================================================

/// An empty result set turns into a pipeline-driven 404.
#[tokio::test]
async fn test_envelope_driven_404() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/foo/:id",
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{
                "query": "SELECT id, name FROM foo WHERE id = ?",
                "args": [{"path": "id"}],
                "map": ["if length == 0 then {__response: {status: 404}} else {data: first} end"]
            }]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE foo (id INTEGER, name TEXT)").await;

    let (status, body, _) = get(&h, "/foo/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // The envelope never reaches the client.
    assert_eq!(body_json(&body), json!({}));
}

/// Envelope headers are appended, preserving multi-valued headers.
#[tokio::test]
async fn test_envelope_headers_and_data_key() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/things",
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{
                "query": "SELECT id FROM things ORDER BY id",
                "map": ["{items: ., __response: {status: 200, data_key: \"items\", headers: {\"X-Tag\": [\"a\", \"b\"]}}}"]
            }]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE things (id INTEGER)").await;
    exec(&h, "INSERT INTO things VALUES (1), (2)").await;

    let (status, body, headers) = get(&h, "/things").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body), json!([{"id": 1}, {"id": 2}]));
    let tags: Vec<_> = headers
        .get_all("x-tag")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(tags, vec!["a", "b"]);
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
}

// =============================================================================
// Argument expansion
// =============================================================================

/// A multi-valued query parameter expands into one bound value per element.
#[tokio::test]
async fn test_multi_valued_query_param_expands() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/t",
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{
                "query": "SELECT tag FROM t WHERE tag IN (?) ORDER BY tag",
                "args": [{"query": "tag"}]
            }]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE t (tag TEXT)").await;
    exec(&h, "INSERT INTO t VALUES ('a'), ('b'), ('c')").await;

    let (status, body, _) = get(&h, "/t?tag=a&tag=b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body), json!([{"tag": "a"}, {"tag": "b"}]));
}

// =============================================================================
// Transaction lifecycle
// =============================================================================

/// A failing later step rolls back every declared transaction.
#[tokio::test]
async fn test_rollback_on_step_failure() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/write",
        "query": {
            "transactions": [{"db": "main"}, {"db": "main"}],
            "steps": [
                {"transaction": 0, "query": "INSERT INTO log (line) VALUES ('hello')"},
                {"transaction": 1, "query": "SELECT definitely not valid sql"}
            ]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE log (line TEXT)").await;

    let (status, body, _) = get(&h, "/write").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    // Details stay in the logs; the client gets a generic line.
    let text = String::from_utf8(body).unwrap();
    assert!(!text.contains("sql"), "{text}");

    assert_eq!(count(&h, "SELECT COUNT(*) FROM log").await, 0);
}

/// A fully successful pipeline commits its writes.
#[tokio::test]
async fn test_commit_on_success() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/write",
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [
                {"query": "INSERT INTO log (line) VALUES ('hello')"},
                {"query": "SELECT COUNT(*) AS n FROM log", "map": ["first"]}
            ]
        }
    }]))
    .await;
    exec(&h, "CREATE TABLE log (line TEXT)").await;

    let (status, body, _) = get(&h, "/write").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body), json!({"n": 1}));
    assert_eq!(count(&h, "SELECT COUNT(*) FROM log").await, 1);
}

/// `isolation: none` executes against the pool and needs no finalization.
#[tokio::test]
async fn test_isolation_none_executes_directly() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/direct",
        "query": {
            "transactions": [{"db": "main", "isolation": "none"}],
            "steps": [{"query": "SELECT 1 AS one", "map": ["first"]}]
        }
    }]))
    .await;

    let (status, body, _) = get(&h, "/direct").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body), json!({"one": 1}));
}

// =============================================================================
// Request bodies
// =============================================================================

/// A JSON body is visible to expression arguments via the opaque context.
#[tokio::test]
async fn test_json_body_reaches_pipeline() {
    let h = setup(json!([{
        "method": "POST",
        "path": "/echo",
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{
                "query": "SELECT ? AS echo",
                "args": [{"expr": "$context.body.name"}],
                "map": ["first"]
            }]
        }
    }]))
    .await;

    let resp = h
        .router
        .clone()
        .oneshot(
            Request::post("/echo")
                .header("content-type", "application/json")
                .body(Body::from("{\"name\": \"alice\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body_json(&bytes), json!({"echo": "alice"}));
}

/// Malformed JSON bodies are refused before the pipeline runs.
#[tokio::test]
async fn test_malformed_body_is_406() {
    let h = setup(json!([{
        "method": "POST",
        "path": "/echo",
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{"query": "SELECT 1 AS one"}]
        }
    }]))
    .await;

    let resp = h
        .router
        .clone()
        .oneshot(
            Request::post("/echo")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
}

/// Literal and expression arguments can reference earlier arguments of the
/// same step.
#[tokio::test]
async fn test_intra_step_arg_reference() {
    let h = setup(json!([{
        "method": "GET",
        "path": "/args",
        "query": {
            "transactions": [{"db": "main"}],
            "steps": [{
                "query": "SELECT ? AS a, ? AS b",
                "args": [10, {"expr": "$context.args[0] + 1"}],
                "map": ["first"]
            }]
        }
    }]))
    .await;

    let (status, body, _) = get(&h, "/args").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body), json!({"a": 10, "b": 11}));
}
