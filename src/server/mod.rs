//! # HTTP Server
//!
//! Builds axum routers from endpoint definitions and serves them on every
//! configured bind address. Requests flow: body read → parameter
//! extraction and mapping → pipeline evaluation → response
//! materialization. Shutdown drains in-flight requests for a bounded
//! window, then forces close.

mod errors;

pub use errors::{ServerError, ServerResult};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{RawPathParams, RawQuery, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{BodyType, Config, EndpointDef};
use crate::db::Databases;
use crate::params::ParameterSet;
use crate::{pipeline, response};

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared state for one endpoint's handler.
struct EndpointRuntime {
    def: EndpointDef,
    dbs: Arc<Databases>,
}

/// Build the router for one listener, honoring per-endpoint bind filters.
pub fn build_router(
    conf: &Config,
    dbs: Arc<Databases>,
    binding: usize,
) -> ServerResult<Router> {
    let mut routes: HashMap<String, MethodRouter> = HashMap::new();

    for ep in conf
        .endpoints
        .iter()
        .filter(|ep| ep.serves_binding(binding))
    {
        let method = Method::from_bytes(ep.method.to_ascii_uppercase().as_bytes())
            .ok()
            .and_then(|m| MethodFilter::try_from(m).ok())
            .ok_or_else(|| ServerError::Method {
                method: ep.method.clone(),
                path: ep.path.clone(),
            })?;

        let state = Arc::new(EndpointRuntime {
            def: ep.clone(),
            dbs: dbs.clone(),
        });
        let route = on(method, handle).with_state(state);

        match routes.remove(&ep.path) {
            Some(existing) => {
                routes.insert(ep.path.clone(), existing.merge(route));
            }
            None => {
                routes.insert(ep.path.clone(), route);
            }
        }
    }

    let mut router = Router::new();
    for (path, route) in routes {
        router = router.route(&path, route);
    }
    Ok(router.layer(TraceLayer::new_for_http()))
}

/// Serve every configured bind address until a shutdown signal arrives,
/// then drain and close.
pub async fn serve(conf: Config, dbs: Arc<Databases>) -> ServerResult<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut servers = JoinSet::new();

    for (binding, addr) in conf.effective_bind().into_iter().enumerate() {
        let router = build_router(&conf, dbs.clone(), binding)?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(binding, addr = %addr, "listening");

        let mut rx = shutdown_rx.clone();
        servers.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await
        });
    }

    tokio::select! {
        res = drain(&mut servers) => res,
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining in-flight requests");
            let _ = shutdown_tx.send(true);
            match tokio::time::timeout(SHUTDOWN_GRACE, drain(&mut servers)).await {
                Ok(res) => res,
                Err(_) => {
                    warn!("graceful shutdown window elapsed, forcing close");
                    servers.shutdown().await;
                    Ok(())
                }
            }
        }
    }
}

async fn drain(servers: &mut JoinSet<std::io::Result<()>>) -> ServerResult<()> {
    while let Some(joined) = servers.join_next().await {
        if let Ok(Err(e)) = joined {
            return Err(ServerError::Serve(e));
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

async fn handle(
    State(ep): State<Arc<EndpointRuntime>>,
    path_params: RawPathParams,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let body_value = match read_body(ep.def.body_type, &body) {
        Ok(v) => v,
        Err(msg) => {
            return (StatusCode::NOT_ACCEPTABLE, format!("{msg}\n")).into_response();
        }
    };

    let captures = path_params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()));
    let mut params = ParameterSet::new(captures, query.as_deref());
    if let Err(e) = params
        .apply_mappings(&ep.def.path_params, &ep.def.query_params)
        .await
    {
        warn!(method = %ep.def.method, path = %ep.def.path, error = %e, "parameter mapping failed");
        return (StatusCode::BAD_REQUEST, format!("{e}\n")).into_response();
    }

    match pipeline::evaluate(&ep.def.query, &ep.dbs, body_value, params).await {
        Ok(final_value) => response::materialize(final_value),
        Err(e) => {
            error!(method = %ep.def.method, path = %ep.def.path, error = %e, "pipeline failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error\n").into_response()
        }
    }
}

/// Read the request body per the endpoint's mode. An empty body is absent
/// (null) in every mode that reads one.
fn read_body(mode: BodyType, body: &Bytes) -> Result<Value, &'static str> {
    match mode {
        BodyType::None => Ok(Value::Null),
        BodyType::Json => {
            if body.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_slice(body).map_err(|_| "error parsing request body")
        }
        BodyType::String => {
            if body.is_empty() {
                return Ok(Value::Null);
            }
            match std::str::from_utf8(body) {
                Ok(s) => Ok(Value::String(s.to_string())),
                Err(_) => Err("error reading request body"),
            }
        }
        BodyType::Form => {
            if body.is_empty() {
                return Ok(Value::Null);
            }
            let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
                .map_err(|_| "error parsing request body")?;
            let mut form = serde_json::Map::new();
            for (name, value) in pairs {
                let entry = form
                    .entry(name)
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.push(Value::String(value));
                }
            }
            Ok(Value::Object(form))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_body_json() {
        let v = read_body(BodyType::Json, &Bytes::from_static(b"{\"a\":1}")).unwrap();
        assert_eq!(v, json!({"a": 1}));
        assert_eq!(read_body(BodyType::Json, &Bytes::new()).unwrap(), Value::Null);
        assert!(read_body(BodyType::Json, &Bytes::from_static(b"{nope")).is_err());
    }

    #[test]
    fn test_read_body_string() {
        let v = read_body(BodyType::String, &Bytes::from_static(b"hi")).unwrap();
        assert_eq!(v, json!("hi"));
        assert_eq!(
            read_body(BodyType::String, &Bytes::new()).unwrap(),
            Value::Null
        );
        assert!(read_body(BodyType::String, &Bytes::from_static(b"\xff")).is_err());
    }

    #[test]
    fn test_read_body_form_multi_values() {
        let v = read_body(BodyType::Form, &Bytes::from_static(b"a=1&a=2&b=x")).unwrap();
        assert_eq!(v, json!({"a": ["1", "2"], "b": ["x"]}));
    }

    #[test]
    fn test_read_body_none_ignores_content() {
        let v = read_body(BodyType::None, &Bytes::from_static(b"{\"a\":1}")).unwrap();
        assert_eq!(v, Value::Null);
    }
}
