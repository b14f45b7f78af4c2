//! Fixtures shared by the coordinator and activation manager tests.

use axum::{extract::Json, http::StatusCode, routing::post, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};

use crate::remote::{RemoteClient, DECISION_PATH, REGISTER_PATH, STREAM_UPDATE_PATH};
use crate::types::InstanceIdentity;

/// A migrated pool over a temporary file. Keep the file alive for as long
/// as the pool is used.
pub fn file_pool() -> (tempfile::NamedTempFile, DbPool) {
    let file = tempfile::NamedTempFile::new().expect("temp db file");
    let pool = create_pool(
        file.path().to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("pool");
    let conn = pool.get().expect("connection");
    run_migrations(&conn).expect("migrations");
    (file, pool)
}

pub fn identity(public_url: &str) -> InstanceIdentity {
    InstanceIdentity {
        public_url: public_url.to_string(),
        instance_id: "local-instance".to_string(),
    }
}

pub fn client() -> RemoteClient {
    RemoteClient::new(Duration::from_secs(2)).expect("client")
}

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{}", addr)
}

/// A base URL nothing listens on.
pub async fn unreachable_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}

/// A partner stub that records every body it receives on the exchange
/// paths and answers with `status`.
#[derive(Clone)]
pub struct RecordingPartner {
    pub base_url: String,
    pub bodies: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingPartner {
    pub async fn start(status: StatusCode) -> Self {
        let bodies: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut router = Router::new();
        for path in [REGISTER_PATH, DECISION_PATH, STREAM_UPDATE_PATH] {
            let bodies = bodies.clone();
            router = router.route(
                path,
                post(move |Json(body): Json<Value>| {
                    let bodies = bodies.clone();
                    async move {
                        bodies.lock().unwrap().push((path.to_string(), body));
                        (status, Json(serde_json::json!({ "status": "ok" })))
                    }
                }),
            );
        }

        Self {
            base_url: serve(router).await,
            bodies,
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.bodies.lock().unwrap().clone()
    }
}
