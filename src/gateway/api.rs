//! Route handlers and payload types for the execution API.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use super::server::SharedSession;
use crate::executor::ExecutionResult;
use crate::ports;
use crate::supervisor::ProcessRole;
use crate::workdir::DEFAULT_REPOSITORY;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    #[serde(default)]
    pub repository_id: Option<String>,
}

// ── Response payload types ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Serialize)]
pub struct ServerStatusEntry {
    pub repository: String,
    #[serde(rename = "type")]
    pub server_type: String,
    pub port: u16,
    /// Seconds since the process started.
    pub uptime: i64,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub servers: Vec<ServerStatusEntry>,
    pub exposed_ports: Vec<u16>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Seconds since the host process started.
    pub uptime: u64,
}

// ── Handlers ──────────────────────────────────────────────────────────

/// `POST /execute` — run a command for a repository.
pub async fn execute(
    State(session): State<SharedSession>,
    Json(request): Json<ExecuteRequest>,
) -> Json<ExecutionResult> {
    session.idle.touch();

    let command = request.command.unwrap_or_default();
    let repository_id = request
        .repository_id
        .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string());

    // An explicit workingDir overrides the registry entry when it names an
    // existing directory; a bad override is ignored rather than fatal.
    if let Some(dir) = request.working_dir.as_deref() {
        let path = std::path::Path::new(dir);
        if let Err(e) = session.executor.workdirs().set(&repository_id, path) {
            tracing::debug!(repository = repository_id, dir, error = %e, "ignoring workingDir override");
        }
    }

    Json(session.executor.execute(&command, &repository_id).await)
}

/// `POST /server/stop` — stop any managed server for a repository.
pub async fn server_stop(
    State(session): State<SharedSession>,
    Json(request): Json<StopRequest>,
) -> Json<StopResponse> {
    session.idle.touch();

    let repository_id = request
        .repository_id
        .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string());

    let supervisor = session.executor.supervisor();
    let mut stopped = Vec::new();
    for role in [ProcessRole::DevServer, ProcessRole::StaticServer] {
        if let Some(process) = supervisor.stop(&repository_id, role).await {
            stopped.push(format!("{} (pid {})", process.role, process.pid));
        }
    }

    if stopped.is_empty() {
        Json(StopResponse {
            success: false,
            output: format!("No server running for repository '{repository_id}'"),
        })
    } else {
        Json(StopResponse {
            success: true,
            output: format!("Stopped {}", stopped.join(", ")),
        })
    }
}

/// `GET /server/status` — managed servers plus the current exposed ports.
pub async fn server_status(State(session): State<SharedSession>) -> Json<StatusResponse> {
    session.idle.touch();

    let config = session.executor.config();
    let servers = session
        .executor
        .supervisor()
        .list()
        .into_iter()
        .map(|p| ServerStatusEntry {
            repository: p.repository_id,
            server_type: p.role.as_str().to_string(),
            port: p.port,
            uptime: (chrono::Utc::now() - p.started_at).num_seconds(),
            url: config.proxy_url(p.port),
        })
        .collect();

    Json(StatusResponse {
        servers,
        exposed_ports: ports::scan_listening_ports().into_iter().collect(),
    })
}

/// `GET /health` — liveness only. Deliberately does not touch the idle
/// governor; monitoring must not keep an abandoned host alive.
pub async fn health(State(session): State<SharedSession>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime: session.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_request_accepts_partial_payloads() {
        let request: ExecuteRequest = serde_json::from_str(r#"{"command": "ls"}"#).unwrap();
        assert_eq!(request.command.as_deref(), Some("ls"));
        assert!(request.repository_id.is_none());
        assert!(request.working_dir.is_none());

        let request: ExecuteRequest = serde_json::from_str("{}").unwrap();
        assert!(request.command.is_none());
    }

    #[test]
    fn execute_request_reads_camel_case_keys() {
        let request: ExecuteRequest = serde_json::from_str(
            r#"{"command": "pwd", "workingDir": "/proj/app", "repositoryId": "demo"}"#,
        )
        .unwrap();
        assert_eq!(request.working_dir.as_deref(), Some("/proj/app"));
        assert_eq!(request.repository_id.as_deref(), Some("demo"));
    }

    #[test]
    fn status_entry_serializes_type_key() {
        let entry = ServerStatusEntry {
            repository: "demo".into(),
            server_type: "dev-server".into(),
            port: 3000,
            uptime: 12,
            url: "http://gw/proxy/3000".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "dev-server");
        assert_eq!(json["repository"], "demo");
    }

    #[test]
    fn status_response_uses_camel_case_ports_key() {
        let response = StatusResponse {
            servers: vec![],
            exposed_ports: vec![3000, 5173],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["exposedPorts"][1], 5173);
    }
}
