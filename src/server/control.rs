use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::http::{
    HttpError, HttpRequest, read_http_request, write_error_response, write_json_response,
};
use crate::domain::{SessionId, SessionState, TestRequest};
use crate::error::{ReportError, ServerError, SessionError};
use crate::session::{SessionManager, SessionStatus};
use crate::shutdown::ShutdownReceiver;

const SERVICE_NAME: &str = "loadctl";

/// Control-API routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Route {
    StartTest,
    StopTest,
    DismissTest,
    TestStatus(SessionId),
    TestHistory,
    TestReport(SessionId),
    Health,
    MethodNotAllowed,
    NotFound,
}

pub(super) fn route(method: &str, path: &str) -> Route {
    let path = path.trim_end_matches('/');
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let resolved = match segments.as_slice() {
        ["api", "start-test"] => ("POST", Route::StartTest),
        ["api", "stop-test"] => ("POST", Route::StopTest),
        ["api", "dismiss-test"] => ("POST", Route::DismissTest),
        ["api", "test-history"] => ("GET", Route::TestHistory),
        ["api", "health"] => ("GET", Route::Health),
        ["api", "test-status", id] if !id.is_empty() => {
            ("GET", Route::TestStatus(SessionId::from(*id)))
        }
        ["api", "test-report", id] if !id.is_empty() => {
            ("GET", Route::TestReport(SessionId::from(*id)))
        }
        _ => return Route::NotFound,
    };
    let (expected, route) = resolved;
    if method.eq_ignore_ascii_case(expected) {
        route
    } else {
        Route::MethodNotAllowed
    }
}

#[derive(Debug, Deserialize)]
struct TestIdRequest {
    #[serde(rename = "testId", alias = "test_id")]
    test_id: SessionId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    test_id: SessionId,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    ok: bool,
    status: SessionState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    active_sessions: usize,
}

impl From<SessionError> for HttpError {
    fn from(err: SessionError) -> Self {
        HttpError::new(err.status_code(), err.to_string())
    }
}

impl From<ReportError> for HttpError {
    fn from(err: ReportError) -> Self {
        let status = match err {
            ReportError::NotFound { .. } => 404,
            ReportError::CreateDir { .. }
            | ReportError::Serialize { .. }
            | ReportError::Write { .. }
            | ReportError::Parse { .. }
            | ReportError::Read { .. } => 500,
            #[cfg(test)]
            ReportError::TestExpectation { .. } | ReportError::TestExpectationValue { .. } => 500,
        };
        HttpError::new(status, err.to_string())
    }
}

/// Accept control connections until shutdown is signalled.
pub async fn serve_control(
    listener: TcpListener,
    manager: SessionManager,
    stop_timeout: Duration,
    mut shutdown_rx: ShutdownReceiver,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Control server shutting down.");
                break;
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("Failed to accept control connection: {}", err);
                        continue;
                    }
                };
                debug!("Control connection from {}", peer);
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_control_connection(socket, &manager, stop_timeout).await {
                        debug!("Control connection ended with error: {}", err);
                    }
                });
            }
        }
    }
}

async fn handle_control_connection(
    mut socket: TcpStream,
    manager: &SessionManager,
    stop_timeout: Duration,
) -> Result<(), ServerError> {
    let request = match read_http_request(&mut socket).await {
        Ok(request) => request,
        Err(err) => return write_error_response(&mut socket, err.status, &err.message).await,
    };
    match dispatch(&request, manager, stop_timeout).await {
        Ok(Reply(body)) => write_json_response(&mut socket, 200, &body).await,
        Err(err) => write_error_response(&mut socket, err.status, &err.message).await,
    }
}

struct Reply(serde_json::Value);

impl Reply {
    fn of<T: Serialize>(value: &T) -> Result<Self, HttpError> {
        serde_json::to_value(value)
            .map(Self)
            .map_err(|err| HttpError::new(500, format!("Failed to encode response: {}", err)))
    }
}

async fn dispatch(
    request: &HttpRequest,
    manager: &SessionManager,
    stop_timeout: Duration,
) -> Result<Reply, HttpError> {
    if request
        .headers
        .get("transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"))
    {
        return Err(HttpError::new(411, "Chunked request bodies are not supported"));
    }

    match route(&request.method, &request.path) {
        Route::StartTest => {
            let test_request: TestRequest = parse_body(&request.body)?;
            let test_id = manager.start(&test_request).await?;
            Reply::of(&StartResponse { test_id })
        }
        Route::StopTest => {
            let TestIdRequest { test_id } = parse_body(&request.body)?;
            let status = tokio::time::timeout(stop_timeout, manager.stop(&test_id))
                .await
                .map_err(|_elapsed| HttpError::new(504, "Timed out waiting for test to stop"))??;
            info!("Test {} stop acknowledged ({}).", test_id, status);
            Reply::of(&StopResponse { ok: true, status })
        }
        Route::DismissTest => {
            let TestIdRequest { test_id } = parse_body(&request.body)?;
            let status = tokio::time::timeout(stop_timeout, manager.dismiss(&test_id))
                .await
                .map_err(|_elapsed| HttpError::new(504, "Timed out waiting for test to stop"))??;
            Reply::of(&StopResponse { ok: true, status })
        }
        Route::TestStatus(test_id) => {
            let view = manager.status(&test_id)?;
            Reply::of(&SessionStatus::from(&view))
        }
        Route::TestHistory => Reply::of(&manager.history()),
        Route::TestReport(test_id) => Ok(Reply(manager.report(&test_id).await?)),
        Route::Health => Reply::of(&HealthResponse {
            status: "ok",
            service: SERVICE_NAME,
            active_sessions: manager.active_count(),
        }),
        Route::MethodNotAllowed => Err(HttpError::new(405, "Method not allowed")),
        Route::NotFound => Err(HttpError::new(404, "Not found")),
    }
}

fn parse_body<T>(body: &[u8]) -> Result<T, HttpError>
where
    T: for<'de> Deserialize<'de>,
{
    if body.is_empty() {
        return Err(HttpError::new(400, "Missing JSON body"));
    }
    serde_json::from_slice(body).map_err(|err| HttpError::new(400, format!("Invalid JSON: {}", err)))
}
