//! Unix domain socket IPC listener.
//!
//! Accepts connections, reads newline-delimited JSON-RPC messages and
//! dispatches them to the [`MilestoneService`].

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::PROTOCOL_VERSION;
use crate::protocol::*;
use crate::service::{MilestoneService, NewMilestone, SignoffError};

type MethodResult = Result<serde_json::Value, RpcErrorBody>;

const CAPABILITIES: &[&str] = &[
    "milestone.create",
    "milestone.view",
    "milestone.permissions",
    "deliverable.put",
    "forecast.update",
    "baseline.update",
    "baseline.sign",
    "baseline.reset",
    "certificate.generate",
    "certificate.sign",
    "audit.list",
    "service.status",
];

/// Bind a listener at `path`, replacing a stale socket file.
pub fn bind_listener(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!("Sign-off service listening on {}", path.display());
    Ok(listener)
}

/// Serve connections until `shutdown` flips to `true` or its sender drops.
pub async fn serve(
    service: Arc<MilestoneService>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let svc = Arc::clone(&service);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(svc, stream).await {
                            tracing::warn!("Connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {e}");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("IPC listener stopping");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(service: Arc<MilestoneService>, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(&service, trimmed).await;
        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch a single JSON-RPC message.
pub async fn dispatch_message(service: &MilestoneService, raw: &str) -> serde_json::Value {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return serde_json::to_value(RpcError {
                id: RequestId::Integer(0),
                error: RpcErrorBody {
                    code: ERR_INVALID_REQUEST,
                    message: format!("Invalid JSON-RPC: {e}"),
                    data: None,
                },
            })
            .unwrap_or_default();
        }
    };

    let id = request.id.clone();
    match dispatch_method(service, &request.method, request.params).await {
        Ok(result) => serde_json::to_value(RpcResponse { id, result }).unwrap_or_default(),
        Err(error) => {
            tracing::debug!(method = %request.method, code = error.code, "{}", error.message);
            serde_json::to_value(RpcError { id, error }).unwrap_or_default()
        }
    }
}

async fn dispatch_method(
    service: &MilestoneService,
    method: &str,
    params: Option<serde_json::Value>,
) -> MethodResult {
    match method {
        "hello" => handle_hello(params),
        "milestone.create" => {
            let input: NewMilestone = parse_params(method, params)?;
            let created = service.create_milestone(input).await.map_err(to_rpc)?;
            to_result(&service.get_milestone_view(&created.id).await.map_err(to_rpc)?)
        }
        "milestone.view" => {
            let p: MilestoneRefParams = parse_params(method, params)?;
            to_result(&service.get_milestone_view(&p.milestone_id).await.map_err(to_rpc)?)
        }
        "milestone.permissions" => {
            let p: PermissionsParams = parse_params(method, params)?;
            to_result(&service.affordances(&p.milestone_id, p.role).await.map_err(to_rpc)?)
        }
        "deliverable.put" => {
            let deliverable = parse_params(method, params)?;
            to_result(&service.put_deliverable(deliverable).await.map_err(to_rpc)?)
        }
        "forecast.update" => {
            let p: ForecastUpdateParams = parse_params(method, params)?;
            service
                .update_forecast(&p.milestone_id, p.forecast)
                .await
                .map_err(to_rpc)?;
            view(service, &p.milestone_id).await
        }
        "baseline.update" => {
            let p: BaselineUpdateParams = parse_params(method, params)?;
            service
                .update_baseline(&p.milestone_id, &p.caller, p.baseline)
                .await
                .map_err(to_rpc)?;
            view(service, &p.milestone_id).await
        }
        "baseline.sign" => {
            let p: BaselineSignParams = parse_params(method, params)?;
            service
                .sign_baseline(&p.milestone_id, p.signatory, &p.caller)
                .await
                .map_err(to_rpc)?;
            view(service, &p.milestone_id).await
        }
        "baseline.reset" => {
            let p: BaselineResetParams = parse_params(method, params)?;
            service
                .reset_baseline(&p.milestone_id, &p.caller, p.confirmed)
                .await
                .map_err(to_rpc)?;
            view(service, &p.milestone_id).await
        }
        "certificate.generate" => {
            let p: CertificateGenerateParams = parse_params(method, params)?;
            let cert = service
                .generate_certificate(&p.milestone_id, &p.caller, p.confirmed)
                .await
                .map_err(to_rpc)?;
            to_result(&crate::service::CertificateView::from(&cert))
        }
        "certificate.sign" => {
            let p: CertificateSignParams = parse_params(method, params)?;
            let cert = service
                .sign_certificate(&p.certificate_id, p.signatory, &p.caller)
                .await
                .map_err(to_rpc)?;
            to_result(&crate::service::CertificateView::from(&cert))
        }
        "audit.list" => {
            let p: MilestoneRefParams = parse_params(method, params)?;
            let entries = service.audit_trail(&p.milestone_id).await.map_err(to_rpc)?;
            to_result(&AuditListResult { entries })
        }
        "service.status" => to_result(&ServiceStatusResult {
            uptime_s: service.uptime_s(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            admin_signs_for_parties: service.gate().admin_signs_for_parties(),
        }),
        _ => Err(RpcErrorBody {
            code: ERR_METHOD_NOT_FOUND,
            message: format!("Unknown method: {method}"),
            data: None,
        }),
    }
}

/// Handle the `hello` handshake.
fn handle_hello(params: Option<serde_json::Value>) -> MethodResult {
    let hello: HelloParams = parse_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(invalid_params(format!(
            "Incompatible protocol version: client={}, service={}",
            hello.protocol_version, PROTOCOL_VERSION
        )));
    }

    to_result(&HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: CAPABILITIES.iter().map(ToString::to_string).collect(),
    })
}

async fn view(service: &MilestoneService, milestone_id: &str) -> MethodResult {
    to_result(&service.get_milestone_view(milestone_id).await.map_err(to_rpc)?)
}

/// Decode method params.
///
/// Absent params are a protocol error. Params that are present but do not
/// decode (unknown role or signatory, malformed date, missing field) are
/// reported in the `validation` family like any other bad domain input.
fn parse_params<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, RpcErrorBody> {
    let value = params.ok_or_else(|| invalid_params("Missing params".to_string()))?;
    serde_json::from_value(value).map_err(|e| {
        to_rpc(SignoffError::Validation(format!(
            "Invalid {method} params: {e}"
        )))
    })
}

fn to_result<T: Serialize>(value: &T) -> MethodResult {
    serde_json::to_value(value).map_err(|e| RpcErrorBody {
        code: ERR_STORAGE,
        message: format!("Serialize error: {e}"),
        data: None,
    })
}

fn invalid_params(message: String) -> RpcErrorBody {
    RpcErrorBody {
        code: ERR_INVALID_PARAMS,
        message,
        data: None,
    }
}

/// Map a service error onto a JSON-RPC error body.
fn to_rpc(err: SignoffError) -> RpcErrorBody {
    let code = match err {
        SignoffError::NotFound { .. } => ERR_NOT_FOUND,
        SignoffError::Forbidden { .. } => ERR_FORBIDDEN,
        SignoffError::Conflict(_) | SignoffError::StaleWrite(_) => ERR_CONFLICT,
        SignoffError::Validation(_) => ERR_VALIDATION,
        SignoffError::Storage(_) => ERR_STORAGE,
    };
    RpcErrorBody {
        code,
        message: err.to_string(),
        data: Some(ErrorData {
            category: err.category().to_string(),
            reason: err.reason_code().to_string(),
        }),
    }
}
