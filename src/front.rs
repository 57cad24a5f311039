//! Front cooperativo: una orden JSON por línea, una respuesta JSON por línea.
//!
//! Todo lo que toca el store o el disco corre en `spawn_blocking`; el hilo
//! del runtime sólo parsea, espera y serializa. Cada orden se atiende en su
//! propia tarea, así que las respuestas pueden salir en otro orden que las
//! órdenes: el `request_id` de la orden, si lo trae, vuelve en su respuesta.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use img_core::{AnalysisOrchestrator, AnalysisRequest, EnqueueResponse, JobError, RecordFilter};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Enqueue {
        dataset_id: i64,
        image_id: i64,
        request: AnalysisRequest,
        #[serde(default)]
        wait: bool,
    },
    Status {
        result_id: Uuid,
    },
    Cancel {
        result_id: Uuid,
    },
    List {
        #[serde(default)]
        filter: RecordFilter,
    },
    Stats,
    Executor,
}

fn error_value(code: &str, message: impl ToString) -> Value {
    json!({ "success": false, "error_code": code, "message": message.to_string() })
}

fn job_error(e: &JobError) -> Value {
    error_value(e.code(), e)
}

async fn blocking<T, F>(orchestrator: Arc<AnalysisOrchestrator>, f: F) -> Value
    where T: Serialize + Send + 'static,
          F: FnOnce(&AnalysisOrchestrator) -> Result<T, JobError> + Send + 'static
{
    match tokio::task::spawn_blocking(move || f(orchestrator.as_ref())).await {
        Ok(Ok(v)) => serde_json::to_value(v).unwrap_or_else(|e| error_value("internal", e)),
        Ok(Err(e)) => job_error(&e),
        Err(e) => error_value("internal", e),
    }
}

/// Espera a que el registro llegue a un estado terminal y devuelve su estado.
async fn wait_terminal(orchestrator: Arc<AnalysisOrchestrator>, result_id: Uuid, poll: Duration) -> Value {
    loop {
        let o = orchestrator.clone();
        let record = tokio::task::spawn_blocking(move || o.queries().record(result_id)).await;
        match record {
            Ok(Ok(r)) if r.is_terminal() => {
                return blocking(orchestrator, move |o| o.queries().status(result_id)).await;
            }
            Ok(Ok(r)) => debug!("waiting result_id={} status={}", result_id, r.status()),
            Ok(Err(e)) => return job_error(&e),
            Err(e) => return error_value("internal", e),
        }
        tokio::time::sleep(poll).await;
    }
}

pub async fn handle_command(orchestrator: Arc<AnalysisOrchestrator>, command: Command, poll: Duration) -> Value {
    match command {
        Command::Enqueue { dataset_id,
                           image_id,
                           request,
                           wait, } => {
            let o = orchestrator.clone();
            let joined = tokio::task::spawn_blocking(move || o.enqueue(dataset_id, image_id, request)).await;
            let response = match joined {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => EnqueueResponse::rejected(image_id, &e),
                Err(e) => return error_value("internal", e),
            };
            match (wait, response.result_id) {
                (true, Some(result_id)) if response.success => wait_terminal(orchestrator, result_id, poll).await,
                _ => serde_json::to_value(response).unwrap_or_else(|e| error_value("internal", e)),
            }
        }
        Command::Status { result_id } => blocking(orchestrator, move |o| o.queries().status(result_id)).await,
        Command::Cancel { result_id } => {
            blocking(orchestrator, move |o| o.cancel(result_id).and_then(|_| o.queries().status(result_id))).await
        }
        Command::List { filter } => blocking(orchestrator, move |o| o.queries().list_status(&filter)).await,
        Command::Stats => blocking(orchestrator, |o| o.queries().stats()).await,
        Command::Executor => blocking(orchestrator, |o| Ok(o.executor_stats())).await,
    }
}

/// Parsea y atiende una línea. Una línea inválida produce `bad_request`.
pub async fn handle_line(orchestrator: Arc<AnalysisOrchestrator>, line: &str, poll: Duration) -> Value {
    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return error_value("bad_request", e),
    };
    let request_id = raw.get("request_id").cloned();
    let mut response = match serde_json::from_value::<Command>(raw) {
        Ok(command) => handle_command(orchestrator, command, poll).await,
        Err(e) => error_value("bad_request", e),
    };
    if let (Some(id), Some(fields)) = (request_id, response.as_object_mut()) {
        fields.insert("request_id".to_string(), id);
    }
    response
}

/// Lee órdenes de `input` hasta EOF y atiende cada una en una tarea aparte;
/// las respuestas salen por `responses` según terminan. Tras el EOF espera a
/// las órdenes pendientes. Soltar el futuro aborta las que queden.
pub async fn serve_lines<R>(orchestrator: Arc<AnalysisOrchestrator>,
                            input: R,
                            responses: UnboundedSender<Value>,
                            poll: Duration)
                            -> io::Result<()>
    where R: AsyncBufRead + Unpin
{
    let mut lines = input.lines();
    let mut pending = JoinSet::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let orchestrator = orchestrator.clone();
        let responses = responses.clone();
        pending.spawn(async move {
                   let response = handle_line(orchestrator, &line, poll).await;
                   if responses.send(response).is_err() {
                       debug!("response dropped, writer gone");
                   }
               });
        while let Some(done) = pending.try_join_next() {
            if let Err(e) = done {
                warn!("command task failed err={}", e);
            }
        }
    }
    while let Some(done) = pending.join_next().await {
        if let Err(e) = done {
            warn!("command task failed err={}", e);
        }
    }
    Ok(())
}
