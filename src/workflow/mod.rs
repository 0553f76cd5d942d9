//! Orquestación asíncrona del ciclo de vida de overrides.
//!
//! Módulos:
//! - `dispatcher`: consumo de la cola de ingreso con agrupación, troceo y
//!   rate limit (C4).
//! - `override_sm`: máquina de estados de creación/extensión/deploy de
//!   políticas (C5).
//! - `cancel_sm`: máquina de estados de cancelación con reemplazo (C6).
//! - `manager`: cableado de tracker + proveedor + sink + cola, y el
//!   registro de ejecuciones idempotente.

pub mod cancel_sm;
pub mod dispatcher;
pub mod manager;
pub mod override_sm;

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use cancel_sm::{CancelRequestPackage, CancelStateMachine};
pub use dispatcher::ThrottleDispatcher;
pub use manager::LoadControlManager;
pub use override_sm::OverrideStateMachine;

/// Acciones soportadas por la máquina de override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideAction {
    #[serde(rename = "createDLCPolicy")]
    CreateDlcPolicy,
    #[serde(rename = "deployDLCPolicy")]
    DeployDlcPolicy,
}

/// Acciones soportadas por la máquina de cancelación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelAction {
    #[serde(rename = "evaluateRequest")]
    EvaluateRequest,
    #[serde(rename = "createReplacementPolicy")]
    CreateReplacementPolicy,
    #[serde(rename = "deployReplacementPolicy")]
    DeployReplacementPolicy,
    #[serde(rename = "undeployPolicy")]
    UndeployPolicy,
    #[serde(rename = "createNewPolicy")]
    CreateNewPolicy,
    #[serde(rename = "deployNewPolicy")]
    DeployNewPolicy,
    #[serde(rename = "cancelPolicy")]
    CancelPolicy,
    #[serde(rename = "cancellationComplete")]
    CancellationComplete,
    #[serde(rename = "failure")]
    Failure,
}

/// Registro de ejecuciones de workflow en vuelo.
///
/// Garantiza a lo sumo una ejecución por clave (la clave es el correlation
/// id o `GRP-<primero>`): una colisión de clave se loguea y se trata como
/// éxito, que es la semántica de idempotencia del despachador bajo entrega
/// at-least-once. También permite abortar una ejecución en curso (lo usa
/// la cancelación).
#[derive(Default)]
pub struct ExecutionRegistry {
    running: DashMap<String, JoinHandle<()>>,
}

impl ExecutionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lanza `fut` bajo `key` si no hay otra ejecución con la misma clave.
    /// Devuelve `false` (sin lanzar) ante una colisión.
    pub fn submit<F>(self: &Arc<Self>, key: String, fut: F) -> bool
        where F: Future<Output = ()> + Send + 'static
    {
        use dashmap::mapref::entry::Entry;

        match self.running.entry(key.clone()) {
            Entry::Occupied(_) => {
                info!("execution already active for key {key}");
                false
            }
            Entry::Vacant(entry) => {
                // La tarea espera la señal de registro antes de correr, para
                // que su auto-remoción nunca le gane al insert.
                let (ready_tx, ready_rx) = oneshot::channel::<()>();
                let registry = Arc::clone(self);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let _ = ready_rx.await;
                    fut.await;
                    registry.running.remove(&task_key);
                    debug!("execution finished for key {task_key}");
                });
                entry.insert(handle);
                let _ = ready_tx.send(());
                true
            }
        }
    }

    /// Aborta la ejecución bajo `key` si existe.
    pub fn stop(&self, key: &str) -> bool {
        match self.running.remove(key) {
            Some((_, handle)) => {
                info!("stopping execution for key {key}");
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.running.contains_key(key)
    }

    /// Espera (polling corto) a que no queden ejecuciones en vuelo.
    pub async fn wait_idle(&self) {
        while !self.running.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_keys_are_rejected_while_running() {
        let registry = ExecutionRegistry::new();
        let accepted = registry.submit("K1".into(), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });
        assert!(accepted);
        assert!(!registry.submit("K1".into(), async {}));
        registry.wait_idle().await;
        // Terminada la primera, la clave queda libre.
        assert!(registry.submit("K1".into(), async {}));
        registry.wait_idle().await;
    }

    #[tokio::test]
    async fn stop_aborts_a_running_execution() {
        let registry = ExecutionRegistry::new();
        registry.submit("K1".into(), async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });
        assert!(registry.is_running("K1"));
        assert!(registry.stop("K1"));
        assert!(!registry.is_running("K1"));
        assert!(!registry.stop("K1"));
    }

    #[test]
    fn action_names_match_the_wire_protocol() {
        assert_eq!(serde_json::to_string(&OverrideAction::CreateDlcPolicy).unwrap(), "\"createDLCPolicy\"");
        assert_eq!(serde_json::to_string(&CancelAction::CancellationComplete).unwrap(),
                   "\"cancellationComplete\"");
    }
}
