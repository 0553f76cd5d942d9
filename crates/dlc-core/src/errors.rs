//! Errores específicos del motor (simples por ahora).

use dlc_domain::Stage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CoreError {
    #[error("tracker header already exists: {0}")] HeaderExists(String),
    #[error("tracker header not found: {0}")] HeaderNotFound(String),
    #[error("request {correlation_id} is terminal at stage {stage}")]
    TerminalStage { correlation_id: String, stage: Stage },
    #[error("more than one contiguous request found for {site}/{meter_serial}")]
    ContiguityConflict { site: String, meter_serial: String },
    #[error("extension chain broken: {0} not found")] BrokenExtensionChain(String),
    #[error("event sink failure: {0}")] SinkFailure(String),
    #[error("storage failure: {0}")] Storage(String),
    #[error("internal: {0}")] Internal(String),
}
