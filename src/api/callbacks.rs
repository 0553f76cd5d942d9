//! Callbacks del head-end.
//!
//! El head-end notifica el inicio y el fin efectivos de un override
//! conociendo únicamente su política; la solicitud se resuelve por la ruta
//! de acceso `(head_end, policy_id)` del tracker. La máquina de override
//! no agenda estas transiciones: llegan desde afuera.
//!
//! Semántica:
//! - `Started` avanza la solicitud a `DLC_OVERRIDE_STARTED`.
//! - `Finished` la cierra en `DLC_OVERRIDE_FINISHED` (etapa terminal).
//! - Los consumidores reintentan: un callback sobre una solicitud ya
//!   terminal se responde con el error del tracker y no muta nada.

use chrono::{DateTime, Utc};
use dlc_core::{CoreError, HeaderPatch, MeterEventPayload, RequestHeader};
use dlc_domain::Stage;
use log::info;

use crate::workflow::LoadControlManager;

/// Hito reportado por el head-end sobre una política desplegada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMilestone {
    /// El interruptor empezó a aplicar el override.
    Started,
    /// El override terminó su ventana.
    Finished,
}

impl PolicyMilestone {
    fn stage(&self) -> Stage {
        match self {
            PolicyMilestone::Started => Stage::DlcOverrideStarted,
            PolicyMilestone::Finished => Stage::DlcOverrideFinished,
        }
    }
}

/// Procesa un callback del head-end: resuelve la solicitud por
/// `(head_end, policy_id)`, avanza su etapa y emite el hito.
pub fn handle_policy_milestone(manager: &LoadControlManager,
                               head_end: &str,
                               policy_id: i64,
                               milestone: PolicyMilestone,
                               event_datetime: DateTime<Utc>)
                               -> Result<RequestHeader, CoreError> {
    info!("head-end callback: {head_end} policy {policy_id} -> {milestone:?}");

    let header = manager.tracker()
                        .find_by_policy(head_end, policy_id)?
                        .ok_or_else(|| CoreError::HeaderNotFound(format!("{head_end}#{policy_id}")))?;

    let stage = milestone.stage();
    let updated = manager.tracker()
                         .update_tracker(&header.correlation_id, stage, event_datetime, None, HeaderPatch::default())?;
    manager.sink()
           .emit(MeterEventPayload::for_milestone(&updated, stage, event_datetime, ""))?;
    Ok(updated)
}

/// Variante de conveniencia fechada "ahora".
pub fn handle_policy_milestone_now(manager: &LoadControlManager,
                                   head_end: &str,
                                   policy_id: i64,
                                   milestone: PolicyMilestone)
                                   -> Result<RequestHeader, CoreError> {
    handle_policy_milestone(manager, head_end, policy_id, milestone, Utc::now())
}
