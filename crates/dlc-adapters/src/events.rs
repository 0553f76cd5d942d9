//! Armado de payloads de eventos desde el tracker.

use chrono::{DateTime, Utc};
use dlc_core::{CoreError, MeterEventPayload, TrackerStore};
use dlc_domain::Stage;
use log::info;

/// Arma el payload de hito de una solicitud leyendo su header del
/// tracker. Con `message` vacío se usa la descripción por defecto de la
/// etapa.
pub fn assemble_event_payload(store: &dyn TrackerStore,
                              correlation_id: &str,
                              stage: Stage,
                              event_datetime: DateTime<Utc>,
                              message: &str)
                              -> Result<MeterEventPayload, CoreError> {
    info!("assembling event payload for correlation id {correlation_id}, stage {stage}");

    let header = store.get_header(correlation_id)?
                      .ok_or_else(|| CoreError::HeaderNotFound(correlation_id.to_string()))?;

    Ok(MeterEventPayload::for_milestone(&header, stage, event_datetime, message))
}
