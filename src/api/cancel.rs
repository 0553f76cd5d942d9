//! Cancelación de solicitudes de override.
//!
//! Precondiciones validadas acá (la máquina de cancelación asume un
//! paquete ya chequeado): header existente, suscripción correcta, no
//! pertenecer a un despacho agrupado, etapa cancelable y ventana todavía
//! vigente.

use chrono::Utc;
use dlc_domain::stage::IN_PROGRESS_STAGES;
use dlc_domain::window::truncate_seconds;
use log::{info, warn};
use serde_json::json;

use super::{format_response, ApiResponse, HTTP_BAD_REQUEST, HTTP_OK};
use crate::workflow::{CancelRequestPackage, LoadControlManager};

/// Fallos de validación de la cancelación (se devuelven como 400).
struct InvalidRequest(String);

/// Procesa la cancelación de `correlation_id` pedida por `subscriber`
/// sobre la suscripción `subscription_id`.
pub async fn process_cancel_request(manager: &LoadControlManager,
                                    subscription_id: &str,
                                    correlation_id: &str,
                                    subscriber: &str)
                                    -> ApiResponse {
    info!("subscription id: {subscription_id}, correlation id: {correlation_id}, subscriber: {subscriber}");

    match validate(manager, subscription_id, correlation_id, subscriber) {
        Ok(package) => {
            // La máquina corre acá mismo; sus fallos se reportan por el
            // stream de eventos, no por esta respuesta de aceptación.
            manager.cancel(package).await;
            format_response(HTTP_OK,
                            json!({
                                "message": "DLC cancel request in progress",
                                "correlation_id": correlation_id,
                            }))
        }
        Err(InvalidRequest(message)) => {
            warn!("invalid cancel request for {correlation_id}: {message}");
            format_response(HTTP_BAD_REQUEST,
                            json!({
                                "message": message,
                                "correlation_id": correlation_id,
                            }))
        }
    }
}

fn validate(manager: &LoadControlManager,
            subscription_id: &str,
            correlation_id: &str,
            subscriber: &str)
            -> Result<CancelRequestPackage, InvalidRequest> {
    if subscriber.is_empty() {
        return Err(InvalidRequest("Subscriber is required".into()));
    }

    let header = manager.tracker()
                        .get_header(correlation_id)
                        .map_err(|e| InvalidRequest(e.to_string()))?
                        .ok_or_else(|| InvalidRequest(format!("Correlation id {correlation_id} not found")))?;

    if header.group_id.is_some() {
        return Err(InvalidRequest(format!(
            "Correlation id {correlation_id} is a part of group dispatch and cannot be canceled"
        )));
    }

    if header.subscription_id != subscription_id {
        return Err(InvalidRequest(format!(
            "Subscription id {subscription_id} does not match the subscription id of the override request to cancel"
        )));
    }

    if !IN_PROGRESS_STAGES.contains(&header.current_stage) {
        return Err(InvalidRequest(format!("Load control request in state: {} - cannot cancel from this state",
                                          header.current_stage)));
    }

    // Sin microsegundos, como guarda fechas el tracker.
    let now = truncate_seconds(Utc::now());
    match header.request_end {
        Some(request_end) if request_end > now => {}
        _ => {
            return Err(InvalidRequest("Request given has an end date in the past so is already completed".into()));
        }
    }

    Ok(CancelRequestPackage::from_header(&header))
}
