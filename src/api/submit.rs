//! Alta de solicitudes de override.
//!
//! Orden del pipeline de aceptación:
//! 1. Validación sintáctica (sin correlation id todavía: no hay nada que
//!    rastrear si la solicitud es ilegible).
//! 2. Creación del correlation id y alta del tracker en `RECEIVED`.
//! 3. Validación temporal contra el tracker (duplicados/solapamientos);
//!    los fallos quedan registrados como `DECLINED` con su evento.
//! 4. Encolado hacia el despachador.

use chrono::{DateTime, Duration, Utc};
use dlc_adapters::to_new_request;
use dlc_core::validate::{assemble_error_message, RequestValidator, ValidationError};
use dlc_core::{HeaderPatch, MeterEventPayload};
use dlc_domain::{OverrideRequest, Stage};
use log::{debug, info, warn};
use serde_json::json;
use uuid::Uuid;

use super::{format_response, ApiResponse, HTTP_BAD_REQUEST, HTTP_INTERNAL_ERROR, HTTP_OK};
use crate::queue::QueuedSubmission;
use crate::workflow::LoadControlManager;

/// Offset horario usado para el timestamp legible del correlation id.
const CORRELATION_UTC_OFFSET_HOURS: i64 = 10;
const CORRELATION_DATE_FORMAT: &str = "%Y-%m-%dT%H%M%S";

/// Crea el correlation id usado a lo largo de todo el proceso.
pub fn create_correlation_id(site: &str, now: DateTime<Utc>) -> String {
    let dt = (now + Duration::hours(CORRELATION_UTC_OFFSET_HOURS)).format(CORRELATION_DATE_FORMAT);
    let correlation_id = format!("{site}-{dt}-{}", Uuid::new_v4());
    info!("correlation id: {correlation_id}");
    correlation_id
}

/// Procesa un POST de override para `subscription_id`; `body` es el JSON
/// crudo del transporte.
pub async fn process_override_request(manager: &LoadControlManager, subscription_id: &str, body: &str) -> ApiResponse {
    let request: OverrideRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => {
            warn!("unparseable override request body: {e}");
            return format_response(HTTP_BAD_REQUEST,
                                   json!({
                                       "correlation_id": null,
                                       "message": "Invalid request: body is not a valid DLC override request",
                                   }));
        }
    };

    let settings = manager.settings();
    let now = Utc::now();

    // Validación sintáctica: se reportan todos los errores encontrados,
    // antes de crear correlation id y tracker.
    let errors = RequestValidator::validate_override_request(&request,
                                                             settings.default_override_duration_minutes,
                                                             settings.max_override_window_hours,
                                                             now);
    if !errors.is_empty() {
        debug!("request errors: {errors:?}");
        return format_response(HTTP_BAD_REQUEST,
                               json!({
                                   "correlation_id": null,
                                   "message": format!("Invalid request: found {} error(s)", errors.len()),
                                   "errorDetails": errors.iter().map(|e| e.error.clone()).collect::<Vec<_>>(),
                               }));
    }

    // Solicitud válida: correlation id + alta del tracker en RECEIVED.
    let site = request.site().unwrap_or_default().to_string();
    let correlation_id = create_correlation_id(&site, now);

    let new_request = match to_new_request(&request, &correlation_id, subscription_id) {
        Ok(new_request) => new_request,
        Err(e) => {
            return internal_error(manager, &correlation_id, &e.to_string());
        }
    };
    if let Err(e) = manager.tracker().create_header(new_request, now) {
        return internal_error(manager, &correlation_id, &e.to_string());
    }

    // Validación temporal: duplicados y solapamientos contra la flota
    // viva del mismo (site, meter).
    let window = match RequestValidator::resolve_window(&request, settings.default_override_duration_minutes, now) {
        Ok(window) => window,
        Err(e) => return internal_error(manager, &correlation_id, &e.to_string()),
    };
    let meter_serial = request.meter_serial().unwrap_or_default().to_string();
    match RequestValidator::validate_request_window(manager.tracker().as_ref(), &site, &meter_serial, &window) {
        Ok(errors) if !errors.is_empty() => {
            report_errors(manager, &correlation_id, now, &errors);
            return format_response(HTTP_BAD_REQUEST,
                                   json!({
                                       "correlation_id": correlation_id,
                                       "message": format!("Invalid request: found {} error(s)", errors.len()),
                                       "errorDetails": errors.iter().map(|e| e.error.clone()).collect::<Vec<_>>(),
                                   }));
        }
        Ok(_) => {}
        Err(e) => return internal_error(manager, &correlation_id, &e.to_string()),
    }

    // Encolado hacia el despachador.
    info!("request payload for dispatch: {request:?}");
    let submission = QueuedSubmission { correlation_id: correlation_id.clone(),
                                        subscription_id: subscription_id.to_string(),
                                        request };
    match manager.enqueue(submission).await {
        Ok(()) => {
            info!("successfully queued DLC request on throttling queue.");
            format_response(HTTP_OK,
                            json!({
                                "message": "DLC request accepted",
                                "correlation_id": correlation_id,
                            }))
        }
        Err(e) => {
            let reason = "DLC Request failed with internal error";
            report_errors(manager, &correlation_id, Utc::now(), &[ValidationError::new(e.to_string())]);
            format_response(HTTP_INTERNAL_ERROR,
                            json!({
                                "message": reason,
                                "correlation_id": correlation_id,
                                "error": e.to_string(),
                            }))
        }
    }
}

/// Registra los errores en el tracker (`DECLINED`) y emite el evento.
fn report_errors(manager: &LoadControlManager,
                 correlation_id: &str,
                 error_datetime: DateTime<Utc>,
                 errors: &[ValidationError]) {
    let message = assemble_error_message(errors);
    match manager.tracker()
                 .update_tracker(correlation_id, Stage::Declined, error_datetime, Some(&message), HeaderPatch::default())
    {
        Ok(header) => {
            if let Err(e) = manager.sink()
                                   .emit(MeterEventPayload::for_milestone(&header, Stage::Declined, error_datetime,
                                                                          &message))
            {
                warn!("failed to emit DECLINED event for {correlation_id}: {e}");
            }
        }
        Err(e) => warn!("failed to decline {correlation_id}: {e}"),
    }
}

fn internal_error(manager: &LoadControlManager, correlation_id: &str, error: &str) -> ApiResponse {
    warn!("internal error while accepting {correlation_id}: {error}");
    report_errors(manager, correlation_id, Utc::now(), &[ValidationError::new(error.to_string())]);
    format_response(HTTP_INTERNAL_ERROR,
                    json!({
                        "message": "DLC request failed",
                        "correlation_id": correlation_id,
                        "error": error,
                    }))
}
