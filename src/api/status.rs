//! Consulta de estado por correlation id y listados operativos.

use dlc_core::RequestHeader;
use log::info;
use serde_json::{json, Value};

use super::{format_response, ApiResponse, HTTP_INTERNAL_ERROR, HTTP_NOT_FOUND, HTTP_OK};
use crate::workflow::LoadControlManager;

/// Devuelve la etapa actual de la solicitud (`current_stage` del header).
pub fn get_request_status(manager: &LoadControlManager, correlation_id: &str) -> ApiResponse {
    info!("correlation id: {correlation_id}");

    match manager.tracker().get_header(correlation_id) {
        Ok(Some(header)) => {
            info!("request status: {}", header.current_stage);
            format_response(HTTP_OK,
                            json!({
                                "message": "Request status query accepted",
                                "status": header.current_stage.as_str(),
                                "correlation_id": correlation_id,
                            }))
        }
        Ok(None) => format_response(HTTP_NOT_FOUND,
                                    json!({
                                        "message": "Correlation id not found",
                                        "correlation_id": correlation_id,
                                    })),
        Err(e) => format_response(HTTP_INTERNAL_ERROR,
                                  json!({
                                      "message": format!("Request status query failed with internal error: {e}"),
                                      "correlation_id": correlation_id,
                                  })),
    }
}

/// Resumen operativo de un header para los listados.
fn summarize(header: &RequestHeader) -> Value {
    json!({
        "correlation_id": header.correlation_id,
        "subscription_id": header.subscription_id,
        "site": header.site,
        "meter_serial_number": header.meter_serial,
        "status": header.override_value.as_str(),
        "current_stage": header.current_stage.as_str(),
        "request_start": header.request_start,
        "request_end": header.request_end,
    })
}

/// Listado operativo de solicitudes de un sitio.
pub fn get_site_requests(manager: &LoadControlManager, site: &str) -> ApiResponse {
    match manager.tracker().query_by_site(site) {
        Ok(headers) => format_response(HTTP_OK,
                                       json!({
                                           "site": site,
                                           "requests": headers.iter().map(summarize).collect::<Vec<_>>(),
                                       })),
        Err(e) => format_response(HTTP_INTERNAL_ERROR,
                                  json!({
                                      "message": format!("Site listing failed with internal error: {e}"),
                                      "site": site,
                                  })),
    }
}

/// Historial de solicitudes de una suscripción.
pub fn get_subscription_requests(manager: &LoadControlManager, subscription_id: &str) -> ApiResponse {
    match manager.tracker().query_by_subscription(subscription_id) {
        Ok(headers) => format_response(HTTP_OK,
                                       json!({
                                           "subscription_id": subscription_id,
                                           "requests": headers.iter().map(summarize).collect::<Vec<_>>(),
                                       })),
        Err(e) => format_response(HTTP_INTERNAL_ERROR,
                                  json!({
                                      "message": format!("Subscription listing failed with internal error: {e}"),
                                      "subscription_id": subscription_id,
                                  })),
    }
}
