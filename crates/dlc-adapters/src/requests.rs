//! Conversión de solicitudes del protocolo a los tipos del journal.
//!
//! La validación sintáctica corre antes; estas funciones asumen una
//! solicitud ya aceptada y fallan con `CoreError::Internal` si los campos
//! obligatorios faltan igual (defensa contra drift entre aceptación y
//! despacho).

use chrono::{DateTime, Utc};
use dlc_core::validate::RequestValidator;
use dlc_core::{CoreError, NewRequest, QueuedOverride};
use dlc_domain::{OverrideRequest, SwitchDirection};

fn required_site(request: &OverrideRequest) -> Result<String, CoreError> {
    request.site()
           .map(|s| s.to_string())
           .ok_or_else(|| CoreError::Internal("request has no site".into()))
}

fn required_meter(request: &OverrideRequest) -> Result<String, CoreError> {
    request.meter_serial()
           .map(|m| m.to_string())
           .ok_or_else(|| CoreError::Internal("request has no switch address".into()))
}

fn required_direction(request: &OverrideRequest) -> Result<SwitchDirection, CoreError> {
    request.direction()
           .ok_or_else(|| CoreError::Internal("request has no valid status".into()))
}

/// Alta del tracker para una solicitud recién aceptada. Las fechas se
/// registran sólo si vienen en la solicitud (todavía sin normalizar: la
/// normalización ocurre al despachar).
pub fn to_new_request(request: &OverrideRequest,
                      correlation_id: &str,
                      subscription_id: &str)
                      -> Result<NewRequest, CoreError> {
    let parsed_start = request.start_datetime
                              .as_deref()
                              .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                              .map(|dt| dt.with_timezone(&Utc));
    let parsed_end = request.end_datetime
                            .as_deref()
                            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                            .map(|dt| dt.with_timezone(&Utc));

    Ok(NewRequest { correlation_id: correlation_id.to_string(),
                    subscription_id: subscription_id.to_string(),
                    site: required_site(request)?,
                    meter_serial: required_meter(request)?,
                    override_value: required_direction(request)?,
                    group_id: request.group_id.clone(),
                    request_start: parsed_start,
                    request_end: parsed_end })
}

/// Solicitud lista para el despachador: ventana normalizada (start ausente
/// = `now`, end ausente = start + duración por defecto).
pub fn to_queued_override(request: &OverrideRequest,
                          correlation_id: &str,
                          subscription_id: &str,
                          default_duration_minutes: i64,
                          now: DateTime<Utc>)
                          -> Result<QueuedOverride, CoreError> {
    let window = RequestValidator::resolve_window(request, default_duration_minutes, now)?;

    Ok(QueuedOverride { correlation_id: correlation_id.to_string(),
                        subscription_id: subscription_id.to_string(),
                        site: required_site(request)?,
                        meter_serial: required_meter(request)?,
                        status: required_direction(request)?,
                        window,
                        group_id: request.group_id.clone() })
}
