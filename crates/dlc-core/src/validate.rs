//! Validación de solicitudes de override.
//!
//! Dos pasadas:
//! - **Sintáctica** (`validate_override_request`): sin I/O; junta *todos*
//!   los errores encontrados, no sólo el primero.
//! - **Temporal** (`validate_request_window`): lee el tracker y clasifica
//!   la ventana propuesta contra las solicitudes vivas del mismo
//!   `(site, meter)`: duplicado, solapamiento o limpia. Las contiguas no
//!   son error. Se reporta a lo sumo un error aunque haya varios
//!   solapamientos.

use chrono::{DateTime, Duration, Utc};
use dlc_domain::stage::OVERLAP_EXCLUDED_STAGES;
use dlc_domain::window::truncate_seconds;
use dlc_domain::{OverrideRequest, OverrideWindow, SwitchDirection, WindowRelation};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::constants::DATE_FORMAT_HINT;
use crate::errors::CoreError;
use crate::tracker::{EndFilter, StageFilter, TrackerStore};

/// Mensaje único para solicitudes duplicadas.
pub const MSG_DUPLICATE: &str = "Request is the duplicate of an existing request";

/// Mensaje único para solapamientos.
pub const MSG_OVERLAP: &str = "Request rejected as it overlaps with at least one existing request; \
                               please cancel the existing request(s)";

/// Error de validación orientado al cliente.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationError {
    pub error: String,
}

impl ValidationError {
    pub fn new(error: impl Into<String>) -> Self {
        ValidationError { error: error.into() }
    }
}

/// Junta los errores en un único mensaje para el tracker.
pub fn assemble_error_message(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.error.as_str()).collect::<Vec<_>>().join("; ")
}

/// Parsea una fecha del protocolo: ISO-8601 con offset explícito.
fn parse_request_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|dt| truncate_seconds(dt.with_timezone(&Utc)))
}

pub struct RequestValidator;

impl RequestValidator {
    /// Pasada sintáctica: presencia de campos, literales de status y
    /// coherencia de fechas. Devuelve la lista completa de errores.
    pub fn validate_override_request(request: &OverrideRequest,
                                     override_duration_minutes: i64,
                                     max_window_hours: i64,
                                     now: DateTime<Utc>)
                                     -> Vec<ValidationError> {
        let mut errors: Vec<ValidationError> = Vec::new();

        if request.site.is_none() && request.switch_addresses.is_none() && request.status.is_none() {
            errors.push(ValidationError::new("Request is empty"));
            return errors;
        }

        if request.site().is_none() {
            errors.push(ValidationError::new("Site details required"));
        }

        match &request.switch_addresses {
            None => errors.push(ValidationError::new("Switch addresses (Meter Details) required")),
            Some(addresses) if addresses.is_empty() => {
                errors.push(ValidationError::new("Switch addresses (Meter Details) required"));
            }
            Some(addresses) if addresses.len() > 1 => {
                // Puede venir un string suelto o una lista con una entrada.
                errors.push(ValidationError::new("Multiple switch addresses supplied - expected one"));
            }
            Some(_) => {}
        }

        match request.status.as_deref() {
            None => errors.push(ValidationError::new("DLC status required")),
            Some(status) if SwitchDirection::parse(status).is_err() => {
                errors.push(ValidationError::new("DLC status should be either ON or OFF"));
            }
            Some(_) => {}
        }

        let mut start: Option<DateTime<Utc>> = None;

        if let Some(start_datetime) = request.start_datetime.as_deref() {
            match parse_request_datetime(start_datetime) {
                Some(parsed) => {
                    start = Some(parsed);

                    if request.end_datetime.is_none() {
                        // Sin fecha de fin: el fin derivado (start + duración
                        // por defecto) no puede quedar en el pasado.
                        let derived_end = parsed + Duration::minutes(override_duration_minutes);
                        if derived_end <= now {
                            errors.push(ValidationError::new(
                                "No end date supplied: request's derived end date would be in the past",
                            ));
                        }
                    }
                }
                None => {
                    errors.push(ValidationError::new(format!(
                        "Invalid start datetime format supplied - should be {DATE_FORMAT_HINT}"
                    )));
                }
            }
        }

        if let Some(end_datetime) = request.end_datetime.as_deref() {
            if request.start_datetime.is_none() {
                errors.push(ValidationError::new("Cannot have an end_datetime without a start_datetime"));
            } else {
                match parse_request_datetime(end_datetime) {
                    Some(end) => {
                        if let Some(start) = start {
                            if end == start {
                                errors.push(ValidationError::new("Request's end date is the same as the start date"));
                            } else if end < start {
                                errors.push(ValidationError::new("Request's end date is before the start date"));
                            } else if end - start > Duration::hours(max_window_hours) {
                                errors.push(ValidationError::new(format!(
                                    "Request's duration exceeds the maximum of {max_window_hours} hours"
                                )));
                            }
                        }

                        if end <= now {
                            errors.push(ValidationError::new("Request's end date is in the past"));
                        }
                    }
                    None => {
                        errors.push(ValidationError::new(format!(
                            "Invalid end datetime format supplied - should be {DATE_FORMAT_HINT}"
                        )));
                    }
                }
            }
        }

        errors
    }

    /// Resuelve la ventana efectiva de una solicitud ya validada
    /// sintácticamente: start ausente = `now`, end ausente = start +
    /// duración por defecto.
    pub fn resolve_window(request: &OverrideRequest,
                          override_duration_minutes: i64,
                          now: DateTime<Utc>)
                          -> Result<OverrideWindow, CoreError> {
        let start = match request.start_datetime.as_deref() {
            Some(raw) => parse_request_datetime(raw)
                .ok_or_else(|| CoreError::Internal(format!("unparseable start datetime '{raw}'")))?,
            None => truncate_seconds(now),
        };
        let end = match request.end_datetime.as_deref() {
            Some(raw) => parse_request_datetime(raw)
                .ok_or_else(|| CoreError::Internal(format!("unparseable end datetime '{raw}'")))?,
            None => start + Duration::minutes(override_duration_minutes),
        };
        OverrideWindow::new(start, end).map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// Pasada temporal: clasifica la ventana propuesta contra las
    /// solicitudes no terminales del mismo `(site, meter)`.
    ///
    /// El resultado es a lo sumo un error: duplicado u solapamiento. Los
    /// vecinos contiguos (fin = inicio) se saltean.
    pub fn validate_request_window(store: &dyn TrackerStore,
                                   site: &str,
                                   meter_serial: &str,
                                   window: &OverrideWindow)
                                   -> Result<Vec<ValidationError>, CoreError> {
        // Candidatas: request_end >= inicio propuesto, excluyendo etapas que
        // ya no ocupan su ventana. El corte por request_start <= fin
        // propuesto se hace acá (el índice sólo ordena por fin).
        let candidates = store.query_site_meter(site,
                                                meter_serial,
                                                EndFilter::AtLeast(window.start()),
                                                StageFilter::NotIn(&OVERLAP_EXCLUDED_STAGES))?;
        debug!("overlap validation: found {} relevant records", candidates.len());

        for header in &candidates {
            let Some(existing) = header.window() else { continue };
            if existing.start() > window.end() {
                continue;
            }

            match existing.relation_to(window) {
                WindowRelation::Duplicate => {
                    info!("conflicting start and end dates {} : {}", existing.start(), existing.end());
                    return Ok(vec![ValidationError::new(MSG_DUPLICATE)]);
                }
                WindowRelation::Contiguous | WindowRelation::Disjoint => continue,
                WindowRelation::Overlap => {
                    info!("conflicting start and end dates {} : {}", existing.start(), existing.end());
                    return Ok(vec![ValidationError::new(MSG_OVERLAP)]);
                }
            }
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{HeaderPatch, InMemoryTrackerStore, NewRequest};
    use chrono::TimeZone;
    use dlc_domain::{Stage, SwitchAddresses};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 6, 9, h, m, 0).unwrap()
    }

    fn base_request() -> OverrideRequest {
        OverrideRequest { site: Some("NMI0000001".into()),
                          switch_addresses: Some(SwitchAddresses::One("LG000001".into())),
                          status: Some("ON".into()),
                          start_datetime: Some("2022-06-09T10:00:00+00:00".into()),
                          end_datetime: Some("2022-06-09T10:30:00+00:00".into()),
                          group_id: None }
    }

    #[test]
    fn clean_request_has_no_errors() {
        let errors = RequestValidator::validate_override_request(&base_request(), 30, 24, at(9, 0));
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn empty_request_short_circuits() {
        let request: OverrideRequest = serde_json::from_str("{}").unwrap();
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        assert_eq!(errors, vec![ValidationError::new("Request is empty")]);
    }

    #[test]
    fn all_errors_are_collected() {
        let request = OverrideRequest { site: None,
                                        switch_addresses: Some(SwitchAddresses::Many(vec!["A".into(), "B".into()])),
                                        status: Some("MAYBE".into()),
                                        start_datetime: None,
                                        end_datetime: None,
                                        group_id: None };
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        let messages: Vec<&str> = errors.iter().map(|e| e.error.as_str()).collect();
        assert!(messages.contains(&"Site details required"));
        assert!(messages.contains(&"Multiple switch addresses supplied - expected one"));
        assert!(messages.contains(&"DLC status should be either ON or OFF"));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn malformed_datetimes_are_reported() {
        let mut request = base_request();
        request.start_datetime = Some("2022-06-09 10:00".into());
        request.end_datetime = Some("not-a-date".into());
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        assert_eq!(errors.len(), 2);
        assert!(errors[0].error.starts_with("Invalid start datetime format"));
        assert!(errors[1].error.starts_with("Invalid end datetime format"));
    }

    #[test]
    fn offset_is_mandatory() {
        let mut request = base_request();
        request.start_datetime = Some("2022-06-09T10:00:00".into());
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        assert!(errors.iter().any(|e| e.error.starts_with("Invalid start datetime format")));
    }

    #[test]
    fn end_at_now_is_rejected() {
        // Borde: end == now no es aceptable en el momento del alta.
        let errors = RequestValidator::validate_override_request(&base_request(), 30, 24, at(10, 30));
        assert_eq!(errors, vec![ValidationError::new("Request's end date is in the past")]);
    }

    #[test]
    fn end_before_start_and_equal_are_rejected() {
        let mut request = base_request();
        request.end_datetime = Some("2022-06-09T10:00:00+00:00".into());
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        assert!(errors.iter().any(|e| e.error == "Request's end date is the same as the start date"));

        request.end_datetime = Some("2022-06-09T09:30:00+00:00".into());
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        assert!(errors.iter().any(|e| e.error == "Request's end date is before the start date"));
    }

    #[test]
    fn end_without_start_is_rejected() {
        let mut request = base_request();
        request.start_datetime = None;
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        assert_eq!(errors,
                   vec![ValidationError::new("Cannot have an end_datetime without a start_datetime")]);
    }

    #[test]
    fn derived_end_in_the_past_is_rejected() {
        let mut request = base_request();
        request.end_datetime = None;
        // start 10:00 + 30m = 10:30 <= now 11:00
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(11, 0));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.starts_with("No end date supplied"));
    }

    #[test]
    fn window_beyond_maximum_is_rejected() {
        let mut request = base_request();
        request.end_datetime = Some("2022-06-10T10:30:00+00:00".into());
        let errors = RequestValidator::validate_override_request(&request, 30, 24, at(9, 0));
        assert!(errors.iter().any(|e| e.error.contains("maximum of 24 hours")));
    }

    #[test]
    fn resolve_window_applies_defaults() {
        let mut request = base_request();
        request.start_datetime = None;
        request.end_datetime = None;
        let window = RequestValidator::resolve_window(&request, 30, at(9, 0)).unwrap();
        assert_eq!(window.start(), at(9, 0));
        assert_eq!(window.end(), at(9, 30));
    }

    fn seed(store: &InMemoryTrackerStore, correlation_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        store.create_header(NewRequest { correlation_id: correlation_id.into(),
                                         subscription_id: "sub-1".into(),
                                         site: "S1".into(),
                                         meter_serial: "M1".into(),
                                         override_value: SwitchDirection::On,
                                         group_id: None,
                                         request_start: Some(start),
                                         request_end: Some(end) },
                            at(8, 0))
             .unwrap();
    }

    #[test]
    fn duplicate_window_yields_single_error() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", at(10, 0), at(10, 30));
        let window = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        let errors = RequestValidator::validate_request_window(&store, "S1", "M1", &window).unwrap();
        assert_eq!(errors, vec![ValidationError::new(MSG_DUPLICATE)]);
    }

    #[test]
    fn overlap_yields_single_error_even_with_many_conflicts() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", at(10, 0), at(10, 30));
        seed(&store, "CRL-2", at(10, 30), at(11, 0));
        let window = OverrideWindow::new(at(10, 15), at(10, 45)).unwrap();
        let errors = RequestValidator::validate_request_window(&store, "S1", "M1", &window).unwrap();
        assert_eq!(errors, vec![ValidationError::new(MSG_OVERLAP)]);
    }

    #[test]
    fn contiguous_window_is_clean() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", at(10, 0), at(10, 30));
        let window = OverrideWindow::new(at(10, 30), at(11, 0)).unwrap();
        let errors = RequestValidator::validate_request_window(&store, "S1", "M1", &window).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn terminal_requests_do_not_conflict() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", at(10, 0), at(10, 30));
        store.update_tracker("CRL-1", Stage::Cancelled, at(9, 0), None, HeaderPatch::default())
             .unwrap();
        let window = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        let errors = RequestValidator::validate_request_window(&store, "S1", "M1", &window).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn error_message_assembly_joins_with_semicolons() {
        let joined = assemble_error_message(&[ValidationError::new("a"), ValidationError::new("b")]);
        assert_eq!(joined, "a; b");
    }
}
