//! Entradas del servicio (agnósticas del transporte).
//!
//! La capa HTTP real queda fuera de alcance; estas funciones reciben los
//! parámetros que esa capa extraería (path, query, body) y devuelven una
//! `ApiResponse` con el código y el cuerpo JSON del contrato:
//! - `submit`: alta de solicitudes de override.
//! - `cancel`: cancelación por correlation id.
//! - `status`: consulta de estado por correlation id.
//! - `callbacks`: hitos de inicio/fin reportados por el head-end, que sólo
//!   conoce la política.

pub mod callbacks;
pub mod cancel;
pub mod status;
pub mod submit;

use serde_json::Value;

pub use callbacks::{handle_policy_milestone, PolicyMilestone};
pub use cancel::process_cancel_request;
pub use status::{get_request_status, get_site_requests, get_subscription_requests};
pub use submit::process_override_request;

/// Respuesta formateada hacia el transporte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status_code: u16,
    pub body: Value,
}

/// Formatea una respuesta con código y cuerpo JSON.
pub fn format_response(status_code: u16, body: Value) -> ApiResponse {
    ApiResponse { status_code, body }
}

pub(crate) const HTTP_OK: u16 = 200;
pub(crate) const HTTP_BAD_REQUEST: u16 = 400;
pub(crate) const HTTP_NOT_FOUND: u16 = 404;
pub(crate) const HTTP_INTERNAL_ERROR: u16 = 500;
