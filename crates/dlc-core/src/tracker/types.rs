//! Tipos del journal: header autoritativo y registros de etapa.
//!
//! Rol en el motor:
//! - Cada solicitud aceptada tiene exactamente un `RequestHeader` y uno o
//!   más `StageRecord` (numerados denso desde 1).
//! - El header nunca se borra: las solicitudes transicionan a etapas
//!   terminales.
//! - Cada registro de etapa lleva una foto de los campos mutables del
//!   header vigentes en esa etapa, para poder auditar la historia sin
//!   reconstruirla.

use chrono::{DateTime, Utc};
use dlc_domain::{DomainError, OverrideWindow, Stage, SwitchDirection};
use serde::{Deserialize, Serialize};

use crate::constants::LOAD_CONTROL_SERVICE_NAME;

/// Header autoritativo de una solicitud en el tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub correlation_id: String,
    pub subscription_id: String,
    pub site: String,
    pub meter_serial: String,
    pub override_value: SwitchDirection,
    /// Siempre `load_control`; queda registrado para los filtros por
    /// servicio.
    pub service: String,
    pub current_stage: Stage,
    /// Cantidad de registros de etapa existentes. El próximo registro
    /// llevará `stage_count + 1`.
    pub stage_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Inicio de la solicitud terminal de la cadena de extensión a la que
    /// pertenece esta solicitud.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    /// Head-end dueño de `policy_id`; poblado junto con él.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_end: Option<String>,
    /// Correlation id de la solicitud que extiende a ésta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_by: Option<String>,
    /// Correlation id de la solicitud que ésta extiende.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
}

impl RequestHeader {
    /// Ventana registrada de la solicitud, si ambas fechas están pobladas.
    pub fn window(&self) -> Option<OverrideWindow> {
        match (self.request_start, self.request_end) {
            (Some(start), Some(end)) => OverrideWindow::new(start, end).ok(),
            _ => None,
        }
    }

    /// Aplica una transición de etapa sobre el header: incrementa
    /// `stage_count`, fija `current_stage` y `updated_at`, y aplica las
    /// mutaciones del patch (semántica de presencia: `None` no toca el
    /// campo). Los backends comparten esta lógica para garantizar paridad.
    pub fn advance(&mut self, stage: Stage, event_datetime: DateTime<Utc>, patch: &HeaderPatch) {
        self.stage_count += 1;
        self.current_stage = stage;
        self.updated_at = event_datetime;

        if let Some(policy_id) = patch.policy_id {
            self.policy_id = Some(policy_id);
            // El head-end queda fijado junto con la primera política.
            self.head_end = Some(crate::constants::HEAD_END_POLICYNET.to_string());
        }
        if let Some(policy_name) = &patch.policy_name {
            self.policy_name = Some(policy_name.clone());
        }
        if let Some(start) = patch.request_start {
            self.request_start = Some(start);
        }
        if let Some(end) = patch.request_end {
            self.request_end = Some(end);
        }
        if let Some(extended_by) = &patch.extended_by {
            self.extended_by = Some(extended_by.clone());
        }
        if let Some(extends) = &patch.extends {
            self.extends = Some(extends.clone());
        }
        if let Some(original_start) = patch.original_start {
            self.original_start = Some(original_start);
        }
    }

    /// Foto del header como registro de etapa (número = `stage_count`
    /// actual). Se invoca después de `advance`.
    pub fn stage_snapshot(&self, stage: Stage, timestamp: DateTime<Utc>, message: Option<&str>) -> StageRecord {
        StageRecord { correlation_id: self.correlation_id.clone(),
                      stage_number: self.stage_count,
                      stage_name: stage,
                      timestamp,
                      message: message.filter(|m| !m.is_empty()).map(|m| m.to_string()),
                      subscription_id: self.subscription_id.clone(),
                      site: self.site.clone(),
                      meter_serial: self.meter_serial.clone(),
                      override_value: self.override_value,
                      request_start: self.request_start,
                      request_end: self.request_end,
                      policy_id: self.policy_id,
                      policy_name: self.policy_name.clone(),
                      extended_by: self.extended_by.clone(),
                      extends: self.extends.clone() }
    }
}

/// Registro de etapa: un punto de la historia de la solicitud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub correlation_id: String,
    /// Número denso (1..N), igual al `stage_count` del header tras el
    /// append.
    pub stage_number: u32,
    pub stage_name: Stage,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    // Foto de los campos mutables del header vigentes en esta etapa.
    pub subscription_id: String,
    pub site: String,
    pub meter_serial: String,
    pub override_value: SwitchDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
}

/// Datos de alta de un header (etapa `RECEIVED`).
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub correlation_id: String,
    pub subscription_id: String,
    pub site: String,
    pub meter_serial: String,
    pub override_value: SwitchDirection,
    pub group_id: Option<String>,
    pub request_start: Option<DateTime<Utc>>,
    pub request_end: Option<DateTime<Utc>>,
}

impl NewRequest {
    /// Materializa el header inicial. Valida la ventana si ambas fechas
    /// vienen pobladas.
    pub fn into_header(self, now: DateTime<Utc>) -> Result<RequestHeader, DomainError> {
        if let (Some(start), Some(end)) = (self.request_start, self.request_end) {
            // Sólo para validar el invariante start < end.
            OverrideWindow::new(start, end)?;
        }
        Ok(RequestHeader { correlation_id: self.correlation_id,
                           subscription_id: self.subscription_id,
                           site: self.site,
                           meter_serial: self.meter_serial,
                           override_value: self.override_value,
                           service: LOAD_CONTROL_SERVICE_NAME.to_string(),
                           current_stage: Stage::Received,
                           stage_count: 1,
                           created_at: now,
                           updated_at: now,
                           request_start: self.request_start,
                           request_end: self.request_end,
                           group_id: self.group_id,
                           original_start: None,
                           policy_id: None,
                           policy_name: None,
                           head_end: None,
                           extended_by: None,
                           extends: None })
    }
}

/// Mutaciones opcionales aplicadas junto con una transición de etapa.
///
/// Los campos ausentes no tocan el header (semántica de presencia, igual
/// que el update statement original).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPatch {
    pub policy_id: Option<i64>,
    pub policy_name: Option<String>,
    pub request_start: Option<DateTime<Utc>>,
    pub request_end: Option<DateTime<Utc>>,
    pub extended_by: Option<String>,
    pub extends: Option<String>,
    pub original_start: Option<DateTime<Utc>>,
}

impl HeaderPatch {
    /// Patch que sólo registra la ventana de la solicitud.
    pub fn window(window: &OverrideWindow) -> Self {
        HeaderPatch { request_start: Some(window.start()),
                      request_end: Some(window.end()),
                      ..Default::default() }
    }

    /// Patch que registra la política creada en el head-end.
    pub fn policy(policy_id: i64, policy_name: &str) -> Self {
        HeaderPatch { policy_id: Some(policy_id),
                      policy_name: Some(policy_name.to_string()),
                      ..Default::default() }
    }
}

