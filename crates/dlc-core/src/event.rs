//! Eventos de hitos hacia el stream externo.
//!
//! El payload serializa en camelCase y omite los campos ausentes (nunca
//! `null`): los consumidores tratan los pares `(correlationId, milestone)`
//! como idempotentes y no hay garantía de orden entre eventos.

use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use dlc_domain::Stage;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::tracker::RequestHeader;

/// Tipo de evento emitido por este servicio.
pub const EVENT_TYPE_LOAD_CONTROL: &str = "LOAD_CONTROL";

/// Payload de un evento de medidor para el stream de suscripciones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterEventPayload {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_value: Option<String>,
    pub event_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub meter_serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_id: Option<String>,
    pub event_datetime: String,
}

impl MeterEventPayload {
    /// Payload de hito para una solicitud registrada en el tracker. Con
    /// `message` vacío se usa la descripción por defecto de la etapa.
    pub fn for_milestone(header: &RequestHeader,
                         stage: Stage,
                         event_datetime: DateTime<Utc>,
                         message: &str)
                         -> MeterEventPayload {
        let description = if message.is_empty() {
            format!("Request moved to stage {stage}")
        } else {
            message.to_string()
        };

        MeterEventPayload { event_type: EVENT_TYPE_LOAD_CONTROL.to_string(),
                            event_value: None,
                            event_description: description,
                            milestone: Some(stage),
                            subscription_id: Some(header.subscription_id.clone()),
                            correlation_id: Some(header.correlation_id.clone()),
                            meter_serial_number: header.meter_serial.clone(),
                            site: Some(header.site.clone()),
                            register_id: None,
                            event_datetime: format_event_datetime(event_datetime) }
    }
}

/// Fecha de evento en ISO-8601 con precisión de segundos.
pub fn format_event_datetime(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Salida de eventos de hitos.
///
/// Contrato mínimo: `emit` entrega el payload al stream con semántica
/// at-least-once. La emisión ocurre después de la mutación del tracker que
/// la origina.
pub trait EventSink: Send + Sync {
    fn emit(&self, payload: MeterEventPayload) -> Result<(), CoreError>;
}

/// Sink en memoria para tests y para correr el motor sin stream real.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    inner: Mutex<Vec<MeterEventPayload>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cantidad de eventos emitidos hasta ahora.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("event sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copia de todos los eventos emitidos.
    pub fn emitted(&self) -> Vec<MeterEventPayload> {
        self.inner.lock().expect("event sink lock poisoned").clone()
    }

    /// Hitos emitidos para un correlation id, en orden de emisión.
    pub fn milestones_for(&self, correlation_id: &str) -> Vec<Stage> {
        self.inner
            .lock()
            .expect("event sink lock poisoned")
            .iter()
            .filter(|p| p.correlation_id.as_deref() == Some(correlation_id))
            .filter_map(|p| p.milestone)
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, payload: MeterEventPayload) -> Result<(), CoreError> {
        self.inner.lock().expect("event sink lock poisoned").push(payload);
        Ok(())
    }
}
