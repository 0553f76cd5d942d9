//! Trait `TrackerStore`: journal append-only con rutas de acceso
//! secundarias.
//!
//! Contrato principal:
//! - `create_header` escribe el header en etapa `RECEIVED` con
//!   `stage_count = 1` y su registro de etapa #1; falla si el header ya
//!   existe.
//! - `update_tracker` incrementa `stage_count`, fija `current_stage`,
//!   aplica las mutaciones del patch y agrega el registro de etapa cuyo
//!   número es igual al `stage_count` resultante. Falla si el header no
//!   existe o ya está en una etapa terminal.
//! - Las consultas secundarias ordenan por `(request_end,
//!   correlation_id)`; el desempate léxico es parte del contrato porque
//!   los índices pueden leerse con cierta staleness.
//!
//! La intención es mantener esta interfaz mínima y fácil de implementar
//! por backends distintos (memoria, Postgres, etc.). Las mutaciones sobre
//! un mismo `correlation_id` deben serializarse dentro del backend.

use chrono::{DateTime, Utc};
use dlc_domain::Stage;

use super::types::{HeaderPatch, NewRequest, RequestHeader, StageRecord};
use crate::errors::CoreError;

/// Filtro sobre la fecha de fin registrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFilter {
    /// `request_end == t` (consulta de contigüidad).
    Exactly(DateTime<Utc>),
    /// `request_end >= t` (consulta de solapamiento).
    AtLeast(DateTime<Utc>),
}

/// Filtro sobre `current_stage`.
#[derive(Debug, Clone, Copy)]
pub enum StageFilter<'a> {
    Any,
    In(&'a [Stage]),
    NotIn(&'a [Stage]),
}

impl StageFilter<'_> {
    /// Evalúa el filtro contra una etapa concreta.
    pub fn matches(&self, stage: Stage) -> bool {
        match self {
            StageFilter::Any => true,
            StageFilter::In(stages) => stages.contains(&stage),
            StageFilter::NotIn(stages) => !stages.contains(&stage),
        }
    }
}

/// Journal durable de solicitudes con acceso secundario.
pub trait TrackerStore: Send + Sync {
    /// Alta del header (etapa `RECEIVED`, `stage_count = 1`) y su registro
    /// de etapa #1. Error si ya existe.
    fn create_header(&self, request: NewRequest, now: DateTime<Utc>) -> Result<RequestHeader, CoreError>;

    /// Header por correlation id; `None` si no existe.
    fn get_header(&self, correlation_id: &str) -> Result<Option<RequestHeader>, CoreError>;

    /// Registros de etapa de una solicitud, en orden ascendente de número.
    fn stage_records(&self, correlation_id: &str) -> Result<Vec<StageRecord>, CoreError>;

    /// Transición de etapa + mutaciones, atómica por correlation id.
    /// Devuelve el header resultante.
    fn update_tracker(&self,
                      correlation_id: &str,
                      stage: Stage,
                      event_datetime: DateTime<Utc>,
                      message: Option<&str>,
                      patch: HeaderPatch)
                      -> Result<RequestHeader, CoreError>;

    /// `update_tracker` sobre una colección de ids. Atomicidad por id;
    /// el orden entre ids es irrelevante. El primer error corta la
    /// iteración (las escrituras ya aplicadas quedan, el caller reintenta
    /// de forma idempotente).
    fn bulk_update(&self,
                   correlation_ids: &[String],
                   stage: Stage,
                   event_datetime: DateTime<Utc>,
                   message: Option<&str>,
                   patch: HeaderPatch)
                   -> Result<Vec<RequestHeader>, CoreError> {
        let mut updated = Vec::with_capacity(correlation_ids.len());
        for correlation_id in correlation_ids {
            updated.push(self.update_tracker(correlation_id, stage, event_datetime, message, patch.clone())?);
        }
        Ok(updated)
    }

    /// Ruta de acceso 1: `(site, meter)` filtrado por fecha de fin y
    /// etapa, ordenado por `(request_end, correlation_id)`.
    fn query_site_meter(&self,
                        site: &str,
                        meter_serial: &str,
                        end: EndFilter,
                        stages: StageFilter<'_>)
                        -> Result<Vec<RequestHeader>, CoreError>;

    /// Ruta de acceso 2: listado operativo por sitio.
    fn query_by_site(&self, site: &str) -> Result<Vec<RequestHeader>, CoreError>;

    /// Ruta de acceso 3: historial por suscripción.
    fn query_by_subscription(&self, subscription_id: &str) -> Result<Vec<RequestHeader>, CoreError>;

    /// Ruta de acceso 4: header por `(head_end, policy_id)`, para los
    /// callbacks del head-end que sólo conocen la política.
    fn find_by_policy(&self, head_end: &str, policy_id: i64) -> Result<Option<RequestHeader>, CoreError>;

    /// Subconjunto de `correlation_ids` que sigue pendiente de despacho:
    /// header inexistente (índice aún no consistente) o en `RECEIVED`.
    fn pending_in_group(&self, correlation_ids: &[String]) -> Result<Vec<String>, CoreError>;
}
