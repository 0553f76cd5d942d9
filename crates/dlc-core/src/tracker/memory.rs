//! Implementación en memoria del `TrackerStore`.
//!
//! - Volátil: los datos se pierden al finalizar el proceso.
//! - Thread-safe mediante un `Mutex` interno: el store se comparte entre
//!   workers asíncronos y las mutaciones por correlation id quedan
//!   serializadas por el lock.
//! - Útil para tests y para correr el motor completo en memoria.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dlc_domain::Stage;
use log::debug;

use super::store::{EndFilter, StageFilter, TrackerStore};
use super::types::{HeaderPatch, NewRequest, RequestHeader, StageRecord};
use crate::errors::CoreError;

/// Entrada del journal: header + registros de etapa con el mismo ciclo de
/// vida.
#[derive(Debug, Clone)]
struct TrackedRequest {
    header: RequestHeader,
    stages: Vec<StageRecord>,
}

/// Backend en memoria del tracker.
#[derive(Debug, Default)]
pub struct InMemoryTrackerStore {
    inner: Mutex<HashMap<String, TrackedRequest>>,
}

impl InMemoryTrackerStore {
    /// Crea un store vacío.
    pub fn new() -> Self {
        Self::default()
    }

    /// Helper: cantidad de headers registrados.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("tracker lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedRequest>> {
        self.inner.lock().expect("tracker lock poisoned")
    }
}

impl TrackerStore for InMemoryTrackerStore {
    fn create_header(&self, request: NewRequest, now: DateTime<Utc>) -> Result<RequestHeader, CoreError> {
        let mut inner = self.lock();
        if inner.contains_key(&request.correlation_id) {
            return Err(CoreError::HeaderExists(request.correlation_id));
        }

        let header = request.into_header(now)
                            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let first_stage = header.stage_snapshot(Stage::Received, now, None);
        debug!("tracker: created header {} at RECEIVED", header.correlation_id);

        inner.insert(header.correlation_id.clone(),
                     TrackedRequest { header: header.clone(),
                                      stages: vec![first_stage] });
        Ok(header)
    }

    fn get_header(&self, correlation_id: &str) -> Result<Option<RequestHeader>, CoreError> {
        Ok(self.lock().get(correlation_id).map(|t| t.header.clone()))
    }

    fn stage_records(&self, correlation_id: &str) -> Result<Vec<StageRecord>, CoreError> {
        Ok(self.lock().get(correlation_id).map(|t| t.stages.clone()).unwrap_or_default())
    }

    fn update_tracker(&self,
                      correlation_id: &str,
                      stage: Stage,
                      event_datetime: DateTime<Utc>,
                      message: Option<&str>,
                      patch: HeaderPatch)
                      -> Result<RequestHeader, CoreError> {
        let mut inner = self.lock();
        let tracked = inner.get_mut(correlation_id)
                           .ok_or_else(|| CoreError::HeaderNotFound(correlation_id.to_string()))?;

        if tracked.header.current_stage.is_terminal() {
            return Err(CoreError::TerminalStage { correlation_id: correlation_id.to_string(),
                                                  stage: tracked.header.current_stage });
        }

        tracked.header.advance(stage, event_datetime, &patch);

        let record = tracked.header.stage_snapshot(stage, event_datetime, message);
        debug!("tracker: {} -> {} (stage #{})", correlation_id, stage, record.stage_number);
        tracked.stages.push(record);

        Ok(tracked.header.clone())
    }

    fn query_site_meter(&self,
                        site: &str,
                        meter_serial: &str,
                        end: EndFilter,
                        stages: StageFilter<'_>)
                        -> Result<Vec<RequestHeader>, CoreError> {
        let inner = self.lock();
        let mut matches: Vec<RequestHeader> =
            inner.values()
                 .filter(|t| t.header.site == site && t.header.meter_serial == meter_serial)
                 .filter(|t| match (t.header.request_end, end) {
                     (Some(request_end), EndFilter::Exactly(t0)) => request_end == t0,
                     (Some(request_end), EndFilter::AtLeast(t0)) => request_end >= t0,
                     (None, _) => false,
                 })
                 .filter(|t| stages.matches(t.header.current_stage))
                 .map(|t| t.header.clone())
                 .collect();
        // Orden por fecha de fin; desempate léxico por correlation id.
        matches.sort_by(|a, b| (a.request_end, &a.correlation_id).cmp(&(b.request_end, &b.correlation_id)));
        Ok(matches)
    }

    fn query_by_site(&self, site: &str) -> Result<Vec<RequestHeader>, CoreError> {
        let inner = self.lock();
        let mut matches: Vec<RequestHeader> = inner.values()
                                                   .filter(|t| t.header.site == site)
                                                   .map(|t| t.header.clone())
                                                   .collect();
        matches.sort_by(|a, b| a.correlation_id.cmp(&b.correlation_id));
        Ok(matches)
    }

    fn query_by_subscription(&self, subscription_id: &str) -> Result<Vec<RequestHeader>, CoreError> {
        let inner = self.lock();
        let mut matches: Vec<RequestHeader> = inner.values()
                                                   .filter(|t| t.header.subscription_id == subscription_id)
                                                   .map(|t| t.header.clone())
                                                   .collect();
        matches.sort_by(|a, b| a.correlation_id.cmp(&b.correlation_id));
        Ok(matches)
    }

    fn find_by_policy(&self, head_end: &str, policy_id: i64) -> Result<Option<RequestHeader>, CoreError> {
        let inner = self.lock();
        let mut matches: Vec<&TrackedRequest> =
            inner.values()
                 .filter(|t| t.header.head_end.as_deref() == Some(head_end) && t.header.policy_id == Some(policy_id))
                 .collect();
        matches.sort_by(|a, b| a.header.correlation_id.cmp(&b.header.correlation_id));
        Ok(matches.first().map(|t| t.header.clone()))
    }

    fn pending_in_group(&self, correlation_ids: &[String]) -> Result<Vec<String>, CoreError> {
        let inner = self.lock();
        Ok(correlation_ids.iter()
                          .filter(|id| match inner.get(id.as_str()) {
                              Some(t) => t.header.current_stage == Stage::Received,
                              // Un header aún no visible cuenta como pendiente.
                              None => true,
                          })
                          .cloned()
                          .collect())
    }
}
