//! Despachador con agrupación y rate limit.
//!
//! Consume batches de la cola de ingreso y los convierte en ejecuciones
//! del workflow de override:
//! - **Filtro**: descarta reentregas (headers que ya no están en
//!   `RECEIVED`).
//! - **Normalización**: completa fechas ausentes y declina lo que quedó
//!   estancado en la cola con la ventana vencida.
//! - **Agrupación + partición**: buckets por `(group, status, ventana)` y
//!   sub-partición por clase de contigüidad (en el core).
//! - **Troceo**: unidades de a lo sumo `MAX_DISPATCH_COUNT` miembros.
//! - **Sometimiento idempotente**: clave de ejecución por unidad; la
//!   colisión se loguea y cuenta como éxito.
//! - **Rate limit**: pacing prorrateado por batch; si el tiempo real de
//!   sometimiento quedó por debajo del esperado, se duerme el resto del
//!   período antes de devolver el control.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dlc_adapters::to_queued_override;
use dlc_core::{chunk_unit, group_requests, split_bucket, DispatchUnit, EngineSettings, EventSink, HeaderPatch,
               MeterEventPayload, QueuedOverride, TrackerStore};
use dlc_domain::Stage;
use log::{error, info, warn};

use super::override_sm::{OverrideStateMachine, MSG_THROTTLED_TOO_LONG};
use super::ExecutionRegistry;
use crate::queue::QueuedSubmission;

pub struct ThrottleDispatcher {
    tracker: Arc<dyn TrackerStore>,
    sink: Arc<dyn EventSink>,
    settings: EngineSettings,
    registry: Arc<ExecutionRegistry>,
    machine: Arc<OverrideStateMachine>,
}

impl ThrottleDispatcher {
    pub fn new(tracker: Arc<dyn TrackerStore>,
               sink: Arc<dyn EventSink>,
               settings: EngineSettings,
               registry: Arc<ExecutionRegistry>,
               machine: Arc<OverrideStateMachine>)
               -> Self {
        Self { tracker, sink, settings, registry, machine }
    }

    /// Procesa un batch completo de la cola, aplicando el pacing
    /// prorrateado al final.
    pub async fn process_batch(&self, batch: Vec<QueuedSubmission>) {
        let received = batch.len();
        let started = Instant::now();
        info!("dispatcher received batch of {received} submissions");

        let queued = self.filter_and_normalize(batch);
        self.dispatch(queued).await;

        self.pace(received, started).await;
    }

    /// Gate de reentrega + normalización de fechas + rechazo de lo
    /// estancado.
    fn filter_and_normalize(&self, batch: Vec<QueuedSubmission>) -> Vec<QueuedOverride> {
        let now = Utc::now();

        let ids: Vec<String> = batch.iter().map(|s| s.correlation_id.clone()).collect();
        let pending = match self.tracker.pending_in_group(&ids) {
            Ok(pending) => pending,
            Err(e) => {
                error!("pending-state probe failed, keeping whole batch: {e}");
                ids.clone()
            }
        };

        let mut queued = Vec::with_capacity(batch.len());
        for submission in batch {
            if !pending.contains(&submission.correlation_id) {
                info!("request with matching correlation id: {}, has already been processed.",
                      submission.correlation_id);
                continue;
            }

            match to_queued_override(&submission.request,
                                     &submission.correlation_id,
                                     &submission.subscription_id,
                                     self.settings.default_override_duration_minutes,
                                     now)
            {
                Ok(normalized) if normalized.window.end() <= now => {
                    // Estuvo demasiado tiempo en la cola.
                    self.decline(&normalized.correlation_id, MSG_THROTTLED_TOO_LONG);
                }
                Ok(normalized) => queued.push(normalized),
                Err(e) => {
                    warn!("dropping malformed submission {}: {e}", submission.correlation_id);
                }
            }
        }
        queued
    }

    /// Agrupa, particiona por contigüidad, trocea y somete.
    async fn dispatch(&self, queued: Vec<QueuedOverride>) {
        for bucket in group_requests(queued) {
            let units = match split_bucket(self.tracker.as_ref(), bucket) {
                Ok(units) => units,
                Err(e) => {
                    // Inconsistencia de contigüidad: el workflow de este
                    // bucket se detiene acá; las solicitudes quedan en
                    // RECEIVED para intervención.
                    error!("contiguity probe halted a bucket: {e}");
                    continue;
                }
            };

            for unit in units {
                for chunk in chunk_unit(unit, self.settings.max_dispatch_count) {
                    self.submit_unit(chunk).await;
                }
            }
        }
    }

    /// Marca los miembros como `QUEUED` (con ventana y `original_start`) y
    /// lanza la ejecución del workflow bajo su clave idempotente.
    async fn submit_unit(&self, unit: DispatchUnit) {
        let now = Utc::now();
        let patch = HeaderPatch { request_start: Some(unit.window.start()),
                                  request_end: Some(unit.window.end()),
                                  original_start: Some(unit.window.start()),
                                  ..Default::default() };

        let headers = match self.tracker.bulk_update(&unit.correlation_ids(), Stage::Queued, now, None, patch) {
            Ok(headers) => headers,
            Err(e) => {
                error!("failed to mark unit {} as QUEUED: {e}", unit.execution_key());
                return;
            }
        };
        for header in &headers {
            if let Err(e) = self.sink.emit(MeterEventPayload::for_milestone(header, Stage::Queued, now, "")) {
                error!("failed to emit QUEUED event for {}: {e}", header.correlation_id);
            }
        }

        let key = unit.execution_key();
        info!("starting workflow execution id: {key}");
        let machine = Arc::clone(&self.machine);
        let accepted = self.registry.submit(key.clone(), async move { machine.run(unit).await });
        if !accepted {
            // Colisión de clave bajo entrega at-least-once: éxito.
            info!("workflow already active for correlation id: {key}");
        }
    }

    /// Declina una solicitud puntual con su evento.
    fn decline(&self, correlation_id: &str, message: &str) {
        let now = Utc::now();
        match self.tracker.update_tracker(correlation_id, Stage::Declined, now, Some(message), HeaderPatch::default()) {
            Ok(header) => {
                if let Err(e) = self.sink.emit(MeterEventPayload::for_milestone(&header, Stage::Declined, now, message)) {
                    error!("failed to emit DECLINED event for {correlation_id}: {e}");
                }
            }
            Err(e) => error!("failed to decline {correlation_id}: {e}"),
        }
    }

    /// Pacing prorrateado: si el batch se sometió más rápido que su cuota
    /// del período, se duerme el resto del período.
    async fn pace(&self, received: usize, started: Instant) {
        if received == 0 || self.settings.rate_limit_calls == 0 {
            return;
        }

        let period = self.settings.rate_limit_period_seconds;
        let expected_secs = ((received as f64 / self.settings.rate_limit_calls as f64) * period as f64).round() as u64;
        let elapsed_secs = started.elapsed().as_secs();
        if elapsed_secs < expected_secs {
            let sleep_secs = period.saturating_sub(elapsed_secs);
            info!("batch under pro-rata quota ({elapsed_secs}s < {expected_secs}s), sleeping {sleep_secs}s");
            tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
        }
    }
}
