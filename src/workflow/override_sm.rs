//! Máquina de estados de override (creación / extensión / deploy).
//!
//! Ejecuta una unidad de despacho como una secuencia de pasos
//! reintentables (`OverrideAction` es el cursor de paso):
//! 1. Revalidar la unidad (drift entre aceptación y despacho).
//! 2. Crear o extender la política en el head-end según la clase.
//! 3. Esperar el instante de deploy (inmediato si el vecino contiguo ya
//!    está aplicando; sino inicio del vecino + buffer).
//! 4. Desplegar y avanzar el tracker.
//!
//! Los fallos de la capa de políticas (status != 200) declinan la
//! solicitud con el mensaje del proveedor; los errores inesperados emiten
//! un evento `DLC_OVERRIDE_FAILURE` sin mutar el tracker a terminal.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dlc_core::contiguity::PolicyClass;
use dlc_core::{CoreError, DispatchUnit, EngineSettings, EventSink, HeaderPatch, MeterEventPayload, PolicyProvider,
               PolicyReply, TrackerStore};
use dlc_core::event::format_event_datetime;
use dlc_domain::Stage;
use log::{error, info, warn};

use super::OverrideAction;

/// Mensaje de rechazo para unidades cuya ventana venció en la cola.
pub const MSG_THROTTLED_TOO_LONG: &str =
    "Request has been throttled for too long: end datetime is in the past";

pub struct OverrideStateMachine {
    tracker: Arc<dyn TrackerStore>,
    provider: Arc<dyn PolicyProvider>,
    sink: Arc<dyn EventSink>,
    settings: EngineSettings,
}

impl OverrideStateMachine {
    pub fn new(tracker: Arc<dyn TrackerStore>,
               provider: Arc<dyn PolicyProvider>,
               sink: Arc<dyn EventSink>,
               settings: EngineSettings)
               -> Self {
        Self { tracker, provider, sink, settings }
    }

    /// Punto de entrada del workflow: nunca propaga pánico de negocio;
    /// los errores internos terminan en un evento de fallo.
    pub async fn run(&self, unit: DispatchUnit) {
        if let Err(e) = self.execute(&unit).await {
            error!("override state machine failed for key {}: {e}", unit.execution_key());
            self.emit_failure(&unit, &e);
        }
    }

    async fn execute(&self, unit: &DispatchUnit) -> Result<(), CoreError> {
        let mut policy_id: Option<i64> = None;
        let mut action = OverrideAction::CreateDlcPolicy;

        loop {
            match action {
                OverrideAction::CreateDlcPolicy => {
                    let now = Utc::now();
                    // Revalidación: la unidad debe poder entrar a
                    // POLICY_CREATED antes del fin de su ventana.
                    if unit.window.end() <= now {
                        warn!("unit {} throttled for too long", unit.execution_key());
                        self.decline_members(unit, MSG_THROTTLED_TOO_LONG)?;
                        return Ok(());
                    }

                    policy_id = match unit.policy_class {
                        PolicyClass::New => self.create_policy(unit).await?,
                        PolicyClass::ContiguousCreation => self.create_contiguous_policy(unit).await?,
                        PolicyClass::ContiguousExtension => self.extend_policy(unit).await?,
                    };
                    if policy_id.is_none() {
                        // Declinado por la capa de políticas.
                        return Ok(());
                    }
                    action = OverrideAction::DeployDlcPolicy;
                }
                OverrideAction::DeployDlcPolicy => {
                    let policy_id =
                        policy_id.ok_or_else(|| CoreError::Internal("policy deployment needs policy id".into()))?;
                    self.wait_for_deploy_start(unit).await;
                    self.deploy_policy(unit, policy_id).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Política nueva e independiente (`replace = false`).
    async fn create_policy(&self, unit: &DispatchUnit) -> Result<Option<i64>, CoreError> {
        let meters = unit.meter_serials();
        let turn_off = unit.status.turn_off();
        let window = unit.window;
        let duration = window.duration_minutes();
        info!("creating policy for {} meters from {} for {duration} minutes", meters.len(), window.start());

        let provider = Arc::clone(&self.provider);
        let outcome = self.with_provider_retries(|| {
                              let provider = Arc::clone(&provider);
                              let meters = meters.clone();
                              async move {
                                  provider.create_override_policy(&meters, turn_off, window.start(), duration, false)
                                          .await
                              }
                          })
                          .await;
        let (policy_name, reply) = match outcome {
            Ok(created) => created,
            // Transporte agotado: se rinde como fallo del proveedor.
            Err(e) => {
                self.decline_members(unit, &e.to_string())?;
                return Ok(None);
            }
        };

        self.record_creation(unit, &policy_name, &reply, HeaderPatch::default())
    }

    /// Política contigua de dirección opuesta: corre el inicio por el
    /// backoff configurado y crea con `replace = true` para que el vecino
    /// termine de aplicar antes.
    async fn create_contiguous_policy(&self, unit: &DispatchUnit) -> Result<Option<i64>, CoreError> {
        let meters = unit.meter_serials();
        let turn_off = unit.status.turn_off();
        let pushed = unit.window
                         .with_start_pushed(self.settings.opposite_switch_backoff_minutes)
                         .map_err(|e| CoreError::Internal(e.to_string()))?;
        let duration = pushed.duration_minutes();
        info!("creating opposite-direction contiguous policy from {} for {duration} minutes", pushed.start());

        let provider = Arc::clone(&self.provider);
        let outcome = self.with_provider_retries(|| {
                              let provider = Arc::clone(&provider);
                              let meters = meters.clone();
                              async move {
                                  provider.create_override_policy(&meters, turn_off, pushed.start(), duration, true)
                                          .await
                              }
                          })
                          .await;
        let (policy_name, reply) = match outcome {
            Ok(created) => created,
            Err(e) => {
                self.decline_members(unit, &e.to_string())?;
                return Ok(None);
            }
        };

        // El corrimiento de inicio queda registrado en el tracker.
        self.record_creation(unit, &policy_name, &reply, HeaderPatch::window(&pushed))
    }

    /// Extensión contigua de la misma dirección: reemplaza la política del
    /// vecino por una que cubre desde el inicio terminal de la cadena
    /// hasta el fin de la nueva solicitud.
    async fn extend_policy(&self, unit: &DispatchUnit) -> Result<Option<i64>, CoreError> {
        let terminal_start = unit.original_start
                                 .ok_or_else(|| CoreError::Internal("extension unit without terminal start".into()))?;
        let new_end = unit.window.end();
        let duration = (new_end - terminal_start).num_seconds() / 60;
        let meters = unit.meter_serials();
        let turn_off = unit.status.turn_off();
        info!("extending existing policy from {terminal_start} for {duration} minutes");

        let provider = Arc::clone(&self.provider);
        let outcome = self.with_provider_retries(|| {
                              let provider = Arc::clone(&provider);
                              let meters = meters.clone();
                              async move {
                                  provider.replace_override_policy(&meters, turn_off, terminal_start, duration).await
                              }
                          })
                          .await;
        let (policy_name, reply) = match outcome {
            Ok(replaced) => replaced,
            Err(e) => {
                self.decline_members(unit, &e.to_string())?;
                return Ok(None);
            }
        };

        if !reply.is_success() {
            self.decline_members(unit, &reply.message)?;
            return Ok(None);
        }

        let policy_id = reply.policy_id
                             .ok_or_else(|| CoreError::Internal("successful replace without policy id".into()))?;
        let now = Utc::now();

        for member in &unit.members {
            let neighbour_id = member.neighbour_correlation_id
                                     .as_deref()
                                     .ok_or_else(|| CoreError::Internal("extension member without neighbour".into()))?;

            // 1. El vecino queda marcado como extendido por la nueva.
            let extend_message = format!("Request {neighbour_id} has been extended by request {}",
                                         member.correlation_id);
            let neighbour = self.tracker.update_tracker(neighbour_id,
                                                        Stage::ExtendedBy,
                                                        now,
                                                        Some(&extend_message),
                                                        HeaderPatch { extended_by: Some(member.correlation_id
                                                                                              .clone()),
                                                                      ..Default::default() })?;
            self.sink.emit(MeterEventPayload::for_milestone(&neighbour, Stage::ExtendedBy, now, &extend_message))?;

            // 2. La nueva registra a quién extiende y el inicio terminal.
            let extends_message = format!("Request {} extends request {neighbour_id}", member.correlation_id);
            let header = self.tracker.update_tracker(&member.correlation_id,
                                                     Stage::Extends,
                                                     now,
                                                     Some(&extends_message),
                                                     HeaderPatch { extends: Some(neighbour_id.to_string()),
                                                                   request_start: Some(unit.window.start()),
                                                                   request_end: Some(new_end),
                                                                   original_start: Some(terminal_start),
                                                                   ..Default::default() })?;
            self.sink.emit(MeterEventPayload::for_milestone(&header, Stage::Extends, now, &extends_message))?;

            // 3. La extensión quedó aplicada en el head-end.
            let header = self.tracker.update_tracker(&member.correlation_id,
                                                     Stage::PolicyExtended,
                                                     now,
                                                     Some(&reply.message),
                                                     HeaderPatch::policy(policy_id, &policy_name))?;
            self.sink.emit(MeterEventPayload::for_milestone(&header, Stage::PolicyExtended, now, &reply.message))?;
        }

        Ok(Some(policy_id))
    }

    /// Registra el resultado de una creación: `POLICY_CREATED` con la
    /// política, o `DECLINED` con el mensaje del proveedor.
    fn record_creation(&self,
                       unit: &DispatchUnit,
                       policy_name: &str,
                       reply: &PolicyReply,
                       extra_patch: HeaderPatch)
                       -> Result<Option<i64>, CoreError> {
        let now = Utc::now();

        if !reply.is_success() {
            info!("policy creation declined: {}", reply.message);
            self.decline_members(unit, &reply.message)?;
            return Ok(None);
        }

        let policy_id = reply.policy_id
                             .ok_or_else(|| CoreError::Internal("successful create without policy id".into()))?;
        let patch = HeaderPatch { policy_id: Some(policy_id),
                                  policy_name: Some(policy_name.to_string()),
                                  ..extra_patch };
        let headers = self.tracker
                          .bulk_update(&unit.correlation_ids(), Stage::PolicyCreated, now, Some(&reply.message), patch)?;
        for header in &headers {
            self.sink.emit(MeterEventPayload::for_milestone(header, Stage::PolicyCreated, now, &reply.message))?;
        }
        Ok(Some(policy_id))
    }

    /// Instante mínimo de deploy: inmediato si el vecino contiguo ya está
    /// aplicando; sino su inicio más el buffer configurado.
    fn compute_deploy_start(&self, unit: &DispatchUnit, now: DateTime<Utc>) -> DateTime<Utc> {
        if unit.policy_class != PolicyClass::ContiguousExtension {
            return now;
        }
        match unit.neighbour_window {
            Some(neighbour) if !neighbour.is_enforced_at(now) => {
                let deploy_start = neighbour.start() + Duration::minutes(self.settings.contiguous_start_buffer_minutes);
                info!("setting policy deployment start datetime to {deploy_start}");
                deploy_start
            }
            _ => now,
        }
    }

    async fn wait_for_deploy_start(&self, unit: &DispatchUnit) {
        let now = Utc::now();
        let deploy_start = self.compute_deploy_start(unit, now);
        if deploy_start > now {
            let wait = (deploy_start - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
    }

    async fn deploy_policy(&self, unit: &DispatchUnit, policy_id: i64) -> Result<(), CoreError> {
        info!("deploying policy in head-end: {policy_id}");
        let provider = Arc::clone(&self.provider);
        let outcome = self.with_provider_retries(|| {
                              let provider = Arc::clone(&provider);
                              async move { provider.deploy_policy(policy_id).await }
                          })
                          .await;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                self.decline_members(unit, &e.to_string())?;
                return Ok(());
            }
        };

        let now = Utc::now();
        if reply.is_success() {
            let headers = self.tracker.bulk_update(&unit.correlation_ids(),
                                                   Stage::PolicyDeployed,
                                                   now,
                                                   Some(&reply.message),
                                                   HeaderPatch { policy_id: Some(policy_id),
                                                                 ..Default::default() })?;
            for header in &headers {
                self.sink.emit(MeterEventPayload::for_milestone(header, Stage::PolicyDeployed, now, &reply.message))?;
            }
            Ok(())
        } else {
            self.decline_members(unit, &reply.message)?;
            Ok(())
        }
    }

    /// Declina todos los miembros de la unidad con el mismo mensaje.
    fn decline_members(&self, unit: &DispatchUnit, message: &str) -> Result<(), CoreError> {
        let now = Utc::now();
        let headers = self.tracker.bulk_update(&unit.correlation_ids(),
                                               Stage::Declined,
                                               now,
                                               Some(message),
                                               HeaderPatch::default())?;
        for header in &headers {
            self.sink.emit(MeterEventPayload::for_milestone(header, Stage::Declined, now, message))?;
        }
        Ok(())
    }

    /// Evento de fallo inesperado: no muta el tracker a terminal.
    fn emit_failure(&self, unit: &DispatchUnit, error: &CoreError) {
        let now = Utc::now();
        for member in &unit.members {
            let payload = MeterEventPayload { event_type: dlc_core::event::EVENT_TYPE_LOAD_CONTROL.to_string(),
                                              event_value: None,
                                              event_description: format!("DLC override of request {} failed due to {error}",
                                                                         member.correlation_id),
                                              milestone: Some(Stage::DlcOverrideFailure),
                                              subscription_id: Some(member.subscription_id.clone()),
                                              correlation_id: Some(member.correlation_id.clone()),
                                              meter_serial_number: member.meter_serial.clone(),
                                              site: Some(member.site.clone()),
                                              register_id: None,
                                              event_datetime: format_event_datetime(now) };
            if let Err(sink_error) = self.sink.emit(payload) {
                error!("failed to emit failure event for {}: {sink_error}", member.correlation_id);
            }
        }
    }

    /// Reintentos acotados con timeout por llamada para errores de
    /// transporte del proveedor. Los fallos de la capa de políticas llegan
    /// como respuestas (no `Err`) y no se reintentan acá.
    async fn with_provider_retries<T, F, Fut>(&self, mut call: F) -> Result<T, CoreError>
        where F: FnMut() -> Fut,
              Fut: Future<Output = Result<T, CoreError>>
    {
        let timeout = std::time::Duration::from_secs(self.settings.provider_call_timeout_seconds);
        let mut attempts = 0;
        loop {
            match tokio::time::timeout(timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if attempts < 2 => {
                    warn!("provider call failed (attempt {}): {e}", attempts + 1);
                    attempts += 1;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if attempts < 2 => {
                    warn!("provider call timed out (attempt {})", attempts + 1);
                    attempts += 1;
                }
                Err(_) => return Err(CoreError::Internal("provider call deadline exceeded".into())),
            }
        }
    }
}
