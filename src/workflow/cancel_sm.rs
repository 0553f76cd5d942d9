//! Máquina de estados de cancelación.
//!
//! Evalúa la solicitud a cancelar contra sus vecinas contiguas y decide
//! uno de los planes de reemplazo (`CancelAction` es el cursor de paso):
//!
//! - **Reemplazo de la segunda solicitud**: se cancela una solicitud que
//!   fue extendida (`EXTENDED_BY`); hay dos políticas vivas (la original y
//!   la extendida). Se repliegan y borran ambas y se crea + despliega una
//!   política nueva que cubre sólo la ventana de la extensora.
//! - **Reemplazo de la primera solicitud**: se cancela la extensora
//!   mientras la vecina todavía está aplicando; se crea + despliega una
//!   política de reemplazo con la ventana original de la vecina (el
//!   replace pisa la política fusionada).
//! - **Reinstalación**: se cancela la extensora antes de que la vecina
//!   empiece a aplicar; alcanza con borrar la política vigente y devolver
//!   la vecina a `POLICY_DEPLOYED` con su propia ventana.
//! - **Directo**: sin vecinas involucradas; detener el workflow si sigue
//!   corriendo, replegar si estaba desplegada y borrar la política.
//!
//! Todos los caminos terminan con la solicitud cancelada en `CANCELLED` y
//! un evento fechado al momento en que completó la mutación de políticas.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dlc_adapters::assemble_event_payload;
use dlc_core::contiguity::find_contiguous_neighbour;
use dlc_core::event::{format_event_datetime, EVENT_TYPE_LOAD_CONTROL};
use dlc_core::{CoreError, EngineSettings, EventSink, HeaderPatch, MeterEventPayload, PolicyProvider, RequestHeader,
               TrackerStore};
use dlc_domain::stage::{POLICY_DEPLOYED_STAGES, WORKFLOW_IN_PROGRESS_STAGES};
use dlc_domain::window::truncate_seconds;
use dlc_domain::{OverrideWindow, Stage, SwitchDirection};
use log::{error, info};

use super::{CancelAction, ExecutionRegistry};

/// Motivo registrado en el tracker y en el evento de cancelación.
pub const CANCELLATION_REASON: &str = "User-initiated cancellation of Direct load control request";

/// Paquete de cancelación armado desde el header (lo arma la capa de
/// entrada una vez pasadas las precondiciones).
#[derive(Debug, Clone)]
pub struct CancelRequestPackage {
    pub correlation_id: String,
    pub subscription_id: String,
    pub site: String,
    pub meter_serial: String,
    pub status: SwitchDirection,
    pub current_stage: Stage,
    pub request_start: Option<DateTime<Utc>>,
    pub request_end: Option<DateTime<Utc>>,
    pub policy_id: Option<i64>,
    pub extended_by: Option<String>,
}

impl CancelRequestPackage {
    pub fn from_header(header: &RequestHeader) -> Self {
        CancelRequestPackage { correlation_id: header.correlation_id.clone(),
                               subscription_id: header.subscription_id.clone(),
                               site: header.site.clone(),
                               meter_serial: header.meter_serial.clone(),
                               status: header.override_value,
                               current_stage: header.current_stage,
                               request_start: header.request_start,
                               request_end: header.request_end,
                               policy_id: header.policy_id,
                               extended_by: header.extended_by.clone() }
    }
}

/// Plan decidido por la evaluación.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CancelPlan {
    ReplaceSecondRequest {
        replaced_correlation_id: String,
        replacement_window: OverrideWindow,
        extended_by_policy_id: Option<i64>,
        extended_by_stage: Stage,
    },
    ReplaceFirstRequest {
        replaced_correlation_id: String,
        replacement_window: OverrideWindow,
    },
    Straightforward,
}

pub struct CancelStateMachine {
    tracker: Arc<dyn TrackerStore>,
    provider: Arc<dyn PolicyProvider>,
    sink: Arc<dyn EventSink>,
    settings: EngineSettings,
    registry: Arc<ExecutionRegistry>,
}

impl CancelStateMachine {
    pub fn new(tracker: Arc<dyn TrackerStore>,
               provider: Arc<dyn PolicyProvider>,
               sink: Arc<dyn EventSink>,
               settings: EngineSettings,
               registry: Arc<ExecutionRegistry>)
               -> Self {
        Self { tracker, provider, sink, settings, registry }
    }

    /// Punto de entrada: los errores terminan en un evento de fallo de
    /// cancelación, nunca en un pánico del runtime.
    pub async fn run(&self, request: CancelRequestPackage) {
        if let Err(e) = self.execute(&request).await {
            error!("cancel state machine failed for {}: {e}", request.correlation_id);
            self.report_failure(&request, &e);
        }
    }

    async fn execute(&self, request: &CancelRequestPackage) -> Result<(), CoreError> {
        let plan = self.evaluate_request(request).await?;
        info!("cancel plan for {}: {plan:?}", request.correlation_id);

        match plan {
            CancelPlan::ReplaceSecondRequest { replaced_correlation_id,
                                               replacement_window,
                                               extended_by_policy_id,
                                               extended_by_stage, } => {
                let mut action = CancelAction::UndeployPolicy;
                let mut stopped_at: Option<DateTime<Utc>> = None;
                let mut policy_id: Option<i64> = None;
                loop {
                    match action {
                        CancelAction::UndeployPolicy => {
                            // Dos políticas vivas: la de la solicitud
                            // cancelada y la de su extensora.
                            self.stop_workflow_if_running(request);
                            self.undeploy_and_delete(request.policy_id, request.current_stage).await?;
                            self.undeploy_and_delete(extended_by_policy_id, extended_by_stage).await?;
                            stopped_at = Some(Utc::now());
                            action = CancelAction::CreateNewPolicy;
                        }
                        CancelAction::CreateNewPolicy => {
                            policy_id = Some(self.create_replacement(&replaced_correlation_id,
                                                                     &request.meter_serial,
                                                                     request.status,
                                                                     &replacement_window,
                                                                     true)
                                                 .await?);
                            action = CancelAction::DeployNewPolicy;
                        }
                        CancelAction::DeployNewPolicy => {
                            let policy_id = policy_id
                                .ok_or_else(|| CoreError::Internal("policy deployment needs policy id".into()))?;
                            self.deploy_replacement(&replaced_correlation_id, policy_id, &replacement_window)
                                .await?;
                            action = CancelAction::CancellationComplete;
                        }
                        _ => {
                            self.cancel_complete(&request.correlation_id, stopped_at.unwrap_or_else(Utc::now))?;
                            return Ok(());
                        }
                    }
                }
            }
            CancelPlan::ReplaceFirstRequest { replaced_correlation_id, replacement_window } => {
                let mut action = CancelAction::CreateReplacementPolicy;
                let mut policy_id: Option<i64> = None;
                loop {
                    match action {
                        CancelAction::CreateReplacementPolicy => {
                            self.stop_workflow_if_running(request);
                            // El replace pisa la política fusionada que
                            // cubría ambas ventanas.
                            policy_id = Some(self.create_replacement(&replaced_correlation_id,
                                                                     &request.meter_serial,
                                                                     request.status,
                                                                     &replacement_window,
                                                                     true)
                                                 .await?);
                            action = CancelAction::DeployReplacementPolicy;
                        }
                        CancelAction::DeployReplacementPolicy => {
                            let policy_id = policy_id
                                .ok_or_else(|| CoreError::Internal("policy deployment needs policy id".into()))?;
                            self.deploy_replacement(&replaced_correlation_id, policy_id, &replacement_window)
                                .await?;
                            action = CancelAction::CancellationComplete;
                        }
                        _ => {
                            self.cancel_complete(&request.correlation_id, Utc::now())?;
                            return Ok(());
                        }
                    }
                }
            }
            CancelPlan::Straightforward => {
                let stopped_at = self.cancel_policy(request).await?;
                self.cancel_complete(&request.correlation_id, stopped_at)
            }
        }
    }

    /// Decide el plan mirando la etapa actual y las vecinas contiguas.
    /// En el caso "la vecina todavía no empezó" la reinstalación se hace
    /// acá mismo y el resto sigue por el camino directo.
    async fn evaluate_request(&self, request: &CancelRequestPackage) -> Result<CancelPlan, CoreError> {
        info!("action {:?} for {}", CancelAction::EvaluateRequest, request.correlation_id);

        if request.current_stage == Stage::ExtendedBy {
            // Cancelar una solicitud ya extendida: la extensora queda sola
            // cubriendo su propia ventana.
            let extender_id = request.extended_by
                                     .clone()
                                     .ok_or_else(|| CoreError::Internal("EXTENDED_BY header without link".into()))?;
            let extender = self.tracker
                               .get_header(&extender_id)?
                               .ok_or(CoreError::HeaderNotFound(extender_id))?;
            let replacement_window = extender.window()
                                             .ok_or_else(|| CoreError::Internal("extender has no window".into()))?;
            return Ok(CancelPlan::ReplaceSecondRequest { replaced_correlation_id: extender.correlation_id.clone(),
                                                         replacement_window,
                                                         extended_by_policy_id: extender.policy_id,
                                                         extended_by_stage: extender.current_stage });
        }

        if matches!(request.current_stage,
                    Stage::PolicyExtended | Stage::PolicyDeployed | Stage::DlcOverrideStarted)
        {
            let start = match request.request_start {
                Some(start) => start,
                None => return Ok(CancelPlan::Straightforward),
            };
            let neighbour = find_contiguous_neighbour(self.tracker.as_ref(),
                                                      &request.site,
                                                      &request.meter_serial,
                                                      start)?;

            if let Some(neighbour) = neighbour {
                if neighbour.override_value == request.status {
                    let window = neighbour.window()
                                          .ok_or_else(|| CoreError::Internal("neighbour has no window".into()))?;
                    // Sin microsegundos, como guarda fechas el tracker.
                    let now = truncate_seconds(Utc::now());

                    if window.is_enforced_at(now) {
                        return Ok(CancelPlan::ReplaceFirstRequest { replaced_correlation_id:
                                                                        neighbour.correlation_id.clone(),
                                                                    replacement_window: window });
                    } else if now < window.start() {
                        // La vecina todavía no empezó: alcanza con
                        // reinstalarla con su propia ventana.
                        let header = self.tracker.update_tracker(
                            &neighbour.correlation_id,
                            Stage::PolicyDeployed,
                            now,
                            Some("Request that extended this one was cancelled so reinstating this one"),
                            HeaderPatch::window(&window),
                        )?;
                        self.sink.emit(MeterEventPayload::for_milestone(
                            &header,
                            Stage::PolicyDeployed,
                            now,
                            "Request that extended this one was cancelled so reinstating this one",
                        ))?;
                    }
                }
            }
        }

        Ok(CancelPlan::Straightforward)
    }

    /// Camino directo: detener el workflow si corre, replegar si estaba
    /// desplegada y borrar la política si existe. Devuelve el instante en
    /// que completó la mutación.
    async fn cancel_policy(&self, request: &CancelRequestPackage) -> Result<DateTime<Utc>, CoreError> {
        info!("action {:?} for {}", CancelAction::CancelPolicy, request.correlation_id);
        self.stop_workflow_if_running(request);
        self.undeploy_and_delete(request.policy_id, request.current_stage).await?;
        Ok(Utc::now())
    }

    /// Repliega (si la etapa indica despliegue) y borra una política, si
    /// existe en el head-end.
    async fn undeploy_and_delete(&self, policy_id: Option<i64>, stage: Stage) -> Result<(), CoreError> {
        let Some(policy_id) = policy_id else {
            return Ok(());
        };
        if !self.provider.policy_exists(policy_id).await? {
            info!("policy {policy_id} does not exist");
            return Ok(());
        }
        if POLICY_DEPLOYED_STAGES.contains(&stage) {
            info!("undeploying policy id {policy_id}");
            self.provider.undeploy_policy(policy_id).await?;
        }
        info!("deleting policy id {policy_id}");
        self.provider.delete_policy(policy_id).await
    }

    /// Detiene la ejecución del workflow de override si sigue corriendo.
    fn stop_workflow_if_running(&self, request: &CancelRequestPackage) {
        if WORKFLOW_IN_PROGRESS_STAGES.contains(&request.current_stage) {
            self.registry.stop(&request.correlation_id);
        }
    }

    /// Crea la política de reemplazo y avanza la solicitud reinstalada a
    /// `POLICY_CREATED` con la nueva ventana.
    async fn create_replacement(&self,
                                replaced_correlation_id: &str,
                                meter_serial: &str,
                                status: SwitchDirection,
                                window: &OverrideWindow,
                                replace: bool)
                                -> Result<i64, CoreError> {
        let duration = window.duration_minutes();
        info!("creating replacement policy for meter {meter_serial}, start {}, duration {duration}, replace {replace}",
              window.start());

        let timeout = std::time::Duration::from_secs(self.settings.provider_call_timeout_seconds);
        let meters = vec![meter_serial.to_string()];
        let (policy_name, reply) =
            tokio::time::timeout(timeout,
                                 self.provider
                                     .create_override_policy(&meters, status.turn_off(), window.start(), duration,
                                                             replace))
                .await
                .map_err(|_| CoreError::Internal("provider call deadline exceeded".into()))??;

        if !reply.is_success() {
            return Err(CoreError::Internal(format!("Error creating policy; head-end returned: {}", reply.message)));
        }
        let policy_id = reply.policy_id
                             .ok_or_else(|| CoreError::Internal("successful create without policy id".into()))?;

        let now = Utc::now();
        let header = self.tracker.update_tracker(replaced_correlation_id,
                                                 Stage::PolicyCreated,
                                                 now,
                                                 Some(&reply.message),
                                                 HeaderPatch { policy_id: Some(policy_id),
                                                               policy_name: Some(policy_name),
                                                               request_start: Some(window.start()),
                                                               request_end: Some(window.end()),
                                                               ..Default::default() })?;
        self.sink.emit(MeterEventPayload::for_milestone(&header, Stage::PolicyCreated, now, &reply.message))?;
        Ok(policy_id)
    }

    /// Despliega la política de reemplazo y reinstala la solicitud en
    /// `POLICY_DEPLOYED`.
    async fn deploy_replacement(&self,
                                replaced_correlation_id: &str,
                                policy_id: i64,
                                window: &OverrideWindow)
                                -> Result<(), CoreError> {
        info!("deploying replacement policy with policy id {policy_id}");

        let timeout = std::time::Duration::from_secs(self.settings.provider_call_timeout_seconds);
        let reply = tokio::time::timeout(timeout, self.provider.deploy_policy(policy_id))
            .await
            .map_err(|_| CoreError::Internal("provider call deadline exceeded".into()))??;

        if !reply.is_success() {
            return Err(CoreError::Internal(format!("Error deploying policy; head-end returned: {}", reply.message)));
        }

        let now = Utc::now();
        let header = self.tracker.update_tracker(replaced_correlation_id,
                                                 Stage::PolicyDeployed,
                                                 now,
                                                 Some(&reply.message),
                                                 HeaderPatch { request_start: Some(window.start()),
                                                               request_end: Some(window.end()),
                                                               ..Default::default() })?;
        self.sink.emit(MeterEventPayload::for_milestone(&header, Stage::PolicyDeployed, now, &reply.message))?;
        Ok(())
    }

    /// Cierre de todos los caminos: la solicitud cancelada pasa a
    /// `CANCELLED`, fechada al momento de la mutación de políticas. El
    /// payload se arma releyendo el header del tracker, para que el evento
    /// refleje exactamente lo que quedó persistido.
    fn cancel_complete(&self, correlation_id: &str, stopped_at: DateTime<Utc>) -> Result<(), CoreError> {
        info!("updating load control request tracker to CANCELLED with correlation id {correlation_id}");
        self.tracker.update_tracker(correlation_id,
                                    Stage::Cancelled,
                                    stopped_at,
                                    Some(CANCELLATION_REASON),
                                    HeaderPatch::default())?;

        let payload = assemble_event_payload(self.tracker.as_ref(),
                                             correlation_id,
                                             Stage::Cancelled,
                                             stopped_at,
                                             CANCELLATION_REASON)?;
        self.sink.emit(payload)
    }

    /// Evento de fallo de cancelación (sin hito y sin mutar el tracker).
    fn report_failure(&self, request: &CancelRequestPackage, error: &CoreError) {
        info!("action {:?} for {}", CancelAction::Failure, request.correlation_id);
        let now = Utc::now();
        let payload = MeterEventPayload { event_type: EVENT_TYPE_LOAD_CONTROL.to_string(),
                                          event_value: None,
                                          event_description: format!("Cancellation of request {} failed due to {error}",
                                                                     request.correlation_id),
                                          milestone: None,
                                          subscription_id: Some(request.subscription_id.clone()),
                                          correlation_id: Some(request.correlation_id.clone()),
                                          meter_serial_number: request.meter_serial.clone(),
                                          site: Some(request.site.clone()),
                                          register_id: None,
                                          event_datetime: format_event_datetime(now) };
        if let Err(sink_error) = self.sink.emit(payload) {
            error!("failed to emit cancellation failure event for {}: {sink_error}", request.correlation_id);
        }
    }
}
