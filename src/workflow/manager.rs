//! Orquestador principal del servicio de overrides.
//! Se encarga de:
//! - Mantener el cableado de colaboradores: tracker, proveedor de
//!   políticas, sink de eventos, cola de ingreso y registro de
//!   ejecuciones.
//! - Correr el loop del despachador (o una pasada puntual, para demos y
//!   tests deterministas).
//! - Exponer las entradas que consume la capa de API: encolado de
//!   solicitudes aceptadas y arranque de cancelaciones.

use std::sync::Arc;

use dlc_core::{CoreError, EngineSettings, EventSink, PolicyProvider, TrackerStore};
use log::info;
use tokio::sync::Mutex;

use super::cancel_sm::{CancelRequestPackage, CancelStateMachine};
use super::dispatcher::ThrottleDispatcher;
use super::override_sm::OverrideStateMachine;
use super::ExecutionRegistry;
use crate::queue::{ingress_queue, IngressQueue, IngressReceiver, QueuedSubmission};

pub struct LoadControlManager {
    tracker: Arc<dyn TrackerStore>,
    provider: Arc<dyn PolicyProvider>,
    sink: Arc<dyn EventSink>,
    settings: EngineSettings,
    queue: IngressQueue,
    /// Extremo de lectura de la cola; lo consume de a un batch por vez el
    /// loop del despachador (o `run_dispatcher_once`).
    receiver: Mutex<IngressReceiver>,
    registry: Arc<ExecutionRegistry>,
    dispatcher: ThrottleDispatcher,
    dispatcher_batch_size: usize,
}

impl LoadControlManager {
    pub fn new(tracker: Arc<dyn TrackerStore>,
               provider: Arc<dyn PolicyProvider>,
               sink: Arc<dyn EventSink>,
               settings: EngineSettings,
               queue_capacity: usize,
               dispatcher_batch_size: usize)
               -> Self {
        let (queue, receiver) = ingress_queue(queue_capacity);
        let registry = ExecutionRegistry::new();
        let machine = Arc::new(OverrideStateMachine::new(Arc::clone(&tracker),
                                                         Arc::clone(&provider),
                                                         Arc::clone(&sink),
                                                         settings.clone()));
        let dispatcher = ThrottleDispatcher::new(Arc::clone(&tracker),
                                                 Arc::clone(&sink),
                                                 settings.clone(),
                                                 Arc::clone(&registry),
                                                 machine);

        Self { tracker,
               provider,
               sink,
               settings,
               queue,
               receiver: Mutex::new(receiver),
               registry,
               dispatcher,
               dispatcher_batch_size: dispatcher_batch_size.max(1) }
    }

    /// Journal compartido del servicio.
    pub fn tracker(&self) -> &Arc<dyn TrackerStore> {
        &self.tracker
    }

    /// Sink de eventos de hitos.
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Fachada del head-end.
    pub fn provider(&self) -> &Arc<dyn PolicyProvider> {
        &self.provider
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Encola una solicitud ya aceptada hacia el despachador.
    pub async fn enqueue(&self, submission: QueuedSubmission) -> Result<(), CoreError> {
        self.queue.enqueue(submission).await
    }

    /// Una pasada del despachador: drena lo que haya encolado ahora mismo
    /// y lo procesa. Pensado para demos y tests deterministas.
    pub async fn run_dispatcher_once(&self) {
        let batch = self.receiver.lock().await.drain_now(self.dispatcher_batch_size);
        if batch.is_empty() {
            return;
        }
        self.dispatcher.process_batch(batch).await;
    }

    /// Loop del despachador: consume batches hasta que la cola se cierre.
    pub async fn run_dispatcher(&self) {
        loop {
            let batch = {
                let mut receiver = self.receiver.lock().await;
                receiver.next_batch(self.dispatcher_batch_size).await
            };
            match batch {
                Some(batch) => self.dispatcher.process_batch(batch).await,
                None => {
                    info!("ingress queue closed; dispatcher loop exiting");
                    return;
                }
            }
        }
    }

    /// Espera a que no queden ejecuciones de workflow en vuelo.
    pub async fn wait_for_executions(&self) {
        self.registry.wait_idle().await;
    }

    /// Corre la máquina de cancelación para un paquete ya validado por la
    /// capa de entrada.
    pub async fn cancel(&self, package: CancelRequestPackage) {
        let machine = CancelStateMachine::new(Arc::clone(&self.tracker),
                                              Arc::clone(&self.provider),
                                              Arc::clone(&self.sink),
                                              self.settings.clone(),
                                              Arc::clone(&self.registry));
        machine.run(package).await;
    }
}
