//! Recorridos end-to-end del camino de override con la pila en memoria:
//! alta por la API, despacho, máquina de estados y head-end simulado.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::json;

use dlc_adapters::MockPolicyProvider;
use dlc_core::{EngineSettings, EventSink, InMemoryEventSink, InMemoryTrackerStore, PolicyProvider, TrackerStore};
use dlc_domain::Stage;
use dlcflow_rust::api::{get_request_status, process_override_request};
use dlcflow_rust::workflow::LoadControlManager;

struct Harness {
    manager: LoadControlManager,
    tracker: Arc<InMemoryTrackerStore>,
    provider: Arc<MockPolicyProvider>,
    sink: Arc<InMemoryEventSink>,
}

fn harness() -> Harness {
    let tracker = Arc::new(InMemoryTrackerStore::new());
    let provider = Arc::new(MockPolicyProvider::new());
    let sink = Arc::new(InMemoryEventSink::new());
    let manager = LoadControlManager::new(Arc::clone(&tracker) as Arc<dyn TrackerStore>,
                                          Arc::clone(&provider) as Arc<dyn PolicyProvider>,
                                          Arc::clone(&sink) as Arc<dyn EventSink>,
                                          EngineSettings::default(),
                                          64,
                                          64);
    Harness { manager, tracker, provider, sink }
}

fn body(site: &str, meter: &str, status: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    json!({
        "site": site,
        "switch_addresses": [meter],
        "status": status,
        "start_datetime": start.to_rfc3339_opts(SecondsFormat::Secs, false),
        "end_datetime": end.to_rfc3339_opts(SecondsFormat::Secs, false),
    }).to_string()
}

async fn submit(harness: &Harness, body: &str) -> String {
    let response = process_override_request(&harness.manager, "sub-test", body).await;
    assert_eq!(response.status_code, 200, "unexpected response: {}", response.body);
    response.body["correlation_id"].as_str().unwrap().to_string()
}

async fn dispatch_and_settle(harness: &Harness) {
    harness.manager.run_dispatcher_once().await;
    harness.manager.wait_for_executions().await;
}

fn stage_names(harness: &Harness, correlation_id: &str) -> Vec<Stage> {
    harness.tracker
           .stage_records(correlation_id)
           .unwrap()
           .iter()
           .map(|s| s.stage_name)
           .collect()
}

/// Espera (con timeout) a que la solicitud alcance una etapa.
async fn wait_for_stage(harness: &Harness, correlation_id: &str, stage: Stage) {
    let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
    loop {
        let current = harness.tracker.get_header(correlation_id).unwrap().unwrap().current_stage;
        if current == stage {
            return;
        }
        assert!(std::time::Instant::now() < deadline,
                "timed out waiting for {stage}; stuck at {current}");
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
}

// Escenario: solicitud única y limpia, sin vecinas.
#[tokio::test]
async fn clean_single_override_reaches_policy_deployed() {
    let harness = harness();
    let start = Utc::now() - Duration::minutes(1);
    let correlation_id = submit(&harness, &body("S1", "M1", "ON", start, start + Duration::minutes(30))).await;

    dispatch_and_settle(&harness).await;

    let header = harness.tracker.get_header(&correlation_id).unwrap().unwrap();
    assert_eq!(header.current_stage, Stage::PolicyDeployed);
    assert!(header.policy_id.is_some());
    assert!(header.policy_name.as_deref().unwrap_or_default().starts_with("DLCOverride(ON)-M1-"));
    assert_eq!(header.head_end.as_deref(), Some("PolicyNet"));

    assert_eq!(stage_names(&harness, &correlation_id),
               vec![Stage::Received, Stage::Queued, Stage::PolicyCreated, Stage::PolicyDeployed]);

    // Un evento por transición posterior al alta.
    assert_eq!(harness.sink.milestones_for(&correlation_id),
               vec![Stage::Queued, Stage::PolicyCreated, Stage::PolicyDeployed]);

    // La política quedó desplegada en el head-end.
    let policy = harness.provider.policy(header.policy_id.unwrap()).unwrap();
    assert!(policy.deployed);
    assert_eq!(policy.duration_minutes, 30);
}

// Escenario: contigua de la misma dirección -> extensión de la política.
#[tokio::test]
async fn same_direction_contiguous_request_extends_the_policy() {
    let harness = harness();
    let first_start = Utc::now() - Duration::minutes(10);
    let boundary = first_start + Duration::minutes(30);

    let first = submit(&harness, &body("S1", "M1", "ON", first_start, boundary)).await;
    dispatch_and_settle(&harness).await;

    let second = submit(&harness, &body("S1", "M1", "ON", boundary, boundary + Duration::minutes(30))).await;
    dispatch_and_settle(&harness).await;

    // La primera terminó extendida; la segunda pasó por la rama de
    // extensión hasta quedar desplegada.
    let first_header = harness.tracker.get_header(&first).unwrap().unwrap();
    assert_eq!(first_header.current_stage, Stage::ExtendedBy);
    assert_eq!(first_header.extended_by.as_deref(), Some(second.as_str()));

    let second_header = harness.tracker.get_header(&second).unwrap().unwrap();
    assert_eq!(second_header.current_stage, Stage::PolicyDeployed);
    assert_eq!(second_header.extends.as_deref(), Some(first.as_str()));
    assert_eq!(second_header.original_start, Some(first_header.request_start.unwrap()));

    assert_eq!(stage_names(&harness, &second),
               vec![Stage::Received, Stage::Queued, Stage::Extends, Stage::PolicyExtended, Stage::PolicyDeployed]);

    // El replace cubre desde el inicio terminal: una única política de 60
    // minutos.
    assert_eq!(harness.provider.policy_count(), 1);
    let policy = harness.provider.policy(second_header.policy_id.unwrap()).unwrap();
    assert!(policy.replace);
    assert_eq!(policy.start, first_header.request_start.unwrap());
    assert_eq!(policy.duration_minutes, 60);
    assert!(policy.deployed);
}

// Escenario: contigua de dirección opuesta -> creación con backoff.
#[tokio::test]
async fn opposite_direction_contiguous_request_gets_backoff_and_replace() {
    let harness = harness();
    let first_start = Utc::now() - Duration::minutes(10);
    let boundary = first_start + Duration::minutes(30);

    submit(&harness, &body("S1", "M1", "ON", first_start, boundary)).await;
    dispatch_and_settle(&harness).await;

    let second = submit(&harness, &body("S1", "M1", "OFF", boundary, boundary + Duration::minutes(15))).await;
    dispatch_and_settle(&harness).await;

    let header = harness.tracker.get_header(&second).unwrap().unwrap();
    assert_eq!(header.current_stage, Stage::PolicyDeployed);
    // El inicio efectivo quedó corrido 5 minutos.
    assert_eq!(header.request_start.unwrap(), boundary + Duration::minutes(5));
    assert!(header.extends.is_none());

    let policy = harness.provider.policy(header.policy_id.unwrap()).unwrap();
    assert!(policy.replace);
    assert!(policy.turn_off);
    assert_eq!(policy.start, boundary + Duration::minutes(5));
    assert_eq!(policy.duration_minutes, 10);
}

// Escenario: duplicado exacto de una solicitud no terminal.
#[tokio::test]
async fn duplicate_request_is_declined_with_400() {
    let harness = harness();
    let start = Utc::now() + Duration::minutes(10);
    let end = start + Duration::minutes(30);

    submit(&harness, &body("S1", "M1", "ON", start, end)).await;

    let response = process_override_request(&harness.manager, "sub-test", &body("S1", "M1", "ON", start, end)).await;
    assert_eq!(response.status_code, 400);
    let details = response.body["errorDetails"].as_array().unwrap();
    assert!(details.iter().any(|d| d.as_str().unwrap().contains("duplicate of an existing request")),
            "details: {details:?}");

    // El duplicado quedó registrado como DECLINED con su evento.
    let declined_id = response.body["correlation_id"].as_str().unwrap();
    let header = harness.tracker.get_header(declined_id).unwrap().unwrap();
    assert_eq!(header.current_stage, Stage::Declined);
    assert_eq!(harness.sink.milestones_for(declined_id), vec![Stage::Declined]);
}

// Errores sintácticos: 400 con todos los detalles y sin correlation id.
#[tokio::test]
async fn syntactic_errors_are_reported_together_without_tracker_writes() {
    let harness = harness();
    let response = process_override_request(&harness.manager,
                                            "sub-test",
                                            r#"{"switch_addresses": ["M1", "M2"], "status": "MAYBE"}"#).await;
    assert_eq!(response.status_code, 400);
    assert!(response.body["correlation_id"].is_null());
    let details = response.body["errorDetails"].as_array().unwrap();
    assert_eq!(details.len(), 3, "details: {details:?}");
    assert_eq!(harness.tracker.len(), 0);
}

// Redelivery: una solicitud que ya salió de RECEIVED se descarta.
#[tokio::test]
async fn redelivered_submissions_are_dropped_by_the_pending_gate() {
    let harness = harness();
    let start = Utc::now();
    let correlation_id = submit(&harness, &body("S1", "M1", "ON", start, start + Duration::minutes(30))).await;

    dispatch_and_settle(&harness).await;
    let stages_before = stage_names(&harness, &correlation_id).len();

    // Reentrega manual del mismo mensaje.
    let request = serde_json::from_str(&body("S1", "M1", "ON", start, start + Duration::minutes(30))).unwrap();
    harness.manager
           .enqueue(dlcflow_rust::queue::QueuedSubmission { correlation_id: correlation_id.clone(),
                                                            subscription_id: "sub-test".into(),
                                                            request })
           .await
           .unwrap();
    dispatch_and_settle(&harness).await;

    // Sin etapas nuevas: el gate la filtró.
    assert_eq!(stage_names(&harness, &correlation_id).len(), stages_before);
}

// Una solicitud estancada en la cola con la ventana vencida se declina.
#[tokio::test]
async fn stale_queued_request_is_declined_as_throttled_too_long() {
    let harness = harness();
    let now = Utc::now();

    // Header en RECEIVED con ventana ya vencida (simula una solicitud que
    // quedó demasiado tiempo encolada).
    let start = now - Duration::minutes(40);
    let end = now - Duration::minutes(10);
    let request: dlc_domain::OverrideRequest =
        serde_json::from_str(&body("S1", "M1", "ON", start, end)).unwrap();
    let new_request = dlc_adapters::to_new_request(&request, "stale-1", "sub-test").unwrap();
    harness.tracker.create_header(new_request, now - Duration::minutes(45)).unwrap();

    harness.manager
           .enqueue(dlcflow_rust::queue::QueuedSubmission { correlation_id: "stale-1".into(),
                                                            subscription_id: "sub-test".into(),
                                                            request })
           .await
           .unwrap();
    dispatch_and_settle(&harness).await;

    let header = harness.tracker.get_header("stale-1").unwrap().unwrap();
    assert_eq!(header.current_stage, Stage::Declined);
    let stages = harness.tracker.stage_records("stale-1").unwrap();
    assert!(stages.last().unwrap().message.as_deref().unwrap_or_default().contains("throttled for too long"));
}

// Round-trip del estado: la API devuelve siempre la etapa actual.
#[tokio::test]
async fn status_endpoint_round_trips_current_stage() {
    let harness = harness();
    let start = Utc::now();
    let correlation_id = submit(&harness, &body("S1", "M1", "ON", start, start + Duration::minutes(30))).await;

    let response = get_request_status(&harness.manager, &correlation_id);
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body["status"], "RECEIVED");

    dispatch_and_settle(&harness).await;
    wait_for_stage(&harness, &correlation_id, Stage::PolicyDeployed).await;

    let response = get_request_status(&harness.manager, &correlation_id);
    assert_eq!(response.body["status"], "POLICY_DEPLOYED");

    let response = get_request_status(&harness.manager, "missing-correlation-id");
    assert_eq!(response.status_code, 404);
}

// Un fallo del head-end al crear declina con el mensaje del proveedor.
#[tokio::test]
async fn provider_failure_declines_with_provider_message() {
    let harness = harness();
    harness.provider.fail_creates_with("Exception while creating direct load control policy");

    let start = Utc::now();
    let correlation_id = submit(&harness, &body("S1", "M1", "ON", start, start + Duration::minutes(30))).await;
    dispatch_and_settle(&harness).await;

    let header = harness.tracker.get_header(&correlation_id).unwrap().unwrap();
    assert_eq!(header.current_stage, Stage::Declined);
    let stages = harness.tracker.stage_records(&correlation_id).unwrap();
    assert_eq!(stages.last().unwrap().message.as_deref(),
               Some("Exception while creating direct load control policy"));
    assert_eq!(harness.sink.milestones_for(&correlation_id), vec![Stage::Queued, Stage::Declined]);
}
