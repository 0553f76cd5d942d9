// Recorrido de demostración del motor de overrides con la pila en memoria:
// dos solicitudes contiguas de la misma dirección sobre el mismo medidor,
// despachadas y extendidas, con los eventos de hitos saliendo por el sink
// de canal, más la consulta de estado final.

use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use dlc_adapters::MockPolicyProvider;
use dlc_core::{EventSink, InMemoryTrackerStore, PolicyProvider, TrackerStore};
use serde_json::json;

use dlcflow_rust::api::{get_request_status, process_override_request};
use dlcflow_rust::config::CONFIG;
use dlcflow_rust::events::ChannelEventSink;
use dlcflow_rust::workflow::LoadControlManager;

fn body(site: &str, meter: &str, status: &str, start: chrono::DateTime<Utc>, minutes: i64) -> String {
    json!({
        "site": site,
        "switch_addresses": [meter],
        "status": status,
        "start_datetime": start.to_rfc3339_opts(SecondsFormat::Secs, false),
        "end_datetime": (start + Duration::minutes(minutes)).to_rfc3339_opts(SecondsFormat::Secs, false),
    }).to_string()
}

#[tokio::main]
async fn main() {
    println!("DLCFlow demo");
    println!("============");

    let tracker: Arc<dyn TrackerStore> = Arc::new(InMemoryTrackerStore::new());
    let provider = Arc::new(MockPolicyProvider::new());
    let (sink, mut events) = ChannelEventSink::new();

    // Consumidor del stream: imprime cada hito a medida que sale.
    let printer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(payload) = events.recv().await {
            count += 1;
            println!("event: {}", serde_json::to_string(&payload).unwrap_or_default());
        }
        count
    });

    let manager = LoadControlManager::new(Arc::clone(&tracker),
                                          Arc::clone(&provider) as Arc<dyn PolicyProvider>,
                                          Arc::new(sink) as Arc<dyn EventSink>,
                                          CONFIG.engine.clone(),
                                          CONFIG.ingress_queue_capacity,
                                          CONFIG.dispatcher_batch_size);

    // Primera solicitud: ON durante 30 minutos desde ahora.
    let start = Utc::now();
    let response =
        process_override_request(&manager, "demo-subscription", &body("NMI0000001", "LG000001", "ON", start, 30)).await;
    println!("submit #1 -> {}: {}", response.status_code, response.body);
    let first_id = response.body["correlation_id"].as_str().unwrap_or_default().to_string();

    manager.run_dispatcher_once().await;
    manager.wait_for_executions().await;

    // Segunda solicitud: contigua de la misma dirección; termina extendida.
    let response = process_override_request(&manager,
                                            "demo-subscription",
                                            &body("NMI0000001", "LG000001", "ON", start + Duration::minutes(30), 30)).await;
    println!("submit #2 -> {}: {}", response.status_code, response.body);
    let second_id = response.body["correlation_id"].as_str().unwrap_or_default().to_string();

    manager.run_dispatcher_once().await;
    manager.wait_for_executions().await;

    for correlation_id in [&first_id, &second_id] {
        let response = get_request_status(&manager, correlation_id);
        println!("status {} -> {}", correlation_id, response.body);

        match tracker.stage_records(correlation_id) {
            Ok(stages) => {
                for stage in stages {
                    println!("  #{} {} {}", stage.stage_number, stage.stage_name, stage.timestamp);
                }
            }
            Err(e) => println!("  error leyendo etapas: {e}"),
        }
    }

    println!("policies in head-end: {}", provider.policy_count());

    // Cerrar el stream y esperar el total de eventos consumidos.
    drop(manager);
    if let Ok(count) = printer.await {
        println!("events emitted: {count}");
    }
}
