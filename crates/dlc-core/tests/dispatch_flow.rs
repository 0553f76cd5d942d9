//! Pipeline de despacho de punta a punta sobre el store en memoria:
//! agrupación, partición por contigüidad y troceo acotado.

use chrono::{DateTime, TimeZone, Utc};
use dlc_core::contiguity::PolicyClass;
use dlc_core::{chunk_unit, group_requests, split_bucket, HeaderPatch, InMemoryTrackerStore, NewRequest,
               QueuedOverride, TrackerStore};
use dlc_domain::{OverrideWindow, Stage, SwitchDirection};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 6, 9, h, m, 0).unwrap()
}

fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> OverrideWindow {
    OverrideWindow::new(start, end).unwrap()
}

fn queued(correlation_id: &str, meter: &str, group_id: Option<&str>, direction: SwitchDirection) -> QueuedOverride {
    QueuedOverride { correlation_id: correlation_id.into(),
                     subscription_id: "sub-1".into(),
                     site: "S1".into(),
                     meter_serial: meter.into(),
                     status: direction,
                     window: window(at(10, 30), at(11, 0)),
                     group_id: group_id.map(|g| g.to_string()) }
}

fn deployed(store: &InMemoryTrackerStore, correlation_id: &str, meter: &str, direction: SwitchDirection) {
    store.create_header(NewRequest { correlation_id: correlation_id.into(),
                                     subscription_id: "sub-1".into(),
                                     site: "S1".into(),
                                     meter_serial: meter.into(),
                                     override_value: direction,
                                     group_id: None,
                                     request_start: Some(at(10, 0)),
                                     request_end: Some(at(10, 30)) },
                        at(9, 0))
         .unwrap();
    store.update_tracker(correlation_id, Stage::PolicyDeployed, at(9, 1), None, HeaderPatch::default())
         .unwrap();
}

// Un batch mixto: un grupo con vecinas de ambas direcciones y un suelto.
#[test]
fn mixed_batch_splits_into_expected_units() {
    let store = InMemoryTrackerStore::new();
    deployed(&store, "CRL-ext", "M-ext", SwitchDirection::On);
    deployed(&store, "CRL-opp", "M-opp", SwitchDirection::Off);

    let batch = vec![queued("CRL-1", "M-ext", Some("G1"), SwitchDirection::On),
                     queued("CRL-2", "M-opp", Some("G1"), SwitchDirection::On),
                     queued("CRL-3", "M-new", Some("G1"), SwitchDirection::On),
                     queued("CRL-4", "M-solo", None, SwitchDirection::On)];

    let buckets = group_requests(batch);
    assert_eq!(buckets.len(), 2, "un bucket de grupo + un suelto");

    let mut all_units = Vec::new();
    for bucket in buckets {
        all_units.extend(split_bucket(&store, bucket).unwrap());
    }
    assert_eq!(all_units.len(), 4);

    let extension = all_units.iter().find(|u| u.policy_class == PolicyClass::ContiguousExtension).unwrap();
    assert_eq!(extension.members.len(), 1);
    assert_eq!(extension.members[0].correlation_id, "CRL-1");
    assert_eq!(extension.original_start, Some(at(10, 0)));
    assert_eq!(extension.execution_key(), "GRP-CRL-1");

    let creation = all_units.iter().find(|u| u.policy_class == PolicyClass::ContiguousCreation).unwrap();
    assert_eq!(creation.members[0].correlation_id, "CRL-2");
    assert_eq!(creation.members[0].neighbour_correlation_id.as_deref(), Some("CRL-opp"));

    let news: Vec<_> = all_units.iter().filter(|u| u.policy_class == PolicyClass::New).collect();
    assert_eq!(news.len(), 2);
    let solo = news.iter().find(|u| u.group_id.is_none()).unwrap();
    assert_eq!(solo.execution_key(), "CRL-4");
}

// Troceo de un grupo grande con plegado de la cola corta.
#[test]
fn large_group_is_chunked_with_tail_folding() {
    let store = InMemoryTrackerStore::new();
    let batch: Vec<QueuedOverride> = (0..230).map(|i| queued(&format!("CRL-{i:03}"), &format!("M{i:03}"),
                                                             Some("G1"), SwitchDirection::On))
                                             .collect();

    let mut buckets = group_requests(batch);
    assert_eq!(buckets.len(), 1);
    let units = split_bucket(&store, buckets.remove(0)).unwrap();
    assert_eq!(units.len(), 1);

    // 230 = 100 + 130 (la cola de 30 < 50 se pliega en el segundo trozo).
    let chunks = chunk_unit(units.into_iter().next().unwrap(), 100);
    let sizes: Vec<usize> = chunks.iter().map(|c| c.members.len()).collect();
    assert_eq!(sizes, vec![100, 130]);

    // Todos los trozos conservan la clase y el grupo.
    for chunk in &chunks {
        assert_eq!(chunk.policy_class, PolicyClass::New);
        assert_eq!(chunk.group_id.as_deref(), Some("G1"));
    }

    // Claves de ejecución distintas por trozo.
    assert_ne!(chunks[0].execution_key(), chunks[1].execution_key());
}

// Las clases contiguas por ventana del vecino no se mezclan: dos cadenas
// distintas producen dos replaces separados.
#[test]
fn extensions_are_keyed_by_neighbour_window() {
    let store = InMemoryTrackerStore::new();
    deployed(&store, "CRL-n1", "M1", SwitchDirection::On);
    // Vecina con otra ventana terminal: cadena previa ya extendida.
    store.create_header(NewRequest { correlation_id: "CRL-n2".into(),
                                     subscription_id: "sub-1".into(),
                                     site: "S1".into(),
                                     meter_serial: "M2".into(),
                                     override_value: SwitchDirection::On,
                                     group_id: None,
                                     request_start: Some(at(10, 0)),
                                     request_end: Some(at(10, 30)) },
                        at(9, 0))
         .unwrap();
    store.update_tracker("CRL-n2",
                         Stage::PolicyDeployed,
                         at(9, 1),
                         None,
                         HeaderPatch { original_start: Some(at(9, 0)),
                                       ..Default::default() })
         .unwrap();

    let bucket = group_requests(vec![queued("CRL-1", "M1", Some("G1"), SwitchDirection::On),
                                     queued("CRL-2", "M2", Some("G1"), SwitchDirection::On)]).remove(0);
    let units = split_bucket(&store, bucket).unwrap();

    assert_eq!(units.len(), 2);
    assert!(units.iter().all(|u| u.policy_class == PolicyClass::ContiguousExtension));
    let starts: Vec<Option<DateTime<Utc>>> = units.iter().map(|u| u.original_start).collect();
    assert!(starts.contains(&Some(at(10, 0))));
    assert!(starts.contains(&Some(at(9, 0))));
}
