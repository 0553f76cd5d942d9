//! Resolución de contigüidad.
//!
//! Dada una solicitud propuesta `(site, meter, status, start)` busca la
//! solicitud vecina ya encaminada cuyo fin coincide exactamente con el
//! inicio propuesto. A lo sumo puede existir una; más de una es una
//! inconsistencia de datos y corta el workflow.
//!
//! - Vecino con la misma dirección: la nueva solicitud **extiende** la
//!   política existente; el inicio efectivo es el de la solicitud terminal
//!   de la cadena (`extends` hacia atrás).
//! - Vecino con dirección opuesta: la nueva política se crea con backoff
//!   de inicio y flag `replace` (lo aplica la máquina de override).

use chrono::{DateTime, Utc};
use dlc_domain::stage::CONTIGUOUS_STAGES;
use dlc_domain::SwitchDirection;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::tracker::{EndFilter, RequestHeader, StageFilter, TrackerStore};

/// Clase de despacho de una solicitud respecto de sus vecinas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyClass {
    /// Sin vecino contiguo: política nueva e independiente.
    #[serde(rename = "new")]
    New,
    /// Vecino contiguo en la misma dirección: se reemplaza la política
    /// existente por una extendida.
    #[serde(rename = "contiguousExtension")]
    ContiguousExtension,
    /// Vecino contiguo en dirección opuesta: política nueva con backoff y
    /// flag replace.
    #[serde(rename = "contiguousCreation")]
    ContiguousCreation,
}

/// Busca la solicitud vecina cuyo `request_end` coincide con `start` en una
/// de las etapas con política viva. Devuelve error si hay más de una.
pub fn find_contiguous_neighbour(store: &dyn TrackerStore,
                                 site: &str,
                                 meter_serial: &str,
                                 start: DateTime<Utc>)
                                 -> Result<Option<RequestHeader>, CoreError> {
    let matches = store.query_site_meter(site,
                                         meter_serial,
                                         EndFilter::Exactly(start),
                                         StageFilter::In(&CONTIGUOUS_STAGES))?;

    match matches.len() {
        0 => {
            info!("no contiguous requests found for {site}/{meter_serial}");
            Ok(None)
        }
        1 => Ok(matches.into_iter().next()),
        n => {
            debug!("contiguity probe for {site}/{meter_serial} returned {n} candidates");
            Err(CoreError::ContiguityConflict { site: site.to_string(),
                                                meter_serial: meter_serial.to_string() })
        }
    }
}

/// Clasifica la relación entre la dirección propuesta y el vecino.
pub fn classify_neighbour(proposed: SwitchDirection, neighbour: &RequestHeader) -> PolicyClass {
    if neighbour.override_value == proposed {
        PolicyClass::ContiguousExtension
    } else {
        PolicyClass::ContiguousCreation
    }
}

/// Inicio efectivo de la cadena de extensión a la que pertenece `header`:
/// el `request_start` de la solicitud terminal (la más antigua).
///
/// El campo `original_start` del header es el atajo materializado; la
/// caminata por `extends` es el camino de verdad cuando falta.
pub fn terminal_start(store: &dyn TrackerStore, header: &RequestHeader) -> Result<DateTime<Utc>, CoreError> {
    if let Some(original_start) = header.original_start {
        return Ok(original_start);
    }

    let mut current = header.clone();
    loop {
        let Some(parent_id) = current.extends.clone() else {
            debug!("request {} does not extend another - exiting", current.correlation_id);
            break;
        };
        debug!("request {} extends correlation id {}", current.correlation_id, parent_id);
        current = store.get_header(&parent_id)?
                       .ok_or(CoreError::BrokenExtensionChain(parent_id))?;
    }

    current.request_start
           .ok_or_else(|| CoreError::Internal(format!("terminal request {} has no start date", current.correlation_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{HeaderPatch, InMemoryTrackerStore, NewRequest};
    use chrono::TimeZone;
    use dlc_domain::Stage;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 6, 9, h, m, 0).unwrap()
    }

    fn seed(store: &InMemoryTrackerStore,
            correlation_id: &str,
            direction: SwitchDirection,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            stage: Stage) {
        store.create_header(NewRequest { correlation_id: correlation_id.into(),
                                         subscription_id: "sub-1".into(),
                                         site: "S1".into(),
                                         meter_serial: "M1".into(),
                                         override_value: direction,
                                         group_id: None,
                                         request_start: Some(start),
                                         request_end: Some(end) },
                            at(8, 0))
             .unwrap();
        if stage != Stage::Received {
            store.update_tracker(correlation_id, stage, at(8, 1), None, HeaderPatch::default())
                 .unwrap();
        }
    }

    #[test]
    fn neighbour_is_found_at_exact_end() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", SwitchDirection::On, at(10, 0), at(10, 30), Stage::PolicyDeployed);

        let neighbour = find_contiguous_neighbour(&store, "S1", "M1", at(10, 30)).unwrap();
        assert_eq!(neighbour.unwrap().correlation_id, "CRL-1");
        assert!(find_contiguous_neighbour(&store, "S1", "M1", at(10, 31)).unwrap().is_none());
    }

    #[test]
    fn received_requests_are_not_neighbours() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", SwitchDirection::On, at(10, 0), at(10, 30), Stage::Received);
        assert!(find_contiguous_neighbour(&store, "S1", "M1", at(10, 30)).unwrap().is_none());
    }

    #[test]
    fn two_neighbours_are_a_data_integrity_error() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", SwitchDirection::On, at(10, 0), at(10, 30), Stage::PolicyDeployed);
        seed(&store, "CRL-2", SwitchDirection::Off, at(10, 15), at(10, 30), Stage::PolicyCreated);

        let err = find_contiguous_neighbour(&store, "S1", "M1", at(10, 30)).unwrap_err();
        assert!(matches!(err, CoreError::ContiguityConflict { .. }));
    }

    #[test]
    fn classification_follows_switch_direction() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", SwitchDirection::On, at(10, 0), at(10, 30), Stage::PolicyDeployed);
        let neighbour = find_contiguous_neighbour(&store, "S1", "M1", at(10, 30)).unwrap().unwrap();

        assert_eq!(classify_neighbour(SwitchDirection::On, &neighbour), PolicyClass::ContiguousExtension);
        assert_eq!(classify_neighbour(SwitchDirection::Off, &neighbour), PolicyClass::ContiguousCreation);
    }

    #[test]
    fn terminal_start_walks_the_extends_chain() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", SwitchDirection::On, at(9, 0), at(9, 30), Stage::PolicyDeployed);
        seed(&store, "CRL-2", SwitchDirection::On, at(9, 30), at(10, 0), Stage::PolicyDeployed);
        seed(&store, "CRL-3", SwitchDirection::On, at(10, 0), at(10, 30), Stage::PolicyDeployed);
        store.update_tracker("CRL-2",
                             Stage::Extends,
                             at(9, 31),
                             None,
                             HeaderPatch { extends: Some("CRL-1".into()),
                                           ..Default::default() })
             .unwrap();
        store.update_tracker("CRL-3",
                             Stage::Extends,
                             at(10, 1),
                             None,
                             HeaderPatch { extends: Some("CRL-2".into()),
                                           ..Default::default() })
             .unwrap();

        let header = store.get_header("CRL-3").unwrap().unwrap();
        assert_eq!(terminal_start(&store, &header).unwrap(), at(9, 0));
    }

    #[test]
    fn materialized_original_start_short_circuits_the_walk() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-1", SwitchDirection::On, at(9, 30), at(10, 0), Stage::PolicyDeployed);
        store.update_tracker("CRL-1",
                             Stage::PolicyExtended,
                             at(9, 31),
                             None,
                             HeaderPatch { original_start: Some(at(9, 0)),
                                           ..Default::default() })
             .unwrap();

        let header = store.get_header("CRL-1").unwrap().unwrap();
        assert_eq!(terminal_start(&store, &header).unwrap(), at(9, 0));
    }

    #[test]
    fn broken_chain_is_reported() {
        let store = InMemoryTrackerStore::new();
        seed(&store, "CRL-2", SwitchDirection::On, at(9, 30), at(10, 0), Stage::PolicyDeployed);
        store.update_tracker("CRL-2",
                             Stage::Extends,
                             at(9, 31),
                             None,
                             HeaderPatch { extends: Some("CRL-MISSING".into()),
                                           ..Default::default() })
             .unwrap();

        let header = store.get_header("CRL-2").unwrap().unwrap();
        let err = terminal_start(&store, &header).unwrap_err();
        assert!(matches!(err, CoreError::BrokenExtensionChain(_)));
    }
}
