//! Agrupación por `(group_id, status, ventana)` y sub-partición por clase
//! de contigüidad.

use chrono::{DateTime, Utc};
use dlc_domain::{OverrideWindow, SwitchDirection};
use indexmap::IndexMap;
use log::info;

use super::unit::{DispatchMember, DispatchUnit, QueuedOverride};
use crate::contiguity::{classify_neighbour, find_contiguous_neighbour, terminal_start, PolicyClass};
use crate::errors::CoreError;
use crate::tracker::TrackerStore;

/// Bucket de agrupación previo a la partición por contigüidad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBucket {
    pub group_id: Option<String>,
    pub status: SwitchDirection,
    pub window: OverrideWindow,
    pub members: Vec<QueuedOverride>,
}

/// Particiona el batch por `(group_id, status, start, end)` preservando el
/// orden de llegada. Las solicitudes sin `group_id` quedan como buckets de
/// un solo miembro.
pub fn group_requests(batch: Vec<QueuedOverride>) -> Vec<GroupBucket> {
    type GroupKey = (String, SwitchDirection, DateTime<Utc>, DateTime<Utc>);
    let mut grouped: IndexMap<GroupKey, GroupBucket> = IndexMap::new();
    let mut singletons: Vec<GroupBucket> = Vec::new();

    for request in batch {
        match request.group_id.clone() {
            Some(group_id) => {
                let key = (group_id.clone(), request.status, request.window.start(), request.window.end());
                grouped.entry(key)
                       .or_insert_with(|| GroupBucket { group_id: Some(group_id),
                                                        status: request.status,
                                                        window: request.window,
                                                        members: Vec::new() })
                       .members
                       .push(request);
            }
            None => {
                singletons.push(GroupBucket { group_id: None,
                                              status: request.status,
                                              window: request.window,
                                              members: vec![request] });
            }
        }
    }

    let mut buckets: Vec<GroupBucket> = grouped.into_values().collect();
    buckets.extend(singletons);
    buckets
}

/// Sub-particiona un bucket sondeando la contigüidad de cada miembro.
///
/// Los miembros sin vecino arman una unidad `new`; los contiguos se
/// sub-agrupan por `(clase, dirección del vecino, inicio terminal, ventana
/// del vecino)` para que cada replace cubra una única ventana de política
/// fusionada.
pub fn split_bucket(store: &dyn TrackerStore, bucket: GroupBucket) -> Result<Vec<DispatchUnit>, CoreError> {
    type ContiguousKey = (PolicyClass, SwitchDirection, Option<DateTime<Utc>>, Option<DateTime<Utc>>);

    let mut plain_members: Vec<DispatchMember> = Vec::new();
    let mut contiguous: IndexMap<ContiguousKey, DispatchUnit> = IndexMap::new();

    for request in &bucket.members {
        let neighbour = find_contiguous_neighbour(store, &request.site, &request.meter_serial, request.window.start())?;

        match neighbour {
            None => {
                plain_members.push(DispatchMember { site: request.site.clone(),
                                                    meter_serial: request.meter_serial.clone(),
                                                    correlation_id: request.correlation_id.clone(),
                                                    subscription_id: request.subscription_id.clone(),
                                                    neighbour_correlation_id: None });
            }
            Some(neighbour) => {
                let class = classify_neighbour(bucket.status, &neighbour);
                let chain_start = match class {
                    PolicyClass::ContiguousExtension => Some(terminal_start(store, &neighbour)?),
                    _ => None,
                };
                let neighbour_window = neighbour.window();
                let key = (class, neighbour.override_value, chain_start, neighbour_window.map(|w| w.start()));

                let member = DispatchMember { site: request.site.clone(),
                                              meter_serial: request.meter_serial.clone(),
                                              correlation_id: request.correlation_id.clone(),
                                              subscription_id: request.subscription_id.clone(),
                                              neighbour_correlation_id: Some(neighbour.correlation_id.clone()) };

                contiguous.entry(key)
                          .or_insert_with(|| DispatchUnit { policy_class: class,
                                                            group_id: bucket.group_id.clone(),
                                                            status: bucket.status,
                                                            window: bucket.window,
                                                            original_start: chain_start,
                                                            neighbour_window,
                                                            members: Vec::new() })
                          .members
                          .push(member);
            }
        }
    }

    let mut units: Vec<DispatchUnit> = contiguous.into_values().collect();
    if !plain_members.is_empty() {
        units.push(DispatchUnit { policy_class: PolicyClass::New,
                                  group_id: bucket.group_id.clone(),
                                  status: bucket.status,
                                  window: bucket.window,
                                  original_start: None,
                                  neighbour_window: None,
                                  members: plain_members });
    }

    if units.len() > 1 {
        info!("bucket split into {} dispatch units by contiguity class", units.len());
    }
    Ok(units)
}
