//! Tipos de las unidades de despacho.

use chrono::{DateTime, Utc};
use dlc_domain::{OverrideWindow, SwitchDirection};
use serde::{Deserialize, Serialize};

use crate::contiguity::PolicyClass;

/// Solicitud aceptada, con su ventana ya normalizada, lista para agrupar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOverride {
    pub correlation_id: String,
    pub subscription_id: String,
    pub site: String,
    pub meter_serial: String,
    pub status: SwitchDirection,
    pub window: OverrideWindow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Miembro de una unidad de despacho.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMember {
    pub site: String,
    pub meter_serial: String,
    pub correlation_id: String,
    pub subscription_id: String,
    /// Correlation id del vecino contiguo, para las clases contiguas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbour_correlation_id: Option<String>,
}

/// Unidad de despacho: el agregado que se somete al workflow como una
/// única ejecución.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchUnit {
    pub policy_class: PolicyClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub status: SwitchDirection,
    /// Ventana solicitada (común a todos los miembros de la unidad).
    pub window: OverrideWindow,
    /// Inicio efectivo de la cadena para `contiguousExtension` (el start
    /// de la solicitud terminal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_start: Option<DateTime<Utc>>,
    /// Ventana del vecino contiguo, para decidir el instante de deploy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbour_window: Option<OverrideWindow>,
    pub members: Vec<DispatchMember>,
}

impl DispatchUnit {
    /// Clave de ejecución idempotente del workflow: el correlation id para
    /// unidades sueltas, `GRP-<primer correlation id>` para las agrupadas.
    pub fn execution_key(&self) -> String {
        let first = self.members
                        .first()
                        .map(|m| m.correlation_id.as_str())
                        .unwrap_or_default();
        if self.group_id.is_some() {
            format!("GRP-{first}")
        } else {
            first.to_string()
        }
    }

    /// Correlation ids de todos los miembros.
    pub fn correlation_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.correlation_id.clone()).collect()
    }

    /// Seriales de medidor de todos los miembros.
    pub fn meter_serials(&self) -> Vec<String> {
        self.members.iter().map(|m| m.meter_serial.clone()).collect()
    }

    /// Correlation ids de los vecinos contiguos (clases contiguas).
    pub fn neighbour_ids(&self) -> Vec<String> {
        self.members
            .iter()
            .filter_map(|m| m.neighbour_correlation_id.clone())
            .collect()
    }
}
