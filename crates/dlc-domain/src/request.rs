// request.rs
use crate::switch::SwitchDirection;
use serde::{Deserialize, Serialize};

/// Solicitud de override tal como llega del suscriptor.
///
/// Todos los campos son opcionales a propósito: la validación sintáctica es
/// la que decide qué falta y reporta *todos* los errores encontrados, no el
/// primero. Las fechas viajan como texto (ISO-8601 con offset explícito) y
/// sólo se parsean a `DateTime<Utc>` cuando la validación las acepta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// El protocolo admite un string suelto o una lista con una entrada.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_addresses: Option<SwitchAddresses>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Direcciones de interruptor: un serial suelto o una lista.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SwitchAddresses {
    One(String),
    Many(Vec<String>),
}

impl SwitchAddresses {
    /// Cantidad de seriales suministrados.
    pub fn len(&self) -> usize {
        match self {
            SwitchAddresses::One(_) => 1,
            SwitchAddresses::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SwitchAddresses::One(s) => s.is_empty(),
            SwitchAddresses::Many(v) => v.is_empty() || v.iter().all(|s| s.is_empty()),
        }
    }

    /// Primer serial de la colección (el único, tras validación).
    pub fn first(&self) -> Option<&str> {
        match self {
            SwitchAddresses::One(s) if !s.is_empty() => Some(s.as_str()),
            SwitchAddresses::Many(v) => v.iter().find(|s| !s.is_empty()).map(|s| s.as_str()),
            _ => None,
        }
    }
}

impl OverrideRequest {
    /// Serial del medidor de la solicitud (tras validación hay exactamente
    /// uno).
    pub fn meter_serial(&self) -> Option<&str> {
        self.switch_addresses.as_ref().and_then(|a| a.first())
    }

    /// Dirección del override si el campo `status` trae uno de los
    /// literales válidos.
    pub fn direction(&self) -> Option<SwitchDirection> {
        self.status.as_deref().and_then(|s| SwitchDirection::parse(s).ok())
    }

    /// Sitio de la solicitud, si viene poblado.
    pub fn site(&self) -> Option<&str> {
        self.site.as_deref().filter(|s| !s.is_empty())
    }
}
