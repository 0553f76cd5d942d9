//! Fachada del head-end de políticas.
//!
//! El motor sólo conoce esta capacidad: crear/reemplazar, desplegar,
//! replegar y borrar políticas de override. La implementación real (SOAP)
//! queda fuera; `dlc-adapters` provee una en memoria para tests y demos.
//!
//! Convención de respuesta: `status_code == 200` es éxito; cualquier otro
//! valor es un fallo de la capa de políticas y su `message` debe llegar al
//! tracker tal cual (la solicitud pasa a `DECLINED`). Los errores de
//! transporte sí son `Err` y los reintenta el runtime del workflow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_POLICY_NAME_LENGTH;
use crate::errors::CoreError;

/// Respuesta de la capa de políticas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyReply {
    pub status_code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<i64>,
}

impl PolicyReply {
    pub fn is_success(&self) -> bool {
        self.status_code == crate::constants::HTTP_SUCCESS
    }
}

/// Capacidades del head-end sobre políticas de override.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// Crea una política de override de control de carga. Con
    /// `replace = true` el head-end reemplaza la política vigente del
    /// medidor (es el mecanismo de extensión).
    async fn create_override_policy(&self,
                                    meter_serials: &[String],
                                    turn_off: bool,
                                    start: DateTime<Utc>,
                                    duration_minutes: i64,
                                    replace: bool)
                                    -> Result<(String, PolicyReply), CoreError>;

    /// Reemplaza la política desplegada: idéntico a crear con
    /// `replace = true`.
    async fn replace_override_policy(&self,
                                     meter_serials: &[String],
                                     turn_off: bool,
                                     start: DateTime<Utc>,
                                     duration_minutes: i64)
                                     -> Result<(String, PolicyReply), CoreError> {
        self.create_override_policy(meter_serials, turn_off, start, duration_minutes, true).await
    }

    /// Despliega una política ya creada.
    async fn deploy_policy(&self, policy_id: i64) -> Result<PolicyReply, CoreError>;

    /// Repliega una política desplegada. Requiere usuario de operaciones.
    async fn undeploy_policy(&self, policy_id: i64) -> Result<(), CoreError>;

    /// Borra una política del head-end.
    async fn delete_policy(&self, policy_id: i64) -> Result<(), CoreError>;

    /// `true` si la política existe en el head-end.
    async fn policy_exists(&self, policy_id: i64) -> Result<bool, CoreError>;
}

/// Arma el nombre de política con la convención del head-end:
/// `DLCOverride(<ON|OFF>)-<meter>[-<meter>…]-<epoch>`, truncado al largo
/// máximo admitido.
pub fn build_policy_name(turn_off: bool, meter_serials: &[String], epoch_seconds: i64) -> String {
    let device_action_display = if turn_off { "OFF" } else { "ON" };
    let name = format!("DLCOverride({})-{}-{}",
                       device_action_display,
                       meter_serials.join("-"),
                       epoch_seconds);
    name.chars().take(MAX_POLICY_NAME_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_name_follows_the_convention() {
        let name = build_policy_name(false, &["TM022014316".into()], 1_656_000_000);
        assert_eq!(name, "DLCOverride(ON)-TM022014316-1656000000");

        let name = build_policy_name(true, &["M1".into(), "M2".into()], 1_656_000_000);
        assert_eq!(name, "DLCOverride(OFF)-M1-M2-1656000000");
    }

    #[test]
    fn policy_name_is_truncated_to_64_chars() {
        let meters: Vec<String> = (0..10).map(|i| format!("METER{i:07}")).collect();
        let name = build_policy_name(false, &meters, 1_656_000_000);
        assert_eq!(name.len(), 64);
        assert!(name.starts_with("DLCOverride(ON)-METER0000000-"));
    }

    #[test]
    fn reply_success_is_http_200() {
        let ok = PolicyReply { status_code: 200, message: "created".into(), policy_id: Some(1) };
        let bad = PolicyReply { status_code: 400, message: "boom".into(), policy_id: None };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
