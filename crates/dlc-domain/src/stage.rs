// stage.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Etapas del ciclo de vida de una solicitud de override.
///
/// El conjunto es cerrado: cada transición del tracker escribe exactamente
/// uno de estos valores como `current_stage` y como nombre del registro de
/// etapa. El orden relevante es:
/// `RECEIVED → {DECLINED | QUEUED}`,
/// `QUEUED → POLICY_CREATED → POLICY_DEPLOYED → DLC_OVERRIDE_STARTED →
/// DLC_OVERRIDE_FINISHED`, con las ramas de extensión `POLICY_EXTENDED`,
/// `EXTENDED_BY` y `EXTENDS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    Declined,
    Queued,
    PolicyCreated,
    PolicyExtended,
    PolicyDeployed,
    DlcOverrideStarted,
    DlcOverrideFinished,
    DlcOverrideFailure,
    Cancelled,
    ExtendedBy,
    Extends,
}

/// Etapas excluidas de las consultas de solapamiento: una solicitud en uno
/// de estos estados ya no ocupa su ventana.
pub const OVERLAP_EXCLUDED_STAGES: [Stage; 3] = [Stage::Cancelled, Stage::Declined, Stage::DlcOverrideFinished];

/// Etapas en las que una solicitud vecina cuenta para contigüidad (tiene o
/// tendrá una política viva en el head-end).
pub const CONTIGUOUS_STAGES: [Stage; 5] = [Stage::PolicyCreated,
                                           Stage::PolicyExtended,
                                           Stage::PolicyDeployed,
                                           Stage::DlcOverrideStarted,
                                           Stage::ExtendedBy];

/// Etapas desde las que el suscriptor puede cancelar la solicitud.
pub const IN_PROGRESS_STAGES: [Stage; 8] = [Stage::Received,
                                            Stage::Queued,
                                            Stage::PolicyCreated,
                                            Stage::PolicyDeployed,
                                            Stage::PolicyExtended,
                                            Stage::ExtendedBy,
                                            Stage::Extends,
                                            Stage::DlcOverrideStarted];

/// Etapas en las que una ejecución del workflow de override sigue corriendo
/// y debe detenerse antes de mutar políticas.
pub const WORKFLOW_IN_PROGRESS_STAGES: [Stage; 3] = [Stage::Queued, Stage::PolicyCreated, Stage::PolicyExtended];

/// Etapas en las que la política asociada está desplegada en el head-end
/// (hay que replegarla antes de borrarla).
pub const POLICY_DEPLOYED_STAGES: [Stage; 3] = [Stage::PolicyDeployed, Stage::DlcOverrideStarted, Stage::ExtendedBy];

impl Stage {
    /// Nombre estable de la etapa (el mismo que serializa serde).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "RECEIVED",
            Stage::Declined => "DECLINED",
            Stage::Queued => "QUEUED",
            Stage::PolicyCreated => "POLICY_CREATED",
            Stage::PolicyExtended => "POLICY_EXTENDED",
            Stage::PolicyDeployed => "POLICY_DEPLOYED",
            Stage::DlcOverrideStarted => "DLC_OVERRIDE_STARTED",
            Stage::DlcOverrideFinished => "DLC_OVERRIDE_FINISHED",
            Stage::DlcOverrideFailure => "DLC_OVERRIDE_FAILURE",
            Stage::Cancelled => "CANCELLED",
            Stage::ExtendedBy => "EXTENDED_BY",
            Stage::Extends => "EXTENDS",
        }
    }

    /// Parsea el nombre estable de una etapa (inverso de `as_str`).
    pub fn parse(value: &str) -> Option<Stage> {
        match value {
            "RECEIVED" => Some(Stage::Received),
            "DECLINED" => Some(Stage::Declined),
            "QUEUED" => Some(Stage::Queued),
            "POLICY_CREATED" => Some(Stage::PolicyCreated),
            "POLICY_EXTENDED" => Some(Stage::PolicyExtended),
            "POLICY_DEPLOYED" => Some(Stage::PolicyDeployed),
            "DLC_OVERRIDE_STARTED" => Some(Stage::DlcOverrideStarted),
            "DLC_OVERRIDE_FINISHED" => Some(Stage::DlcOverrideFinished),
            "DLC_OVERRIDE_FAILURE" => Some(Stage::DlcOverrideFailure),
            "CANCELLED" => Some(Stage::Cancelled),
            "EXTENDED_BY" => Some(Stage::ExtendedBy),
            "EXTENDS" => Some(Stage::Extends),
            _ => None,
        }
    }

    /// Una etapa terminal es un sumidero: el tracker rechaza cualquier
    /// registro de etapa posterior.
    pub fn is_terminal(&self) -> bool {
        matches!(self,
                 Stage::Declined | Stage::Cancelled | Stage::DlcOverrideFinished | Stage::DlcOverrideFailure)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
