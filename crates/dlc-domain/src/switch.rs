// switch.rs
use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dirección de un override de control de carga: encender o apagar el
/// interruptor del medidor. Serializa con los literales del protocolo
/// (`ON` / `OFF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchDirection {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl SwitchDirection {
    /// Parsea el literal del protocolo. Cualquier otro valor es un error de
    /// validación (el validador reporta el mensaje orientado al cliente).
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "ON" => Ok(SwitchDirection::On),
            "OFF" => Ok(SwitchDirection::Off),
            other => Err(DomainError::Validation(format!("unknown DLC status '{other}'"))),
        }
    }

    /// Literal estable del protocolo.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchDirection::On => "ON",
            SwitchDirection::Off => "OFF",
        }
    }

    /// Flag que consume el head-end: las políticas se expresan como
    /// "turn off" booleano.
    pub fn turn_off(&self) -> bool {
        matches!(self, SwitchDirection::Off)
    }
}

impl fmt::Display for SwitchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_protocol_literals_only() {
        assert_eq!(SwitchDirection::parse("ON").unwrap(), SwitchDirection::On);
        assert_eq!(SwitchDirection::parse("OFF").unwrap(), SwitchDirection::Off);
        assert!(SwitchDirection::parse("on").is_err());
        assert!(SwitchDirection::parse("TOGGLE").is_err());
    }

    #[test]
    fn turn_off_flag_matches_direction() {
        assert!(!SwitchDirection::On.turn_off());
        assert!(SwitchDirection::Off.turn_off());
    }

    #[test]
    fn serde_roundtrip_uses_uppercase() {
        let json = serde_json::to_string(&SwitchDirection::On).unwrap();
        assert_eq!(json, "\"ON\"");
        let back: SwitchDirection = serde_json::from_str("\"OFF\"").unwrap();
        assert_eq!(back, SwitchDirection::Off);
    }
}
