//! Parámetros configurables del motor.
//!
//! `EngineSettings` agrupa los valores que el despachador y las máquinas de
//! estado consultan en caliente. El paquete raíz construye una instancia a
//! partir del entorno; los tests usan `Default` (los valores de
//! `constants`).

use crate::constants;

/// Parámetros operativos del motor de overrides.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Duración aplicada cuando la solicitud no trae fecha de fin
    /// (minutos).
    pub default_override_duration_minutes: i64,
    /// Ventana máxima admitida para un override (horas).
    pub max_override_window_hours: i64,
    /// Espera tras el inicio del vecino contiguo antes del deploy
    /// (minutos).
    pub contiguous_start_buffer_minutes: i64,
    /// Backoff del inicio ante un vecino de dirección opuesta (minutos).
    pub opposite_switch_backoff_minutes: i64,
    /// Tamaño máximo de una unidad de despacho.
    pub max_dispatch_count: usize,
    /// Llamadas admitidas por período del limitador.
    pub rate_limit_calls: usize,
    /// Período del limitador (segundos).
    pub rate_limit_period_seconds: u64,
    /// Vida útil de la sesión del proveedor (segundos).
    pub provider_session_lifetime_seconds: u64,
    /// Timeout por llamada al proveedor (segundos).
    pub provider_call_timeout_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { default_override_duration_minutes: constants::DEFAULT_OVERRIDE_DURATION_MINUTES,
               max_override_window_hours: constants::MAX_OVERRIDE_WINDOW_HOURS,
               contiguous_start_buffer_minutes: constants::CONTIGUOUS_START_BUFFER_MINUTES,
               opposite_switch_backoff_minutes: constants::OPPOSITE_SWITCH_DIRECTION_BACKOFF_MINUTES,
               max_dispatch_count: constants::MAX_DISPATCH_COUNT,
               rate_limit_calls: constants::RATE_LIMIT_CALLS,
               rate_limit_period_seconds: constants::RATE_LIMIT_PERIOD_SECONDS,
               provider_session_lifetime_seconds: constants::PROVIDER_SESSION_LIFETIME_SECONDS,
               provider_call_timeout_seconds: constants::PROVIDER_CALL_TIMEOUT_SECONDS }
    }
}
