//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y expone una estructura inmutable
//! (`CONFIG`). Los knobs del motor usan los defaults del core cuando la
//! variable no está definida.
use dlc_core::EngineSettings;
use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;

/// Configuración global de la aplicación (extensible para más secciones:
/// logging, etc.).
pub struct AppConfig {
    /// Parámetros del motor de overrides.
    pub engine: EngineSettings,
    /// Capacidad de la cola de ingreso en memoria.
    pub ingress_queue_capacity: usize,
    /// Tamaño máximo de batch que drena el despachador por iteración.
    pub dispatcher_batch_size: usize,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Instancia global perezosa de configuración, evaluada una sola vez.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let _ = dotenvy::dotenv(); // ignora error si no existe .env

    let defaults = EngineSettings::default();
    let engine = EngineSettings {
        default_override_duration_minutes: env_parse("DEFAULT_OVERRIDE_DURATION_MINUTES",
                                                     defaults.default_override_duration_minutes),
        max_override_window_hours: env_parse("MAX_OVERRIDE_WINDOW_HOURS", defaults.max_override_window_hours),
        contiguous_start_buffer_minutes: env_parse("CONTIGUOUS_START_BUFFER_MINUTES",
                                                   defaults.contiguous_start_buffer_minutes),
        opposite_switch_backoff_minutes: env_parse("OPPOSITE_SWITCH_DIRECTION_BACKOFF",
                                                   defaults.opposite_switch_backoff_minutes),
        max_dispatch_count: env_parse("MAX_DISPATCH_COUNT", defaults.max_dispatch_count),
        rate_limit_calls: env_parse("RATE_LIMIT_CALLS", defaults.rate_limit_calls),
        rate_limit_period_seconds: env_parse("RATE_LIMIT_PERIOD", defaults.rate_limit_period_seconds),
        provider_session_lifetime_seconds: env_parse("PNET_SESSION_LIFETIME_SECONDS",
                                                     defaults.provider_session_lifetime_seconds),
        provider_call_timeout_seconds: env_parse("PROVIDER_CALL_TIMEOUT_SECONDS",
                                                 defaults.provider_call_timeout_seconds),
    };

    AppConfig { engine,
                ingress_queue_capacity: env_parse("INGRESS_QUEUE_CAPACITY", 1024),
                dispatcher_batch_size: env_parse("DISPATCHER_BATCH_SIZE", 256) }
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_to_default() {
        assert_eq!(env_parse("THIS_VAR_DOES_NOT_EXIST_123", 42u64), 42);
    }

    #[test]
    fn config_defaults_match_engine_defaults() {
        // Sin variables de entorno definidas, CONFIG replica los defaults.
        let defaults = EngineSettings::default();
        assert_eq!(CONFIG.engine.max_dispatch_count, defaults.max_dispatch_count);
        assert_eq!(CONFIG.engine.rate_limit_period_seconds, defaults.rate_limit_period_seconds);
    }
}
