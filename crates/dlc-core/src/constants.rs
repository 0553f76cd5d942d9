//! Constantes estables del motor y defaults de configuración.
//!
//! Los defaults replican los valores operativos del servicio; el paquete
//! raíz los puede sobreescribir desde el entorno (ver `EngineSettings`).

/// Nombre del servicio registrado en cada header del tracker.
pub const LOAD_CONTROL_SERVICE_NAME: &str = "load_control";

/// Head-end contra el que se crean las políticas. Es el valor de la ruta de
/// acceso `(head_end, policy_id)` del tracker.
pub const HEAD_END_POLICYNET: &str = "PolicyNet";

/// Código de éxito de la capa de políticas; cualquier otro valor es un
/// fallo que debe llegar al tracker con su mensaje.
pub const HTTP_SUCCESS: u16 = 200;

/// Largo máximo de un nombre de política aceptado por el head-end.
pub const MAX_POLICY_NAME_LENGTH: usize = 64;

/// Formato esperado en los mensajes de error de fechas.
pub const DATE_FORMAT_HINT: &str = "YYYY-mm-ddTHH:MM:SS+zz:zz";

/// Duración por defecto de un override sin fecha de fin (minutos).
pub const DEFAULT_OVERRIDE_DURATION_MINUTES: i64 = 30;

/// Ventana máxima admitida para un override (horas).
pub const MAX_OVERRIDE_WINDOW_HOURS: i64 = 24;

/// Espera tras el inicio del vecino contiguo antes de desplegar la
/// extensión (minutos).
pub const CONTIGUOUS_START_BUFFER_MINUTES: i64 = 5;

/// Corrimiento del inicio cuando el vecino contiguo es de dirección
/// opuesta (minutos).
pub const OPPOSITE_SWITCH_DIRECTION_BACKOFF_MINUTES: i64 = 5;

/// Tamaño máximo de una unidad de despacho.
pub const MAX_DISPATCH_COUNT: usize = 100;

/// Presupuesto del limitador: llamadas admitidas por período.
pub const RATE_LIMIT_CALLS: usize = 1000;

/// Período del limitador en segundos.
pub const RATE_LIMIT_PERIOD_SECONDS: u64 = 60;

/// Vida útil de una sesión del proveedor de políticas (segundos).
pub const PROVIDER_SESSION_LIFETIME_SECONDS: u64 = 300;

/// Timeout por llamada al proveedor (segundos).
pub const PROVIDER_CALL_TIMEOUT_SECONDS: u64 = 30;
