//! Sesión del proveedor de políticas.
//!
//! El head-end exige una sesión autenticada por llamada; adquirirla es
//! caro, así que se reutiliza mientras no venza su vida útil. El refresh
//! queda serializado por el lock interno: dos workers concurrentes nunca
//! abren dos sesiones a la vez, y la liberación del guard está garantizada
//! en todos los caminos de salida (Drop).

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info};

#[derive(Debug)]
struct SessionState {
    session_id: Option<String>,
    acquired_at: Option<Instant>,
    /// Cantidad de logins realizados (visible para tests).
    logins: u64,
    /// Guards vivos sobre la sesión actual.
    active: u64,
}

/// Administrador de la sesión compartida del proveedor.
#[derive(Debug)]
pub struct SessionManager {
    lifetime: Duration,
    state: Mutex<SessionState>,
}

/// Guard RAII de una sesión adquirida.
pub struct SessionGuard<'a> {
    manager: &'a SessionManager,
    session_id: String,
}

impl SessionGuard<'_> {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.lock();
        state.active = state.active.saturating_sub(1);
        debug!("session guard released ({} active)", state.active);
    }
}

impl SessionManager {
    pub fn new(lifetime_seconds: u64) -> Self {
        SessionManager { lifetime: Duration::from_secs(lifetime_seconds),
                         state: Mutex::new(SessionState { session_id: None,
                                                          acquired_at: None,
                                                          logins: 0,
                                                          active: 0 }) }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session lock poisoned")
    }

    /// Adquiere la sesión vigente, refrescándola si venció. Las llamadas
    /// concurrentes reutilizan la misma sesión viva.
    pub fn acquire(&self) -> SessionGuard<'_> {
        let mut state = self.lock();

        let expired = match state.acquired_at {
            Some(acquired_at) => acquired_at.elapsed() >= self.lifetime,
            None => true,
        };

        if expired || state.session_id.is_none() {
            state.logins += 1;
            let session_id = format!("SESSION-ID#{}", state.logins);
            info!("provider session refreshed: {session_id}");
            state.session_id = Some(session_id);
            state.acquired_at = Some(Instant::now());
        }

        state.active += 1;
        let session_id = state.session_id.clone().unwrap_or_default();
        SessionGuard { manager: self, session_id }
    }

    /// Ejecuta `f` dentro de una sesión adquirida; la liberación está
    /// garantizada aunque `f` entre en pánico.
    pub fn with_session<T>(&self, f: impl FnOnce(&str) -> T) -> T {
        let guard = self.acquire();
        f(guard.session_id())
    }

    /// Cantidad de logins realizados hasta ahora.
    pub fn login_count(&self) -> u64 {
        self.lock().logins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_session_is_reused_across_calls() {
        let manager = SessionManager::new(300);
        let first = manager.with_session(|id| id.to_string());
        let second = manager.with_session(|id| id.to_string());
        assert_eq!(first, second);
        assert_eq!(manager.login_count(), 1);
    }

    #[test]
    fn expired_session_is_refreshed() {
        // Vida útil cero: cada adquisición refresca.
        let manager = SessionManager::new(0);
        let first = manager.with_session(|id| id.to_string());
        let second = manager.with_session(|id| id.to_string());
        assert_ne!(first, second);
        assert_eq!(manager.login_count(), 2);
    }

    #[test]
    fn concurrent_guards_share_one_session() {
        let manager = SessionManager::new(300);
        let a = manager.acquire();
        let b = manager.acquire();
        assert_eq!(a.session_id(), b.session_id());
        drop(a);
        drop(b);
        assert_eq!(manager.login_count(), 1);
    }
}
