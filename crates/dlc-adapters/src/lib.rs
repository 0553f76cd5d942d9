//! dlc-adapters: Capa de adaptación Dominio ↔ Core
//!
//! Este crate provee:
//! - Conversión de solicitudes del protocolo a los tipos del journal
//!   (`requests`).
//! - Armado de payloads de eventos a partir de headers del tracker
//!   (`events`).
//! - Un `PolicyProvider` en memoria con inyección de fallas para tests y
//!   demos, junto con el guard de sesión del proveedor (`providers`,
//!   `session`).
//!
//! Nota: el core sólo conoce los contratos (`TrackerStore`, `EventSink`,
//! `PolicyProvider`); acá viven las piezas que los conectan con el mundo.

pub mod events;
pub mod providers;
pub mod requests;
pub mod session;

pub use events::assemble_event_payload;
pub use providers::MockPolicyProvider;
pub use requests::{to_new_request, to_queued_override};
pub use session::SessionManager;
