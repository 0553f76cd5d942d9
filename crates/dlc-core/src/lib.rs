//! dlc-core: Motor del ciclo de vida de solicitudes DLC
//!
//! Propósito:
//! - Proveer los contratos neutrales del motor de overrides de control de
//!   carga: el journal del tracker, la validación, la resolución de
//!   contigüidad y el armado de unidades de despacho.
//! - Mantener la lógica pura separada de la orquestación asíncrona: este
//!   crate no conoce colas, workflows ni transportes; sólo los contratos
//!   que esos componentes consumen.
//!
//! Componentes principales:
//! - `tracker`: modelo del journal (header + registros de etapa), trait
//!   `TrackerStore` (backend en memoria aquí, Postgres en
//!   `dlc-persistence`) y sus rutas de acceso secundarias.
//! - `validate`: validación sintáctica y temporal de solicitudes
//!   (duplicados / solapamientos / contiguos).
//! - `contiguity`: búsqueda del vecino contiguo ya desplegado y su
//!   clasificación (extensión o creación con backoff).
//! - `dispatch`: agrupación por `(group, status, ventana)`, partición por
//!   clase de contigüidad y troceo acotado de unidades de despacho.
//! - `event`: payload de hitos para el stream externo y trait `EventSink`.
//! - `provider`: trait `PolicyProvider` (fachada del head-end) y la
//!   convención de nombres de políticas.
//! - `errors` / `constants` / `settings`: errores semánticos del motor y
//!   los parámetros configurables con sus defaults.
//!
//! Re-exports: se exponen símbolos clave para facilitar el uso desde
//! binarios/tests.

pub mod constants;
pub mod contiguity;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod provider;
pub mod settings;
pub mod tracker;
pub mod validate;

// Re-exports públicos principales
pub use contiguity::{classify_neighbour, find_contiguous_neighbour, terminal_start, PolicyClass};
pub use dispatch::{chunk_members, chunk_unit, group_requests, split_bucket, DispatchMember, DispatchUnit, GroupBucket,
                   QueuedOverride};
pub use errors::CoreError;
pub use event::{EventSink, InMemoryEventSink, MeterEventPayload};
pub use provider::{build_policy_name, PolicyProvider, PolicyReply};
pub use settings::EngineSettings;
pub use tracker::{EndFilter, HeaderPatch, InMemoryTrackerStore, NewRequest, RequestHeader, StageFilter, StageRecord,
                  TrackerStore};
pub use validate::{RequestValidator, ValidationError};
