//! Armado de unidades de despacho.
//!
//! Pipeline puro del despachador (la parte con I/O de cola y rate limit
//! vive en el paquete raíz):
//! - `group_requests`: particiona el batch por `(group_id, status, start,
//!   end)`; las solicitudes sin grupo son unidades de a una.
//! - `split_bucket`: sondea la contigüidad de cada miembro y sub-particiona
//!   el bucket en clases `new` / `contiguousExtension` /
//!   `contiguousCreation`.
//! - `chunk_unit`: trocea cada unidad a lo sumo en `MAX_DISPATCH_COUNT`
//!   miembros, plegando la cola corta en el troceo anterior.

mod chunk;
mod group;
mod unit;

pub use chunk::{chunk_members, chunk_unit};
pub use group::{group_requests, split_bucket, GroupBucket};
pub use unit::{DispatchMember, DispatchUnit, QueuedOverride};
