//! dlc-persistence
//!
//! Objetivo: proveer la implementación Postgres (Diesel) del
//! `TrackerStore` del core, con paridad 1:1 respecto del backend en
//! memoria, más utilidades de conexión y migraciones.
//!
//! Módulos:
//! - `pg`: implementación sobre Postgres (headers + registros de etapa con
//!   escrituras condicionales).
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgTrackerStore, PoolProvider};
