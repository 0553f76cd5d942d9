//! Implementación Postgres (Diesel) del `TrackerStore` del core.
//!
//! Objetivo general del módulo:
//! - Proveer una capa de persistencia durable (Postgres) con paridad 1:1
//!   respecto al backend en memoria.
//! - Serializar las mutaciones por correlation id: cada transición corre en
//!   una transacción con `SELECT ... FOR UPDATE` sobre el header y una
//!   escritura condicional por `stage_count` (optimismo defensivo: si la
//!   condición no matchea, el caller reintenta releyendo).
//! - Aislar completamente el mapeo journal ↔ filas de DB del `dlc-core`.
//!
//! Manejo básico de errores transitorios: reintento con backoff en
//! lecturas y escrituras (conflictos de serialización, IO de pool).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use serde_json::Value;

use dlc_core::{CoreError, EndFilter, HeaderPatch, NewRequest, RequestHeader, StageFilter, StageRecord, TrackerStore};
use dlc_domain::{Stage, SwitchDirection};
use log::{debug, warn};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{dlc_request_headers, dlc_request_stages};

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
///
/// Notas operativas:
/// - El pool se construye con `min_idle` y `max_size`.
/// - Al construirlo, se corre automáticamente el set de migraciones
///   pendientes (una sola vez).
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Este trait permite:
/// - Inyectar un pool real (producción/tests de integración).
/// - Simular/factorear en tests unitarios sin acoplar a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Obtiene una conexión lista para ejecutar consultas Diesel.
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un
/// `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila de la tabla `dlc_request_headers` (lectura e inserción).
#[derive(Queryable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = dlc_request_headers)]
pub struct HeaderRow {
    pub correlation_id: String,
    pub subscription_id: String,
    pub site: String,
    pub meter_serial: String,
    pub override_value: String,
    pub service: String,
    pub current_stage: String,
    pub stage_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub request_start: Option<DateTime<Utc>>,
    pub request_end: Option<DateTime<Utc>>,
    pub group_id: Option<String>,
    pub original_start: Option<DateTime<Utc>>,
    pub policy_id: Option<i64>,
    pub policy_name: Option<String>,
    pub head_end: Option<String>,
    pub extended_by: Option<String>,
    pub extends: Option<String>,
}

/// Fila para insertar en `dlc_request_stages`.
///
/// El registro completo viaja como JSONB en `snapshot`; las columnas
/// proyectadas existen para constraints y consultas puntuales.
#[derive(Insertable, Debug)]
#[diesel(table_name = dlc_request_stages)]
pub struct NewStageRow<'a> {
    pub correlation_id: &'a str,
    pub stage_number: i32,
    pub stage_name: &'a str,
    pub ts: DateTime<Utc>,
    pub message: Option<&'a str>,
    pub snapshot: &'a Value,
}

/// Fila mapeada de `dlc_request_stages` para lecturas.
#[derive(Queryable, Debug)]
pub struct StageRow {
    pub correlation_id: String,
    pub stage_number: i32,
    pub stage_name: String,
    pub ts: DateTime<Utc>,
    pub message: Option<String>,
    pub snapshot: Value,
}

fn header_to_row(header: &RequestHeader) -> HeaderRow {
    HeaderRow { correlation_id: header.correlation_id.clone(),
                subscription_id: header.subscription_id.clone(),
                site: header.site.clone(),
                meter_serial: header.meter_serial.clone(),
                override_value: header.override_value.as_str().to_string(),
                service: header.service.clone(),
                current_stage: header.current_stage.as_str().to_string(),
                stage_count: header.stage_count as i32,
                created_at: header.created_at,
                updated_at: header.updated_at,
                request_start: header.request_start,
                request_end: header.request_end,
                group_id: header.group_id.clone(),
                original_start: header.original_start,
                policy_id: header.policy_id,
                policy_name: header.policy_name.clone(),
                head_end: header.head_end.clone(),
                extended_by: header.extended_by.clone(),
                extends: header.extends.clone() }
}

fn header_from_row(row: HeaderRow) -> Result<RequestHeader, PersistenceError> {
    let current_stage = Stage::parse(&row.current_stage)
        .ok_or_else(|| PersistenceError::Unknown(format!("unknown stage '{}'", row.current_stage)))?;
    let override_value = SwitchDirection::parse(&row.override_value)
        .map_err(|_| PersistenceError::Unknown(format!("unknown override value '{}'", row.override_value)))?;

    Ok(RequestHeader { correlation_id: row.correlation_id,
                       subscription_id: row.subscription_id,
                       site: row.site,
                       meter_serial: row.meter_serial,
                       override_value,
                       service: row.service,
                       current_stage,
                       stage_count: row.stage_count as u32,
                       created_at: row.created_at,
                       updated_at: row.updated_at,
                       request_start: row.request_start,
                       request_end: row.request_end,
                       group_id: row.group_id,
                       original_start: row.original_start,
                       policy_id: row.policy_id,
                       policy_name: row.policy_name,
                       head_end: row.head_end,
                       extended_by: row.extended_by,
                       extends: row.extends })
}

/// Deserializa una `StageRow` al registro del core usando el JSON completo
/// almacenado en `snapshot`. Si el JSON no es válido devuelve `None`.
fn stage_from_row(row: StageRow) -> Option<StageRecord> {
    serde_json::from_value(row.snapshot).ok()
}

/// Determina si un error es transitorio (recomendado reintentar con
/// backoff).
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::StaleWrite => true,
        PersistenceError::TransientIo(_) => true,
        // Algunos mensajes de error (dependen de driver/pg) pueden llegar
        // como Unknown con texto. Best-effort string match sin acoplar a
        // SQLSTATE.
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff exponencial muy pequeño (hasta 3 intentos).
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms",
                      attempts + 1,
                      e,
                      delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Implementación Postgres del `TrackerStore`.
pub struct PgTrackerStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgTrackerStore<P> {
    /// Crea un `PgTrackerStore` a partir de un `ConnectionProvider`
    /// (generalmente `PoolProvider`).
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

/// Resultado interno de la transacción de update: separa los fallos de
/// dominio (no reintentables, p.ej. header terminal) de los de
/// persistencia.
type UpdateOutcome = Result<RequestHeader, CoreError>;

impl<P: ConnectionProvider> TrackerStore for PgTrackerStore<P> {
    fn create_header(&self, request: NewRequest, now: DateTime<Utc>) -> Result<RequestHeader, CoreError> {
        let correlation_id = request.correlation_id.clone();
        let header = request.into_header(now).map_err(|e| CoreError::Internal(e.to_string()))?;
        let row = header_to_row(&header);
        let first_stage = header.stage_snapshot(Stage::Received, now, None);
        let snapshot = serde_json::to_value(&first_stage)
            .map_err(|e| CoreError::Internal(format!("serialize stage snapshot: {e}")))?;

        debug!("create_header:start correlation_id={correlation_id}");
        let result = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx_conn| {
                    diesel::insert_into(dlc_request_headers::table).values(&row).execute(tx_conn)?;
                    diesel::insert_into(dlc_request_stages::table)
                        .values(NewStageRow { correlation_id: &correlation_id,
                                              stage_number: 1,
                                              stage_name: Stage::Received.as_str(),
                                              ts: now,
                                              message: None,
                                              snapshot: &snapshot })
                        .execute(tx_conn)?;
                    Ok::<(), diesel::result::Error>(())
                })
                .map_err(PersistenceError::from)
        });

        match result {
            Ok(()) => Ok(header),
            Err(PersistenceError::UniqueViolation(_)) => Err(CoreError::HeaderExists(correlation_id)),
            Err(e) => Err(e.into()),
        }
    }

    fn get_header(&self, correlation_id: &str) -> Result<Option<RequestHeader>, CoreError> {
        let row: Option<HeaderRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dlc_request_headers::table.find(correlation_id)
                                      .first(&mut conn)
                                      .optional()
                                      .map_err(PersistenceError::from)
        }).map_err(CoreError::from)?;

        row.map(header_from_row).transpose().map_err(CoreError::from)
    }

    fn stage_records(&self, correlation_id: &str) -> Result<Vec<StageRecord>, CoreError> {
        let rows: Vec<StageRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dlc_request_stages::table.filter(dlc_request_stages::correlation_id.eq(correlation_id))
                                     .order(dlc_request_stages::stage_number.asc())
                                     .load(&mut conn)
                                     .map_err(PersistenceError::from)
        }).map_err(CoreError::from)?;

        Ok(rows.into_iter().filter_map(stage_from_row).collect())
    }

    fn update_tracker(&self,
                      correlation_id: &str,
                      stage: Stage,
                      event_datetime: DateTime<Utc>,
                      message: Option<&str>,
                      patch: HeaderPatch)
                      -> Result<RequestHeader, CoreError> {
        debug!("update_tracker:start correlation_id={correlation_id} stage={stage}");

        let outcome: UpdateOutcome = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx_conn| {
                    let row: Option<HeaderRow> = dlc_request_headers::table.find(correlation_id)
                                                                           .for_update()
                                                                           .first(tx_conn)
                                                                           .optional()?;
                    let Some(row) = row else {
                        return Ok(Err(CoreError::HeaderNotFound(correlation_id.to_string())));
                    };

                    let old_stage_count = row.stage_count;
                    let mut header = match header_from_row(row) {
                        Ok(header) => header,
                        Err(e) => return Ok(Err(CoreError::Storage(e.to_string()))),
                    };

                    if header.current_stage.is_terminal() {
                        return Ok(Err(CoreError::TerminalStage { correlation_id: correlation_id.to_string(),
                                                                 stage: header.current_stage }));
                    }

                    header.advance(stage, event_datetime, &patch);
                    let record = header.stage_snapshot(stage, event_datetime, message);
                    let snapshot = match serde_json::to_value(&record) {
                        Ok(snapshot) => snapshot,
                        Err(e) => return Ok(Err(CoreError::Internal(format!("serialize stage snapshot: {e}")))),
                    };

                    // Escritura condicional por stage_count: con el FOR
                    // UPDATE no debería fallar, pero el contrato exige la
                    // condición igual.
                    let updated = diesel::update(
                        dlc_request_headers::table.find(correlation_id)
                                                  .filter(dlc_request_headers::stage_count.eq(old_stage_count)),
                    )
                    .set(header_to_row(&header))
                    .execute(tx_conn)?;
                    if updated == 0 {
                        return Err(diesel::result::Error::RollbackTransaction);
                    }

                    diesel::insert_into(dlc_request_stages::table)
                        .values(NewStageRow { correlation_id,
                                              stage_number: record.stage_number as i32,
                                              stage_name: record.stage_name.as_str(),
                                              ts: event_datetime,
                                              message: record.message.as_deref(),
                                              snapshot: &snapshot })
                        .execute(tx_conn)?;

                    Ok::<UpdateOutcome, diesel::result::Error>(Ok(header))
                })
                .map_err(|e: diesel::result::Error| match e {
                    diesel::result::Error::RollbackTransaction => PersistenceError::StaleWrite,
                    other => PersistenceError::from(other),
                })
        }).map_err(CoreError::from)?;

        outcome
    }

    fn query_site_meter(&self,
                        site: &str,
                        meter_serial: &str,
                        end: EndFilter,
                        stages: StageFilter<'_>)
                        -> Result<Vec<RequestHeader>, CoreError> {
        let rows: Vec<HeaderRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let mut query = dlc_request_headers::table.filter(dlc_request_headers::site.eq(site))
                                                      .filter(dlc_request_headers::meter_serial.eq(meter_serial))
                                                      .into_boxed();

            query = match end {
                EndFilter::Exactly(t0) => query.filter(dlc_request_headers::request_end.eq(t0)),
                EndFilter::AtLeast(t0) => query.filter(dlc_request_headers::request_end.ge(t0)),
            };

            match stages {
                StageFilter::Any => {}
                StageFilter::In(stages) => {
                    let names: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
                    query = query.filter(dlc_request_headers::current_stage.eq_any(names));
                }
                StageFilter::NotIn(stages) => {
                    let names: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
                    query = query.filter(diesel::dsl::not(dlc_request_headers::current_stage.eq_any(names)));
                }
            }

            query.order((dlc_request_headers::request_end.asc(), dlc_request_headers::correlation_id.asc()))
                 .load(&mut conn)
                 .map_err(PersistenceError::from)
        }).map_err(CoreError::from)?;

        rows.into_iter()
            .map(|row| header_from_row(row).map_err(CoreError::from))
            .collect()
    }

    fn query_by_site(&self, site: &str) -> Result<Vec<RequestHeader>, CoreError> {
        let rows: Vec<HeaderRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dlc_request_headers::table.filter(dlc_request_headers::site.eq(site))
                                      .order(dlc_request_headers::correlation_id.asc())
                                      .load(&mut conn)
                                      .map_err(PersistenceError::from)
        }).map_err(CoreError::from)?;

        rows.into_iter()
            .map(|row| header_from_row(row).map_err(CoreError::from))
            .collect()
    }

    fn query_by_subscription(&self, subscription_id: &str) -> Result<Vec<RequestHeader>, CoreError> {
        let rows: Vec<HeaderRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dlc_request_headers::table.filter(dlc_request_headers::subscription_id.eq(subscription_id))
                                      .order(dlc_request_headers::correlation_id.asc())
                                      .load(&mut conn)
                                      .map_err(PersistenceError::from)
        }).map_err(CoreError::from)?;

        rows.into_iter()
            .map(|row| header_from_row(row).map_err(CoreError::from))
            .collect()
    }

    fn find_by_policy(&self, head_end: &str, policy_id: i64) -> Result<Option<RequestHeader>, CoreError> {
        let row: Option<HeaderRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            dlc_request_headers::table.filter(dlc_request_headers::head_end.eq(head_end))
                                      .filter(dlc_request_headers::policy_id.eq(policy_id))
                                      .order(dlc_request_headers::correlation_id.asc())
                                      .first(&mut conn)
                                      .optional()
                                      .map_err(PersistenceError::from)
        }).map_err(CoreError::from)?;

        row.map(header_from_row).transpose().map_err(CoreError::from)
    }

    fn pending_in_group(&self, correlation_ids: &[String]) -> Result<Vec<String>, CoreError> {
        let rows: Vec<(String, String)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let ids: Vec<&str> = correlation_ids.iter().map(|s| s.as_str()).collect();
            dlc_request_headers::table.filter(dlc_request_headers::correlation_id.eq_any(ids))
                                      .select((dlc_request_headers::correlation_id, dlc_request_headers::current_stage))
                                      .load(&mut conn)
                                      .map_err(PersistenceError::from)
        }).map_err(CoreError::from)?;

        let known: std::collections::HashMap<String, String> = rows.into_iter().collect();
        Ok(correlation_ids.iter()
                          .filter(|id| match known.get(id.as_str()) {
                              Some(stage) => stage == Stage::Received.as_str(),
                              // Un header aún no visible cuenta como pendiente.
                              None => true,
                          })
                          .cloned()
                          .collect())
    }
}

/// Construye un pool Postgres r2d2 a partir de URL.
///
/// Comportamiento:
/// - Valida y ajusta tamaños (si `min_size > max_size`, usa `min_size =
///   max_size`).
/// - Ejecuta migraciones inmediatamente tras el primer `get()`.
/// - Devuelve `PersistenceError::TransientIo` ante errores del
///   pool/manager.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    // Ejecutar migraciones una sola vez al construir.
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración (DATABASE_URL,
/// tamaños) y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
