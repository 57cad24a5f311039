//! Implementación Postgres (Diesel) de `RecordStore`.
//!
//! - Una sesión = una conexión del pool; cada operación corre en su propia
//!   transacción read-write.
//! - `apply` hace `SELECT ... FOR UPDATE`, aplica la misma función de
//!   transición que el store in-memory y escribe la fila completa, así ambos
//!   backends aceptan y rechazan exactamente las mismas transiciones.
//! - `create` reemplaza un registro terminal y rechaza uno en vuelo dentro
//!   de la misma transacción; la restricción UNIQUE de identidad cubre la
//!   carrera entre dos creadores.
//! - Errores transitorios (pool, serialización) se reintentan con backoff.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use img_core::lifecycle;
use img_core::{AnalysisRequest, JobError, JobIdentity, JobStatus, OperationKind, RecordFilter, RecordPage,
               RecordSession, RecordStats, RecordStore, ResultRecord, ResultSummary, Transition};
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::analysis_results;

/// Pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones (pool real o doble de test).
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila de `analysis_results`.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = analysis_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct ResultRow {
    pub id: Uuid,
    pub dataset_id: i64,
    pub image_id: i64,
    pub operation_kind: String,
    pub operation_key: String,
    pub parameters: Value,
    pub params_hash: String,
    pub status: String,
    pub stage: Option<String>,
    pub result_summary: Option<Value>,
    pub artifact_refs: Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn corrupt(id: Uuid, what: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::CorruptRow(format!("analysis_results {id}: {what}"))
}

impl ResultRow {
    pub fn from_record(record: &ResultRecord) -> Result<Self, PersistenceError> {
        let parts = record.to_parts();
        let ser = |e: serde_json::Error| PersistenceError::Unknown(format!("ser: {e}"));
        Ok(Self { id: parts.id,
                  dataset_id: parts.identity.dataset_id,
                  image_id: parts.identity.image_id,
                  operation_kind: parts.identity.operation.as_str().to_string(),
                  operation_key: parts.identity.operation_key,
                  parameters: serde_json::to_value(&parts.parameters).map_err(ser)?,
                  params_hash: parts.params_hash,
                  status: parts.status.as_str().to_string(),
                  stage: parts.stage,
                  result_summary: parts.result_summary
                                       .as_ref()
                                       .map(serde_json::to_value)
                                       .transpose()
                                       .map_err(ser)?,
                  artifact_refs: serde_json::to_value(&parts.artifact_refs).map_err(ser)?,
                  error_message: parts.error_message,
                  created_at: parts.created_at,
                  started_at: parts.started_at,
                  completed_at: parts.completed_at })
    }

    pub fn into_record(self) -> Result<ResultRecord, PersistenceError> {
        let id = self.id;
        let operation = OperationKind::parse(&self.operation_kind).ok_or_else(|| {
                            corrupt(id, format!("unknown operation '{}'", self.operation_kind))
                        })?;
        let identity = JobIdentity::new(self.dataset_id, self.image_id, operation, self.operation_key)
            .map_err(|e| corrupt(id, e))?;
        let status = JobStatus::parse(&self.status).ok_or_else(|| corrupt(id, format!("unknown status '{}'", self.status)))?;
        let parameters: AnalysisRequest = serde_json::from_value(self.parameters).map_err(|e| corrupt(id, e))?;
        let result_summary: Option<ResultSummary> = self.result_summary
                                                        .map(serde_json::from_value)
                                                        .transpose()
                                                        .map_err(|e| corrupt(id, e))?;
        let artifact_refs: Vec<String> = serde_json::from_value(self.artifact_refs).map_err(|e| corrupt(id, e))?;
        let parts = img_core::model::RecordParts { id,
                                                   identity,
                                                   parameters,
                                                   params_hash: self.params_hash,
                                                   status,
                                                   stage: self.stage,
                                                   result_summary,
                                                   artifact_refs,
                                                   error_message: self.error_message,
                                                   created_at: self.created_at,
                                                   started_at: self.started_at,
                                                   completed_at: self.completed_at };
        ResultRecord::from_parts(parts).map_err(|e| corrupt(id, e))
    }
}

/// Determina si un error es transitorio (conviene reintentar).
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Reintento con backoff lineal corto (hasta 3 reintentos: 15, 30, 45 ms).
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

pub struct PgRecordStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgRecordStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl PgRecordStore<PoolProvider> {
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(PoolProvider { pool })
    }
}

impl<P: ConnectionProvider> RecordStore for PgRecordStore<P> {
    fn session(&self) -> Result<Box<dyn RecordSession + '_>, JobError> {
        let conn = with_retry(|| self.provider.connection())?;
        Ok(Box::new(PgRecordSession { conn }))
    }
}

struct PgRecordSession {
    conn: PgPooledConnection,
}

fn find_by_identity_row(conn: &mut PgConnection, identity: &JobIdentity) -> Result<Option<ResultRow>, PersistenceError> {
    use crate::schema::analysis_results::dsl::*;
    Ok(analysis_results.filter(dataset_id.eq(identity.dataset_id))
                       .filter(image_id.eq(identity.image_id))
                       .filter(operation_kind.eq(identity.operation.as_str()))
                       .filter(operation_key.eq(&identity.operation_key))
                       .select(ResultRow::as_select())
                       .first(conn)
                       .optional()?)
}

fn not_found(id: Uuid) -> impl Fn(PersistenceError) -> JobError {
    move |e| match e {
        PersistenceError::NotFound => JobError::NotFound(format!("result {id}")),
        other => other.into(),
    }
}

impl RecordSession for PgRecordSession {
    fn create(&mut self, identity: JobIdentity, parameters: AnalysisRequest) -> Result<ResultRecord, JobError> {
        let record = ResultRecord::queued(identity, parameters, Utc::now())?;
        let row = ResultRow::from_record(&record)?;
        let conn = &mut self.conn;
        let created = with_retry(|| {
            conn.build_transaction().read_write().run(|tx| {
                let existing: Option<ResultRow> =
                    analysis_results::table.filter(analysis_results::dataset_id.eq(row.dataset_id))
                                           .filter(analysis_results::image_id.eq(row.image_id))
                                           .filter(analysis_results::operation_kind.eq(&row.operation_kind))
                                           .filter(analysis_results::operation_key.eq(&row.operation_key))
                                           .select(ResultRow::as_select())
                                           .for_update()
                                           .first(tx)
                                           .optional()?;
                if let Some(existing) = existing {
                    let terminal = JobStatus::parse(&existing.status).is_some_and(|s| s.is_terminal());
                    if !terminal {
                        return Err(PersistenceError::Domain(JobError::AlreadyInFlight { result_id: existing.id }));
                    }
                    debug!("superseding terminal result old={} new={}", existing.id, row.id);
                    diesel::delete(analysis_results::table.find(existing.id)).execute(tx)?;
                }
                diesel::insert_into(analysis_results::table).values(&row).execute(tx)?;
                Ok(())
            })
        });
        match created {
            Ok(()) => Ok(record),
            Err(PersistenceError::UniqueViolation(_)) => {
                let winner = find_by_identity_row(&mut self.conn, &record.identity)?;
                Err(JobError::AlreadyInFlight { result_id: winner.map(|r| r.id).unwrap_or_else(Uuid::nil) })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&mut self, id: Uuid) -> Result<ResultRecord, JobError> {
        let conn = &mut self.conn;
        let row = with_retry(|| {
                      Ok(analysis_results::table.find(id)
                                                .select(ResultRow::as_select())
                                                .first(&mut **conn)?)
                  }).map_err(not_found(id))?;
        Ok(row.into_record()?)
    }

    fn find_by_identity(&mut self, identity: &JobIdentity) -> Result<Option<ResultRecord>, JobError> {
        let conn = &mut self.conn;
        let row = with_retry(|| find_by_identity_row(&mut **conn, identity))?;
        Ok(row.map(ResultRow::into_record).transpose()?)
    }

    fn apply(&mut self, id: Uuid, transition: Transition) -> Result<ResultRecord, JobError> {
        let conn = &mut self.conn;
        with_retry(|| {
            conn.build_transaction().read_write().run(|tx| {
                let row: ResultRow = analysis_results::table.find(id)
                                                            .select(ResultRow::as_select())
                                                            .for_update()
                                                            .first(tx)?;
                let mut record = row.into_record()?;
                lifecycle::apply(&mut record, transition.clone(), Utc::now())?;
                let updated = ResultRow::from_record(&record)?;
                diesel::update(analysis_results::table.find(id)).set(&updated).execute(tx)?;
                Ok(record)
            })
        }).map_err(not_found(id))
    }

    fn list(&mut self, filter: &RecordFilter) -> Result<RecordPage, JobError> {
        let conn = &mut self.conn;
        let (total, rows) = with_retry(|| {
            let mut count_q = analysis_results::table.into_boxed();
            let mut page_q = analysis_results::table.into_boxed();
            if let Some(status) = filter.status {
                count_q = count_q.filter(analysis_results::status.eq(status.as_str()));
                page_q = page_q.filter(analysis_results::status.eq(status.as_str()));
            }
            if let Some(dataset) = filter.dataset_id {
                count_q = count_q.filter(analysis_results::dataset_id.eq(dataset));
                page_q = page_q.filter(analysis_results::dataset_id.eq(dataset));
            }
            let total: i64 = count_q.count().get_result(&mut **conn)?;
            let rows: Vec<ResultRow> = page_q.order((analysis_results::created_at.desc(), analysis_results::id.asc()))
                                             .offset(filter.offset as i64)
                                             .limit(filter.effective_limit() as i64)
                                             .select(ResultRow::as_select())
                                             .load(&mut **conn)?;
            Ok((total, rows))
        })?;
        let records = rows.into_iter().map(ResultRow::into_record).collect::<Result<Vec<_>, _>>()?;
        Ok(RecordPage { records,
                        total: total.max(0) as u64 })
    }

    fn stats(&mut self) -> Result<RecordStats, JobError> {
        let conn = &mut self.conn;
        let counts: Vec<(String, i64)> = with_retry(|| {
            Ok(analysis_results::table.group_by(analysis_results::status)
                                      .select((analysis_results::status, diesel::dsl::count_star()))
                                      .load(&mut **conn)?)
        })?;
        let mut stats = RecordStats::default();
        for (status, count) in counts {
            match JobStatus::parse(&status) {
                Some(s) => stats.add(s, count.max(0) as u64),
                None => warn!("unknown status in analysis_results status={} count={}", status, count),
            }
        }
        Ok(stats)
    }
}

/// Construye un pool y corre las migraciones pendientes una vez.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let max = max_size.max(1);
    let min = min_size.max(1).min(max);
    if min_size > max_size {
        warn!("min_size > max_size ({} > {}), using min=max", min_size, max_size);
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(min))
                                    .max_size(max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}
