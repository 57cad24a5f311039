//! Store in-memory de registros. Cada operación toma el lock una sola vez,
//! así `create` y `apply` son atómicos respecto a otras sesiones.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::errors::JobError;
use crate::lifecycle::{self, Transition};
use crate::model::{AnalysisRequest, JobIdentity, ResultRecord};
use crate::repo::{RecordFilter, RecordPage, RecordSession, RecordStats, RecordStore};

#[derive(Default)]
struct Tables {
    records: HashMap<Uuid, ResultRecord>,
    by_identity: HashMap<JobIdentity, Uuid>,
}

#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for InMemoryRecordStore {
    fn session(&self) -> Result<Box<dyn RecordSession + '_>, JobError> {
        Ok(Box::new(InMemorySession { tables: &self.tables }))
    }
}

struct InMemorySession<'a> {
    tables: &'a Mutex<Tables>,
}

fn not_found(id: Uuid) -> JobError {
    JobError::NotFound(format!("result {id}"))
}

impl RecordSession for InMemorySession<'_> {
    fn create(&mut self, identity: JobIdentity, parameters: AnalysisRequest) -> Result<ResultRecord, JobError> {
        let record = ResultRecord::queued(identity, parameters, Utc::now())?;
        let mut t = self.tables.lock();
        if let Some(existing_id) = t.by_identity.get(&record.identity).copied() {
            let in_flight = t.records.get(&existing_id).is_some_and(|r| !r.is_terminal());
            if in_flight {
                return Err(JobError::AlreadyInFlight { result_id: existing_id });
            }
            t.records.remove(&existing_id);
        }
        t.by_identity.insert(record.identity.clone(), record.id);
        t.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&mut self, id: Uuid) -> Result<ResultRecord, JobError> {
        self.tables.lock().records.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    fn find_by_identity(&mut self, identity: &JobIdentity) -> Result<Option<ResultRecord>, JobError> {
        let t = self.tables.lock();
        Ok(t.by_identity.get(identity).and_then(|id| t.records.get(id)).cloned())
    }

    fn apply(&mut self, id: Uuid, transition: Transition) -> Result<ResultRecord, JobError> {
        let mut t = self.tables.lock();
        let current = t.records.get(&id).ok_or_else(|| not_found(id))?;
        let mut next = current.clone();
        lifecycle::apply(&mut next, transition, Utc::now())?;
        t.records.insert(id, next.clone());
        Ok(next)
    }

    fn list(&mut self, filter: &RecordFilter) -> Result<RecordPage, JobError> {
        let t = self.tables.lock();
        let mut matching: Vec<&ResultRecord> = t.records.values().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        let total = matching.len() as u64;
        let records = matching.into_iter()
                              .skip(filter.offset)
                              .take(filter.effective_limit())
                              .cloned()
                              .collect();
        Ok(RecordPage { records, total })
    }

    fn stats(&mut self) -> Result<RecordStats, JobError> {
        let t = self.tables.lock();
        let mut stats = RecordStats::default();
        for r in t.records.values() {
            stats.add(r.status(), 1);
        }
        Ok(stats)
    }
}
