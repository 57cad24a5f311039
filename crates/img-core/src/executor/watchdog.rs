//! Vigila la duración de las tareas en curso.
//!
//! Una tarea vencida se liquida como `TimedOut`; su hilo sigue ocupado
//! hasta que el cómputo retorne (no hay cancelación cooperativa), pero su
//! resultado se descarta.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use super::pool::Shared;
use super::task::TaskFault;

pub(crate) fn run(shared: Arc<Shared>, limit: Duration) {
    let tick = (limit / 4).clamp(Duration::from_millis(5), Duration::from_millis(250));
    loop {
        let expired = {
            let mut st = shared.state.lock();
            if st.stopped {
                return;
            }
            let now = Instant::now();
            let expired: Vec<_> = st.running
                                    .iter()
                                    .filter(|(_, r)| r.settlement.is_open() && now.duration_since(r.started_at) >= limit)
                                    .map(|(id, r)| (*id, r.name.clone(), r.settlement.clone()))
                                    .collect();
            if expired.is_empty() {
                shared.watchdog_wake.wait_for(&mut st, tick);
            }
            expired
        };
        for (id, name, settlement) in expired {
            if settlement.fault(TaskFault::TimedOut(limit)) {
                warn!("task timed out id={} name={} limit_ms={}", id, name, limit.as_millis());
                shared.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
