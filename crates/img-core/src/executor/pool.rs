//! `JobExecutor`: pool fijo de hilos con cola acotada.
//!
//! Admisión: una tarea entra si `en_cola + corriendo < pool_size +
//! queue_capacity`. Con la cola llena, `SubmitPolicy` decide entre rechazar
//! o esperar un hueco con timeout.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use super::config::{ExecutorConfig, SubmitPolicy};
use super::stats::{ExecutorStats, ShutdownReport};
use super::task::{Settlement, Task, TaskContext, TaskFault, TaskId};
use super::{watchdog, ExecutorError};

type Work = Box<dyn FnOnce(&TaskContext) + Send + 'static>;

pub(crate) struct Pending {
    id: TaskId,
    name: String,
    work: Work,
    settlement: Arc<Settlement>,
}

pub(crate) struct Running {
    pub(crate) name: String,
    pub(crate) started_at: Instant,
    pub(crate) settlement: Arc<Settlement>,
}

pub(crate) struct QueueState {
    queue: VecDeque<Pending>,
    pub(crate) running: HashMap<TaskId, Running>,
    accepting: bool,
    pub(crate) stopped: bool,
    live_workers: usize,
    next_id: TaskId,
}

#[derive(Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    finished: AtomicU64,
    panicked: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    cancelled: AtomicU64,
}

pub(crate) struct Shared {
    config: ExecutorConfig,
    pool_size: usize,
    pub(crate) state: Mutex<QueueState>,
    task_ready: Condvar,
    slot_free: Condvar,
    idle: Condvar,
    pub(crate) watchdog_wake: Condvar,
    pub(crate) counters: Counters,
}

pub struct JobExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl JobExecutor {
    /// Arranca los workers (y el watchdog si hay `max_task_duration`).
    pub fn start(config: ExecutorConfig) -> io::Result<Self> {
        let pool_size = config.effective_pool_size();
        let shared = Arc::new(Shared { pool_size,
                                       state: Mutex::new(QueueState { queue: VecDeque::new(),
                                                                      running: HashMap::new(),
                                                                      accepting: true,
                                                                      stopped: false,
                                                                      live_workers: 0,
                                                                      next_id: 1 }),
                                       task_ready: Condvar::new(),
                                       slot_free: Condvar::new(),
                                       idle: Condvar::new(),
                                       watchdog_wake: Condvar::new(),
                                       counters: Counters::default(),
                                       config });
        let executor = Self { shared: shared.clone(),
                              workers: Mutex::new(Vec::with_capacity(pool_size)),
                              watchdog: Mutex::new(None) };

        for i in 0..pool_size {
            let worker_shared = shared.clone();
            shared.state.lock().live_workers += 1;
            let spawned = thread::Builder::new().name(format!("{}-{}", shared.config.thread_name_prefix, i))
                                                .spawn(move || worker_loop(worker_shared));
            match spawned {
                Ok(handle) => executor.workers.lock().push(handle),
                Err(e) => {
                    shared.state.lock().live_workers -= 1;
                    error!("worker spawn failed index={} err={}", i, e);
                    executor.shutdown();
                    return Err(e);
                }
            }
        }

        if let Some(limit) = shared.config.max_task_duration {
            let wd_shared = shared.clone();
            let handle = thread::Builder::new().name(format!("{}-watchdog", shared.config.thread_name_prefix))
                                               .spawn(move || watchdog::run(wd_shared, limit));
            match handle {
                Ok(h) => *executor.watchdog.lock() = Some(h),
                Err(e) => {
                    executor.shutdown();
                    return Err(e);
                }
            }
        }

        info!("executor started pool_size={} queue_capacity={} policy={:?} max_task_duration={:?}",
              pool_size, shared.config.queue_capacity, shared.config.submit_policy, shared.config.max_task_duration);
        Ok(executor)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }

    /// Encola una tarea. Nunca ejecuta trabajo en el hilo llamador.
    pub fn submit(&self, task: Task) -> Result<TaskId, ExecutorError> {
        let Task { name, work, settlement } = task;
        let shared = &self.shared;
        let capacity = shared.pool_size + shared.config.queue_capacity;
        let policy = shared.config.submit_policy;
        let deadline = match policy {
            SubmitPolicy::Block { timeout } => Some(Instant::now() + timeout),
            SubmitPolicy::FailFast => None,
        };

        let mut st = shared.state.lock();
        loop {
            if !st.accepting {
                shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(ExecutorError::ShutDown);
            }
            if st.queue.len() + st.running.len() < capacity {
                break;
            }
            match (policy, deadline) {
                (SubmitPolicy::Block { timeout }, Some(deadline)) => {
                    let timed_out = shared.slot_free.wait_until(&mut st, deadline).timed_out();
                    if timed_out && st.accepting && st.queue.len() + st.running.len() >= capacity {
                        shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(ExecutorError::Timeout(timeout));
                    }
                }
                _ => {
                    shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(ExecutorError::QueueFull { capacity });
                }
            }
        }

        let id = st.next_id;
        st.next_id += 1;
        debug!("task queued id={} name={} queued={}", id, name, st.queue.len() + 1);
        st.queue.push_back(Pending { id,
                                     name,
                                     work,
                                     settlement });
        drop(st);
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        shared.task_ready.notify_one();
        Ok(id)
    }

    pub fn stats(&self) -> ExecutorStats {
        let st = self.shared.state.lock();
        let c = &self.shared.counters;
        ExecutorStats { pool_size: self.shared.pool_size,
                        queue_capacity: self.shared.config.queue_capacity,
                        queued: st.queue.len(),
                        running: st.running.len(),
                        accepting: st.accepting,
                        submitted: c.submitted.load(Ordering::Relaxed),
                        rejected: c.rejected.load(Ordering::Relaxed),
                        finished: c.finished.load(Ordering::Relaxed),
                        panicked: c.panicked.load(Ordering::Relaxed),
                        timed_out: c.timed_out.load(Ordering::Relaxed),
                        cancelled: c.cancelled.load(Ordering::Relaxed) }
    }

    /// Detiene la admisión, cancela lo que sigue en cola y espera a los
    /// workers hasta `shutdown_grace`. Las tareas que sigan corriendo al
    /// vencer el plazo se liquidan como canceladas y sus hilos se abandonan.
    pub fn shutdown(&self) -> ShutdownReport {
        let shared = &self.shared;
        let drained: Vec<Pending> = {
            let mut st = shared.state.lock();
            if !st.accepting {
                return ShutdownReport { already_shut_down: true,
                                        ..ShutdownReport::default() };
            }
            st.accepting = false;
            st.queue.drain(..).collect()
        };
        shared.task_ready.notify_all();
        shared.slot_free.notify_all();
        info!("executor shutting down cancelled_queued={} grace={:?}", drained.len(), shared.config.shutdown_grace);

        let mut report = ShutdownReport::default();
        for pending in drained {
            if pending.settlement.fault(TaskFault::Cancelled("executor shut down before the task started".into())) {
                shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                report.cancelled += 1;
            }
        }

        let deadline = Instant::now() + shared.config.shutdown_grace;
        let leftovers: Vec<(TaskId, String, Arc<Settlement>)> = {
            let mut st = shared.state.lock();
            while st.live_workers > 0 {
                if shared.idle.wait_until(&mut st, deadline).timed_out() {
                    break;
                }
            }
            st.stopped = true;
            st.running
              .iter()
              .map(|(id, r)| (*id, r.name.clone(), r.settlement.clone()))
              .collect()
        };
        shared.watchdog_wake.notify_all();

        for (id, name, settlement) in leftovers {
            if settlement.fault(TaskFault::Cancelled("shutdown grace period elapsed".into())) {
                warn!("task abandoned at shutdown id={} name={}", id, name);
                shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                report.abandoned += 1;
            }
        }

        if let Some(handle) = self.watchdog.lock().take() {
            if handle.join().is_err() {
                error!("watchdog thread panicked");
            }
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        info!("executor stopped cancelled={} abandoned={}", report.cancelled, report.abandoned);
        report
    }
}

impl Drop for JobExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut st = shared.state.lock();
            loop {
                if let Some(pending) = st.queue.pop_front() {
                    st.running.insert(pending.id,
                                      Running { name: pending.name.clone(),
                                                started_at: Instant::now(),
                                                settlement: pending.settlement.clone() });
                    break Some(pending);
                }
                if !st.accepting {
                    break None;
                }
                shared.task_ready.wait(&mut st);
            }
        };
        let Some(pending) = next else { break };
        let id = pending.id;
        run_pending(&shared, pending);
        shared.state.lock().running.remove(&id);
        shared.slot_free.notify_one();
    }
    shared.state.lock().live_workers -= 1;
    shared.idle.notify_all();
}

fn run_pending(shared: &Shared, pending: Pending) {
    let Pending { id, name, work, settlement } = pending;
    if !settlement.is_open() {
        debug!("task skipped id={} name={} reason=cancelled_while_queued", id, name);
        shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let ctx = TaskContext { id,
                            settlement: settlement.clone() };
    let started = Instant::now();
    debug!("task started id={} name={}", id, name);
    match panic::catch_unwind(AssertUnwindSafe(move || work(&ctx))) {
        Ok(()) => {
            if settlement.fault(TaskFault::Unsettled) {
                warn!("task returned without settling id={} name={}", id, name);
            }
            shared.counters.finished.fetch_add(1, Ordering::Relaxed);
            debug!("task finished id={} name={} elapsed_ms={}", id, name, started.elapsed().as_millis());
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!("task panicked id={} name={} msg=\"{}\"", id, name, msg);
            shared.counters.panicked.fetch_add(1, Ordering::Relaxed);
            settlement.fault_after_panic(TaskFault::Panicked(msg));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
