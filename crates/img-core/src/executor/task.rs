//! Tarea, contexto y token de liquidación.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::error;
use parking_lot::Mutex;

pub type TaskId = u64;

type Work = Box<dyn FnOnce(&TaskContext) + Send + 'static>;
type FaultHandler = Box<dyn FnOnce(TaskFault) + Send + 'static>;

/// Motivo por el que el ejecutor invoca la continuación de fallo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFault {
    Panicked(String),
    TimedOut(Duration),
    Cancelled(String),
    /// El trabajo retornó sin reclamar la liquidación.
    Unsettled,
}

impl fmt::Display for TaskFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFault::Panicked(msg) => write!(f, "task panicked: {msg}"),
            TaskFault::TimedOut(limit) => write!(f, "task exceeded its maximum duration of {}ms", limit.as_millis()),
            TaskFault::Cancelled(reason) => write!(f, "task cancelled: {reason}"),
            TaskFault::Unsettled => f.write_str("task finished without reporting an outcome"),
        }
    }
}

/// Una unidad de trabajo con su continuación de fallo.
pub struct Task {
    pub(crate) name: String,
    pub(crate) work: Work,
    pub(crate) settlement: Arc<Settlement>,
}

impl Task {
    pub fn new<W, F>(name: impl Into<String>, work: W, on_fault: F) -> Self
        where W: FnOnce(&TaskContext) + Send + 'static,
              F: FnOnce(TaskFault) + Send + 'static
    {
        Self { name: name.into(),
               work: Box::new(work),
               settlement: Arc::new(Settlement::new(Box::new(on_fault))) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asa para cancelar la tarea desde fuera, válida antes y después de
    /// `submit`.
    pub fn canceller(&self) -> TaskCanceller {
        TaskCanceller { settlement: self.settlement.clone() }
    }
}

/// Cancela una tarea concreta, esté en cola o corriendo.
#[derive(Clone)]
pub struct TaskCanceller {
    settlement: Arc<Settlement>,
}

impl TaskCanceller {
    /// Liquida la tarea como `Cancelled` y dispara su continuación de fallo.
    /// `false` si ya estaba liquidada (terminó, expiró o el trabajo ya
    /// reclamó el resultado). Un trabajo en curso no se interrumpe: su
    /// resultado tardío se descarta.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.settlement.fault(TaskFault::Cancelled(reason.into()))
    }

    pub fn is_settled(&self) -> bool {
        !self.settlement.is_open()
    }
}

impl fmt::Debug for TaskCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCanceller").field("settled", &self.is_settled()).finish()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish_non_exhaustive()
    }
}

const OPEN: u8 = 0;
const BY_WORK: u8 = 1;
const BY_EXECUTOR: u8 = 2;

/// Token compartido entre el trabajo, el worker, el watchdog y el shutdown.
/// Sólo quien lo reclama escribe el estado terminal de la tarea.
pub(crate) struct Settlement {
    state: AtomicU8,
    on_fault: Mutex<Option<FaultHandler>>,
}

impl Settlement {
    pub(crate) fn new(on_fault: FaultHandler) -> Self {
        Self { state: AtomicU8::new(OPEN),
               on_fault: Mutex::new(Some(on_fault)) }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    fn claim_for_work(&self) -> bool {
        match self.state.compare_exchange(OPEN, BY_WORK, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(current) => current == BY_WORK,
        }
    }

    /// Watchdog, shutdown o worker (tras un retorno sin liquidar) reclaman
    /// la tarea y disparan la continuación. `false` si alguien se adelantó.
    pub(crate) fn fault(&self, fault: TaskFault) -> bool {
        if self.state.compare_exchange(OPEN, BY_EXECUTOR, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }
        self.fire(fault);
        true
    }

    /// Tras un pánico: si el trabajo ya había reclamado la tarea se dispara
    /// igualmente, porque pudo morir antes de escribir el estado terminal.
    pub(crate) fn fault_after_panic(&self, fault: TaskFault) -> bool {
        match self.state.compare_exchange(OPEN, BY_EXECUTOR, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) | Err(BY_WORK) => {
                self.fire(fault);
                true
            }
            Err(_) => false,
        }
    }

    fn fire(&self, fault: TaskFault) {
        let handler = self.on_fault.lock().take();
        if let Some(handler) = handler {
            let description = fault.to_string();
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || handler(fault))).is_err() {
                error!("fault handler panicked fault=\"{}\"", description);
            }
        }
    }
}

/// Vista que recibe el trabajo mientras corre.
pub struct TaskContext {
    pub(crate) id: TaskId,
    pub(crate) settlement: Arc<Settlement>,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Reclama el derecho a escribir el resultado terminal. Repetible por el
    /// propio trabajo; devuelve `false` si el ejecutor ya la liquidó
    /// (timeout o cancelación) y el resultado debe descartarse.
    pub fn claim_settlement(&self) -> bool {
        self.settlement.claim_for_work()
    }

    /// `true` mientras nadie haya liquidado la tarea.
    pub fn is_open(&self) -> bool {
        self.settlement.is_open()
    }
}
