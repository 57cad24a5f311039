use std::time::Duration;

/// Hilos a usar si el sistema no informa su paralelismo.
const FALLBACK_PARALLELISM: usize = 4;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Comportamiento de `submit` con la cola llena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitPolicy {
    /// Rechaza en el acto.
    #[default]
    FailFast,
    /// Espera un hueco hasta `timeout`.
    Block { timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Workers; se acota a `1..=available_parallelism()`.
    pub pool_size: usize,
    /// Tareas que pueden esperar además de las que están corriendo.
    pub queue_capacity: usize,
    pub submit_policy: SubmitPolicy,
    pub shutdown_grace: Duration,
    /// Tiempo máximo por tarea; `None` desactiva el watchdog.
    pub max_task_duration: Option<Duration>,
    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { pool_size: available_parallelism(),
               queue_capacity: DEFAULT_QUEUE_CAPACITY,
               submit_policy: SubmitPolicy::default(),
               shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
               max_task_duration: None,
               thread_name_prefix: "imgflow-worker".to_string() }
    }
}

impl ExecutorConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_submit_policy(mut self, policy: SubmitPolicy) -> Self {
        self.submit_policy = policy;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_max_task_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_task_duration = limit;
        self
    }

    pub(crate) fn effective_pool_size(&self) -> usize {
        self.pool_size.clamp(1, available_parallelism().max(1))
    }
}

pub fn available_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(FALLBACK_PARALLELISM)
}
