//! Registro de identidades en vuelo dentro del proceso.
//!
//! Complementa la regla del repositorio (no hay dos registros no terminales
//! por identidad) cerrando la ventana entre la validación y el `create`.
//! La tarea libera el claim justo antes de escribir su estado terminal. Cada
//! entrada guarda además el asa de cancelación de la tarea que la posee.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::JobError;
use crate::executor::TaskCanceller;
use crate::model::JobIdentity;

#[derive(Debug, Clone)]
pub(crate) struct ClaimSlot {
    token: Uuid,
    result_id: Uuid,
    canceller: Option<TaskCanceller>,
}

pub(crate) type InFlight = Arc<DashMap<JobIdentity, ClaimSlot>>;

pub(crate) struct InFlightClaim {
    map: InFlight,
    identity: JobIdentity,
    token: Uuid,
}

impl InFlightClaim {
    pub(crate) fn acquire(map: &InFlight, identity: JobIdentity) -> Result<Self, JobError> {
        match map.entry(identity.clone()) {
            Entry::Occupied(o) => Err(JobError::AlreadyInFlight { result_id: o.get().result_id }),
            Entry::Vacant(v) => {
                let token = Uuid::new_v4();
                v.insert(ClaimSlot { token,
                                     result_id: Uuid::nil(),
                                     canceller: None });
                Ok(Self { map: map.clone(),
                          identity,
                          token })
            }
        }
    }

    /// Asocia el `result_id` ya creado, para informar a duplicados.
    pub(crate) fn bind(&self, result_id: Uuid) {
        if let Some(mut slot) = self.map.get_mut(&self.identity) {
            if slot.token == self.token {
                slot.result_id = result_id;
            }
        }
    }

    /// Guarda el asa de cancelación de la tarea, antes de entregarla al
    /// ejecutor.
    pub(crate) fn attach(&self, canceller: TaskCanceller) {
        if let Some(mut slot) = self.map.get_mut(&self.identity) {
            if slot.token == self.token {
                slot.canceller = Some(canceller);
            }
        }
    }

    /// Suelta la entrada si sigue siendo nuestra. Idempotente.
    pub(crate) fn release(&self) {
        self.map.remove_if(&self.identity, |_, slot| slot.token == self.token);
    }
}

/// Asa de cancelación de la tarea que posee `result_id`, si sigue en vuelo.
pub(crate) fn canceller_for(map: &InFlight, identity: &JobIdentity, result_id: Uuid) -> Option<TaskCanceller> {
    map.get(identity)
       .filter(|slot| slot.result_id == result_id)
       .and_then(|slot| slot.canceller.clone())
}

/// Suelta la entrada de `result_id` sin el claim en mano. La usa quien
/// recupera una tarea que el ejecutor rechazó: el asa de cancelación guardada
/// mantiene viva la tarea y con ella su claim.
pub(crate) fn forget(map: &InFlight, identity: &JobIdentity, result_id: Uuid) {
    map.remove_if(identity, |_, slot| slot.result_id == result_id);
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.release();
    }
}
