//! Lifecycle rules of a service order: which transitions exist and which
//! fields may be edited in each state.

use crate::{
    errors::ServiceError,
    models::{ServiceKind, ServiceOrderStatus},
};
use uuid::Uuid;

use ServiceOrderStatus::*;

/// Whether `from -> to` is in the transition table for this kind of service.
pub fn is_valid_transition(kind: ServiceKind, from: ServiceOrderStatus, to: ServiceOrderStatus) -> bool {
    match (from, to) {
        (Received, Diagnosing) => true,

        // Bench work for workshop and express jobs
        (Received | Diagnosing, InRepair) => {
            matches!(kind, ServiceKind::Workshop | ServiceKind::Express)
        }

        // On-site work
        (Received | Diagnosing, InHomeVisit) => kind == ServiceKind::HomeVisit,

        (Received | Diagnosing | InRepair | InHomeVisit, Repaired) => true,

        // Edit repair re-enters REPAIRED
        (Repaired, Repaired) => true,

        (Repaired, Delivered) => true,

        (from, Cancelled) => !from.is_terminal(),

        _ => false,
    }
}

/// Terminal check first, then the table.
pub fn ensure_transition(
    order_id: Uuid,
    kind: ServiceKind,
    from: ServiceOrderStatus,
    to: ServiceOrderStatus,
) -> Result<(), ServiceError> {
    if from.is_terminal() {
        return Err(ServiceError::AlreadyTerminal {
            order_id,
            status: from,
        });
    }
    if !is_valid_transition(kind, from, to) {
        return Err(ServiceError::InvalidTransition { from, to });
    }
    Ok(())
}

/// What may be edited in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    /// Everything, including equipment, client and service kind.
    Full,
    /// Cost fields, diagnosis, scheduling. Identity fields need an admin.
    CostsOnly,
    /// Only through the edit-repair flow, which reconciles parts.
    RepairOnly,
    Frozen,
}

impl EditScope {
    pub fn for_status(status: ServiceOrderStatus) -> Self {
        match status {
            Received => EditScope::Full,
            Diagnosing | InRepair | InHomeVisit => EditScope::CostsOnly,
            Repaired => EditScope::RepairOnly,
            Delivered | Cancelled => EditScope::Frozen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn workshop_path_to_delivery() {
        let k = ServiceKind::Workshop;
        assert!(is_valid_transition(k, Received, InRepair));
        assert!(is_valid_transition(k, InRepair, Repaired));
        assert!(is_valid_transition(k, Repaired, Delivered));
        assert!(!is_valid_transition(k, Received, InHomeVisit));
    }

    #[test]
    fn home_visits_do_not_go_to_the_bench() {
        let k = ServiceKind::HomeVisit;
        assert!(is_valid_transition(k, Received, InHomeVisit));
        assert!(is_valid_transition(k, Diagnosing, InHomeVisit));
        assert!(!is_valid_transition(k, Received, InRepair));
        assert!(is_valid_transition(k, InHomeVisit, Repaired));
    }

    #[test]
    fn delivery_requires_repair_first() {
        for from in [Received, Diagnosing, InRepair, InHomeVisit] {
            assert!(!is_valid_transition(ServiceKind::Express, from, Delivered));
        }
    }

    #[test]
    fn cancellation_is_open_until_terminal() {
        for from in [Received, Diagnosing, InRepair, InHomeVisit, Repaired] {
            assert!(is_valid_transition(ServiceKind::Workshop, from, Cancelled));
        }
        assert!(!is_valid_transition(ServiceKind::Workshop, Delivered, Cancelled));
        assert!(!is_valid_transition(ServiceKind::Workshop, Cancelled, Cancelled));
    }

    #[test]
    fn terminal_states_report_already_terminal() {
        let id = Uuid::new_v4();
        assert_matches!(
            ensure_transition(id, ServiceKind::Workshop, Cancelled, Delivered),
            Err(ServiceError::AlreadyTerminal { status: Cancelled, .. })
        );
        assert_matches!(
            ensure_transition(id, ServiceKind::Workshop, Received, Delivered),
            Err(ServiceError::InvalidTransition {
                from: Received,
                to: Delivered
            })
        );
    }

    #[test]
    fn edit_scope_by_state() {
        assert_eq!(EditScope::for_status(Received), EditScope::Full);
        assert_eq!(EditScope::for_status(InHomeVisit), EditScope::CostsOnly);
        assert_eq!(EditScope::for_status(Repaired), EditScope::RepairOnly);
        assert_eq!(EditScope::for_status(Delivered), EditScope::Frozen);
    }
}
