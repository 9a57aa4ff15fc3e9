//! Shipment lifecycle state machine
//!
//! Planned -> Assigned -> InTransit -> AtWarehouse -> Unloading -> Completed,
//! with Delayed and Cancelled reachable from any non-terminal state.
//!
//! Whether a move between two valid statuses is legal depends on the
//! [`TransitionPolicy`]. Under `Permissive` any status may follow any other;
//! `Strict` consults [`strict_targets`]. The side effects of a transition
//! (timestamp stamping, delay bookkeeping) are the same under both.
use chrono::Utc;

use crate::error::{Result, WorkflowError};
use crate::shipment::{Shipment, ShipmentStatus};
use crate::types::TimeStamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    #[default]
    Permissive,
    Strict,
}

/// What an applied transition changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ShipmentStatus,
    pub to: ShipmentStatus,
    pub stamped_departure: bool,
    pub stamped_arrival: bool,
}

/// Statuses reachable from `from` under the strict policy.
pub fn strict_targets(from: ShipmentStatus) -> &'static [ShipmentStatus] {
    use ShipmentStatus::*;

    match from {
        Planned => &[Assigned, Delayed, Cancelled],
        Assigned => &[InTransit, Delayed, Cancelled],
        InTransit => &[AtWarehouse, Delayed, Cancelled],
        AtWarehouse => &[Unloading, Delayed, Cancelled],
        Unloading => &[Completed, Delayed, Cancelled],
        Delayed => &[
            Assigned,
            InTransit,
            AtWarehouse,
            Unloading,
            Completed,
            Cancelled,
        ],
        Completed | Cancelled => &[],
    }
}

impl TransitionPolicy {
    pub fn permits(&self, from: ShipmentStatus, to: ShipmentStatus) -> bool {
        match self {
            TransitionPolicy::Permissive => true,
            TransitionPolicy::Strict => from == to || strict_targets(from).contains(&to),
        }
    }

    pub fn check(&self, from: ShipmentStatus, to: ShipmentStatus) -> Result<()> {
        if self.permits(from, to) {
            Ok(())
        } else {
            Err(WorkflowError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl std::str::FromStr for TransitionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(TransitionPolicy::Permissive),
            "strict" => Ok(TransitionPolicy::Strict),
            other => Err(anyhow::anyhow!("unknown transition policy '{other}'")),
        }
    }
}

/// Move `shipment` to `to`, applying the side effects of entering that status.
///
/// Entering InTransit stamps `actual_departure` and entering Completed stamps
/// `actual_arrival`, each only if still unset. Entering Delayed copies `notes`
/// into `delay_reason`.
pub fn advance(
    shipment: &mut Shipment,
    to: ShipmentStatus,
    notes: Option<&str>,
    now: TimeStamp<Utc>,
    policy: TransitionPolicy,
) -> Result<Transition> {
    let from = shipment.status;
    policy.check(from, to)?;

    let mut transition = Transition {
        from,
        to,
        stamped_departure: false,
        stamped_arrival: false,
    };

    match to {
        ShipmentStatus::InTransit if shipment.actual_departure.is_none() => {
            shipment.actual_departure = Some(now);
            transition.stamped_departure = true;
        }
        ShipmentStatus::Completed if shipment.actual_arrival.is_none() => {
            shipment.actual_arrival = Some(now);
            transition.stamped_arrival = true;
        }
        ShipmentStatus::Delayed => {
            shipment.delay_reason = notes.unwrap_or_default().to_string();
        }
        _ => {}
    }

    shipment.status = to;
    shipment.updated_at = now;

    Ok(transition)
}

/// Planned -> Assigned. Callers must have passed the assignment rules.
pub fn mark_assigned(
    shipment: &mut Shipment,
    vehicle_id: &str,
    driver_id: &str,
    assigned_by: &str,
    now: TimeStamp<Utc>,
    policy: TransitionPolicy,
) -> Result<Transition> {
    let transition = advance(shipment, ShipmentStatus::Assigned, None, now, policy)?;

    shipment.assigned_vehicle = Some(vehicle_id.to_string());
    shipment.assigned_driver = Some(driver_id.to_string());
    shipment.assigned_by = Some(assigned_by.to_string());

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shipment::Priority;
    use crate::types::Quantity;
    use chrono::Duration;

    fn planned() -> Shipment {
        let created = TimeStamp::new_with(2024, 1, 1, 0, 0, 0);
        Shipment {
            id: "ship_1".into(),
            cargo_type: "cargo_1".into(),
            weight: Quantity::from(2),
            volume: Quantity::from(10),
            description: String::new(),
            origin_warehouse: "wh_a".into(),
            destination_warehouse: "wh_b".into(),
            planned_departure: TimeStamp::new_with(2024, 1, 1, 8, 0, 0),
            planned_arrival: TimeStamp::new_with(2024, 1, 1, 18, 0, 0),
            actual_departure: None,
            actual_arrival: None,
            assigned_vehicle: None,
            assigned_driver: None,
            status: ShipmentStatus::Planned,
            priority: Priority::High,
            created_by: "user_1".into(),
            assigned_by: None,
            special_instructions: String::new(),
            delay_reason: String::new(),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn in_transit_stamps_departure_once() {
        let mut shipment = planned();
        let t1 = TimeStamp::new_with(2024, 1, 1, 8, 5, 0);
        let t2 = t1.plus(Duration::hours(1));

        let first = advance(
            &mut shipment,
            ShipmentStatus::InTransit,
            None,
            t1,
            TransitionPolicy::Permissive,
        )
        .unwrap();
        assert!(first.stamped_departure);
        assert_eq!(shipment.actual_departure, Some(t1));

        advance(
            &mut shipment,
            ShipmentStatus::Delayed,
            Some("traffic"),
            t2,
            TransitionPolicy::Permissive,
        )
        .unwrap();
        let again = advance(
            &mut shipment,
            ShipmentStatus::InTransit,
            None,
            t2,
            TransitionPolicy::Permissive,
        )
        .unwrap();
        assert!(!again.stamped_departure);
        assert_eq!(shipment.actual_departure, Some(t1));
    }

    #[test]
    fn completed_stamps_arrival_and_gives_duration() {
        let mut shipment = planned();
        let departed = TimeStamp::new_with(2024, 1, 1, 8, 0, 0);
        let arrived = TimeStamp::new_with(2024, 1, 1, 19, 30, 0);
        let policy = TransitionPolicy::Permissive;

        assert_eq!(shipment.duration(), None);
        advance(&mut shipment, ShipmentStatus::InTransit, None, departed, policy).unwrap();
        assert_eq!(shipment.duration(), None);
        advance(&mut shipment, ShipmentStatus::Completed, None, arrived, policy).unwrap();

        assert_eq!(shipment.actual_arrival, Some(arrived));
        assert_eq!(shipment.duration(), Some(Duration::minutes(11 * 60 + 30)));
        // arrived 19:30, planned 18:00
        assert!(shipment.is_delayed());
    }

    #[test]
    fn delayed_records_notes_verbatim_without_stamping() {
        let mut shipment = planned();
        let now = TimeStamp::new_with(2024, 1, 1, 9, 0, 0);

        advance(
            &mut shipment,
            ShipmentStatus::Delayed,
            Some("  road closed near Tver "),
            now,
            TransitionPolicy::Permissive,
        )
        .unwrap();

        assert_eq!(shipment.delay_reason, "  road closed near Tver ");
        assert_eq!(shipment.actual_departure, None);
        assert_eq!(shipment.actual_arrival, None);
        assert!(shipment.is_delayed());

        advance(
            &mut shipment,
            ShipmentStatus::Delayed,
            None,
            now,
            TransitionPolicy::Permissive,
        )
        .unwrap();
        assert_eq!(shipment.delay_reason, "");
    }

    #[test]
    fn permissive_allows_leaving_terminal_state() {
        let mut shipment = planned();
        let now = TimeStamp::new_with(2024, 1, 2, 0, 0, 0);
        let policy = TransitionPolicy::Permissive;

        advance(&mut shipment, ShipmentStatus::Completed, None, now, policy).unwrap();
        advance(&mut shipment, ShipmentStatus::Planned, None, now, policy).unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Planned);
        assert_eq!(shipment.actual_arrival, Some(now));
    }

    #[test]
    fn strict_rejects_out_of_table_moves() {
        let mut shipment = planned();
        let now = TimeStamp::new_with(2024, 1, 2, 0, 0, 0);
        let policy = TransitionPolicy::Strict;

        let err = advance(&mut shipment, ShipmentStatus::Completed, None, now, policy).unwrap_err();
        assert!(matches!(err, WorkflowError::IllegalTransition { .. }));
        // rejected transitions leave the record alone
        assert_eq!(shipment.status, ShipmentStatus::Planned);
        assert_eq!(shipment.actual_arrival, None);

        advance(&mut shipment, ShipmentStatus::Cancelled, None, now, policy).unwrap();
        for to in ShipmentStatus::ALL {
            if to != ShipmentStatus::Cancelled {
                assert!(!policy.permits(ShipmentStatus::Cancelled, to));
            }
        }
    }

    #[test]
    fn mark_assigned_sets_references() {
        let mut shipment = planned();
        let now = TimeStamp::new_with(2024, 1, 1, 7, 0, 0);

        mark_assigned(
            &mut shipment,
            "veh_1",
            "drv_1",
            "user_2",
            now,
            TransitionPolicy::Strict,
        )
        .unwrap();

        assert_eq!(shipment.status, ShipmentStatus::Assigned);
        assert_eq!(shipment.assigned_vehicle.as_deref(), Some("veh_1"));
        assert_eq!(shipment.assigned_driver.as_deref(), Some("drv_1"));
        assert_eq!(shipment.assigned_by.as_deref(), Some("user_2"));
    }
}
