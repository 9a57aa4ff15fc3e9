//! Property-based tests for the shipment lifecycle and fleet allocation
//!
//! The lifecycle rules are small but everything downstream (delivery stats,
//! delay reporting, history) trusts them, so they are checked over arbitrary
//! status sequences rather than a handful of hand-picked paths.

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;

use logistics_workflow::LogisticsService;
use logistics_workflow::fleet::plan_allocation;
use logistics_workflow::lifecycle::{TransitionPolicy, advance, strict_targets};
use logistics_workflow::shipment::{Priority, Shipment, ShipmentStatus};
use logistics_workflow::types::{Quantity, TimeStamp};
use logistics_workflow::vehicle::{NewVehicle, Vehicle, VehicleKind, VehicleStatus};
use logistics_workflow::warehouse::{NewWarehouse, Warehouse};

fn planned() -> Shipment {
    let departure = TimeStamp::new_with(2024, 1, 1, 8, 0, 0);
    Shipment {
        id: "ship_prop".into(),
        cargo_type: "cargo_prop".into(),
        weight: Quantity::from(1),
        volume: Quantity::from(1),
        description: String::new(),
        origin_warehouse: "wh_a".into(),
        destination_warehouse: "wh_b".into(),
        planned_departure: departure,
        planned_arrival: departure.plus(Duration::hours(8)),
        actual_departure: None,
        actual_arrival: None,
        assigned_vehicle: None,
        assigned_driver: None,
        status: ShipmentStatus::Planned,
        priority: Priority::Medium,
        created_by: "user_prop".into(),
        assigned_by: None,
        special_instructions: String::new(),
        delay_reason: String::new(),
        created_at: departure,
        updated_at: departure,
    }
}

fn status_strategy() -> impl Strategy<Value = ShipmentStatus> {
    prop::sample::select(ShipmentStatus::ALL.to_vec())
}

fn vehicle_status_strategy() -> impl Strategy<Value = VehicleStatus> {
    prop::sample::select(VehicleStatus::ALL.to_vec())
}

fn at(minutes: i64) -> TimeStamp<Utc> {
    TimeStamp::new_with(2024, 1, 1, 0, 0, 0).plus(Duration::minutes(minutes))
}

proptest! {
    /// Under the permissive policy any sequence applies, and the departure
    /// stamp is the time of the first InTransit, never overwritten.
    #[test]
    fn departure_stamp_is_first_wins(path in prop::collection::vec(status_strategy(), 1..30)) {
        let mut shipment = planned();
        let mut first_departure = None;

        for (step, status) in path.iter().enumerate() {
            let now = at(step as i64 * 15);
            advance(&mut shipment, *status, None, now, TransitionPolicy::Permissive).unwrap();
            if *status == ShipmentStatus::InTransit && first_departure.is_none() {
                first_departure = Some(now);
            }
            prop_assert_eq!(shipment.actual_departure, first_departure);
            prop_assert_eq!(shipment.status, *status);
        }
    }

    /// Same for arrival and Completed.
    #[test]
    fn arrival_stamp_is_first_wins(path in prop::collection::vec(status_strategy(), 1..30)) {
        let mut shipment = planned();
        let first_arrival = path
            .iter()
            .position(|status| *status == ShipmentStatus::Completed)
            .map(|step| at(step as i64 * 15));

        for (step, status) in path.iter().enumerate() {
            advance(&mut shipment, *status, None, at(step as i64 * 15), TransitionPolicy::Permissive)
                .unwrap();
        }
        prop_assert_eq!(shipment.actual_arrival, first_arrival);
    }

    /// duration is arrival minus departure when both stamps exist.
    #[test]
    fn duration_matches_stamps(depart_after in 0i64..10_000, travel in 1i64..10_000) {
        let mut shipment = planned();
        prop_assert_eq!(shipment.duration(), None);

        advance(&mut shipment, ShipmentStatus::InTransit, None, at(depart_after), TransitionPolicy::Permissive).unwrap();
        prop_assert_eq!(shipment.duration(), None);

        advance(&mut shipment, ShipmentStatus::Completed, None, at(depart_after + travel), TransitionPolicy::Permissive).unwrap();
        prop_assert_eq!(shipment.duration(), Some(Duration::minutes(travel)));
    }

    /// The strict policy accepts exactly the table (plus staying put), and a
    /// rejected move leaves the shipment untouched.
    #[test]
    fn strict_policy_follows_the_table(from in status_strategy(), to in status_strategy()) {
        let mut shipment = planned();
        shipment.status = from;
        let before = shipment.clone();

        let allowed = from == to || strict_targets(from).contains(&to);
        let result = advance(&mut shipment, to, Some("note"), at(1), TransitionPolicy::Strict);

        prop_assert_eq!(result.is_ok(), allowed);
        if !allowed {
            prop_assert_eq!(shipment, before);
        }
        if from.is_terminal() {
            prop_assert!(strict_targets(from).is_empty());
        }
    }

    /// Every plan entry targets an active warehouse whose projected load stays
    /// within capacity, and each available vehicle is proposed at most once.
    #[test]
    fn allocation_plan_respects_capacity(
        volumes in prop::collection::vec(1i64..200, 0..12),
        warehouses in prop::collection::vec((1i64..500, 0i64..100, any::<bool>()), 0..5),
    ) {
        let now = TimeStamp::new();
        let vehicles: Vec<Vehicle> = volumes
            .iter()
            .enumerate()
            .map(|(i, volume)| Vehicle {
                id: format!("veh_{i}"),
                license_plate: format!("P-{i}"),
                model: String::new(),
                kind: VehicleKind::Van,
                capacity: Quantity::from(1),
                volume: Quantity::from(*volume),
                status: VehicleStatus::Available,
                current_warehouse: None,
                year: 2021,
                vin: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .collect();
        let warehouses: Vec<Warehouse> = warehouses
            .iter()
            .enumerate()
            .map(|(i, (capacity, load_pct, active))| Warehouse {
                id: format!("wh_{i}"),
                name: format!("W{i}"),
                address: String::new(),
                capacity: Quantity::from(*capacity),
                current_load: Quantity::from(capacity * load_pct / 100),
                contact_person: None,
                is_active: *active,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let plan = plan_allocation(&vehicles, &warehouses);

        let mut seen = std::collections::HashSet::new();
        for proposal in &plan {
            prop_assert!(seen.insert(proposal.vehicle_id.clone()));
            let warehouse = warehouses.iter().find(|w| w.id == proposal.warehouse_id).unwrap();
            prop_assert!(warehouse.is_active);
            prop_assert!(proposal.projected_utilization <= 100.0);
        }
        for warehouse in &warehouses {
            let added: i64 = plan
                .iter()
                .filter(|p| p.warehouse_id == warehouse.id)
                .map(|p| volumes[p.vehicle_id["veh_".len()..].parse::<usize>().unwrap()])
                .sum();
            prop_assert!(warehouse.current_load.value() + rust_decimal::Decimal::from(added) <= warehouse.capacity.value());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// bulk allocation moves exactly the Available vehicles it was given.
    #[test]
    fn bulk_allocation_count(statuses in prop::collection::vec(vehicle_status_strategy(), 0..8)) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path()).unwrap());
        let service = LogisticsService::new(db).unwrap();
        let warehouse = service
            .create_warehouse(NewWarehouse::new("Depot", Quantity::from(100)))
            .unwrap();

        let mut ids = Vec::new();
        for (i, status) in statuses.iter().enumerate() {
            let vehicle = service
                .create_vehicle(NewVehicle::new(&format!("BULK-{i}"), VehicleKind::Truck, Quantity::from(5), Quantity::from(5)))
                .unwrap();
            service.change_vehicle_status(&vehicle.id, status.as_str()).unwrap();
            ids.push(vehicle.id);
        }

        let moved = service.bulk_allocate_vehicles(&ids, &warehouse.id).unwrap();
        let available = statuses.iter().filter(|s| **s == VehicleStatus::Available).count();
        prop_assert_eq!(moved, available);

        for (id, status) in ids.iter().zip(&statuses) {
            let stored = service.get::<Vehicle>(id).unwrap();
            if *status == VehicleStatus::Available {
                prop_assert_eq!(stored.status, VehicleStatus::InUse);
                prop_assert_eq!(stored.current_warehouse.as_deref(), Some(warehouse.id.as_str()));
            } else {
                prop_assert_eq!(stored.status, *status);
                prop_assert_eq!(stored.current_warehouse, None);
            }
        }
    }
}
