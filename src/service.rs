//! Workflow operations over the entity store
//!
//! Every mutating operation is one sled transaction across the trees it
//! touches. Field validation runs first, outside the transaction. Anything
//! that depends on stored state is checked inside it, so two callers racing
//! for the same vehicle are serialized by the store and the loser sees the
//! winner's write.
use std::sync::Arc;

use chrono::Utc;
use sled::Transactional;
use sled::transaction::TransactionalTree;
use tracing::{debug, info, warn};

use crate::cargo::{CargoType, NewCargoType};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, WorkflowError};
use crate::fleet::{self, AllocationProposal, LinkChange};
use crate::lifecycle::{self, TransitionPolicy};
use crate::rules;
use crate::shipment::{Shipment, ShipmentDraft, ShipmentStatus, StatusEvent, check_schedule};
use crate::stats::{
    FleetRollup, FleetStats, ShipmentRollup, ShipmentStats, WarehouseRollup, WarehouseStats,
};
use crate::store::{
    EntityKind, Record, Store, TxResult, abort, driver_key, tx_add_ref, tx_append_event,
    tx_claim_unique, tx_drop_ref, tx_ensure_unreferenced, tx_exists, tx_find, tx_get,
    tx_get_string, tx_put, tx_release_unique, tx_remove, tx_try,
};
use crate::types::TimeStamp;
use crate::user::{NewUser, User};
use crate::utils::new_id;
use crate::vehicle::{Driver, NewDriver, NewVehicle, Vehicle, VehicleStatus};
use crate::warehouse::{NewWarehouse, Warehouse, check_load};

/// Knobs that change what the workflow accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowPolicy {
    pub transitions: TransitionPolicy,
    /// Reject `current_load > capacity` on warehouse creation as well as on
    /// explicit load updates.
    pub enforce_warehouse_capacity: bool,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            transitions: TransitionPolicy::Permissive,
            enforce_warehouse_capacity: true,
        }
    }
}

/// Result of linking a driver to a vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub driver: Driver,
    pub vehicle: Vehicle,
    pub change: LinkChange,
}

pub struct LogisticsService {
    store: Store,
    clock: Arc<dyn Clock>,
    policy: WorkflowPolicy,
}

fn logged<T>(operation: &'static str, body: impl FnOnce() -> Result<T>) -> Result<T> {
    body().inspect_err(|err| warn!(operation, error = %err, "operation rejected"))
}

/// Rewrite the records in `ids` that `clear` changes. Ids that vanished since
/// they were collected are ignored.
fn tx_clear<T: Record>(
    tree: &TransactionalTree,
    ids: &[String],
    clear: impl Fn(&mut T) -> bool,
) -> TxResult<usize> {
    let mut cleared = 0;
    for id in ids {
        if let Some(mut record) = tx_find::<T>(tree, id)? {
            if clear(&mut record) {
                tx_put(tree, &record)?;
                cleared += 1;
            }
        }
    }
    Ok(cleared)
}

impl LogisticsService {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            store: Store::open(instance)?,
            clock: Arc::new(SystemClock),
            policy: WorkflowPolicy::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn policy(&self) -> WorkflowPolicy {
        self.policy
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<T> {
        self.store.get(id)
    }

    /// Ids of stored records matching `predicate`, read outside any transaction.
    fn ids_where<T: Record>(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for record in self.store.scan::<T>() {
            let record = record?;
            if predicate(&record) {
                ids.push(record.id().to_string());
            }
        }
        Ok(ids)
    }

    fn collect_where<T: Record>(&self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for record in self.store.scan::<T>() {
            let record = record?;
            if predicate(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn now(&self) -> TimeStamp<Utc> {
        self.clock.now()
    }

    // ---------------------------------------------------------------- create

    pub fn create_user(&self, new: NewUser) -> Result<User> {
        logged("create_user", || {
            new.validate()?;
            let user = User {
                id: new_id(EntityKind::User)?,
                username: new.username.trim().to_string(),
                full_name: new.full_name.clone(),
                role: new.role,
                phone_number: new.phone_number.clone(),
                created_at: self.now(),
            };

            (&self.store.users, &self.store.unique).transaction(|(users, unique)| {
                tx_claim_unique(unique, "username", &user.username, &user.id)?;
                tx_put(users, &user)
            })?;

            info!(user = %user.id, role = %user.role, "user created");
            Ok(user)
        })
    }

    pub fn create_warehouse(&self, new: NewWarehouse) -> Result<Warehouse> {
        logged("create_warehouse", || {
            new.validate(self.policy.enforce_warehouse_capacity)?;
            let now = self.now();
            let warehouse = Warehouse {
                id: new_id(EntityKind::Warehouse)?,
                name: new.name.clone(),
                address: new.address.clone(),
                capacity: new.capacity,
                current_load: new.current_load,
                contact_person: new.contact_person.clone(),
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            (&self.store.warehouses, &self.store.users).transaction(|(warehouses, users)| {
                if let Some(contact) = &warehouse.contact_person {
                    let user: User = tx_get(users, contact)?;
                    tx_try(rules::check_warehouse_contact(&user))?;
                }
                tx_put(warehouses, &warehouse)
            })?;

            info!(warehouse = %warehouse.id, name = %warehouse.name, "warehouse created");
            Ok(warehouse)
        })
    }

    pub fn create_vehicle(&self, new: NewVehicle) -> Result<Vehicle> {
        logged("create_vehicle", || {
            new.validate()?;
            let now = self.now();
            let vehicle = Vehicle {
                id: new_id(EntityKind::Vehicle)?,
                license_plate: new.license_plate.trim().to_string(),
                model: new.model.clone(),
                kind: new.kind,
                capacity: new.capacity,
                volume: new.volume,
                status: VehicleStatus::Available,
                current_warehouse: new.current_warehouse.clone(),
                year: new.year,
                vin: new.vin.clone(),
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            let s = &self.store;
            (&s.vehicles, &s.warehouses, &s.unique).transaction(|(vehicles, warehouses, unique)| {
                if let Some(warehouse_id) = &vehicle.current_warehouse {
                    if !tx_exists(warehouses, warehouse_id)? {
                        return abort(WorkflowError::not_found(EntityKind::Warehouse, warehouse_id));
                    }
                }
                tx_claim_unique(unique, "license_plate", &vehicle.license_plate, &vehicle.id)?;
                if let Some(vin) = &vehicle.vin {
                    tx_claim_unique(unique, "vin", vin, &vehicle.id)?;
                }
                tx_put(vehicles, &vehicle)
            })?;

            info!(vehicle = %vehicle.id, plate = %vehicle.license_plate, "vehicle created");
            Ok(vehicle)
        })
    }

    /// The backing user must exist, hold the driver role and not already
    /// have a driver profile.
    pub fn create_driver(&self, new: NewDriver) -> Result<Driver> {
        logged("create_driver", || {
            new.validate()?;
            let driver = Driver {
                id: new_id(EntityKind::Driver)?,
                user_id: new.user_id.clone(),
                license_number: new.license_number.trim().to_string(),
                license_category: new.license_category.clone(),
                license_expiry: new.license_expiry,
                phone_number: new.phone_number.clone(),
                is_active: true,
                created_at: self.now(),
            };

            let s = &self.store;
            (&s.drivers, &s.users, &s.unique, &s.refs).transaction(
                |(drivers, users, unique, refs)| {
                    let user: User = tx_get(users, &driver.user_id)?;
                    tx_try(rules::check_driver_user(&user))?;
                    tx_claim_unique(unique, "user", &driver.user_id, &driver.id)?;
                    tx_claim_unique(unique, "license_number", &driver.license_number, &driver.id)?;
                    tx_add_ref(refs, EntityKind::User, &driver.user_id)?;
                    tx_put(drivers, &driver)
                },
            )?;

            info!(driver = %driver.id, user = %driver.user_id, "driver created");
            Ok(driver)
        })
    }

    pub fn create_cargo_type(&self, new: NewCargoType) -> Result<CargoType> {
        logged("create_cargo_type", || {
            new.validate()?;
            let cargo = CargoType {
                id: new_id(EntityKind::CargoType)?,
                name: new.name.clone(),
                description: new.description.clone(),
                hazard_class: new.hazard_class,
                requires_special_handling: new.requires_special_handling,
                min_temperature: new.min_temperature,
                max_temperature: new.max_temperature,
                is_active: true,
                created_at: self.now(),
            };

            self.store
                .cargo_types
                .transaction(|cargo_types| tx_put(cargo_types, &cargo))?;

            info!(cargo_type = %cargo.id, name = %cargo.name, "cargo type created");
            Ok(cargo)
        })
    }

    /// Store a validated draft as a Planned shipment and record its creation
    /// event. The cargo type, both warehouses and the creator become protected
    /// from deletion.
    pub fn create_shipment(&self, draft: ShipmentDraft, created_by: &str) -> Result<Shipment> {
        logged("create_shipment", || {
            let valid = draft.validate()?;
            let now = self.now();
            let shipment = Shipment {
                id: new_id(EntityKind::Shipment)?,
                cargo_type: valid.cargo_type,
                weight: valid.weight,
                volume: valid.volume,
                description: valid.description,
                origin_warehouse: valid.origin_warehouse,
                destination_warehouse: valid.destination_warehouse,
                planned_departure: valid.planned_departure,
                planned_arrival: valid.planned_arrival,
                actual_departure: None,
                actual_arrival: None,
                assigned_vehicle: None,
                assigned_driver: None,
                status: ShipmentStatus::Planned,
                priority: valid.priority,
                created_by: created_by.to_string(),
                assigned_by: None,
                special_instructions: valid.special_instructions,
                delay_reason: String::new(),
                created_at: now,
                updated_at: now,
            };
            let event = StatusEvent {
                shipment_id: shipment.id.clone(),
                from: None,
                to: ShipmentStatus::Planned,
                actor: Some(created_by.to_string()),
                notes: String::new(),
                at: now,
            };

            let s = &self.store;
            (&s.shipments, &s.cargo_types, &s.warehouses, &s.users, &s.refs, &s.history).transaction(
                |(shipments, cargo_types, warehouses, users, refs, history)| {
                    let referenced = [
                        (cargo_types, EntityKind::CargoType, &shipment.cargo_type),
                        (warehouses, EntityKind::Warehouse, &shipment.origin_warehouse),
                        (warehouses, EntityKind::Warehouse, &shipment.destination_warehouse),
                        (users, EntityKind::User, &shipment.created_by),
                    ];
                    for (tree, kind, id) in referenced {
                        if !tx_exists(tree, id)? {
                            return abort(WorkflowError::not_found(kind, id));
                        }
                        tx_add_ref(refs, kind, id)?;
                    }
                    tx_put(shipments, &shipment)?;
                    tx_append_event(history, &event)
                },
            )?;

            info!(
                shipment = %shipment.id,
                origin = %shipment.origin_warehouse,
                destination = %shipment.destination_warehouse,
                "shipment created"
            );
            Ok(shipment)
        })
    }

    // ------------------------------------------------------------- lifecycle

    /// Put a shipment on a vehicle and driver.
    ///
    /// The driver must currently be linked to the vehicle and the vehicle must
    /// be Available. On success the shipment is Assigned and the vehicle is
    /// InUse, written together with the history event. A vehicle the shipment
    /// held before goes back to Available.
    pub fn assign_shipment(
        &self,
        shipment_id: &str,
        vehicle_id: &str,
        driver_id: &str,
        assigned_by: &str,
    ) -> Result<Shipment> {
        logged("assign_shipment", || {
            let now = self.now();
            let policy = self.policy.transitions;

            let s = &self.store;
            let shipment = (&s.shipments, &s.vehicles, &s.drivers, &s.links, &s.users, &s.history)
                .transaction(|(shipments, vehicles, drivers, links, users, history)| {
                    let mut shipment: Shipment = tx_get(shipments, shipment_id)?;
                    let mut vehicle: Vehicle = tx_get(vehicles, vehicle_id)?;
                    let driver: Driver = tx_get(drivers, driver_id)?;
                    if !tx_exists(users, assigned_by)? {
                        return abort(WorkflowError::not_found(EntityKind::User, assigned_by));
                    }

                    let linked = tx_get_string(links, &driver_key(driver_id))?;
                    tx_try(rules::check_shipment_assignment(
                        &vehicle,
                        &driver,
                        linked.as_deref(),
                    ))?;

                    let previous = shipment
                        .assigned_vehicle
                        .clone()
                        .filter(|prev| prev != vehicle_id);
                    let transition = tx_try(lifecycle::mark_assigned(
                        &mut shipment,
                        vehicle_id,
                        driver_id,
                        assigned_by,
                        now,
                        policy,
                    ))?;
                    vehicle.status = VehicleStatus::InUse;
                    vehicle.updated_at = now;

                    // a reassigned shipment hands its old vehicle back
                    if let Some(prev) = previous {
                        if let Some(mut released) = tx_find::<Vehicle>(vehicles, &prev)? {
                            if released.status == VehicleStatus::InUse {
                                released.status = VehicleStatus::Available;
                                released.updated_at = now;
                                tx_put(vehicles, &released)?;
                            }
                        }
                    }

                    tx_put(shipments, &shipment)?;
                    tx_put(vehicles, &vehicle)?;
                    tx_append_event(
                        history,
                        &StatusEvent {
                            shipment_id: shipment.id.clone(),
                            from: Some(transition.from),
                            to: transition.to,
                            actor: Some(assigned_by.to_string()),
                            notes: String::new(),
                            at: now,
                        },
                    )?;
                    Ok(shipment)
                })?;

            info!(
                shipment = %shipment.id,
                vehicle = vehicle_id,
                driver = driver_id,
                assigned_by,
                "shipment assigned"
            );
            Ok(shipment)
        })
    }

    pub fn advance_shipment(
        &self,
        shipment_id: &str,
        to: ShipmentStatus,
        notes: Option<&str>,
    ) -> Result<Shipment> {
        logged("advance_shipment", || {
            let now = self.now();
            let policy = self.policy.transitions;

            let (shipment, transition) = (&self.store.shipments, &self.store.history).transaction(
                |(shipments, history)| -> TxResult<_> {
                    let mut shipment: Shipment = tx_get(shipments, shipment_id)?;
                    let transition =
                        tx_try(lifecycle::advance(&mut shipment, to, notes, now, policy))?;
                    tx_put(shipments, &shipment)?;
                    tx_append_event(
                        history,
                        &StatusEvent {
                            shipment_id: shipment.id.clone(),
                            from: Some(transition.from),
                            to: transition.to,
                            actor: None,
                            notes: notes.unwrap_or_default().to_string(),
                            at: now,
                        },
                    )?;
                    Ok((shipment, transition))
                },
            )?;

            info!(
                shipment = %shipment.id,
                from = %transition.from,
                to = %transition.to,
                stamped_departure = transition.stamped_departure,
                stamped_arrival = transition.stamped_arrival,
                "shipment advanced"
            );
            Ok(shipment)
        })
    }

    /// Like [`Self::advance_shipment`] but takes the status as text, e.g.
    /// `"IN_TRANSIT"`. Unknown values fail with `InvalidStatus`.
    pub fn advance_shipment_status(
        &self,
        shipment_id: &str,
        status: &str,
        notes: Option<&str>,
    ) -> Result<Shipment> {
        let to = logged("advance_shipment", || status.parse::<ShipmentStatus>())?;
        self.advance_shipment(shipment_id, to, notes)
    }

    pub fn reschedule_shipment(
        &self,
        shipment_id: &str,
        departure: TimeStamp<Utc>,
        arrival: TimeStamp<Utc>,
    ) -> Result<Shipment> {
        logged("reschedule_shipment", || {
            check_schedule(&departure, &arrival)?;
            let now = self.now();

            let shipment = self.store.shipments.transaction(|shipments| -> TxResult<Shipment> {
                let mut shipment: Shipment = tx_get(shipments, shipment_id)?;
                shipment.planned_departure = departure;
                shipment.planned_arrival = arrival;
                shipment.updated_at = now;
                tx_put(shipments, &shipment)?;
                Ok(shipment)
            })?;

            info!(shipment = %shipment.id, %departure, %arrival, "shipment rescheduled");
            Ok(shipment)
        })
    }

    // ----------------------------------------------------------------- fleet

    /// Link a driver and a vehicle, breaking whatever links either had.
    pub fn assign_driver_vehicle(&self, driver_id: &str, vehicle_id: &str) -> Result<Pairing> {
        logged("assign_driver_vehicle", || {
            let s = &self.store;
            let pairing = (&s.drivers, &s.vehicles, &s.links).transaction(
                |(drivers, vehicles, links)| -> TxResult<Pairing> {
                    let driver: Driver = tx_get(drivers, driver_id)?;
                    let vehicle: Vehicle = tx_get(vehicles, vehicle_id)?;
                    let change = fleet::tx_link(links, driver_id, vehicle_id)?;
                    Ok(Pairing {
                        driver,
                        vehicle,
                        change,
                    })
                },
            )?;

            info!(
                driver = driver_id,
                vehicle = vehicle_id,
                previous_vehicle = ?pairing.change.previous_vehicle,
                displaced_driver = ?pairing.change.displaced_driver,
                "driver linked to vehicle"
            );
            Ok(pairing)
        })
    }

    /// Break the driver's vehicle link. Returns the vehicle that was freed.
    pub fn unassign_driver_vehicle(&self, driver_id: &str) -> Result<String> {
        logged("unassign_driver_vehicle", || {
            let vehicle_id = (&self.store.drivers, &self.store.links).transaction(
                |(drivers, links)| {
                    if !tx_exists(drivers, driver_id)? {
                        return abort(WorkflowError::not_found(EntityKind::Driver, driver_id));
                    }
                    fleet::tx_unlink(links, driver_id)
                },
            )?;

            info!(driver = driver_id, vehicle = %vehicle_id, "driver unlinked from vehicle");
            Ok(vehicle_id)
        })
    }

    /// Set or clear the vehicle's current warehouse. The driver link is untouched.
    pub fn relocate_vehicle(&self, vehicle_id: &str, warehouse_id: Option<&str>) -> Result<Vehicle> {
        logged("relocate_vehicle", || {
            let now = self.now();
            let vehicle = (&self.store.vehicles, &self.store.warehouses).transaction(
                |(vehicles, warehouses)| {
                    let mut vehicle: Vehicle = tx_get(vehicles, vehicle_id)?;
                    if let Some(warehouse_id) = warehouse_id {
                        if !tx_exists(warehouses, warehouse_id)? {
                            return abort(WorkflowError::not_found(
                                EntityKind::Warehouse,
                                warehouse_id,
                            ));
                        }
                    }
                    vehicle.current_warehouse = warehouse_id.map(str::to_string);
                    vehicle.updated_at = now;
                    tx_put(vehicles, &vehicle)?;
                    Ok(vehicle)
                },
            )?;

            info!(vehicle = vehicle_id, warehouse = ?warehouse_id, "vehicle relocated");
            Ok(vehicle)
        })
    }

    /// Put every Available vehicle in `vehicle_ids` into service at the
    /// warehouse. Unknown ids and vehicles in any other status are skipped.
    /// Returns how many moved.
    pub fn bulk_allocate_vehicles<S: AsRef<str>>(
        &self,
        vehicle_ids: &[S],
        warehouse_id: &str,
    ) -> Result<usize> {
        logged("bulk_allocate_vehicles", || {
            let now = self.now();
            let moved = (&self.store.vehicles, &self.store.warehouses).transaction(
                |(vehicles, warehouses)| {
                    if !tx_exists(warehouses, warehouse_id)? {
                        return abort(WorkflowError::not_found(EntityKind::Warehouse, warehouse_id));
                    }

                    let mut moved = 0usize;
                    for vehicle_id in vehicle_ids {
                        let vehicle_id = vehicle_id.as_ref();
                        let Some(mut vehicle) = tx_find::<Vehicle>(vehicles, vehicle_id)? else {
                            debug!(vehicle = vehicle_id, "unknown vehicle skipped");
                            continue;
                        };
                        if fleet::allocate(&mut vehicle, warehouse_id, now) {
                            tx_put(vehicles, &vehicle)?;
                            moved += 1;
                        } else {
                            debug!(vehicle = vehicle_id, status = %vehicle.status, "vehicle skipped");
                        }
                    }
                    Ok(moved)
                },
            )?;

            info!(
                warehouse = warehouse_id,
                moved,
                requested = vehicle_ids.len(),
                "vehicles allocated"
            );
            Ok(moved)
        })
    }

    /// Set a vehicle's status from its text form, e.g. `"MAINTENANCE"`.
    pub fn change_vehicle_status(&self, vehicle_id: &str, status: &str) -> Result<Vehicle> {
        logged("change_vehicle_status", || {
            let status: VehicleStatus = status.parse()?;
            let now = self.now();

            let vehicle = self.store.vehicles.transaction(|vehicles| -> TxResult<Vehicle> {
                let mut vehicle: Vehicle = tx_get(vehicles, vehicle_id)?;
                vehicle.status = status;
                vehicle.updated_at = now;
                tx_put(vehicles, &vehicle)?;
                Ok(vehicle)
            })?;

            info!(vehicle = vehicle_id, %status, "vehicle status changed");
            Ok(vehicle)
        })
    }

    // ------------------------------------------------------------ warehouses

    /// Replace the warehouse load. `0 <= load <= capacity` is checked
    /// regardless of the capacity policy.
    pub fn update_warehouse_load(
        &self,
        warehouse_id: &str,
        load: crate::types::Quantity,
    ) -> Result<Warehouse> {
        logged("update_warehouse_load", || {
            let now = self.now();
            let warehouse = self.store.warehouses.transaction(|warehouses| -> TxResult<Warehouse> {
                let mut warehouse: Warehouse = tx_get(warehouses, warehouse_id)?;
                tx_try(check_load(load, warehouse.capacity))?;
                warehouse.current_load = load;
                warehouse.updated_at = now;
                tx_put(warehouses, &warehouse)?;
                Ok(warehouse)
            })?;

            info!(
                warehouse = warehouse_id,
                %load,
                utilization = warehouse.utilization_percentage(),
                "warehouse load updated"
            );
            Ok(warehouse)
        })
    }

    pub fn set_warehouse_contact(&self, warehouse_id: &str, contact: Option<&str>) -> Result<Warehouse> {
        logged("set_warehouse_contact", || {
            let now = self.now();
            let warehouse = (&self.store.warehouses, &self.store.users).transaction(
                |(warehouses, users)| -> TxResult<Warehouse> {
                    let mut warehouse: Warehouse = tx_get(warehouses, warehouse_id)?;
                    if let Some(user_id) = contact {
                        let user: User = tx_get(users, user_id)?;
                        tx_try(rules::check_warehouse_contact(&user))?;
                    }
                    warehouse.contact_person = contact.map(str::to_string);
                    warehouse.updated_at = now;
                    tx_put(warehouses, &warehouse)?;
                    Ok(warehouse)
                },
            )?;

            info!(warehouse = warehouse_id, contact = ?contact, "warehouse contact set");
            Ok(warehouse)
        })
    }

    // --------------------------------------------------------------- delete

    /// Remove a warehouse no shipment references. Vehicles parked there are
    /// detached.
    pub fn delete_warehouse(&self, warehouse_id: &str) -> Result<Warehouse> {
        logged("delete_warehouse", || {
            let parked = self.ids_where::<Vehicle>(|v| {
                v.current_warehouse.as_deref() == Some(warehouse_id)
            })?;
            let now = self.now();

            let s = &self.store;
            let (warehouse, detached) = (&s.warehouses, &s.vehicles, &s.refs).transaction(
                |(warehouses, vehicles, refs)| -> TxResult<_> {
                    let warehouse: Warehouse = tx_get(warehouses, warehouse_id)?;
                    tx_ensure_unreferenced(refs, EntityKind::Warehouse, warehouse_id)?;
                    let detached = tx_clear::<Vehicle>(vehicles, &parked, |vehicle| {
                        if vehicle.current_warehouse.as_deref() != Some(warehouse_id) {
                            return false;
                        }
                        vehicle.current_warehouse = None;
                        vehicle.updated_at = now;
                        true
                    })?;
                    tx_remove(warehouses, warehouse_id)?;
                    Ok((warehouse, detached))
                },
            )?;

            info!(warehouse = warehouse_id, detached, "warehouse deleted");
            Ok(warehouse)
        })
    }

    pub fn delete_cargo_type(&self, cargo_type_id: &str) -> Result<CargoType> {
        logged("delete_cargo_type", || {
            let cargo = (&self.store.cargo_types, &self.store.refs).transaction(
                |(cargo_types, refs)| -> TxResult<CargoType> {
                    let cargo: CargoType = tx_get(cargo_types, cargo_type_id)?;
                    tx_ensure_unreferenced(refs, EntityKind::CargoType, cargo_type_id)?;
                    tx_remove(cargo_types, cargo_type_id)?;
                    Ok(cargo)
                },
            )?;

            info!(cargo_type = cargo_type_id, "cargo type deleted");
            Ok(cargo)
        })
    }

    /// Remove a user that created no shipment and backs no driver profile.
    /// Shipments it assigned and warehouses it was the contact of lose the
    /// reference.
    pub fn delete_user(&self, user_id: &str) -> Result<User> {
        logged("delete_user", || {
            let assigned =
                self.ids_where::<Shipment>(|s| s.assigned_by.as_deref() == Some(user_id))?;
            let contact_of =
                self.ids_where::<Warehouse>(|w| w.contact_person.as_deref() == Some(user_id))?;
            let now = self.now();

            let s = &self.store;
            let user = (&s.users, &s.refs, &s.unique, &s.shipments, &s.warehouses).transaction(
                |(users, refs, unique, shipments, warehouses)| -> TxResult<User> {
                    let user: User = tx_get(users, user_id)?;
                    tx_ensure_unreferenced(refs, EntityKind::User, user_id)?;
                    tx_clear::<Shipment>(shipments, &assigned, |shipment| {
                        if shipment.assigned_by.as_deref() != Some(user_id) {
                            return false;
                        }
                        shipment.assigned_by = None;
                        shipment.updated_at = now;
                        true
                    })?;
                    tx_clear::<Warehouse>(warehouses, &contact_of, |warehouse| {
                        if warehouse.contact_person.as_deref() != Some(user_id) {
                            return false;
                        }
                        warehouse.contact_person = None;
                        warehouse.updated_at = now;
                        true
                    })?;
                    tx_release_unique(unique, "username", &user.username)?;
                    tx_remove(users, user_id)?;
                    Ok(user)
                },
            )?;

            info!(user = user_id, "user deleted");
            Ok(user)
        })
    }

    /// Remove a vehicle. Its driver link is broken and shipments carried by it
    /// lose the reference.
    pub fn delete_vehicle(&self, vehicle_id: &str) -> Result<Vehicle> {
        logged("delete_vehicle", || {
            let carried =
                self.ids_where::<Shipment>(|s| s.assigned_vehicle.as_deref() == Some(vehicle_id))?;
            let now = self.now();

            let s = &self.store;
            let (vehicle, driver) = (&s.vehicles, &s.links, &s.shipments, &s.unique).transaction(
                |(vehicles, links, shipments, unique)| -> TxResult<_> {
                    let vehicle: Vehicle = tx_get(vehicles, vehicle_id)?;
                    let driver = fleet::tx_unlink_vehicle(links, vehicle_id)?;
                    tx_clear::<Shipment>(shipments, &carried, |shipment| {
                        if shipment.assigned_vehicle.as_deref() != Some(vehicle_id) {
                            return false;
                        }
                        shipment.assigned_vehicle = None;
                        shipment.updated_at = now;
                        true
                    })?;
                    tx_release_unique(unique, "license_plate", &vehicle.license_plate)?;
                    if let Some(vin) = &vehicle.vin {
                        tx_release_unique(unique, "vin", vin)?;
                    }
                    tx_remove(vehicles, vehicle_id)?;
                    Ok((vehicle, driver))
                },
            )?;

            info!(vehicle = vehicle_id, unlinked_driver = ?driver, "vehicle deleted");
            Ok(vehicle)
        })
    }

    /// Remove a driver profile. Its vehicle link is broken and shipments it
    /// drives lose the reference.
    pub fn delete_driver(&self, driver_id: &str) -> Result<Driver> {
        logged("delete_driver", || {
            let driven =
                self.ids_where::<Shipment>(|s| s.assigned_driver.as_deref() == Some(driver_id))?;
            let now = self.now();

            let s = &self.store;
            let driver = (&s.drivers, &s.links, &s.shipments, &s.unique, &s.refs).transaction(
                |(drivers, links, shipments, unique, refs)| -> TxResult<Driver> {
                    let driver: Driver = tx_get(drivers, driver_id)?;
                    if tx_get_string(links, &driver_key(driver_id))?.is_some() {
                        fleet::tx_unlink(links, driver_id)?;
                    }
                    tx_clear::<Shipment>(shipments, &driven, |shipment| {
                        if shipment.assigned_driver.as_deref() != Some(driver_id) {
                            return false;
                        }
                        shipment.assigned_driver = None;
                        shipment.updated_at = now;
                        true
                    })?;
                    tx_release_unique(unique, "license_number", &driver.license_number)?;
                    tx_release_unique(unique, "user", &driver.user_id)?;
                    tx_drop_ref(refs, EntityKind::User, &driver.user_id)?;
                    tx_remove(drivers, driver_id)?;
                    Ok(driver)
                },
            )?;

            info!(driver = driver_id, "driver deleted");
            Ok(driver)
        })
    }

    // --------------------------------------------------------------- queries

    pub fn driver_vehicle(&self, driver_id: &str) -> Result<Option<String>> {
        self.store.linked_vehicle(driver_id)
    }

    pub fn vehicle_driver(&self, vehicle_id: &str) -> Result<Option<String>> {
        self.store.linked_driver(vehicle_id)
    }

    /// Active drivers without a vehicle.
    pub fn available_drivers(&self) -> Result<Vec<Driver>> {
        let mut available = Vec::new();
        for driver in self.store.scan::<Driver>() {
            let driver = driver?;
            if driver.is_active && self.store.linked_vehicle(&driver.id)?.is_none() {
                available.push(driver);
            }
        }
        Ok(available)
    }

    pub fn vehicles_awaiting_allocation(&self) -> Result<Vec<Vehicle>> {
        self.collect_where::<Vehicle>(Vehicle::is_available)
    }

    /// Planned or Assigned shipments departing today or tomorrow (UTC),
    /// earliest departure first.
    pub fn upcoming_shipments(&self) -> Result<Vec<Shipment>> {
        let today = self.now().to_datetime_utc().date_naive();
        let tomorrow = today.succ_opt().unwrap_or(today);

        let mut upcoming = self.collect_where::<Shipment>(|shipment| {
            let departs = shipment.planned_departure.to_datetime_utc().date_naive();
            matches!(
                shipment.status,
                ShipmentStatus::Planned | ShipmentStatus::Assigned
            ) && (departs == today || departs == tomorrow)
        })?;
        upcoming.sort_by_key(|shipment| shipment.planned_departure);
        Ok(upcoming)
    }

    pub fn shipments_for_driver(&self, driver_id: &str) -> Result<Vec<Shipment>> {
        self.store.get::<Driver>(driver_id)?;
        let mut shipments = self.collect_where::<Shipment>(|shipment| {
            shipment.assigned_driver.as_deref() == Some(driver_id)
        })?;
        shipments.sort_by_key(|shipment| shipment.planned_departure);
        Ok(shipments)
    }

    /// Status events of a shipment, oldest first.
    pub fn shipment_history(&self, shipment_id: &str) -> Result<Vec<StatusEvent>> {
        self.store.get::<Shipment>(shipment_id)?;
        self.store.history_of(shipment_id)
    }

    // ----------------------------------------------------------------- stats

    pub fn shipment_stats(&self) -> Result<ShipmentStats> {
        let mut rollup = ShipmentRollup::default();
        for shipment in self.store.scan::<Shipment>() {
            rollup.observe(&shipment?);
        }
        Ok(rollup.finish())
    }

    pub fn fleet_stats(&self) -> Result<FleetStats> {
        let mut rollup = FleetRollup::default();
        for vehicle in self.store.scan::<Vehicle>() {
            rollup.observe(&vehicle?);
        }
        Ok(rollup.finish())
    }

    pub fn warehouse_stats(&self) -> Result<WarehouseStats> {
        let mut rollup = WarehouseRollup::default();
        for warehouse in self.store.scan::<Warehouse>() {
            rollup.observe(&warehouse?);
        }
        Ok(rollup.finish())
    }

    /// Suggested homes for the Available vehicles. Nothing is written.
    pub fn propose_allocation(&self) -> Result<Vec<AllocationProposal>> {
        let vehicles = self.vehicles_awaiting_allocation()?;
        let warehouses = self.collect_where::<Warehouse>(|warehouse| warehouse.is_active)?;
        let plan = fleet::plan_allocation(&vehicles, &warehouses);
        debug!(
            vehicles = vehicles.len(),
            warehouses = warehouses.len(),
            proposals = plan.len(),
            "allocation planned"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::Quantity;
    use crate::user::Role;
    use crate::vehicle::VehicleKind;

    fn service() -> (tempfile::TempDir, LogisticsService, Arc<FixedClock>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path()).unwrap());
        let clock = Arc::new(FixedClock::at(TimeStamp::new_with(2024, 6, 3, 8, 0, 0)));
        let service = LogisticsService::new(db).unwrap().with_clock(clock.clone());
        (dir, service, clock)
    }

    fn user(service: &LogisticsService, username: &str, role: Role) -> User {
        service
            .create_user(NewUser {
                username: username.into(),
                full_name: username.to_uppercase(),
                role,
                phone_number: None,
            })
            .unwrap()
    }

    fn driver(service: &LogisticsService, username: &str, license: &str) -> Driver {
        let user = user(service, username, Role::Driver);
        service
            .create_driver(NewDriver {
                user_id: user.id,
                license_number: license.into(),
                license_category: "C".into(),
                license_expiry: TimeStamp::new_with(2030, 1, 1, 0, 0, 0),
                phone_number: "+100".into(),
            })
            .unwrap()
    }

    fn vehicle(service: &LogisticsService, plate: &str) -> Vehicle {
        service
            .create_vehicle(NewVehicle::new(
                plate,
                VehicleKind::Truck,
                Quantity::from(10),
                Quantity::from(40),
            ))
            .unwrap()
    }

    #[test]
    fn duplicate_plate_is_rejected() {
        let (_dir, service, _) = service();
        vehicle(&service, "AB-123");

        let err = service
            .create_vehicle(NewVehicle::new(
                "AB-123",
                VehicleKind::Van,
                Quantity::from(1),
                Quantity::from(1),
            ))
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::ValidationFailed(crate::error::ValidationError::Duplicate {
                field: "license_plate",
                ..
            })
        ));
    }

    #[test]
    fn driver_requires_driver_role() {
        let (_dir, service, _) = service();
        let dispatcher = user(&service, "dispatch", Role::Dispatcher);

        let err = service
            .create_driver(NewDriver {
                user_id: dispatcher.id,
                license_number: "L-1".into(),
                license_category: "B".into(),
                license_expiry: TimeStamp::new_with(2030, 1, 1, 0, 0, 0),
                phone_number: String::new(),
            })
            .unwrap_err();

        assert!(matches!(err, WorkflowError::ValidationFailed(_)));
    }

    #[test]
    fn one_driver_profile_per_user() {
        let (_dir, service, _) = service();
        let first = driver(&service, "ana", "L-1");

        let err = service
            .create_driver(NewDriver {
                user_id: first.user_id.clone(),
                license_number: "L-2".into(),
                license_category: "B".into(),
                license_expiry: TimeStamp::new_with(2030, 1, 1, 0, 0, 0),
                phone_number: String::new(),
            })
            .unwrap_err();

        assert!(matches!(err, WorkflowError::ValidationFailed(_)));
    }

    #[test]
    fn relinking_moves_both_sides() {
        let (_dir, service, _) = service();
        let ana = driver(&service, "ana", "L-1");
        let bo = driver(&service, "bo", "L-2");
        let truck = vehicle(&service, "T-1");
        let van = vehicle(&service, "V-1");

        service.assign_driver_vehicle(&ana.id, &truck.id).unwrap();
        let pairing = service.assign_driver_vehicle(&bo.id, &truck.id).unwrap();
        assert_eq!(pairing.change.displaced_driver.as_deref(), Some(ana.id.as_str()));
        assert_eq!(service.driver_vehicle(&ana.id).unwrap(), None);

        let pairing = service.assign_driver_vehicle(&bo.id, &van.id).unwrap();
        assert_eq!(pairing.change.previous_vehicle.as_deref(), Some(truck.id.as_str()));
        assert_eq!(service.vehicle_driver(&truck.id).unwrap(), None);
        assert_eq!(service.vehicle_driver(&van.id).unwrap().as_deref(), Some(bo.id.as_str()));
    }

    #[test]
    fn unassign_without_vehicle() {
        let (_dir, service, _) = service();
        let ana = driver(&service, "ana", "L-1");

        let err = service.unassign_driver_vehicle(&ana.id).unwrap_err();
        assert!(matches!(err, WorkflowError::NothingAssigned(id) if id == ana.id));

        let err = service.unassign_driver_vehicle("drv_missing").unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { kind: EntityKind::Driver, .. }));
    }

    #[test]
    fn change_vehicle_status_parses_text() {
        let (_dir, service, clock) = service();
        let truck = vehicle(&service, "T-1");
        clock.advance(chrono::Duration::minutes(5));

        let updated = service.change_vehicle_status(&truck.id, "maintenance").unwrap();
        assert_eq!(updated.status, VehicleStatus::Maintenance);
        assert!(updated.updated_at > truck.updated_at);

        let err = service.change_vehicle_status(&truck.id, "PARKED").unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStatus(s) if s == "PARKED"));
    }

    #[test]
    fn available_drivers_excludes_linked() {
        let (_dir, service, _) = service();
        let ana = driver(&service, "ana", "L-1");
        let bo = driver(&service, "bo", "L-2");
        let truck = vehicle(&service, "T-1");
        service.assign_driver_vehicle(&ana.id, &truck.id).unwrap();

        let free: Vec<String> = service
            .available_drivers()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(free, vec![bo.id]);
    }

    #[test]
    fn deleting_user_with_driver_profile_is_protected() {
        let (_dir, service, _) = service();
        let ana = driver(&service, "ana", "L-1");

        let err = service.delete_user(&ana.user_id).unwrap_err();
        assert!(matches!(err, WorkflowError::Protected { references: 1, .. }));

        service.delete_driver(&ana.id).unwrap();
        service.delete_user(&ana.user_id).unwrap();
        // the username is free again
        user(&service, "ana", Role::Dispatcher);
    }
}
