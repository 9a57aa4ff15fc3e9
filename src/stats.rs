//! Read-only rollups
//!
//! Each rollup is a fold: records are fed one at a time with `observe` and
//! `finish` produces the summary, so callers can stream straight from the store.
use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::shipment::{Priority, Shipment, ShipmentStatus};
use crate::vehicle::{Vehicle, VehicleStatus};
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ShipmentStats {
    pub by_status: BTreeMap<ShipmentStatus, u64>,
    pub by_priority: BTreeMap<Priority, u64>,
    pub total_shipments: u64,
    pub active_shipments: u64,
    /// Mean of (actual arrival - actual departure) over completed shipments
    /// that have both stamps. None when there are no such shipments.
    pub avg_delivery_time_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FleetStats {
    pub total_vehicles: u64,
    pub available_vehicles: u64,
    pub in_use_vehicles: u64,
    pub maintenance_vehicles: u64,
    pub broken_vehicles: u64,
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WarehouseStats {
    pub total_warehouses: u64,
    pub active_warehouses: u64,
    pub total_capacity: Decimal,
    pub average_utilization: f64,
}

#[derive(Debug, Default)]
pub struct ShipmentRollup {
    by_status: BTreeMap<ShipmentStatus, u64>,
    by_priority: BTreeMap<Priority, u64>,
    total: u64,
    active: u64,
    delivered: u64,
    delivery_seconds: i64,
}

#[derive(Debug, Default)]
pub struct FleetRollup {
    by_status: BTreeMap<VehicleStatus, u64>,
    total: u64,
}

#[derive(Debug, Default)]
pub struct WarehouseRollup {
    total: u64,
    active: u64,
    capacity: Decimal,
    utilization_sum: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl ShipmentRollup {
    pub fn observe(&mut self, shipment: &Shipment) {
        *self.by_status.entry(shipment.status).or_default() += 1;
        *self.by_priority.entry(shipment.priority).or_default() += 1;
        self.total += 1;
        if shipment.is_active() {
            self.active += 1;
        }
        if shipment.status == ShipmentStatus::Completed {
            if let Some(duration) = shipment.duration() {
                self.delivered += 1;
                self.delivery_seconds = self.delivery_seconds.saturating_add(duration.num_seconds());
            }
        }
    }

    pub fn finish(self) -> ShipmentStats {
        let avg_delivery_time_seconds = if self.delivered == 0 {
            None
        } else {
            Some(self.delivery_seconds as f64 / self.delivered as f64)
        };

        ShipmentStats {
            by_status: self.by_status,
            by_priority: self.by_priority,
            total_shipments: self.total,
            active_shipments: self.active,
            avg_delivery_time_seconds,
        }
    }
}

impl FleetRollup {
    pub fn observe(&mut self, vehicle: &Vehicle) {
        *self.by_status.entry(vehicle.status).or_default() += 1;
        self.total += 1;
    }

    pub fn finish(self) -> FleetStats {
        let count = |status: VehicleStatus| self.by_status.get(&status).copied().unwrap_or(0);
        let in_use = count(VehicleStatus::InUse);
        let utilization_rate = if self.total == 0 {
            0.0
        } else {
            round2(in_use as f64 / self.total as f64 * 100.0)
        };

        FleetStats {
            total_vehicles: self.total,
            available_vehicles: count(VehicleStatus::Available),
            in_use_vehicles: in_use,
            maintenance_vehicles: count(VehicleStatus::Maintenance),
            broken_vehicles: count(VehicleStatus::Broken),
            utilization_rate,
        }
    }
}

impl WarehouseRollup {
    pub fn observe(&mut self, warehouse: &Warehouse) {
        self.total += 1;
        if warehouse.is_active {
            self.active += 1;
        }
        self.capacity = self
            .capacity
            .checked_add(warehouse.capacity.value())
            .unwrap_or(Decimal::MAX);
        self.utilization_sum += warehouse.utilization_percentage();
    }

    pub fn finish(self) -> WarehouseStats {
        let average_utilization = if self.total == 0 {
            0.0
        } else {
            round2(self.utilization_sum / self.total as f64)
        };

        WarehouseStats {
            total_warehouses: self.total,
            active_warehouses: self.active,
            total_capacity: self.capacity,
            average_utilization,
        }
    }
}
