//! Entity store over sled
//!
//! One tree per entity kind, plus:
//! - `links`: the driver/vehicle relation, keyed `d/<driver>` -> vehicle and
//!   `v/<vehicle>` -> driver. Both keys are always written together.
//! - `unique`: secondary keys that must stay unique (plates, licence numbers).
//! - `refs`: reference counters guarding protect-on-delete.
//! - `history`: shipment status events keyed `<shipment>/<nanos>/<seq>/<digest>`,
//!   plus a `seq/<shipment>` write counter per shipment.
//!
//! Records are CBOR encoded with minicbor.
use std::sync::Arc;

use sled::Tree;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};

use crate::cargo::CargoType;
use crate::error::{Result, ValidationError, WorkflowError};
use crate::shipment::{Shipment, StatusEvent};
use crate::user::User;
use crate::vehicle::{Driver, Vehicle};
use crate::warehouse::Warehouse;

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, WorkflowError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Warehouse,
    Vehicle,
    Driver,
    CargoType,
    Shipment,
}

impl EntityKind {
    /// bech32 human readable part used for this kind's ids
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::User => "user_",
            EntityKind::Warehouse => "wh_",
            EntityKind::Vehicle => "veh_",
            EntityKind::Driver => "drv_",
            EntityKind::CargoType => "cargo_",
            EntityKind::Shipment => "ship_",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Warehouse => "warehouse",
            EntityKind::Vehicle => "vehicle",
            EntityKind::Driver => "driver",
            EntityKind::CargoType => "cargo type",
            EntityKind::Shipment => "shipment",
        };
        f.write_str(name)
    }
}

/// A stored entity with an id.
pub trait Record: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    const KIND: EntityKind;

    fn id(&self) -> &str;
}

macro_rules! record {
    ($ty:ty, $kind:expr) => {
        impl Record for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

record!(User, EntityKind::User);
record!(Warehouse, EntityKind::Warehouse);
record!(Vehicle, EntityKind::Vehicle);
record!(Driver, EntityKind::Driver);
record!(CargoType, EntityKind::CargoType);
record!(Shipment, EntityKind::Shipment);

#[derive(Clone)]
pub struct Store {
    pub(crate) users: Tree,
    pub(crate) warehouses: Tree,
    pub(crate) vehicles: Tree,
    pub(crate) drivers: Tree,
    pub(crate) cargo_types: Tree,
    pub(crate) shipments: Tree,
    pub(crate) links: Tree,
    pub(crate) unique: Tree,
    pub(crate) refs: Tree,
    pub(crate) history: Tree,
}

impl Store {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            users: instance.open_tree("users")?,
            warehouses: instance.open_tree("warehouses")?,
            vehicles: instance.open_tree("vehicles")?,
            drivers: instance.open_tree("drivers")?,
            cargo_types: instance.open_tree("cargo_types")?,
            shipments: instance.open_tree("shipments")?,
            links: instance.open_tree("links")?,
            unique: instance.open_tree("unique")?,
            refs: instance.open_tree("refs")?,
            history: instance.open_tree("history")?,
        })
    }

    pub(crate) fn tree_for(&self, kind: EntityKind) -> &Tree {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Warehouse => &self.warehouses,
            EntityKind::Vehicle => &self.vehicles,
            EntityKind::Driver => &self.drivers,
            EntityKind::CargoType => &self.cargo_types,
            EntityKind::Shipment => &self.shipments,
        }
    }

    /// Fetch a record outside of any transaction.
    pub fn get<T: Record>(&self, id: &str) -> Result<T> {
        match self.tree_for(T::KIND).get(id.as_bytes())? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(WorkflowError::not_found(T::KIND, id)),
        }
    }

    /// Stream every record of a kind. Nothing is collected up front.
    pub fn scan<T: Record>(&self) -> impl Iterator<Item = Result<T>> + use<T> {
        self.tree_for(T::KIND).iter().values().map(|value| {
            let bytes = value?;
            Ok(minicbor::decode::<T>(&bytes)?)
        })
    }

    /// Current vehicle of a driver, read outside of any transaction.
    pub fn linked_vehicle(&self, driver_id: &str) -> Result<Option<String>> {
        read_string(self.links.get(driver_key(driver_id))?)
    }

    /// Current driver of a vehicle, read outside of any transaction.
    pub fn linked_driver(&self, vehicle_id: &str) -> Result<Option<String>> {
        read_string(self.links.get(vehicle_key(vehicle_id))?)
    }
}

fn read_string(value: Option<sled::IVec>) -> Result<Option<String>> {
    value
        .map(|bytes| {
            String::from_utf8(bytes.to_vec())
                .map_err(|err| WorkflowError::Codec(format!("link value is not utf-8: {err}")))
        })
        .transpose()
}

pub(crate) fn driver_key(driver_id: &str) -> String {
    format!("d/{driver_id}")
}

pub(crate) fn vehicle_key(vehicle_id: &str) -> String {
    format!("v/{vehicle_id}")
}

pub(crate) fn ref_key(kind: EntityKind, id: &str) -> String {
    format!("{}/{id}", kind.prefix())
}

pub(crate) fn abort<T>(err: impl Into<WorkflowError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

/// Lift a non-transactional result into the transaction, aborting on error.
pub(crate) fn tx_try<T, E: Into<WorkflowError>>(res: std::result::Result<T, E>) -> TxResult<T> {
    res.map_err(|err| ConflictableTransactionError::Abort(err.into()))
}

/// Read a record inside a transaction, aborting with `NotFound` if absent.
pub(crate) fn tx_get<T: Record>(tree: &TransactionalTree, id: &str) -> TxResult<T> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => tx_try(minicbor::decode::<T>(&bytes)),
        None => abort(WorkflowError::not_found(T::KIND, id)),
    }
}

pub(crate) fn tx_find<T: Record>(tree: &TransactionalTree, id: &str) -> TxResult<Option<T>> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => tx_try(minicbor::decode::<T>(&bytes)).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn tx_exists(tree: &TransactionalTree, id: &str) -> TxResult<bool> {
    Ok(tree.get(id.as_bytes())?.is_some())
}

pub(crate) fn tx_put<T: Record>(tree: &TransactionalTree, record: &T) -> TxResult<()> {
    let bytes = tx_try(minicbor::to_vec(record))?;
    tree.insert(record.id().as_bytes(), bytes)?;
    Ok(())
}

pub(crate) fn tx_remove(tree: &TransactionalTree, id: &str) -> TxResult<()> {
    tree.remove(id.as_bytes())?;
    Ok(())
}

pub(crate) fn tx_get_string(tree: &TransactionalTree, key: &str) -> TxResult<Option<String>> {
    tx_try(read_string(tree.get(key.as_bytes())?))
}

/// Claim a unique secondary key for `owner`. Fails if someone else holds it.
pub(crate) fn tx_claim_unique(
    unique: &TransactionalTree,
    field: &'static str,
    value: &str,
    owner: &str,
) -> TxResult<()> {
    let key = format!("{field}/{value}");
    if let Some(holder) = tx_get_string(unique, &key)? {
        if holder != owner {
            return abort(ValidationError::Duplicate {
                field,
                value: value.to_string(),
            });
        }
    }
    unique.insert(key.as_bytes(), owner.as_bytes())?;
    Ok(())
}

pub(crate) fn tx_release_unique(unique: &TransactionalTree, field: &'static str, value: &str) -> TxResult<()> {
    unique.remove(format!("{field}/{value}").as_bytes())?;
    Ok(())
}

pub(crate) fn tx_ref_count(refs: &TransactionalTree, kind: EntityKind, id: &str) -> TxResult<u64> {
    let count = match refs.get(ref_key(kind, id).as_bytes())? {
        Some(bytes) => {
            let raw: [u8; 8] = match bytes.as_ref().try_into() {
                Ok(raw) => raw,
                Err(_) => return abort(WorkflowError::Codec("malformed reference counter".into())),
            };
            u64::from_be_bytes(raw)
        }
        None => 0,
    };
    Ok(count)
}

pub(crate) fn tx_add_ref(refs: &TransactionalTree, kind: EntityKind, id: &str) -> TxResult<()> {
    let next = tx_ref_count(refs, kind, id)? + 1;
    refs.insert(ref_key(kind, id).as_bytes(), &next.to_be_bytes()[..])?;
    Ok(())
}

pub(crate) fn tx_drop_ref(refs: &TransactionalTree, kind: EntityKind, id: &str) -> TxResult<()> {
    let next = tx_ref_count(refs, kind, id)?.saturating_sub(1);
    if next == 0 {
        refs.remove(ref_key(kind, id).as_bytes())?;
    } else {
        refs.insert(ref_key(kind, id).as_bytes(), &next.to_be_bytes()[..])?;
    }
    Ok(())
}

/// Abort with `Protected` while anything still counts as a reference to `id`.
pub(crate) fn tx_ensure_unreferenced(refs: &TransactionalTree, kind: EntityKind, id: &str) -> TxResult<()> {
    let references = tx_ref_count(refs, kind, id)?;
    if references > 0 {
        return abort(WorkflowError::Protected {
            kind,
            id: id.to_string(),
            references,
        });
    }
    Ok(())
}

// Keys sort by shipment, then event time, so a prefix scan is chronological.
fn history_key(event: &StatusEvent, seq: u64, hash: &str) -> String {
    let nanos = event
        .at
        .to_datetime_utc()
        .timestamp_nanos_opt()
        .unwrap_or(0)
        .max(0);
    format!("{}/{:020}/{:020}/{}", event.shipment_id, nanos, seq, &hash[..16])
}

// Per-shipment write counter. Events sharing an instant sort by it.
fn tx_next_event_seq(history: &TransactionalTree, shipment_id: &str) -> TxResult<u64> {
    let key = format!("seq/{shipment_id}");
    let current = match history.get(key.as_bytes())? {
        Some(bytes) => match <[u8; 8]>::try_from(bytes.as_ref()) {
            Ok(raw) => u64::from_be_bytes(raw),
            Err(_) => return abort(WorkflowError::Codec("malformed history sequence".into())),
        },
        None => 0,
    };
    let next = current + 1;
    history.insert(key.as_bytes(), &next.to_be_bytes()[..])?;
    Ok(next)
}

pub(crate) fn tx_append_event(history: &TransactionalTree, event: &StatusEvent) -> TxResult<()> {
    let (hash, cbor) = tx_try(event.build())?;
    let seq = tx_next_event_seq(history, &event.shipment_id)?;
    history.insert(history_key(event, seq, &hash).as_bytes(), cbor)?;
    Ok(())
}

impl Store {
    /// Status events of a shipment, oldest first.
    pub fn history_of(&self, shipment_id: &str) -> Result<Vec<StatusEvent>> {
        self.history
            .scan_prefix(format!("{shipment_id}/").as_bytes())
            .values()
            .map(|value| {
                let bytes = value?;
                Ok(minicbor::decode::<StatusEvent>(&bytes)?)
            })
            .collect()
    }
}
