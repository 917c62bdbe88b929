//! Conditional write transactions
//!
//! One call writes a partition's record/event pairs in a single LMDB write
//! transaction. Every item carries a condition: absence for creates, a live
//! record with the expected ETag for updates and deletes, and absence of the
//! event key. When any condition fails the whole transaction is aborted and
//! every item gets a cancellation reason, `None` for items that were only
//! cancelled because a sibling failed.

use lmdb::{Database, Environment, RwTransaction, Transaction, WriteFlags};
use serde_json::Value;
use tracing::debug;
use vellum_core::{check_precondition, Result, VellumError, WriteIntent};

use crate::keys::item_key;

/// Record and event databases of one environment
#[derive(Debug, Clone, Copy)]
pub struct Tables {
    pub records: Database,
    pub events: Database,
}

/// One conditional record/event pair, with its keys resolved
#[derive(Debug, Clone)]
pub struct TransactItem {
    pub record_key: Vec<u8>,
    pub event_key: Option<Vec<u8>>,
    pub intent: WriteIntent,
}

impl TransactItem {
    pub fn new(location: &str, partition_key: &str, intent: WriteIntent) -> Self {
        let event_key = intent
            .event_id()
            .map(|event_id| item_key(location, partition_key, event_id));
        Self {
            record_key: item_key(location, partition_key, &intent.id),
            event_key,
            intent,
        }
    }
}

#[derive(Debug)]
pub enum TransactOutcome {
    Committed,
    /// Aborted; one reason per submitted item, `None` where the item's own
    /// condition held
    Cancelled(Vec<Option<VellumError>>),
}

/// Translate an LMDB error into the store-neutral taxonomy
pub fn map_lmdb_error(error: lmdb::Error) -> VellumError {
    use lmdb::Error as E;
    match error {
        E::MapFull | E::ReadersFull | E::TxnFull | E::CursorFull | E::PageFull | E::TlsFull => {
            VellumError::Throttled(format!("lmdb capacity exhausted: {error}"))
        }
        E::Invalid
        | E::VersionMismatch
        | E::Corrupted
        | E::Panic
        | E::PageNotFound
        | E::MapResized
        | E::Incompatible => VellumError::Unavailable(format!("lmdb environment failure: {error}")),
        other => VellumError::internal("lmdb operation failed", other),
    }
}

pub fn get_json<T: Transaction>(txn: &T, db: Database, key: &[u8]) -> Result<Option<Value>> {
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(map_lmdb_error(e)),
    }
}

fn key_exists<T: Transaction>(txn: &T, db: Database, key: &[u8]) -> Result<bool> {
    match txn.get(db, &key) {
        Ok(_) => Ok(true),
        Err(lmdb::Error::NotFound) => Ok(false),
        Err(e) => Err(map_lmdb_error(e)),
    }
}

fn put_json(txn: &mut RwTransaction<'_>, db: Database, key: &[u8], value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    txn.put(db, &key, &bytes, WriteFlags::empty())
        .map_err(map_lmdb_error)
}

fn condition(txn: &RwTransaction<'_>, tables: Tables, item: &TransactItem) -> Result<Option<VellumError>> {
    let current = get_json(txn, tables.records, &item.record_key)?;
    if let Err(reason) = check_precondition(&item.intent, current.as_ref()) {
        return Ok(Some(reason));
    }
    if let (Some(event_key), Some(event_id)) = (&item.event_key, item.intent.event_id()) {
        if key_exists(txn, tables.events, event_key)? {
            return Ok(Some(VellumError::duplicate(format!(
                "event {event_id} already exists"
            ))));
        }
    }
    Ok(None)
}

/// Run `items` as one all-or-nothing write transaction
///
/// Items whose condition holds are still applied inside the doomed
/// transaction, so later items are checked against the state they would see
/// if only the passing items committed.
pub fn transact(env: &Environment, tables: Tables, items: &[&TransactItem]) -> Result<TransactOutcome> {
    let mut txn = env.begin_rw_txn().map_err(map_lmdb_error)?;
    let mut reasons = Vec::with_capacity(items.len());

    for item in items {
        let reason = condition(&txn, tables, item)?;
        if reason.is_none() {
            put_json(&mut txn, tables.records, &item.record_key, &item.intent.record)?;
            if let (Some(event_key), Some(event)) = (&item.event_key, &item.intent.event) {
                put_json(&mut txn, tables.events, event_key, event)?;
            }
        }
        reasons.push(reason);
    }

    if reasons.iter().any(Option::is_some) {
        txn.abort();
        debug!(
            items = items.len(),
            failed = reasons.iter().filter(|r| r.is_some()).count(),
            "lmdb transaction cancelled"
        );
        return Ok(TransactOutcome::Cancelled(reasons));
    }

    txn.commit().map_err(map_lmdb_error)?;
    Ok(TransactOutcome::Committed)
}
