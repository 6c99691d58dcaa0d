//! Per-record upgrade of stored entries.
//!
//! [`upgrade_entry`] is pure and idempotent. It runs opportunistically on
//! every entry read, authoritatively during the schema upgrade pass, and on
//! every record copied from a legacy database.

use serde_json::{Map, Value};

use crate::app::Result;
use crate::domain::ENTRY_RECORD_VERSION;
use crate::store::engine::{ObjectStore, Txn};

const VERSION_FIELD: &str = "_v";
const UPGRADE_BATCH: usize = 500;

/// Versions of the stored entry record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RecordVersion {
    /// Untagged records with boolean flags and a `bookmarked` field.
    Untagged = 0,
    /// Flags stored as integers, hash identifiers still present.
    IntegerFlags = 1,
    /// Hash identifiers retired; publisher id may be missing.
    NoHashes = 2,
    /// Publisher id and entry URL always present.
    Current = 3,
}

impl RecordVersion {
    fn of(record: &Map<String, Value>) -> Option<Self> {
        match record.get(VERSION_FIELD).and_then(Value::as_u64) {
            None | Some(0) => Some(RecordVersion::Untagged),
            Some(1) => Some(RecordVersion::IntegerFlags),
            Some(2) => Some(RecordVersion::NoHashes),
            Some(3) => Some(RecordVersion::Current),
            // Written by a newer build; leave untouched.
            Some(_) => None,
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            RecordVersion::Untagged => Some(RecordVersion::IntegerFlags),
            RecordVersion::IntegerFlags => Some(RecordVersion::NoHashes),
            RecordVersion::NoHashes => Some(RecordVersion::Current),
            RecordVersion::Current => None,
        }
    }
}

const _: () = assert!(RecordVersion::Current as u32 == ENTRY_RECORD_VERSION);

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => false,
    }
}

fn normalize_flag(record: &mut Map<String, Value>, field: &str) {
    if let Some(value) = record.get(field) {
        let flag = u8::from(truthy(value));
        record.insert(field.to_string(), Value::from(flag));
    }
}

fn normalize_deleted(record: &mut Map<String, Value>) {
    let normalized = match record.get("deleted") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Value::from(0),
        Some(Value::Bool(true)) => Value::from("trashed"),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Value::from(0),
            Some(2) => Value::from("deleted"),
            _ => Value::from("trashed"),
        },
        Some(Value::String(s)) if s == "deleted" => Value::from("deleted"),
        Some(Value::String(s)) if s == "trashed" => Value::from("trashed"),
        Some(_) => Value::from(0),
    };
    record.insert("deleted".to_string(), normalized);
}

fn default_field(record: &mut Map<String, Value>, field: &str, default: Value) {
    match record.get(field) {
        None | Some(Value::Null) => {
            record.insert(field.to_string(), default);
        }
        Some(_) => {}
    }
}

fn step(record: &mut Map<String, Value>, to: RecordVersion) {
    match to {
        RecordVersion::Untagged => {}
        RecordVersion::IntegerFlags => {
            if let Some(bookmarked) = record.remove("bookmarked") {
                let starred = record.get("starred").is_some_and(truthy);
                record.insert("starred".into(), Value::Bool(starred || truthy(&bookmarked)));
            }
            normalize_flag(record, "read");
            normalize_flag(record, "starred");
            normalize_flag(record, "marked_unread_on_update");
            normalize_deleted(record);
        }
        RecordVersion::NoHashes => {
            record.remove("primary_hash");
            record.remove("id_hash");
        }
        RecordVersion::Current => {
            default_field(record, "provided_id", Value::from(""));
            default_field(record, "entry_url", Value::from(""));
            default_field(record, "tags", Value::Array(Vec::new()));
            default_field(record, "read", Value::from(0));
            default_field(record, "starred", Value::from(0));
            default_field(record, "marked_unread_on_update", Value::from(0));
            default_field(record, "deleted", Value::from(0));
        }
    }
    record.insert(VERSION_FIELD.to_string(), Value::from(to as u32));
}

/// Bring a raw entry record to the current layout.
pub fn upgrade_entry(mut record: Value) -> Value {
    let Value::Object(ref mut map) = record else {
        return record;
    };
    let Some(mut version) = RecordVersion::of(map) else {
        return record;
    };
    while let Some(next) = version.next() {
        step(map, next);
        version = next;
    }
    record
}

/// Rewrite every stored entry whose layout is out of date. Returns the
/// number of records rewritten.
pub fn upgrade_all_entries(txn: &Txn<'_>) -> Result<usize> {
    let mut rewritten = 0;
    let mut after = None;

    loop {
        let batch = txn.scan_raw(ObjectStore::Entries, after.as_ref(), Some(UPGRADE_BATCH))?;
        let Some((last, _)) = batch.last() else {
            break;
        };
        after = Some(last.clone());

        for (pk, record) in batch {
            let upgraded = upgrade_entry(record.clone());
            if upgraded != record {
                txn.put_raw(ObjectStore::Entries, &pk, &upgraded)?;
                rewritten += 1;
            }
        }
    }

    Ok(rewritten)
}
