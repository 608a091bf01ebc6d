use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::tag::CausalTag;

/// A column value: `Some(bytes)` when present (possibly empty), `None` for
/// an explicit null.
pub type ColumnValue = Option<Vec<u8>>;

/// One row's column values at a point in time.
///
/// A column missing from the map and a column mapped to `None` are both
/// treated as null by the row codec. An empty value is never null.
pub type Record = BTreeMap<String, ColumnValue>;

/// Identifier pair (namespace, table) used as a map key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    pub schema: String,
    pub table: String,
}

impl Relation {
    pub fn new(schema: &str, table: &str) -> Self {
        Relation {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A single captured change.
///
/// `tags` lists the causal tags the writer had observed on the row when the
/// change was made. A fresh insert usually carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Insert {
        relation: Relation,
        record: Record,
        tags: Vec<CausalTag>,
    },
    Update {
        relation: Relation,
        old_record: Option<Record>,
        record: Record,
        tags: Vec<CausalTag>,
    },
    Delete {
        relation: Relation,
        old_record: Record,
        tags: Vec<CausalTag>,
    },
    TruncateRelation {
        relation: Relation,
    },
}

impl Change {
    pub fn relation(&self) -> &Relation {
        match self {
            Change::Insert { relation, .. }
            | Change::Update { relation, .. }
            | Change::Delete { relation, .. }
            | Change::TruncateRelation { relation } => relation,
        }
    }

    /// Observed tags carried by the change (empty for truncation)
    pub fn tags(&self) -> &[CausalTag] {
        match self {
            Change::Insert { tags, .. } | Change::Update { tags, .. } | Change::Delete { tags, .. } => tags,
            Change::TruncateRelation { .. } => &[],
        }
    }

    /// The record carrying new values, if the change has one
    pub fn record(&self) -> Option<&Record> {
        match self {
            Change::Insert { record, .. } | Change::Update { record, .. } => Some(record),
            Change::Delete { .. } | Change::TruncateRelation { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Change::Insert { .. } => "insert",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
            Change::TruncateRelation { .. } => "truncate",
        }
    }
}

/// Opaque position in the origin's change log. Positions from one origin are
/// totally ordered by byte comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition(pub Vec<u8>);

impl LogPosition {
    /// Big-endian encoding keeps numeric order under byte comparison
    pub fn from_u64(lsn: u64) -> Self {
        LogPosition(lsn.to_be_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// One-shot acknowledgement handed over with a transaction.
#[derive(Debug)]
pub struct AckHandle {
    sender: oneshot::Sender<LogPosition>,
}

impl AckHandle {
    /// Create a handle and the receiver the capture side waits on
    pub fn channel() -> (Self, oneshot::Receiver<LogPosition>) {
        let (sender, receiver) = oneshot::channel();
        (AckHandle { sender }, receiver)
    }

    /// Acknowledge the position. Returns false if nobody is listening anymore.
    pub fn ack(self, position: LogPosition) -> bool {
        self.sender.send(position).is_ok()
    }
}

/// Ordered changes committed together on one origin.
#[derive(Debug)]
pub struct Transaction {
    pub changes: Vec<Change>,
    pub origin: String,
    /// Commit time in Unix milliseconds
    pub commit_timestamp: u64,
    pub log_position: LogPosition,
    ack: Option<AckHandle>,
}

impl Transaction {
    pub fn new(origin: &str, commit_timestamp: u64, log_position: LogPosition, changes: Vec<Change>) -> Self {
        Transaction {
            changes,
            origin: origin.to_string(),
            commit_timestamp,
            log_position,
            ack: None,
        }
    }

    pub fn with_ack(mut self, ack: AckHandle) -> Self {
        self.ack = Some(ack);
        self
    }

    /// The tag every write in this transaction is recorded under
    pub fn causal_tag(&self) -> CausalTag {
        CausalTag::new(&self.origin, self.commit_timestamp)
    }

    /// Invoke the acknowledgement capability. Only the first call does anything.
    pub fn acknowledge(&mut self) -> bool {
        match self.ack.take() {
            Some(handle) => handle.ack(self.log_position.clone()),
            None => false,
        }
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
