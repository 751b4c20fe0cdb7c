//! Records stored in the replicated log, the replica queue and the mutation
//! set. Bodies are JSON on the wire.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Fetch an already-produced part from a peer replica.
    GetPart,
    /// Merge `source_parts` into `new_part_name`.
    MergeParts,
    /// Rewrite one part at a higher mutation version.
    MutatePart,
    /// Drop every part contained in `new_part_name`'s range.
    DropRange,
    /// Clear one column in every part of `new_part_name`'s range.
    ClearColumn,
    /// Attach a detached part back into the working set.
    AttachPart,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::GetPart => "GET_PART",
            EntryType::MergeParts => "MERGE_PARTS",
            EntryType::MutatePart => "MUTATE_PART",
            EntryType::DropRange => "DROP_RANGE",
            EntryType::ClearColumn => "CLEAR_COLUMN",
            EntryType::AttachPart => "ATTACH_PART",
        };
        f.write_str(name)
    }
}

/// One replicated action. Immutable once written to the log; runtime
/// execution state lives on the queue's wrapper, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub entry_type: EntryType,
    /// Replica that originated the action.
    #[serde(default)]
    pub source_replica: String,
    /// The part this action produces.
    pub new_part_name: String,
    /// Source parts for MERGE_PARTS / MUTATE_PART.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_parts: Vec<String>,
    /// Column being cleared, for CLEAR_COLUMN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    /// Unix seconds at creation; 0 when the creator predates the field.
    #[serde(default)]
    pub create_time: u64,
}

impl LogEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("log entry serialization cannot fail")
    }

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data).map_err(|err| anyhow::anyhow!("malformed log entry: {err}"))
    }
}

/// A schema-less data transformation applied to whole parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MutationCommand {
    Delete { predicate: String },
    Update { column: String, expression: String },
}

/// One entry of the shared mutation set.
///
/// The mutation applies to every part whose data version is at most the
/// partition's boundary in `block_numbers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEntry {
    /// Node name under `/mutations`; assigned by the coordination service
    /// and monotonic, so it never travels in the body.
    #[serde(skip)]
    pub znode_name: String,
    #[serde(default)]
    pub create_time: u64,
    /// Per-partition block-number boundary.
    pub block_numbers: BTreeMap<String, i64>,
    pub commands: Vec<MutationCommand>,
}

impl MutationEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("mutation entry serialization cannot fail")
    }

    pub fn parse(data: &[u8], znode_name: &str) -> anyhow::Result<Self> {
        let mut entry: MutationEntry = serde_json::from_slice(data)
            .map_err(|err| anyhow::anyhow!("malformed mutation entry {znode_name}: {err}"))?;
        entry.znode_name = znode_name.to_string();
        Ok(entry)
    }
}

/// Body of `quorum/status`: the insert currently awaiting acknowledgements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumStatus {
    pub part_name: String,
    #[serde(default)]
    pub required_replicas: usize,
    #[serde(default)]
    pub replicas: Vec<String>,
}

impl QuorumStatus {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("quorum status serialization cannot fail")
    }

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data).map_err(|err| anyhow::anyhow!("malformed quorum status: {err}"))
    }
}
