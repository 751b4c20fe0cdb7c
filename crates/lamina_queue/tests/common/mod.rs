//! Shared fixtures for replication-queue integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use lamina_coord::memory::MemoryCoord;
use lamina_coord::{CoordClient, CreateMode};
use lamina_queue::storage::{MergeControl, PartMeta, PartState, PartStore};
use lamina_queue::{pad_index, EntryType, LogEntry, MutationCommand, MutationEntry, PartInfo, ReplicationQueue};

pub const TABLE: &str = "/tables/visits";
pub const REPLICA: &str = "/tables/visits/replicas/r1";

/// A coordination namespace with the fixed structure a table carries.
pub fn setup_coord() -> MemoryCoord {
    let coord = MemoryCoord::new();
    for path in [
        format!("{TABLE}/log"),
        format!("{TABLE}/mutations"),
        format!("{TABLE}/temp"),
        format!("{TABLE}/block_numbers"),
        format!("{TABLE}/quorum"),
        format!("{REPLICA}/queue"),
    ] {
        coord.ensure(&path).unwrap();
    }
    for node in ["min_unprocessed_insert_time", "max_processed_insert_time"] {
        coord
            .create(&format!("{REPLICA}/{node}"), b"0", CreateMode::Persistent)
            .unwrap();
    }
    coord
}

pub fn new_queue() -> ReplicationQueue {
    ReplicationQueue::new(TABLE, REPLICA)
}

pub fn log_get_part(name: &str, create_time: u64) -> LogEntry {
    LogEntry {
        entry_type: EntryType::GetPart,
        source_replica: "r2".to_string(),
        new_part_name: name.to_string(),
        source_parts: Vec::new(),
        column_name: None,
        create_time,
    }
}

pub fn log_merge(new_part: &str, sources: &[&str]) -> LogEntry {
    LogEntry {
        entry_type: EntryType::MergeParts,
        source_replica: "r2".to_string(),
        new_part_name: new_part.to_string(),
        source_parts: sources.iter().map(|s| s.to_string()).collect(),
        column_name: None,
        create_time: 0,
    }
}

/// Append one entry to the shared replication log at `index`.
pub fn add_log_entry(coord: &MemoryCoord, index: u64, entry: &LogEntry) {
    coord
        .create(
            &format!("{TABLE}/log/log-{}", pad_index(index)),
            &entry.to_bytes(),
            CreateMode::Persistent,
        )
        .unwrap();
}

/// Register one mutation with a single-partition boundary.
pub fn add_mutation(coord: &MemoryCoord, znode_name: &str, partition: &str, boundary: i64) {
    let entry = MutationEntry {
        znode_name: String::new(),
        create_time: 0,
        block_numbers: std::collections::BTreeMap::from([(partition.to_string(), boundary)]),
        commands: vec![MutationCommand::Delete {
            predicate: "value < 0".to_string(),
        }],
    };
    coord
        .create(
            &format!("{TABLE}/mutations/{znode_name}"),
            &entry.to_bytes(),
            CreateMode::Persistent,
        )
        .unwrap();
}

/// Simulate an in-progress insert holding `block` in `partition`.
pub fn add_insert_lock(coord: &MemoryCoord, partition: &str, block: i64) -> String {
    let holder = coord
        .create(
            &format!("{TABLE}/temp/abandonable_lock-"),
            b"",
            CreateMode::PersistentSequential,
        )
        .unwrap();
    coord
        .ensure(&format!("{TABLE}/block_numbers/{partition}"))
        .unwrap();
    coord
        .create(
            &format!("{TABLE}/block_numbers/{partition}/block-{block}"),
            holder.as_bytes(),
            CreateMode::Persistent,
        )
        .unwrap();
    holder
}

pub fn part(name: &str) -> PartInfo {
    PartInfo::parse(name).unwrap()
}

/// Spin until `predicate` holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

pub struct EmptyStore;

impl PartStore for EmptyStore {
    fn get_part_if_exists(&self, _name: &str, _states: &[PartState]) -> Option<PartMeta> {
        None
    }
}

/// A merge controller with a fully idle pool: any merge size is admissible.
pub struct IdleMerger;

impl MergeControl for IdleMerger {
    fn merges_cancelled(&self) -> bool {
        false
    }
    fn max_parts_size_for_merge(&self) -> u64 {
        u64::MAX
    }
    fn max_bytes_to_merge_at_max_space(&self) -> u64 {
        u64::MAX
    }
}
