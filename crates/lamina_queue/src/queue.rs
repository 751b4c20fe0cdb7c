//! The per-replica replication queue.
//!
//! One instance per (table, replica) pair. The queue is the replica's local,
//! durable copy of the shared replication log plus the bookkeeping needed to
//! execute it safely: virtual parts, in-flight reservations, mutation
//! versions, quorum state and insert-time hints.
//!
//! Locking, outer to inner: `pull_mutex` → `mutation_mutex` → `state` →
//! `QueueEntry::exec`. No coordination-service round-trip happens under
//! `state`; insert-time hints computed under it are flushed afterwards, which
//! admits a short window where the persisted hints lag the true minimum.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::{Arc, Condvar, Mutex};

use anyhow::Context;
use serde::Serialize;

use lamina_coord::{
    children_or_empty, CoordClient, CoordError, CoordRequest, CoordResponse, CreateMode,
    WatchEvent,
};

use crate::log_entry::{EntryType, LogEntry, MutationCommand, MutationEntry, QuorumStatus};
use crate::part_info::{PartInfo, PROBE_LEVEL};
use crate::part_set::PartSet;
use crate::storage::{MergeControl, PartState, PartStore};
use crate::{pad_index, unix_time};

/// Op-count ceiling per coordination multi-request; stays well below the
/// service's request-size limit at typical entry sizes.
const MAX_MULTI_OPS: usize = 100;

const LOG_NODE_PREFIX: &str = "log-";
const BLOCK_NODE_PREFIX: &str = "block-";
const ABANDONABLE_LOCK_PREFIX: &str = "abandonable_lock-";

/// Mutable execution bookkeeping attached to a queue entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntryRuntime {
    pub currently_executing: bool,
    pub num_tries: u32,
    pub last_attempt_time: u64,
    pub num_postponed: u32,
    pub last_postpone_time: u64,
    pub postpone_reason: String,
    /// The part the worker actually produced, when it differs from the
    /// planned one (e.g. a wider merged part was downloaded instead).
    pub actual_new_part_name: Option<String>,
    pub last_exception: Option<String>,
}

/// A log entry as held by this replica's queue.
pub struct QueueEntry {
    /// Node name under the replica's `/queue`, assigned at persistence;
    /// dictates FIFO order among equal-priority entries.
    pub znode_name: String,
    pub data: LogEntry,
    pub new_part_info: PartInfo,
    exec: Mutex<EntryRuntime>,
    execution_complete: Condvar,
}

impl QueueEntry {
    fn new(znode_name: String, data: LogEntry, new_part_info: PartInfo) -> Self {
        Self {
            znode_name,
            data,
            new_part_info,
            exec: Mutex::new(EntryRuntime::default()),
            execution_complete: Condvar::new(),
        }
    }

    pub fn currently_executing(&self) -> bool {
        self.exec.lock().unwrap().currently_executing
    }

    pub fn runtime(&self) -> EntryRuntime {
        self.exec.lock().unwrap().clone()
    }

    /// Block until no execution holds this entry.
    fn wait_execution_complete(&self) {
        let mut exec = self.exec.lock().unwrap();
        while exec.currently_executing {
            exec = self.execution_complete.wait(exec).unwrap();
        }
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("znode_name", &self.znode_name)
            .field("type", &self.data.entry_type)
            .field("new_part_name", &self.data.new_part_name)
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    /// Pending entries; DROP_RANGE at the front, everything else appended.
    queue: VecDeque<Arc<QueueEntry>>,
    /// `(create_time, znode_name)` for every GET_PART entry in `queue`.
    inserts_by_time: BTreeSet<(u64, String)>,
    /// Parts this replica has observed in its queue snapshot.
    virtual_parts: PartSet,
    /// As `virtual_parts`, plus parts of log entries not yet copied here.
    next_virtual_parts: PartSet,
    /// Block numbers held by live insert locks, per partition.
    current_inserts: HashMap<String, BTreeSet<i64>>,
    /// Part names reserved by in-flight executions.
    future_parts: HashSet<String>,
    /// Mutation set ordered by znode name.
    mutations: VecDeque<Arc<MutationEntry>>,
    mutations_by_partition: HashMap<String, BTreeMap<i64, Arc<MutationEntry>>>,
    last_quorum_part: Option<String>,
    inprogress_quorum_part: Option<String>,
    /// Unix seconds; 0 means "no unprocessed inserts".
    min_unprocessed_insert_time: u64,
    max_processed_insert_time: u64,
    last_queue_update: u64,
}

/// Aggregate queue counters for the observability surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    pub future_parts: usize,
    pub queue_size: usize,
    pub inserts_in_queue: usize,
    pub merges_in_queue: usize,
    pub mutations_in_queue: usize,
    pub queue_oldest_time: u64,
    pub inserts_oldest_time: u64,
    pub merges_oldest_time: u64,
    pub mutations_oldest_time: u64,
    pub oldest_part_to_get: Option<String>,
    pub oldest_part_to_merge_to: Option<String>,
    pub oldest_part_to_mutate_to: Option<String>,
    pub last_queue_update: u64,
}

/// Point-in-time copy of one queue entry for the observability surface.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub znode_name: String,
    pub data: LogEntry,
    pub runtime: EntryRuntime,
}

pub struct ReplicationQueue {
    /// Shared table prefix in the coordination service (`/tables/<table>`).
    table_path: String,
    /// This replica's prefix (`<table_path>/replicas/<replica>`).
    replica_path: String,
    state: Mutex<QueueState>,
    /// Serializes `pull_logs_to_queue`.
    pull_mutex: Mutex<()>,
    /// Serializes `update_mutations`.
    mutation_mutex: Mutex<()>,
}

/// A selected entry plus the guard reserving its output parts.
pub struct SelectedEntry<'a> {
    pub entry: Arc<QueueEntry>,
    pub guard: CurrentlyExecuting<'a>,
}

impl ReplicationQueue {
    pub fn new(table_path: impl Into<String>, replica_path: impl Into<String>) -> Self {
        Self {
            table_path: table_path.into(),
            replica_path: replica_path.into(),
            state: Mutex::new(QueueState::default()),
            pull_mutex: Mutex::new(()),
            mutation_mutex: Mutex::new(()),
        }
    }

    pub fn table_path(&self) -> &str {
        &self.table_path
    }

    pub fn replica_path(&self) -> &str {
        &self.replica_path
    }

    /// Seed the virtual-parts sets from the parts already on disk and load
    /// this replica's durable queue. Called once at startup.
    pub fn initialize<I, S>(&self, parts: I, coord: &dyn CoordClient) -> anyhow::Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.init_virtual_parts(parts)?;
        self.load(coord)
    }

    pub fn init_virtual_parts<I, S>(&self, parts: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock().unwrap();
        for part in parts {
            let name = part.as_ref();
            let info = PartInfo::parse(name)?;
            state.next_virtual_parts.add_info(name.to_string(), info);
        }
        state.virtual_parts = state.next_virtual_parts.clone();
        Ok(())
    }

    /// Load entries already persisted under this replica's `/queue`,
    /// skipping any that are present in memory. Returns whether anything
    /// new was loaded.
    pub fn load(&self, coord: &dyn CoordClient) -> anyhow::Result<bool> {
        let queue_path = format!("{}/queue", self.replica_path);
        tracing::debug!(path = %queue_path, "loading queue");

        let already_loaded: HashSet<String> = {
            let state = self.state.lock().unwrap();
            state.queue.iter().map(|e| e.znode_name.clone()).collect()
        };

        let mut children = children_or_empty(coord, &queue_path).context("list replica queue")?;
        let total = children.len();
        children.retain(|name| !already_loaded.contains(name));
        children.sort();
        tracing::debug!(
            to_load = children.len(),
            already_loaded = total - children.len(),
            "queue entries to load"
        );

        let paths: Vec<String> = children
            .iter()
            .map(|name| format!("{queue_path}/{name}"))
            .collect();
        let bodies = coord.get_many(&paths).context("fetch queue entries")?;

        let mut loaded = Vec::with_capacity(children.len());
        for (name, body) in children.iter().zip(bodies) {
            let body =
                body.ok_or_else(|| anyhow::anyhow!("queue entry {name} disappeared during load"))?;
            let data = LogEntry::parse(&body)?;
            let info = PartInfo::parse(&data.new_part_name)
                .with_context(|| format!("queue entry {name}"))?;
            loaded.push(Arc::new(QueueEntry::new(name.clone(), data, info)));
        }

        let updated = !loaded.is_empty();
        let mut min_unprocessed_insert_time_changed = None;
        {
            let mut state = self.state.lock().unwrap();
            for entry in loaded {
                Self::insert_unlocked(&mut state, entry, &mut min_unprocessed_insert_time_changed);
            }
        }
        self.update_times_in_coord(coord, min_unprocessed_insert_time_changed, None);

        tracing::debug!("loaded queue");
        Ok(updated)
    }

    /// Add one entry to the in-memory queue and flush changed time hints.
    pub fn insert(
        &self,
        coord: &dyn CoordClient,
        znode_name: &str,
        data: LogEntry,
    ) -> anyhow::Result<Arc<QueueEntry>> {
        let info = PartInfo::parse(&data.new_part_name)?;
        let entry = Arc::new(QueueEntry::new(znode_name.to_string(), data, info));

        let mut min_unprocessed_insert_time_changed = None;
        {
            let mut state = self.state.lock().unwrap();
            Self::insert_unlocked(
                &mut state,
                entry.clone(),
                &mut min_unprocessed_insert_time_changed,
            );
        }
        self.update_times_in_coord(coord, min_unprocessed_insert_time_changed, None);
        Ok(entry)
    }

    fn insert_unlocked(
        state: &mut QueueState,
        entry: Arc<QueueEntry>,
        min_unprocessed_insert_time_changed: &mut Option<u64>,
    ) {
        state
            .next_virtual_parts
            .add_info(entry.data.new_part_name.clone(), entry.new_part_info.clone());

        // Drops go to the front so parts that are about to disappear are not
        // fetched first.
        if entry.data.entry_type == EntryType::DropRange {
            state.queue.push_front(entry.clone());
        } else {
            state.queue.push_back(entry.clone());
        }

        if entry.data.entry_type == EntryType::GetPart {
            state
                .inserts_by_time
                .insert((entry.data.create_time, entry.znode_name.clone()));
            if entry.data.create_time != 0
                && (state.min_unprocessed_insert_time == 0
                    || entry.data.create_time < state.min_unprocessed_insert_time)
            {
                state.min_unprocessed_insert_time = entry.data.create_time;
                *min_unprocessed_insert_time_changed = Some(entry.data.create_time);
            }
        }
    }

    fn update_times_on_removal(
        state: &mut QueueState,
        entry: &QueueEntry,
        min_unprocessed_insert_time_changed: &mut Option<u64>,
        max_processed_insert_time_changed: &mut Option<u64>,
    ) {
        if entry.data.entry_type != EntryType::GetPart {
            return;
        }

        state
            .inserts_by_time
            .remove(&(entry.data.create_time, entry.znode_name.clone()));

        match state.inserts_by_time.iter().next() {
            None => {
                state.min_unprocessed_insert_time = 0;
                *min_unprocessed_insert_time_changed = Some(0);
            }
            Some((first_time, _)) => {
                if *first_time > state.min_unprocessed_insert_time {
                    state.min_unprocessed_insert_time = *first_time;
                    *min_unprocessed_insert_time_changed = Some(*first_time);
                }
            }
        }

        if entry.data.create_time > state.max_processed_insert_time {
            state.max_processed_insert_time = entry.data.create_time;
            *max_processed_insert_time_changed = Some(state.max_processed_insert_time);
        }
    }

    /// Best-effort flush of the insert-time hints. The next pull reconverges
    /// if this write is lost.
    fn update_times_in_coord(
        &self,
        coord: &dyn CoordClient,
        min_unprocessed_insert_time_changed: Option<u64>,
        max_processed_insert_time_changed: Option<u64>,
    ) {
        let mut ops = Vec::new();
        if let Some(min_time) = min_unprocessed_insert_time_changed {
            ops.push(CoordRequest::Set {
                path: format!("{}/min_unprocessed_insert_time", self.replica_path),
                data: min_time.to_string().into_bytes(),
            });
        }
        if let Some(max_time) = max_processed_insert_time_changed {
            ops.push(CoordRequest::Set {
                path: format!("{}/max_processed_insert_time", self.replica_path),
                data: max_time.to_string().into_bytes(),
            });
        }
        if ops.is_empty() {
            return;
        }
        if let Err(err) = coord.multi(&ops) {
            tracing::error!(
                error = %err,
                replica = %self.replica_path,
                "couldn't set insert time nodes; this shouldn't happen often"
            );
        }
    }

    /// Remove a finished entry from the durable queue and memory.
    pub fn remove_entry(&self, coord: &dyn CoordClient, entry: &Arc<QueueEntry>) {
        let node_path = format!("{}/queue/{}", self.replica_path, entry.znode_name);
        if let Err(err) = coord.try_remove(&node_path) {
            tracing::error!(error = %err, path = %node_path, "couldn't remove queue node; this shouldn't happen often");
        }

        let mut min_unprocessed_insert_time_changed = None;
        let mut max_processed_insert_time_changed = None;
        {
            let mut state = self.state.lock().unwrap();
            // Scan from the tail: entries picked for execution are rotated
            // there, so a just-finished entry is near the end.
            if let Some(pos) = state.queue.iter().rposition(|e| Arc::ptr_eq(e, entry)) {
                state.queue.remove(pos);
            }
            Self::update_times_on_removal(
                &mut state,
                entry,
                &mut min_unprocessed_insert_time_changed,
                &mut max_processed_insert_time_changed,
            );
        }
        self.update_times_in_coord(
            coord,
            min_unprocessed_insert_time_changed,
            max_processed_insert_time_changed,
        );
    }

    /// Remove the first entry producing `part_name`. Returns whether one
    /// was found.
    pub fn remove_part(&self, coord: &dyn CoordClient, part_name: &str) -> bool {
        let mut min_unprocessed_insert_time_changed = None;
        let mut max_processed_insert_time_changed = None;

        let found = {
            let mut state = self.state.lock().unwrap();
            match state
                .queue
                .iter()
                .position(|e| e.data.new_part_name == part_name)
            {
                Some(pos) => {
                    let entry = state.queue.remove(pos).expect("position is in bounds");
                    Self::update_times_on_removal(
                        &mut state,
                        &entry,
                        &mut min_unprocessed_insert_time_changed,
                        &mut max_processed_insert_time_changed,
                    );
                    Some(entry)
                }
                None => None,
            }
        };

        let Some(entry) = found else {
            return false;
        };

        let node_path = format!("{}/queue/{}", self.replica_path, entry.znode_name);
        if let Err(err) = coord.try_remove(&node_path) {
            tracing::error!(error = %err, path = %node_path, "couldn't remove queue node; this shouldn't happen often");
        }
        self.update_times_in_coord(
            coord,
            min_unprocessed_insert_time_changed,
            max_processed_insert_time_changed,
        );
        true
    }

    /// Remove every part-producing entry whose output lies inside
    /// `part_name`'s range, then wait for in-flight executions among them to
    /// finish. Used before dropping the range.
    pub fn remove_part_producing_ops_in_range(
        &self,
        coord: &dyn CoordClient,
        part_name: &str,
    ) -> anyhow::Result<()> {
        let range = PartInfo::parse(part_name)?;

        let mut to_wait = Vec::new();
        let mut node_paths = Vec::new();
        let mut min_unprocessed_insert_time_changed = None;
        let mut max_processed_insert_time_changed = None;
        {
            let mut state = self.state.lock().unwrap();
            let mut idx = 0;
            while idx < state.queue.len() {
                let in_range = {
                    let entry = &state.queue[idx];
                    matches!(
                        entry.data.entry_type,
                        EntryType::GetPart | EntryType::MergeParts | EntryType::MutatePart
                    ) && range.contains(&entry.new_part_info)
                };
                if !in_range {
                    idx += 1;
                    continue;
                }
                let entry = state.queue.remove(idx).expect("index is in bounds");
                if entry.currently_executing() {
                    to_wait.push(entry.clone());
                }
                node_paths.push(format!("{}/queue/{}", self.replica_path, entry.znode_name));
                Self::update_times_on_removal(
                    &mut state,
                    &entry,
                    &mut min_unprocessed_insert_time_changed,
                    &mut max_processed_insert_time_changed,
                );
            }
        }

        for path in &node_paths {
            if let Err(err) = coord.try_remove(path) {
                tracing::info!(error = %err, path = %path, "couldn't remove queue node");
            }
        }
        self.update_times_in_coord(
            coord,
            min_unprocessed_insert_time_changed,
            max_processed_insert_time_changed,
        );

        tracing::debug!(
            removed = node_paths.len(),
            executing = to_wait.len(),
            range = %part_name,
            "removed entries producing parts in range; waiting for in-flight executions"
        );

        for entry in to_wait {
            entry.wait_execution_complete();
        }
        Ok(())
    }

    /// Move entries producing the sources of the merge that consumes
    /// `part_name` behind that merge entry, so they are executed or cancelled
    /// before the merge is retried. Returns the merge's source-part set.
    pub fn move_sibling_parts_for_merge_to_end_of_queue(
        &self,
        part_name: &str,
    ) -> HashSet<String> {
        let mut state = self.state.lock().unwrap();

        let mut parts_for_merge = HashSet::new();
        let mut merge_pos = None;
        for (idx, entry) in state.queue.iter().enumerate() {
            if matches!(
                entry.data.entry_type,
                EntryType::MergeParts | EntryType::MutatePart
            ) && entry.data.source_parts.iter().any(|p| p == part_name)
            {
                parts_for_merge = entry.data.source_parts.iter().cloned().collect();
                merge_pos = Some(idx);
                break;
            }
        }
        let Some(mut merge_pos) = merge_pos else {
            return parts_for_merge;
        };

        let mut idx = 0;
        while idx < merge_pos {
            let moves = {
                let entry = &state.queue[idx];
                matches!(
                    entry.data.entry_type,
                    EntryType::GetPart | EntryType::MergeParts | EntryType::MutatePart
                ) && parts_for_merge.contains(&entry.data.new_part_name)
            };
            if moves {
                let entry = state.queue.remove(idx).expect("index is in bounds");
                state.queue.push_back(entry);
                merge_pos -= 1;
            } else {
                idx += 1;
            }
        }

        parts_for_merge
    }

    /// Pull new entries from the shared log into this replica's durable
    /// queue, advancing the log pointer atomically with each copied batch.
    /// Returns whether any entries were copied.
    pub fn pull_logs_to_queue(
        &self,
        coord: &dyn CoordClient,
        next_update_watch: Option<&WatchEvent>,
    ) -> anyhow::Result<bool> {
        let _pull_guard = self.pull_mutex.lock().unwrap();

        let log_path = format!("{}/log", self.table_path);
        let pointer_path = format!("{}/log_pointer", self.replica_path);

        let pointer_raw = coord.try_get(&pointer_path).context("read log pointer")?;

        let mut log_entries = match next_update_watch {
            Some(watch) => coord.get_children_watch(&log_path, watch),
            None => coord.get_children(&log_path),
        }
        .context("list replication log")?;

        // Refresh mutations after listing the log but before inserting its
        // entries: any queue snapshot observed later is then no fresher than
        // the mutation view.
        self.update_mutations(coord, None)?;

        let index: u64 = match pointer_raw.as_deref().filter(|raw| !raw.is_empty()) {
            Some(raw) => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "malformed log pointer {:?} at {pointer_path}",
                        String::from_utf8_lossy(raw)
                    )
                })?,
            None => {
                // No pointer yet: start from the oldest entry still in the log.
                let seed = match log_entries.iter().min() {
                    Some(name) => parse_log_index(name, &log_path)?,
                    None => 0,
                };
                let data = pad_index(seed).into_bytes();
                if pointer_raw.is_none() {
                    coord
                        .create(&pointer_path, &data, CreateMode::Persistent)
                        .context("create log pointer")?;
                } else {
                    coord.set(&pointer_path, &data).context("seed log pointer")?;
                }
                seed
            }
        };

        let mut min_log_entry = format!("{LOG_NODE_PREFIX}{}", pad_index(index));
        log_entries.retain(|name| name.as_str() >= min_log_entry.as_str());
        log_entries.sort();
        let pulled_any = !log_entries.is_empty();

        for batch in log_entries.chunks(MAX_MULTI_OPS) {
            let last_name = batch.last().expect("chunks are non-empty");
            let last_index = parse_log_index(last_name, &log_path)?;
            tracing::debug!(
                count = batch.len(),
                first = %batch[0],
                last = %last_name,
                "pulling entries to queue"
            );

            let paths: Vec<String> = batch
                .iter()
                .map(|name| format!("{log_path}/{name}"))
                .collect();
            let bodies = coord.get_many(&paths).context("fetch log entries")?;

            let mut ops = Vec::with_capacity(batch.len() + 2);
            let mut copied = Vec::with_capacity(batch.len());
            for (name, body) in batch.iter().zip(bodies) {
                let body = body
                    .ok_or_else(|| anyhow::anyhow!("log entry {name} disappeared during pull"))?;
                let data = LogEntry::parse(&body).with_context(|| format!("log entry {name}"))?;
                let info = PartInfo::parse(&data.new_part_name)
                    .with_context(|| format!("log entry {name}"))?;
                ops.push(CoordRequest::Create {
                    path: format!("{}/queue/queue-", self.replica_path),
                    data: body,
                    mode: CreateMode::PersistentSequential,
                });
                copied.push((data, info));
            }

            // Tighten the unprocessed-insert floor up front so the same multi
            // persists it along with the entries.
            let mut min_unprocessed_insert_time_changed = None;
            {
                let mut state = self.state.lock().unwrap();
                for (data, _) in &copied {
                    if data.entry_type == EntryType::GetPart
                        && data.create_time != 0
                        && (state.min_unprocessed_insert_time == 0
                            || data.create_time < state.min_unprocessed_insert_time)
                    {
                        state.min_unprocessed_insert_time = data.create_time;
                        min_unprocessed_insert_time_changed = Some(data.create_time);
                    }
                }
            }

            ops.push(CoordRequest::Set {
                path: pointer_path.clone(),
                data: pad_index(last_index + 1).into_bytes(),
            });
            if let Some(min_time) = min_unprocessed_insert_time_changed {
                ops.push(CoordRequest::Set {
                    path: format!("{}/min_unprocessed_insert_time", self.replica_path),
                    data: min_time.to_string().into_bytes(),
                });
            }

            let responses = coord.multi(&ops).context("commit pulled entries")?;

            // The multi committed. Failing to mirror it in memory from here on
            // means in-memory and persistent state diverge, which would
            // corrupt the coordination service on later writes. Die instead.
            let stamped: anyhow::Result<()> = (|| {
                let mut state = self.state.lock().unwrap();
                for (response, (data, info)) in responses.iter().zip(copied) {
                    let CoordResponse::Created { path } = response else {
                        anyhow::bail!("unexpected multi response while stamping queue entries");
                    };
                    let znode_name = path
                        .rsplit('/')
                        .next()
                        .filter(|name| !name.is_empty())
                        .ok_or_else(|| anyhow::anyhow!("malformed created path {path}"))?
                        .to_string();
                    let entry = Arc::new(QueueEntry::new(znode_name, data, info));
                    let mut unused = None;
                    Self::insert_unlocked(&mut state, entry, &mut unused);
                }
                state.last_queue_update = unix_time();
                Ok(())
            })();
            if let Err(err) = stamped {
                tracing::error!(
                    error = ?err,
                    "failed to stamp pulled queue entries after commit; \
                     memory and coordination state have diverged"
                );
                std::process::abort();
            }

            min_log_entry = format!("{LOG_NODE_PREFIX}{}", pad_index(last_index + 1));
            tracing::debug!(count = batch.len(), "pulled entries to queue");
        }

        // One refresh pass for everything selection needs besides the queue
        // itself: live insert locks, quorum state, and parts of log entries
        // this replica has not copied yet.
        let new_current_inserts = self.load_current_inserts(coord)?;

        let new_last_quorum_part = coord
            .try_get(&format!("{}/quorum/last_part", self.table_path))?
            .and_then(|raw| {
                let name = String::from_utf8_lossy(&raw).trim().to_string();
                (!name.is_empty()).then_some(name)
            });

        let new_inprogress_quorum_part =
            match coord.try_get(&format!("{}/quorum/status", self.table_path))? {
                Some(raw) if !raw.is_empty() => Some(QuorumStatus::parse(&raw)?.part_name),
                _ => None,
            };

        let mut uncopied = coord.get_children(&log_path).context("relist replication log")?;
        uncopied.retain(|name| name.as_str() >= min_log_entry.as_str());
        uncopied.sort();
        let paths: Vec<String> = uncopied
            .iter()
            .map(|name| format!("{log_path}/{name}"))
            .collect();
        let bodies = coord.get_many(&paths).context("fetch uncopied log entries")?;
        let mut upcoming_parts = Vec::new();
        for (name, body) in uncopied.iter().zip(bodies) {
            // Entries may be cleaned up between the listing and the read.
            let Some(body) = body else { continue };
            let data = LogEntry::parse(&body).with_context(|| format!("log entry {name}"))?;
            let info = PartInfo::parse(&data.new_part_name)
                .with_context(|| format!("log entry {name}"))?;
            upcoming_parts.push((data.new_part_name, info));
        }

        {
            let mut state = self.state.lock().unwrap();
            state.virtual_parts = state.next_virtual_parts.clone();
            state.current_inserts = new_current_inserts;
            state.last_quorum_part = new_last_quorum_part;
            state.inprogress_quorum_part = new_inprogress_quorum_part;
            for (name, info) in upcoming_parts {
                state.next_virtual_parts.add_info(name, info);
            }
        }

        Ok(pulled_any)
    }

    /// Block numbers still held by live insert locks, grouped by partition.
    fn load_current_inserts(
        &self,
        coord: &dyn CoordClient,
    ) -> anyhow::Result<HashMap<String, BTreeSet<i64>>> {
        let mut result = HashMap::new();

        let temp_path = format!("{}/temp", self.table_path);
        let mut lock_holders = HashSet::new();
        for name in children_or_empty(coord, &temp_path).context("list insert locks")? {
            if name.starts_with(ABANDONABLE_LOCK_PREFIX) {
                lock_holders.insert(format!("{temp_path}/{name}"));
            }
        }
        if lock_holders.is_empty() {
            return Ok(result);
        }

        let blocks_path = format!("{}/block_numbers", self.table_path);
        struct BlockRef {
            partition: String,
            number: i64,
            path: String,
        }
        let mut blocks = Vec::new();
        for partition in children_or_empty(coord, &blocks_path).context("list block numbers")? {
            let partition_path = format!("{blocks_path}/{partition}");
            for name in children_or_empty(coord, &partition_path)? {
                let Some(number) = name
                    .strip_prefix(BLOCK_NODE_PREFIX)
                    .and_then(|n| n.parse::<i64>().ok())
                else {
                    continue;
                };
                blocks.push(BlockRef {
                    partition: partition.clone(),
                    number,
                    path: format!("{partition_path}/{name}"),
                });
            }
        }

        let paths: Vec<String> = blocks.iter().map(|b| b.path.clone()).collect();
        let bodies = coord.get_many(&paths).context("read block number locks")?;
        for (block, body) in blocks.into_iter().zip(bodies) {
            let Some(body) = body else { continue };
            if lock_holders.contains(String::from_utf8_lossy(&body).as_ref()) {
                result
                    .entry(block.partition)
                    .or_insert_with(BTreeSet::new)
                    .insert(block.number);
            }
        }
        Ok(result)
    }

    /// Refresh the local mutation set from `/mutations`: drop entries that
    /// fell off the front on the server, append strictly newer ones. Returns
    /// whether anything new was loaded.
    pub fn update_mutations(
        &self,
        coord: &dyn CoordClient,
        next_update_watch: Option<&WatchEvent>,
    ) -> anyhow::Result<bool> {
        let _mutation_guard = self.mutation_mutex.lock().unwrap();

        let mutations_path = format!("{}/mutations", self.table_path);
        let listing = match next_update_watch {
            Some(watch) => coord.get_children_watch(&mutations_path, watch),
            None => coord.get_children(&mutations_path),
        };
        let mut entries_in_coord = match listing {
            Ok(children) => children,
            Err(CoordError::NoNode) => Vec::new(),
            Err(err) => return Err(err).context("list mutations"),
        };
        entries_in_coord.sort();

        let entries_to_load: Vec<String> = {
            let mut state = self.state.lock().unwrap();

            if entries_in_coord.is_empty() {
                state.mutations.clear();
                state.mutations_by_partition.clear();
            } else {
                let min_name = entries_in_coord[0].clone();
                while state
                    .mutations
                    .front()
                    .is_some_and(|m| m.znode_name < min_name)
                {
                    let obsolete = state.mutations.pop_front().expect("front exists");
                    tracing::debug!(
                        mutation = %obsolete.znode_name,
                        "removing obsolete mutation from local state"
                    );
                    for (partition, block) in &obsolete.block_numbers {
                        if let Some(in_partition) = state.mutations_by_partition.get_mut(partition)
                        {
                            in_partition.remove(block);
                            if in_partition.is_empty() {
                                state.mutations_by_partition.remove(partition);
                            }
                        }
                    }
                }
            }

            match state.mutations.back() {
                None => entries_in_coord,
                Some(last) => {
                    let last_name = last.znode_name.clone();
                    entries_in_coord
                        .into_iter()
                        .filter(|name| *name > last_name)
                        .collect()
                }
            }
        };

        if entries_to_load.is_empty() {
            return Ok(false);
        }

        tracing::info!(
            count = entries_to_load.len(),
            first = %entries_to_load[0],
            last = %entries_to_load[entries_to_load.len() - 1],
            "loading mutation entries"
        );

        let paths: Vec<String> = entries_to_load
            .iter()
            .map(|name| format!("{mutations_path}/{name}"))
            .collect();
        let bodies = coord.get_many(&paths).context("fetch mutation entries")?;

        let mut new_mutations = Vec::with_capacity(entries_to_load.len());
        for (name, body) in entries_to_load.iter().zip(bodies) {
            let body = body.ok_or_else(|| {
                anyhow::anyhow!("mutation entry {name} disappeared during load")
            })?;
            new_mutations.push(Arc::new(MutationEntry::parse(&body, name)?));
        }

        {
            let mut state = self.state.lock().unwrap();
            for mutation in &new_mutations {
                for (partition, block) in &mutation.block_numbers {
                    state
                        .mutations_by_partition
                        .entry(partition.clone())
                        .or_default()
                        .insert(*block, mutation.clone());
                }
            }
            state.mutations.extend(new_mutations);
        }

        Ok(true)
    }

    /// The largest mutation block number at or below the part's data version,
    /// or −1 when none applies (0 is a valid mutation block number).
    fn current_mutation_version(state: &QueueState, part: &PartInfo) -> i64 {
        let Some(in_partition) = state.mutations_by_partition.get(&part.partition_id) else {
            return -1;
        };
        in_partition
            .range(..=part.data_version())
            .next_back()
            .map(|(block, _)| *block)
            .unwrap_or(-1)
    }

    /// No reservation for `name` itself and no reservation covering it.
    fn check_not_covered_by_future_parts(
        state: &QueueState,
        name: &str,
        info: &PartInfo,
    ) -> Result<(), String> {
        // The direct-name check is subsumed by the containment scan but gives
        // the common case a clearer diagnostic.
        if state.future_parts.contains(name) {
            return Err(format!(
                "not executing log entry for part {name} because another log entry \
                 for the same part is being processed; this shouldn't happen often"
            ));
        }
        for future_name in &state.future_parts {
            let Ok(future_info) = PartInfo::parse(future_name) else {
                continue;
            };
            if future_info.contains(info) {
                return Err(format!(
                    "not executing log entry for part {name} because it is covered by \
                     part {future_name} that is currently being produced"
                ));
            }
        }
        Ok(())
    }

    /// Currently-executing entries that block a CLEAR_COLUMN on `entry`'s
    /// range: part-producing operations inside the range, or another
    /// CLEAR_COLUMN on the same partition.
    fn clear_column_conflicts(
        state: &QueueState,
        entry: &QueueEntry,
    ) -> (Vec<Arc<QueueEntry>>, String) {
        let mut conflicts = Vec::new();
        for elem in &state.queue {
            if !elem.currently_executing() || elem.znode_name == entry.znode_name {
                continue;
            }
            match elem.data.entry_type {
                EntryType::GetPart
                | EntryType::MergeParts
                | EntryType::MutatePart
                | EntryType::AttachPart => {
                    if entry.new_part_info.contains(&elem.new_part_info) {
                        conflicts.push(elem.clone());
                    }
                }
                EntryType::ClearColumn => {
                    if elem.new_part_info.partition_id == entry.new_part_info.partition_id {
                        conflicts.push(elem.clone());
                    }
                }
                _ => {}
            }
        }

        let mut description = format!(
            "cannot execute {} entry {}: {} currently executing entries block it:",
            entry.data.entry_type,
            entry.znode_name,
            conflicts.len()
        );
        for conflict in &conflicts {
            description.push_str(&format!(
                " {} {} {},",
                conflict.data.entry_type, conflict.data.new_part_name, conflict.znode_name
            ));
        }
        (conflicts, description)
    }

    /// Whether `entry` may execute right now. `Err` carries the postpone
    /// reason.
    fn should_execute_log_entry(
        state: &QueueState,
        entry: &QueueEntry,
        merger: &dyn MergeControl,
        store: &dyn PartStore,
    ) -> Result<(), String> {
        if matches!(
            entry.data.entry_type,
            EntryType::GetPart | EntryType::MergeParts | EntryType::MutatePart | EntryType::AttachPart
        ) {
            if let Err(reason) = Self::check_not_covered_by_future_parts(
                state,
                &entry.data.new_part_name,
                &entry.new_part_info,
            ) {
                tracing::debug!(reason = %reason, "postponing queue entry");
                return Err(reason);
            }
        }

        if matches!(
            entry.data.entry_type,
            EntryType::MergeParts | EntryType::MutatePart
        ) {
            // If a source part is still being produced, wait for it. Missing
            // source parts are not an obstacle: execution will fall back to
            // fetching the merged part instead of merging locally.
            let mut sum_parts_size_in_bytes = 0u64;
            for name in &entry.data.source_parts {
                if state.future_parts.contains(name) {
                    let reason = format!(
                        "not merging into part {} because part {name} is not ready yet \
                         (log entry for that part is being processed)",
                        entry.data.new_part_name
                    );
                    tracing::trace!(reason = %reason, "postponing queue entry");
                    return Err(reason);
                }
                if let Some(part) = store.get_part_if_exists(
                    name,
                    &[
                        PartState::PreCommitted,
                        PartState::Committed,
                        PartState::Outdated,
                    ],
                ) {
                    sum_parts_size_in_bytes += part.bytes_on_disk;
                }
            }

            if merger.merges_cancelled() {
                let reason = format!(
                    "not executing log entry for part {} because merges are cancelled now",
                    entry.data.new_part_name
                );
                tracing::debug!(reason = %reason, "postponing queue entry");
                return Err(reason);
            }

            // Run a merge only when the pool has room for one of this size.
            // A budget at its ceiling means the pool is idle; any merge is
            // then allowed so explicit OPTIMIZE requests go through.
            let max_parts_size_for_merge = merger.max_parts_size_for_merge();
            if max_parts_size_for_merge != merger.max_bytes_to_merge_at_max_space()
                && sum_parts_size_in_bytes > max_parts_size_for_merge
            {
                let reason = format!(
                    "not executing log entry for part {} because its size \
                     ({sum_parts_size_in_bytes} bytes) is greater than the current \
                     maximum ({max_parts_size_for_merge} bytes)",
                    entry.data.new_part_name
                );
                tracing::debug!(reason = %reason, "postponing queue entry");
                return Err(reason);
            }
        }

        if entry.data.entry_type == EntryType::ClearColumn {
            let (conflicts, description) = Self::clear_column_conflicts(state, entry);
            if !conflicts.is_empty() {
                tracing::debug!(reason = %description, "postponing queue entry");
                return Err(description);
            }
        }

        Ok(())
    }

    /// Pick the first executable entry, rotate it to the tail and reserve its
    /// output part. Entries that fail eligibility get their postpone counters
    /// bumped. Returns `None` when nothing is executable.
    pub fn select_entry_to_process(
        &self,
        merger: &dyn MergeControl,
        store: &dyn PartStore,
    ) -> Option<SelectedEntry<'_>> {
        let mut state = self.state.lock().unwrap();

        let mut selected = None;
        for (idx, entry) in state.queue.iter().enumerate() {
            if entry.currently_executing() {
                continue;
            }
            match Self::should_execute_log_entry(&state, entry, merger, store) {
                Ok(()) => {
                    selected = Some(idx);
                    break;
                }
                Err(reason) => {
                    let mut exec = entry.exec.lock().unwrap();
                    exec.num_postponed += 1;
                    exec.last_postpone_time = unix_time();
                    exec.postpone_reason = reason;
                }
            }
        }

        let idx = selected?;
        let entry = state.queue.remove(idx).expect("index is in bounds");
        // Rotate to the tail so a failed attempt leaves the entry behind
        // everything that was queued after it.
        state.queue.push_back(entry.clone());

        let guard = CurrentlyExecuting::new(self, entry.clone(), &mut state);
        Some(SelectedEntry { entry, guard })
    }

    /// Run `func` on a selected entry. `Ok(true)` removes the entry from the
    /// queue; an error is stashed on the entry and reported to the caller so
    /// the entry can be re-attempted.
    pub fn process_entry<F>(
        &self,
        coord: &dyn CoordClient,
        entry: &Arc<QueueEntry>,
        func: F,
    ) -> bool
    where
        F: FnOnce(&Arc<QueueEntry>) -> anyhow::Result<bool>,
    {
        match func(entry) {
            Ok(true) => {
                self.remove_entry(coord, entry);
                true
            }
            Ok(false) => true,
            Err(err) => {
                entry.exec.lock().unwrap().last_exception = Some(format!("{err:#}"));
                false
            }
        }
    }

    /// Reserve `part_name` for the running execution unless an existing
    /// reservation already covers it. `Err` carries the reject reason.
    pub fn add_future_part_if_not_covered(
        &self,
        guard: &CurrentlyExecuting<'_>,
        part_name: &str,
    ) -> Result<(), String> {
        let info = PartInfo::parse(part_name).map_err(|err| err.to_string())?;

        let mut state = self.state.lock().unwrap();
        Self::check_not_covered_by_future_parts(&state, part_name, &info)?;
        guard.set_actual_part_name_unlocked(&mut state, part_name);
        Ok(())
    }

    /// Certify that a CLEAR_COLUMN entry is clear to run: no conflicting
    /// execution, and its range reservation is in place. A missing
    /// reservation is a caller bug.
    pub fn disable_merges_and_fetches_in_range(&self, entry: &QueueEntry) -> anyhow::Result<()> {
        let state = self.state.lock().unwrap();
        let (conflicts, description) = Self::clear_column_conflicts(&state, entry);
        anyhow::ensure!(conflicts.is_empty(), "{description}");
        assert!(
            state.future_parts.contains(&entry.data.new_part_name),
            "expected merges and fetches to be blocked in range {}. This is a bug.",
            entry.data.new_part_name
        );
        Ok(())
    }

    /// Stop admitting merges inside `part_name`'s range by planting the range
    /// in the virtual-parts set.
    pub fn disable_merges_in_range(&self, part_name: &str) -> anyhow::Result<()> {
        let info = PartInfo::parse(part_name)?;
        let mut state = self.state.lock().unwrap();
        state.virtual_parts.add_info(part_name.to_string(), info);
        Ok(())
    }

    /// Whether two adjacent parts may be merged, from this queue's point of
    /// view. `Err` carries the reject reason for the merge selector's logs.
    pub fn can_merge_parts(&self, left: &PartInfo, right: &PartInfo) -> Result<(), String> {
        let left_name = left.name();
        let right_name = right.name();

        // Selector bugs, but cheap to answer sensibly without the lock.
        if left_name == right_name {
            return Err(format!("cannot merge part {left_name} with itself"));
        }
        if left.partition_id != right.partition_id {
            return Err(format!(
                "parts {left_name} and {right_name} belong to different partitions"
            ));
        }

        let state = self.state.lock().unwrap();

        for (part, name) in [(left, &left_name), (right, &right_name)] {
            match state.virtual_parts.get_containing_part(part) {
                None => {
                    return Err(format!(
                        "entry for part {name} hasn't been read from the replication log yet"
                    ));
                }
                Some(containing) if containing != part => {
                    return Err(format!("a merge has already been assigned for {name}"));
                }
                Some(_) => {}
            }

            if state.last_quorum_part.as_deref() == Some(name.as_str()) {
                return Err(format!(
                    "part {name} is the most recent part with a satisfied quorum"
                ));
            }
            if state.inprogress_quorum_part.as_deref() == Some(name.as_str()) {
                return Err(format!(
                    "quorum insert for part {name} is currently in progress"
                ));
            }
        }

        let mut left_max = left.max_block;
        let mut right_min = right.min_block;
        if left_max > right_min {
            std::mem::swap(&mut left_max, &mut right_min);
        }

        if left_max + 1 < right_min {
            // Something could still land in the gap: an insert holding a
            // block number, or a part from a log entry not yet copied here.
            if let Some(ephemeral) = state.current_inserts.get(&left.partition_id) {
                if let Some(block) = ephemeral.range((Excluded(left_max), Unbounded)).next() {
                    if *block < right_min {
                        return Err(format!(
                            "block number {block} is still being inserted between parts \
                             {left_name} and {right_name}"
                        ));
                    }
                }
            }

            let gap = PartInfo {
                partition_id: left.partition_id.clone(),
                min_block: left_max + 1,
                max_block: right_min - 1,
                level: PROBE_LEVEL,
                version: None,
            };
            let covered = state.next_virtual_parts.parts_covered_by(&gap);
            if !covered.is_empty() {
                return Err(format!(
                    "there are {} parts (from {} to {}) that are still not ready between \
                     {left_name} and {right_name}",
                    covered.len(),
                    covered.first().expect("covered is non-empty"),
                    covered.last().expect("covered is non-empty")
                ));
            }
        }

        let left_version = Self::current_mutation_version(&state, left);
        let right_version = Self::current_mutation_version(&state, right);
        if left_version != right_version {
            return Err(format!(
                "current mutation versions of parts {left_name} and {right_name} differ: \
                 {left_version} and {right_version} respectively"
            ));
        }

        Ok(())
    }

    /// Whether `part` can be rewritten to a newer mutation version; returns
    /// the version to mutate to.
    pub fn can_mutate_part(&self, part: &PartInfo) -> Option<i64> {
        let state = self.state.lock().unwrap();

        let in_partition = state.mutations_by_partition.get(&part.partition_id)?;
        if state.virtual_parts.get_containing_part(part) != Some(part) {
            return None;
        }

        let desired_version = *in_partition.keys().next_back()?;
        let current_version = Self::current_mutation_version(&state, part);
        (current_version < desired_version).then_some(desired_version)
    }

    /// The commands to apply when mutating `part` up to `desired_version`:
    /// every mutation past the part's data version, through the desired one.
    /// Calling this without mutations for the partition, or with an unknown
    /// version, is a caller bug.
    pub fn mutation_commands_for_part(
        &self,
        part: &PartInfo,
        desired_version: i64,
    ) -> Vec<MutationCommand> {
        let state = self.state.lock().unwrap();

        let Some(in_partition) = state.mutations_by_partition.get(&part.partition_id) else {
            panic!(
                "no mutations for partition {} while mutating part {} to version {desired_version}. This is a bug.",
                part.partition_id,
                part.name()
            );
        };
        assert!(
            in_partition.contains_key(&desired_version),
            "mutation with version {desired_version} not found in partition {}. This is a bug.",
            part.partition_id
        );

        in_partition
            .range((Excluded(part.data_version()), Included(desired_version)))
            .flat_map(|(_, mutation)| mutation.commands.iter().cloned())
            .collect()
    }

    pub fn status(&self) -> Status {
        let state = self.state.lock().unwrap();

        let mut res = Status {
            future_parts: state.future_parts.len(),
            queue_size: state.queue.len(),
            last_queue_update: state.last_queue_update,
            ..Status::default()
        };

        for entry in &state.queue {
            let create_time = entry.data.create_time;
            if create_time != 0 && (res.queue_oldest_time == 0 || create_time < res.queue_oldest_time)
            {
                res.queue_oldest_time = create_time;
            }

            match entry.data.entry_type {
                EntryType::GetPart => {
                    res.inserts_in_queue += 1;
                    if create_time != 0
                        && (res.inserts_oldest_time == 0 || create_time < res.inserts_oldest_time)
                    {
                        res.inserts_oldest_time = create_time;
                        res.oldest_part_to_get = Some(entry.data.new_part_name.clone());
                    }
                }
                EntryType::MergeParts => {
                    res.merges_in_queue += 1;
                    if create_time != 0
                        && (res.merges_oldest_time == 0 || create_time < res.merges_oldest_time)
                    {
                        res.merges_oldest_time = create_time;
                        res.oldest_part_to_merge_to = Some(entry.data.new_part_name.clone());
                    }
                }
                EntryType::MutatePart => {
                    res.mutations_in_queue += 1;
                    if create_time != 0
                        && (res.mutations_oldest_time == 0
                            || create_time < res.mutations_oldest_time)
                    {
                        res.mutations_oldest_time = create_time;
                        res.oldest_part_to_mutate_to = Some(entry.data.new_part_name.clone());
                    }
                }
                _ => {}
            }
        }

        res
    }

    /// Snapshot of all queued entries.
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        let state = self.state.lock().unwrap();
        state
            .queue
            .iter()
            .map(|entry| EntrySnapshot {
                znode_name: entry.znode_name.clone(),
                data: entry.data.clone(),
                runtime: entry.runtime(),
            })
            .collect()
    }

    /// `(min_unprocessed_insert_time, max_processed_insert_time)`.
    pub fn insert_times(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (
            state.min_unprocessed_insert_time,
            state.max_processed_insert_time,
        )
    }

    pub fn count_merges_and_part_mutations(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .queue
            .iter()
            .filter(|entry| {
                matches!(
                    entry.data.entry_type,
                    EntryType::MergeParts | EntryType::MutatePart
                )
            })
            .count()
    }
}

/// Scoped reservation of an entry's output parts.
///
/// Construction (under the queue state lock) marks the entry executing and
/// reserves `new_part_name`; dropping it on any path clears the flag, wakes
/// completion waiters and releases every reservation it made.
pub struct CurrentlyExecuting<'a> {
    queue: &'a ReplicationQueue,
    entry: Arc<QueueEntry>,
}

impl<'a> CurrentlyExecuting<'a> {
    fn new(queue: &'a ReplicationQueue, entry: Arc<QueueEntry>, state: &mut QueueState) -> Self {
        {
            let mut exec = entry.exec.lock().unwrap();
            exec.currently_executing = true;
            exec.num_tries += 1;
            exec.last_attempt_time = unix_time();
        }
        assert!(
            state.future_parts.insert(entry.data.new_part_name.clone()),
            "tagging already tagged future part {}. This is a bug.",
            entry.data.new_part_name
        );
        Self { queue, entry }
    }

    /// Record the part the worker actually produced. Reserves it too when it
    /// differs from the planned part (e.g. a wider merged part was fetched).
    pub fn set_actual_part_name(&self, actual: &str) {
        let mut state = self.queue.state.lock().unwrap();
        self.set_actual_part_name_unlocked(&mut state, actual);
    }

    fn set_actual_part_name_unlocked(&self, state: &mut QueueState, actual: &str) {
        let mut exec = self.entry.exec.lock().unwrap();
        assert!(
            exec.actual_new_part_name.is_none(),
            "actual part name of entry {} is already set. This is a bug.",
            self.entry.znode_name
        );
        exec.actual_new_part_name = Some(actual.to_string());

        if actual == self.entry.data.new_part_name {
            return;
        }
        assert!(
            state.future_parts.insert(actual.to_string()),
            "tagging already tagged future part {actual}. This is a bug."
        );
    }
}

impl Drop for CurrentlyExecuting<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock().unwrap();

        let actual_new_part_name = {
            let mut exec = self.entry.exec.lock().unwrap();
            exec.currently_executing = false;
            exec.actual_new_part_name.take()
        };
        self.entry.execution_complete.notify_all();

        if !state.future_parts.remove(&self.entry.data.new_part_name) {
            tracing::error!(
                part = %self.entry.data.new_part_name,
                "untagging already untagged future part; this is a bug"
            );
        }
        if let Some(actual) = actual_new_part_name {
            if actual != self.entry.data.new_part_name && !state.future_parts.remove(&actual) {
                tracing::error!(
                    part = %actual,
                    "untagging already untagged future part; this is a bug"
                );
            }
        }
    }
}

fn parse_log_index(name: &str, log_path: &str) -> anyhow::Result<u64> {
    let digits = name.strip_prefix(LOG_NODE_PREFIX).ok_or_else(|| {
        anyhow::anyhow!("unexpected node {name} in {log_path}")
    })?;
    digits
        .parse()
        .map_err(|_| anyhow::anyhow!("unexpected node {name} in {log_path}"))
}
