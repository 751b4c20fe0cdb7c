//! Integration tests for the log puller and queue loading.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    add_log_entry, log_get_part, new_queue, setup_coord, wait_until, EmptyStore, IdleMerger,
    REPLICA, TABLE,
};
use lamina_coord::{CoordClient, WatchEvent};
use lamina_queue::runner::{spawn_puller, PullerConfig};
use lamina_queue::EntryType;

#[test]
fn first_pull_seeds_pointer_from_oldest_log_entry() {
    let coord = setup_coord();
    let queue = new_queue();

    // The log was already truncated below index 5 when this replica joined.
    add_log_entry(&coord, 5, &log_get_part("all_5_5_0", 100));
    add_log_entry(&coord, 6, &log_get_part("all_6_6_0", 200));

    assert!(queue.pull_logs_to_queue(&coord, None).unwrap());

    assert_eq!(coord.get(&format!("{REPLICA}/log_pointer")).unwrap(), b"0000000007");

    let entries = queue.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].data.new_part_name, "all_5_5_0");
    assert_eq!(entries[0].znode_name, "queue-0000000000");
    assert_eq!(entries[1].data.new_part_name, "all_6_6_0");
    assert_eq!(entries[1].znode_name, "queue-0000000001");

    // Both parts were published into the virtual set: two adjacent virtual
    // parts with equal mutation versions are mergeable.
    queue
        .can_merge_parts(&common::part("all_5_5_0"), &common::part("all_6_6_0"))
        .unwrap();

    // The durable queue mirrors the in-memory one.
    assert_eq!(
        coord.get_children(&format!("{REPLICA}/queue")).unwrap(),
        vec!["queue-0000000000".to_string(), "queue-0000000001".to_string()]
    );

    // The min-unprocessed-insert hint was persisted by the same multi.
    assert_eq!(
        coord
            .get(&format!("{REPLICA}/min_unprocessed_insert_time"))
            .unwrap(),
        b"100"
    );
}

#[test]
fn pulling_an_already_pulled_log_is_a_noop() {
    let coord = setup_coord();
    let queue = new_queue();

    add_log_entry(&coord, 0, &log_get_part("all_0_0_0", 10));
    assert!(queue.pull_logs_to_queue(&coord, None).unwrap());
    assert_eq!(queue.entries().len(), 1);

    assert!(!queue.pull_logs_to_queue(&coord, None).unwrap());
    assert_eq!(queue.entries().len(), 1);
    assert_eq!(
        coord.get_children(&format!("{REPLICA}/queue")).unwrap().len(),
        1
    );
}

#[test]
fn pull_copies_large_logs_in_batches() {
    let coord = setup_coord();
    let queue = new_queue();

    // Three multi batches' worth of entries.
    for index in 0..250u64 {
        add_log_entry(
            &coord,
            index,
            &log_get_part(&format!("all_{index}_{index}_0"), 0),
        );
    }

    assert!(queue.pull_logs_to_queue(&coord, None).unwrap());
    assert_eq!(queue.entries().len(), 250);
    assert_eq!(coord.get(&format!("{REPLICA}/log_pointer")).unwrap(), b"0000000250");
    assert_eq!(
        coord.get_children(&format!("{REPLICA}/queue")).unwrap().len(),
        250
    );
}

#[test]
fn pull_rejects_foreign_nodes_in_log() {
    let coord = setup_coord();
    let queue = new_queue();

    coord
        .create(
            &format!("{TABLE}/log/zzz-intruder"),
            b"",
            lamina_coord::CreateMode::Persistent,
        )
        .unwrap();
    add_log_entry(&coord, 0, &log_get_part("all_0_0_0", 0));

    let err = queue.pull_logs_to_queue(&coord, None).unwrap_err();
    assert!(err.to_string().contains("zzz-intruder"), "unexpected error: {err:#}");
}

/// Delegates to [`MemoryCoord`], appending one log entry between the pull's
/// initial log listing and its final one, to model a log that grows mid-pull.
struct MidPullAppend<'a> {
    inner: &'a lamina_coord::memory::MemoryCoord,
    log_lists: std::sync::atomic::AtomicUsize,
    inject_index: u64,
    inject_entry: lamina_queue::LogEntry,
}

impl CoordClient for MidPullAppend<'_> {
    fn get(&self, path: &str) -> lamina_coord::CoordResult<Vec<u8>> {
        self.inner.get(path)
    }
    fn try_get(&self, path: &str) -> lamina_coord::CoordResult<Option<Vec<u8>>> {
        self.inner.try_get(path)
    }
    fn get_many(&self, paths: &[String]) -> lamina_coord::CoordResult<Vec<Option<Vec<u8>>>> {
        self.inner.get_many(paths)
    }
    fn get_children(&self, path: &str) -> lamina_coord::CoordResult<Vec<String>> {
        if path == format!("{TABLE}/log")
            && self
                .log_lists
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                == 1
        {
            add_log_entry(self.inner, self.inject_index, &self.inject_entry);
        }
        self.inner.get_children(path)
    }
    fn get_children_watch(
        &self,
        path: &str,
        watch: &WatchEvent,
    ) -> lamina_coord::CoordResult<Vec<String>> {
        self.inner.get_children_watch(path, watch)
    }
    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: lamina_coord::CreateMode,
    ) -> lamina_coord::CoordResult<String> {
        self.inner.create(path, data, mode)
    }
    fn set(&self, path: &str, data: &[u8]) -> lamina_coord::CoordResult<()> {
        self.inner.set(path, data)
    }
    fn try_remove(&self, path: &str) -> lamina_coord::CoordResult<bool> {
        self.inner.try_remove(path)
    }
    fn multi(
        &self,
        requests: &[lamina_coord::CoordRequest],
    ) -> lamina_coord::CoordResult<Vec<lamina_coord::CoordResponse>> {
        self.inner.multi(requests)
    }
}

#[test]
fn log_entries_appearing_mid_pull_still_block_merges_across_them() {
    let coord = setup_coord();
    let queue = new_queue();

    add_log_entry(&coord, 0, &log_get_part("all_0_0_0", 0));
    add_log_entry(&coord, 1, &log_get_part("all_2_2_0", 0));

    // A fetch entry for the middle part lands in the log after the pull
    // listed it but before the pull finished; its part must already count
    // as upcoming even though this replica has not copied the entry yet.
    let growing = MidPullAppend {
        inner: &coord,
        log_lists: std::sync::atomic::AtomicUsize::new(0),
        inject_index: 2,
        inject_entry: log_get_part("all_1_1_0", 0),
    };
    assert!(queue.pull_logs_to_queue(&growing, None).unwrap());
    assert_eq!(queue.entries().len(), 2);

    let err = queue
        .can_merge_parts(&common::part("all_0_0_0"), &common::part("all_2_2_0"))
        .unwrap_err();
    assert!(err.contains("all_1_1_0"), "unexpected reason: {err}");
}

#[test]
fn load_skips_entries_already_in_memory() {
    let coord = setup_coord();
    let queue = new_queue();

    add_log_entry(&coord, 0, &log_get_part("all_0_0_0", 50));
    add_log_entry(&coord, 1, &log_get_part("all_1_1_0", 60));
    assert!(queue.pull_logs_to_queue(&coord, None).unwrap());

    // Same instance: everything is already in memory.
    assert!(!queue.load(&coord).unwrap());

    // A restarted replica rebuilds its queue from the durable copy.
    let restarted = new_queue();
    assert!(restarted
        .initialize(["all_9_9_0"], &coord)
        .unwrap());
    let entries = restarted.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].data.new_part_name, "all_0_0_0");
    assert_eq!(restarted.insert_times().0, 50);
}

#[test]
fn watch_wakes_background_puller() {
    let coord: Arc<lamina_coord::memory::MemoryCoord> = Arc::new(setup_coord());
    let queue = Arc::new(new_queue());

    let coord_client: Arc<dyn CoordClient> = coord.clone();
    let handle = spawn_puller(
        queue.clone(),
        coord_client,
        PullerConfig {
            poll_interval: Duration::from_secs(30),
        },
    )
    .unwrap();

    // Wait for the first pull to register its watch on /log.
    assert!(wait_until(Duration::from_secs(5), || {
        coord.try_get(&format!("{REPLICA}/log_pointer")).unwrap().is_some()
    }));

    add_log_entry(&coord, 0, &log_get_part("all_0_0_0", 0));
    assert!(
        wait_until(Duration::from_secs(5), || queue.entries().len() == 1),
        "puller did not react to the log watch"
    );

    handle.shutdown();
}

#[test]
fn pull_registers_watch_for_next_update() {
    let coord = setup_coord();
    let queue = new_queue();

    let watch = WatchEvent::new();
    queue.pull_logs_to_queue(&coord, Some(&watch)).unwrap();
    assert!(!watch.take());

    add_log_entry(&coord, 0, &log_get_part("all_0_0_0", 0));
    assert!(watch.take(), "log change did not fire the registered watch");
}

#[test]
fn drop_range_pulled_from_log_executes_before_fetches() {
    let coord = setup_coord();
    let queue = new_queue();

    add_log_entry(&coord, 0, &log_get_part("all_1_1_0", 10));
    add_log_entry(&coord, 1, &{
        let mut entry = log_get_part("20180101_0_100_999", 0);
        entry.entry_type = EntryType::DropRange;
        entry
    });
    queue.pull_logs_to_queue(&coord, None).unwrap();

    let selected = queue
        .select_entry_to_process(&IdleMerger, &EmptyStore)
        .expect("drop range is executable");
    assert_eq!(selected.entry.data.entry_type, EntryType::DropRange);
}
