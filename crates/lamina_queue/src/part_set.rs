//! Per-partition ordered index of parts supporting containment queries.

use std::collections::{BTreeMap, HashMap};

use crate::part_info::{PartInfo, PROBE_LEVEL};

#[derive(Debug, Clone)]
struct StoredPart {
    name: String,
    info: PartInfo,
}

/// A set of parts indexed by partition and block range.
///
/// `add` keeps the set free of parts contained by a newer, wider part, which
/// is what makes "is there anything between these two parts" and "has a wider
/// merge already been planned over this part" cheap to answer.
#[derive(Debug, Clone, Default)]
pub struct PartSet {
    by_partition: HashMap<String, BTreeMap<(i64, i64), StoredPart>>,
}

impl PartSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a part by name, dropping any stored parts its range covers.
    pub fn add(&mut self, name: &str) -> anyhow::Result<()> {
        let info = PartInfo::parse(name)?;
        self.add_info(name.to_string(), info);
        Ok(())
    }

    pub(crate) fn add_info(&mut self, name: String, info: PartInfo) {
        assert!(
            info.level < PROBE_LEVEL,
            "part {name} carries the reserved probe level. This is a bug."
        );
        let partition = self.by_partition.entry(info.partition_id.clone()).or_default();
        let covered: Vec<(i64, i64)> = partition
            .range((info.min_block, i64::MIN)..=(info.max_block, i64::MAX))
            .filter(|(_, stored)| info.contains(&stored.info))
            .map(|(key, _)| *key)
            .collect();
        for key in covered {
            partition.remove(&key);
        }
        partition.insert((info.min_block, info.max_block), StoredPart { name, info });
    }

    /// The smallest stored part whose range contains `info`, if any.
    pub fn get_containing_part(&self, info: &PartInfo) -> Option<&PartInfo> {
        let partition = self.by_partition.get(&info.partition_id)?;
        partition
            .range(..=(info.min_block, i64::MAX))
            .filter(|(_, stored)| stored.info.contains(info))
            .min_by_key(|(_, stored)| stored.info.max_block - stored.info.min_block)
            .map(|(_, stored)| &stored.info)
    }

    /// Names of all stored parts contained in `info`'s range, in block order.
    pub fn parts_covered_by(&self, info: &PartInfo) -> Vec<String> {
        let Some(partition) = self.by_partition.get(&info.partition_id) else {
            return Vec::new();
        };
        partition
            .range((info.min_block, i64::MIN)..=(info.max_block, i64::MAX))
            .filter(|(_, stored)| info.contains(&stored.info))
            .map(|(_, stored)| stored.name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_partition.values().all(|p| p.is_empty())
    }

    pub fn len(&self) -> usize {
        self.by_partition.values().map(|p| p.len()).sum()
    }
}
