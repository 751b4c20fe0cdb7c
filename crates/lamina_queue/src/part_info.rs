//! Structured part names.
//!
//! A part name encodes `(partition_id, min_block, max_block, level)` plus an
//! optional mutation version: `<partition>_<min>_<max>_<level>[_<version>]`,
//! e.g. `20180101_0_100_2` or `all_3_3_0_7`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Level reserved for synthetic parts used in coverage probes. No real part
/// may carry it; [`PartInfo::parse`] rejects names that do.
pub const PROBE_LEVEL: u32 = 999_999_999;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartInfo {
    pub partition_id: String,
    pub min_block: i64,
    pub max_block: i64,
    pub level: u32,
    pub version: Option<i64>,
}

impl PartInfo {
    pub fn new(partition_id: impl Into<String>, min_block: i64, max_block: i64, level: u32) -> Self {
        Self {
            partition_id: partition_id.into(),
            min_block,
            max_block,
            level,
            version: None,
        }
    }

    pub fn parse(name: &str) -> anyhow::Result<Self> {
        let fields: Vec<&str> = name.split('_').collect();
        anyhow::ensure!(
            fields.len() == 4 || fields.len() == 5,
            "unexpected part name format: {name}"
        );
        anyhow::ensure!(!fields[0].is_empty(), "empty partition id in part name: {name}");

        let min_block: i64 = fields[1]
            .parse()
            .map_err(|_| anyhow::anyhow!("bad min block in part name: {name}"))?;
        let max_block: i64 = fields[2]
            .parse()
            .map_err(|_| anyhow::anyhow!("bad max block in part name: {name}"))?;
        let level: u32 = fields[3]
            .parse()
            .map_err(|_| anyhow::anyhow!("bad level in part name: {name}"))?;
        let version = match fields.get(4) {
            Some(v) => Some(
                v.parse::<i64>()
                    .map_err(|_| anyhow::anyhow!("bad mutation version in part name: {name}"))?,
            ),
            None => None,
        };

        anyhow::ensure!(
            min_block <= max_block,
            "part name {name} has min block greater than max block"
        );
        anyhow::ensure!(
            level < PROBE_LEVEL,
            "part name {name} uses the reserved probe level"
        );

        Ok(Self {
            partition_id: fields[0].to_string(),
            min_block,
            max_block,
            level,
            version,
        })
    }

    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Whether this part's block range covers `other`'s, in the same partition.
    pub fn contains(&self, other: &PartInfo) -> bool {
        self.partition_id == other.partition_id
            && self.min_block <= other.min_block
            && self.max_block >= other.max_block
    }

    /// The block-number version this part's data reflects: the explicit
    /// mutation version if present, otherwise the part's min block.
    pub fn data_version(&self) -> i64 {
        self.version.unwrap_or(self.min_block)
    }
}

impl fmt::Display for PartInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.partition_id, self.min_block, self.max_block, self.level
        )?;
        if let Some(version) = self.version {
            write!(f, "_{version}")?;
        }
        Ok(())
    }
}
