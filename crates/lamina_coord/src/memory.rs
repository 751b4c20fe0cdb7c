//! In-process coordination service.
//!
//! A single-node stand-in for the real coordination cluster, good enough for
//! integration tests and embedded single-process deployments: one mutex over
//! the whole namespace, per-parent sequence counters, atomic multi-writes and
//! child-list watches. There are no sessions, so `Ephemeral` nodes persist
//! until explicitly removed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::{
    CoordClient, CoordError, CoordRequest, CoordResponse, CoordResult, CreateMode, WatchEvent,
};

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    /// Next sequence number per parent path, for `PersistentSequential`.
    next_seq: HashMap<String, u64>,
    /// Child-list watches keyed by the watched node path.
    child_watches: HashMap<String, Vec<WatchEvent>>,
}

pub struct MemoryCoord {
    tree: Mutex<Tree>,
}

impl Default for MemoryCoord {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoord {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree::default()),
        }
    }

    /// Create `path` and any missing ancestors as empty persistent nodes.
    pub fn ensure(&self, path: &str) -> CoordResult<()> {
        let path = normalize(path)?;
        let mut tree = self.tree.lock().unwrap();
        let mut prefix = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            prefix.push('/');
            prefix.push_str(component);
            if !tree.nodes.contains_key(&prefix) {
                tree.nodes.insert(prefix.clone(), Node { data: Vec::new() });
            }
        }
        Ok(())
    }

    /// Number of nodes currently stored, for test assertions.
    pub fn node_count(&self) -> usize {
        self.tree.lock().unwrap().nodes.len()
    }
}

impl Tree {
    fn apply_create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> CoordResult<String> {
        let path = normalize(path)?;
        let parent = parent_of(&path);
        if parent != "/" && !self.nodes.contains_key(&parent) {
            return Err(CoordError::NoNode);
        }

        let final_path = match mode {
            CreateMode::PersistentSequential => {
                let seq = self.next_seq.entry(parent.clone()).or_insert(0);
                let assigned = *seq;
                *seq += 1;
                format!("{path}{assigned:010}")
            }
            CreateMode::Persistent | CreateMode::Ephemeral => path,
        };

        if self.nodes.contains_key(&final_path) {
            return Err(CoordError::NodeExists);
        }
        self.nodes.insert(
            final_path.clone(),
            Node {
                data: data.to_vec(),
            },
        );
        self.fire_child_watches(&parent);
        Ok(final_path)
    }

    fn apply_set(&mut self, path: &str, data: &[u8]) -> CoordResult<()> {
        let path = normalize(path)?;
        match self.nodes.get_mut(&path) {
            Some(node) => {
                node.data = data.to_vec();
                Ok(())
            }
            None => Err(CoordError::NoNode),
        }
    }

    fn apply_remove(&mut self, path: &str) -> CoordResult<()> {
        let path = normalize(path)?;
        if !self.nodes.contains_key(&path) {
            return Err(CoordError::NoNode);
        }
        if self.has_children(&path) {
            return Err(CoordError::NotEmpty);
        }
        self.nodes.remove(&path);
        self.fire_child_watches(&parent_of(&path));
        Ok(())
    }

    fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        let path = normalize(path)?;
        if path != "/" && !self.nodes.contains_key(&path) {
            return Err(CoordError::NoNode);
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let mut out = Vec::new();
        for key in self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k)
        {
            let rest = &key[prefix.len()..];
            if !rest.is_empty() && !rest.contains('/') {
                out.push(rest.to_string());
            }
        }
        Ok(out)
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn fire_child_watches(&mut self, parent: &str) {
        if let Some(watches) = self.child_watches.remove(parent) {
            for watch in watches {
                watch.set();
            }
        }
    }
}

impl CoordClient for MemoryCoord {
    fn get(&self, path: &str) -> CoordResult<Vec<u8>> {
        let tree = self.tree.lock().unwrap();
        tree.nodes
            .get(&normalize(path)?)
            .map(|n| n.data.clone())
            .ok_or(CoordError::NoNode)
    }

    fn try_get(&self, path: &str) -> CoordResult<Option<Vec<u8>>> {
        let tree = self.tree.lock().unwrap();
        Ok(tree.nodes.get(&normalize(path)?).map(|n| n.data.clone()))
    }

    fn get_many(&self, paths: &[String]) -> CoordResult<Vec<Option<Vec<u8>>>> {
        let tree = self.tree.lock().unwrap();
        paths
            .iter()
            .map(|p| Ok(tree.nodes.get(&normalize(p)?).map(|n| n.data.clone())))
            .collect()
    }

    fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        self.tree.lock().unwrap().children(path)
    }

    fn get_children_watch(&self, path: &str, watch: &WatchEvent) -> CoordResult<Vec<String>> {
        let mut tree = self.tree.lock().unwrap();
        let children = tree.children(path)?;
        tree.child_watches
            .entry(normalize(path)?)
            .or_default()
            .push(watch.clone());
        Ok(children)
    }

    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> CoordResult<String> {
        self.tree.lock().unwrap().apply_create(path, data, mode)
    }

    fn set(&self, path: &str, data: &[u8]) -> CoordResult<()> {
        self.tree.lock().unwrap().apply_set(path, data)
    }

    fn try_remove(&self, path: &str) -> CoordResult<bool> {
        let mut tree = self.tree.lock().unwrap();
        match tree.apply_remove(path) {
            Ok(()) => Ok(true),
            Err(CoordError::NoNode) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn multi(&self, requests: &[CoordRequest]) -> CoordResult<Vec<CoordResponse>> {
        let mut tree = self.tree.lock().unwrap();

        // Trial run against a scratch copy so a mid-batch failure leaves the
        // namespace untouched.
        let mut scratch = Tree {
            nodes: tree.nodes.clone(),
            next_seq: tree.next_seq.clone(),
            child_watches: HashMap::new(),
        };
        let mut responses = Vec::with_capacity(requests.len());
        let mut touched_parents = Vec::new();
        for request in requests {
            match request {
                CoordRequest::Create { path, data, mode } => {
                    let created = scratch.apply_create(path, data, *mode)?;
                    touched_parents.push(parent_of(&created));
                    responses.push(CoordResponse::Created { path: created });
                }
                CoordRequest::Set { path, data } => {
                    scratch.apply_set(path, data)?;
                    responses.push(CoordResponse::Set);
                }
                CoordRequest::Remove { path } => {
                    scratch.apply_remove(path)?;
                    touched_parents.push(parent_of(&normalize(path)?));
                    responses.push(CoordResponse::Removed);
                }
            }
        }

        tree.nodes = scratch.nodes;
        tree.next_seq = scratch.next_seq;
        for parent in touched_parents {
            tree.fire_child_watches(&parent);
        }
        Ok(responses)
    }
}

fn normalize(path: &str) -> CoordResult<String> {
    if !path.starts_with('/') || path.contains("//") {
        return Err(CoordError::BadArguments);
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(CoordError::BadArguments);
    }
    Ok(path.to_string())
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}
