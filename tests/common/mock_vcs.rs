//! In-memory version-control collaborator for testing
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

use async_trait::async_trait;
use sigmerge::error::{Error, Result};
use sigmerge::types::{CommitRecord, RefUpdate};
use sigmerge::vcs::VersionControl;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Call record for `update_ref`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRefCall {
    pub reference: String,
    pub expected_old: String,
    pub new_sha: String,
}

struct Node {
    parents: Vec<String>,
    record: CommitRecord,
}

/// Simple in-memory commit graph implementing `VersionControl`
///
/// Features:
/// - Refs and a commit DAG
/// - Call tracking for verification
/// - Transient and deterministic error injection per operation
/// - Ref moves injected between check and write to exercise races
pub struct MockVcs {
    refs: Mutex<HashMap<String, String>>,
    nodes: Mutex<HashMap<String, Node>>,
    shallow: AtomicBool,
    shallow_boundary: Mutex<Vec<String>>,
    next_merge: AtomicU64,
    // Call tracking
    calls: Mutex<Vec<String>>,
    update_ref_calls: Mutex<Vec<UpdateRefCall>>,
    resolve_counts: Mutex<HashMap<String, u32>>,
    // Error injection
    transient_failures: Mutex<HashMap<String, u32>>,
    permanent_failures: Mutex<HashMap<String, String>>,
    // Race injection
    move_after_resolve: Mutex<Option<(String, String)>>,
    move_before_update: Mutex<Option<(String, String)>>,
    update_response: Mutex<Option<RefUpdate>>,
}

impl Default for MockVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVcs {
    pub fn new() -> Self {
        Self {
            refs: Mutex::new(HashMap::new()),
            nodes: Mutex::new(HashMap::new()),
            shallow: AtomicBool::new(false),
            shallow_boundary: Mutex::new(Vec::new()),
            next_merge: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            update_ref_calls: Mutex::new(Vec::new()),
            resolve_counts: Mutex::new(HashMap::new()),
            transient_failures: Mutex::new(HashMap::new()),
            permanent_failures: Mutex::new(HashMap::new()),
            move_after_resolve: Mutex::new(None),
            move_before_update: Mutex::new(None),
            update_response: Mutex::new(None),
        }
    }

    // === Graph setup ===

    /// Add a commit with the given parents
    pub fn add_commit(&self, record: CommitRecord, parents: &[&str]) {
        self.nodes.lock().unwrap().insert(
            record.sha.clone(),
            Node {
                parents: parents.iter().map(ToString::to_string).collect(),
                record,
            },
        );
    }

    pub fn set_ref(&self, name: &str, sha: &str) {
        self.refs
            .lock()
            .unwrap()
            .insert(name.to_string(), sha.to_string());
    }

    pub fn ref_value(&self, name: &str) -> Option<String> {
        self.refs.lock().unwrap().get(name).cloned()
    }

    pub fn set_shallow(&self, shallow: bool) {
        self.shallow.store(shallow, Ordering::SeqCst);
    }

    /// Mark the clone shallow with `shas` as its boundary commits
    pub fn set_shallow_boundary(&self, shas: &[&str]) {
        self.set_shallow(true);
        *self.shallow_boundary.lock().unwrap() = shas.iter().map(|s| s.to_string()).collect();
    }

    // === Error injection ===

    /// Fail `op` with a transient error `times` times, then succeed
    pub fn fail_transient(&self, op: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(op.to_string(), times);
    }

    /// Fail every `op` call with a deterministic error
    pub fn fail(&self, op: &str, message: &str) {
        self.permanent_failures
            .lock()
            .unwrap()
            .insert(op.to_string(), message.to_string());
    }

    /// After the first resolve of `name`, point it at `sha`
    pub fn move_ref_after_resolve(&self, name: &str, sha: &str) {
        *self.move_after_resolve.lock().unwrap() = Some((name.to_string(), sha.to_string()));
    }

    /// Point `name` at `sha` just before the next `update_ref` compares
    pub fn move_ref_before_update(&self, name: &str, sha: &str) {
        *self.move_before_update.lock().unwrap() = Some((name.to_string(), sha.to_string()));
    }

    /// Answer `update_ref` with a fixed response instead of applying it
    pub fn respond_to_update(&self, response: RefUpdate) {
        *self.update_response.lock().unwrap() = Some(response);
    }

    // === Call inspection ===

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    pub fn update_ref_calls(&self) -> Vec<UpdateRefCall> {
        self.update_ref_calls.lock().unwrap().clone()
    }

    // === Internals ===

    fn enter(&self, op: &str) -> Result<()> {
        self.calls.lock().unwrap().push(op.to_string());
        if let Some(message) = self.permanent_failures.lock().unwrap().get(op) {
            return Err(Error::Git {
                operation: op.to_string(),
                message: message.clone(),
                transient: false,
            });
        }
        let mut transient = self.transient_failures.lock().unwrap();
        if let Some(remaining) = transient.get_mut(op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::Git {
                operation: op.to_string(),
                message: "connection reset by peer".to_string(),
                transient: true,
            });
        }
        Ok(())
    }

    fn ancestors(&self, sha: &str) -> HashSet<String> {
        let nodes = self.nodes.lock().unwrap();
        let mut seen = HashSet::new();
        let mut stack = vec![sha.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = nodes.get(&current) {
                stack.extend(node.parents.iter().cloned());
            }
        }
        seen
    }

    /// Post-order walk from `sha`: parents before children
    fn topo_from(&self, sha: &str, exclude: &HashSet<String>) -> Vec<String> {
        fn visit(
            nodes: &HashMap<String, Node>,
            sha: &str,
            exclude: &HashSet<String>,
            seen: &mut HashSet<String>,
            out: &mut Vec<String>,
        ) {
            if exclude.contains(sha) || !seen.insert(sha.to_string()) {
                return;
            }
            if let Some(node) = nodes.get(sha) {
                for parent in &node.parents {
                    visit(nodes, parent, exclude, seen, out);
                }
            }
            out.push(sha.to_string());
        }
        let nodes = self.nodes.lock().unwrap();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        visit(&nodes, sha, exclude, &mut seen, &mut out);
        out
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    async fn resolve(&self, reference: &str) -> Result<String> {
        self.enter("resolve")?;
        let resolved = {
            let refs = self.refs.lock().unwrap();
            refs.get(reference).cloned().or_else(|| {
                self.nodes
                    .lock()
                    .unwrap()
                    .contains_key(reference)
                    .then(|| reference.to_string())
            })
        };
        let sha = resolved.ok_or_else(|| Error::RefNotFound(reference.to_string()))?;

        let count = {
            let mut counts = self.resolve_counts.lock().unwrap();
            let count = counts.entry(reference.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let mut pending = self.move_after_resolve.lock().unwrap();
        if count == 1
            && let Some((name, new_sha)) = pending.as_ref()
            && name == reference
        {
            self.set_ref(name, new_sha);
            *pending = None;
        }
        Ok(sha)
    }

    async fn list_commits(&self, base_sha: &str, head_sha: &str) -> Result<Vec<CommitRecord>> {
        self.enter("list_commits")?;
        let exclude = self.ancestors(base_sha);
        let order = self.topo_from(head_sha, &exclude);
        let nodes = self.nodes.lock().unwrap();
        order
            .iter()
            .map(|sha| {
                nodes
                    .get(sha)
                    .map(|n| n.record.clone())
                    .ok_or_else(|| Error::InvalidObject {
                        sha: sha.clone(),
                        message: "object missing".to_string(),
                    })
            })
            .collect()
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.enter("is_ancestor")?;
        Ok(self.ancestors(descendant).contains(ancestor))
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        self.enter("merge_base")?;
        let of_a = self.ancestors(a);
        let order = self.topo_from(b, &HashSet::new());
        Ok(order.into_iter().rev().find(|sha| of_a.contains(sha)))
    }

    async fn is_shallow(&self) -> Result<bool> {
        self.enter("is_shallow")?;
        Ok(self.shallow.load(Ordering::SeqCst))
    }

    async fn shallow_boundary(&self) -> Result<Vec<String>> {
        self.enter("shallow_boundary")?;
        Ok(self.shallow_boundary.lock().unwrap().clone())
    }

    async fn update_ref(
        &self,
        reference: &str,
        expected_old: &str,
        new_sha: &str,
    ) -> Result<RefUpdate> {
        self.enter("update_ref")?;
        self.update_ref_calls.lock().unwrap().push(UpdateRefCall {
            reference: reference.to_string(),
            expected_old: expected_old.to_string(),
            new_sha: new_sha.to_string(),
        });
        if let Some(response) = self.update_response.lock().unwrap().clone() {
            return Ok(response);
        }
        if let Some((name, sha)) = self.move_before_update.lock().unwrap().take() {
            self.set_ref(&name, &sha);
        }
        let mut refs = self.refs.lock().unwrap();
        let current = refs.get(reference).cloned();
        if current.as_deref() == Some(expected_old) {
            refs.insert(reference.to_string(), new_sha.to_string());
            Ok(RefUpdate::Updated)
        } else {
            Ok(RefUpdate::Conflict { actual: current })
        }
    }

    async fn create_merge_commit(
        &self,
        base_sha: &str,
        head_sha: &str,
        message: &str,
    ) -> Result<String> {
        self.enter("create_merge_commit")?;
        let n = self.next_merge.fetch_add(1, Ordering::SeqCst);
        let sha = format!("{:040x}", 0xfeed_0000_u64 + n);
        let record = CommitRecord {
            sha: sha.clone(),
            author: "sigmerge <sigmerge@localhost>".to_string(),
            committed_at: None,
            signature: None,
            payload: message.as_bytes().to_vec(),
            defect: None,
        };
        self.add_commit(record, &[base_sha, head_sha]);
        Ok(sha)
    }
}
