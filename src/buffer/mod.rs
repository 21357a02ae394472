//! # Buffer Manager
//!
//! Appendable blocks keep their row buffers in memory through this manager.
//! It is an explicit collaborator handed to each block at construction, so
//! blocks stay unit-testable in isolation.
//!
//! ## Pin/Unpin Protocol
//!
//! A node's buffer bytes may only be touched while pinned:
//!
//! 1. `pin(key)` loads the node if it was evicted and increments its pin
//!    count, returning a [`PinGuard`]
//! 2. the caller reads or writes the buffer
//! 3. dropping the guard decrements the pin count
//!
//! Nodes with a non-zero pin count are never evicted, so the guard is the
//! resident-buffer guarantee on every exit path.
//!
//! ## Eviction
//!
//! The manager tracks a byte budget. When loading a node would exceed it,
//! unpinned resident nodes are unloaded (which flushes dirty buffers through
//! the column file set) until the new node fits. Eviction order is by
//! registration age; the appendable working set is small enough that a
//! recency policy would buy nothing here.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::DEFAULT_BUFFER_BUDGET;
use crate::error::{BlockError, Result};

/// A buffer-resident node the manager can load and evict.
pub trait PinnableNode: Send + Sync {
    /// Stable identity within the manager.
    fn node_key(&self) -> u64;
    /// Current heap footprint of the resident buffer (0 when unloaded).
    fn mem_size(&self) -> usize;
    fn is_loaded(&self) -> bool;
    /// Makes the buffer resident, reading from disk if necessary.
    fn load(&self) -> Result<()>;
    /// Flushes a dirty buffer and releases it.
    fn unload(&self) -> Result<()>;
}

struct Registered {
    node: Arc<dyn PinnableNode>,
    pins: u32,
    seq: u64,
}

struct Inner {
    nodes: HashMap<u64, Registered>,
    next_seq: u64,
}

pub struct BufferManager {
    budget: usize,
    inner: Mutex<Inner>,
}

impl BufferManager {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_BUFFER_BUDGET)
    }

    pub fn register(&self, node: Arc<dyn PinnableNode>) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.nodes.insert(
            node.node_key(),
            Registered {
                node,
                pins: 0,
                seq,
            },
        );
    }

    /// Removes a node from the manager without flushing it. The caller is
    /// responsible for having closed the node first.
    pub fn unregister(&self, key: u64) {
        let mut inner = self.inner.lock();
        if let Some(reg) = inner.nodes.remove(&key) {
            if reg.pins > 0 {
                debug!(key, pins = reg.pins, "unregistering pinned buffer node");
            }
        }
    }

    /// Pins `key`, loading it first if it was evicted.
    pub fn pin(&self, key: u64) -> Result<PinGuard<'_>> {
        let mut inner = self.inner.lock();
        let reg = inner
            .nodes
            .get(&key)
            .ok_or_else(|| BlockError::internal(format!("pin of unregistered node {key}")))?;
        let node = Arc::clone(&reg.node);
        if !node.is_loaded() {
            Self::make_room(&mut inner, key, self.budget);
            node.load()?;
        }
        let reg = inner
            .nodes
            .get_mut(&key)
            .ok_or_else(|| BlockError::internal(format!("node {key} vanished during pin")))?;
        reg.pins += 1;
        Ok(PinGuard { mgr: self, key })
    }

    fn make_room(inner: &mut Inner, incoming: u64, budget: usize) {
        let mut used: usize = inner
            .nodes
            .values()
            .filter(|r| r.node.is_loaded())
            .map(|r| r.node.mem_size())
            .sum();
        if used < budget {
            return;
        }
        let mut victims: Vec<(u64, u64)> = inner
            .nodes
            .values()
            .filter(|r| r.pins == 0 && r.node.is_loaded() && r.node.node_key() != incoming)
            .map(|r| (r.seq, r.node.node_key()))
            .collect();
        victims.sort_unstable();
        for (_, key) in victims {
            if used < budget {
                break;
            }
            if let Some(reg) = inner.nodes.get(&key) {
                let size = reg.node.mem_size();
                match reg.node.unload() {
                    Ok(()) => {
                        used = used.saturating_sub(size);
                        debug!(key, freed = size, "evicted buffer node");
                    }
                    Err(err) => {
                        debug!(key, %err, "failed to evict buffer node");
                    }
                }
            }
        }
    }

    fn unpin(&self, key: u64) {
        let mut inner = self.inner.lock();
        if let Some(reg) = inner.nodes.get_mut(&key) {
            debug_assert!(reg.pins > 0, "unpin of unpinned node");
            reg.pins = reg.pins.saturating_sub(1);
        }
    }

    #[cfg(test)]
    fn pins(&self, key: u64) -> u32 {
        self.inner.lock().nodes.get(&key).map_or(0, |r| r.pins)
    }
}

/// RAII pin on a buffer node; the buffer stays resident until drop.
pub struct PinGuard<'a> {
    mgr: &'a BufferManager,
    key: u64,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.mgr.unpin(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeNode {
        key: u64,
        loaded: AtomicBool,
        loads: AtomicUsize,
        unloads: AtomicUsize,
        size: usize,
    }

    impl FakeNode {
        fn new(key: u64, size: usize) -> Self {
            Self {
                key,
                loaded: AtomicBool::new(true),
                loads: AtomicUsize::new(0),
                unloads: AtomicUsize::new(0),
                size,
            }
        }
    }

    impl PinnableNode for FakeNode {
        fn node_key(&self) -> u64 {
            self.key
        }
        fn mem_size(&self) -> usize {
            if self.is_loaded() {
                self.size
            } else {
                0
            }
        }
        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }
        fn load(&self) -> Result<()> {
            self.loaded.store(true, Ordering::SeqCst);
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn unload(&self) -> Result<()> {
            self.loaded.store(false, Ordering::SeqCst);
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn pin_guard_releases_on_drop() {
        let mgr = BufferManager::new(1024);
        let node = Arc::new(FakeNode::new(1, 100));
        mgr.register(node);
        {
            let _guard = mgr.pin(1).unwrap();
            assert_eq!(mgr.pins(1), 1);
        }
        assert_eq!(mgr.pins(1), 0);
    }

    #[test]
    fn pin_reloads_evicted_node() {
        let mgr = BufferManager::new(1024);
        let node = Arc::new(FakeNode::new(1, 100));
        node.loaded.store(false, Ordering::SeqCst);
        mgr.register(Arc::clone(&node) as Arc<dyn PinnableNode>);
        let _guard = mgr.pin(1).unwrap();
        assert!(node.is_loaded());
        assert_eq!(node.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn over_budget_evicts_unpinned() {
        let mgr = BufferManager::new(150);
        let a = Arc::new(FakeNode::new(1, 100));
        let b = Arc::new(FakeNode::new(2, 100));
        b.loaded.store(false, Ordering::SeqCst);
        mgr.register(Arc::clone(&a) as Arc<dyn PinnableNode>);
        mgr.register(Arc::clone(&b) as Arc<dyn PinnableNode>);
        let _guard = mgr.pin(2).unwrap();
        assert_eq!(a.unloads.load(Ordering::SeqCst), 1);
        assert!(!a.is_loaded());
    }

    #[test]
    fn pinned_nodes_survive_eviction() {
        let mgr = BufferManager::new(150);
        let a = Arc::new(FakeNode::new(1, 100));
        let b = Arc::new(FakeNode::new(2, 100));
        b.loaded.store(false, Ordering::SeqCst);
        mgr.register(Arc::clone(&a) as Arc<dyn PinnableNode>);
        mgr.register(Arc::clone(&b) as Arc<dyn PinnableNode>);
        let _pin_a = mgr.pin(1).unwrap();
        let _pin_b = mgr.pin(2).unwrap();
        assert!(a.is_loaded());
        assert_eq!(a.unloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pin_unregistered_fails() {
        let mgr = BufferManager::new(1024);
        assert!(mgr.pin(9).is_err());
    }
}
