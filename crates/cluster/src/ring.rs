//! Consistent-hash ring with virtual tokens.
//!
//! Each physical node contributes [`TOKENS_PER_NODE`] pseudo-random 64-bit
//! positions derived from a stable hash of `(node_id, token_index)`. Key
//! lookups hash the key onto the same 64-bit space and walk clockwise to
//! the first token at or past that position, wrapping at the end.
//!
//! Virtual tokens smooth the load distribution: with 256 tokens per node,
//! per-node key share stays within a few percent of the mean, and removing
//! a node re-homes only that node's share of the space.
//!
//! Mutations take a writer lock; lookups take the read path. Membership
//! changes are rare, so writer contention is negligible.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::ClusterError;

/// Number of virtual tokens each node contributes to the ring.
pub const TOKENS_PER_NODE: usize = 256;

/// A ring participant: a stable id plus caller-defined tags (typically the
/// instance's RPC address).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node<T> {
    /// Stable node identifier; token positions derive from it.
    pub id: String,
    /// Opaque payload returned from lookups.
    pub tags: T,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Token {
    position: u64,
    node_index: usize,
}

struct RingState<T> {
    /// Sorted by (position, node id) for deterministic tie-breaks.
    tokens: Vec<Token>,
    /// Node ids aligned with `node_index` in tokens. Slots of removed
    /// nodes are compacted on every mutation.
    nodes: Vec<Node<T>>,
}

/// A consistent-hash ring mapping string keys to owning nodes.
pub struct Ring<T> {
    state: RwLock<RingState<T>>,
}

/// Stable 64-bit position for an arbitrary byte string.
fn position_of(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    // First eight digest bytes, big-endian. Stable across platforms.
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

impl<T: Clone> Ring<T> {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self { state: RwLock::new(RingState { tokens: Vec::new(), nodes: Vec::new() }) }
    }

    /// Inserts a node, contributing [`TOKENS_PER_NODE`] tokens.
    ///
    /// Idempotent per node id: re-adding replaces the previous
    /// registration (tags included) without changing token positions.
    pub fn add_node(&self, node: Node<T>) {
        let mut state = self.state.write();
        state.remove_node_id(&node.id);

        let node_index = state.nodes.len();
        for token_index in 0..TOKENS_PER_NODE {
            let position = position_of(format!("{}:{token_index}", node.id).as_bytes());
            state.tokens.push(Token { position, node_index });
        }
        state.nodes.push(node);
        state.sort_tokens();
        tracing::debug!(total_tokens = state.tokens.len(), "ring node added");
    }

    /// Removes all tokens of the node with the given id. Unknown ids are a
    /// no-op.
    pub fn remove_node(&self, node_id: &str) {
        let mut state = self.state.write();
        if state.remove_node_id(node_id) {
            state.sort_tokens();
            tracing::debug!(node_id, total_tokens = state.tokens.len(), "ring node removed");
        }
    }

    /// Returns the node owning `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::RingEmpty`] when no nodes are registered.
    pub fn find_node(&self, key: &str) -> Result<Node<T>, ClusterError> {
        let state = self.state.read();
        if state.tokens.is_empty() {
            return Err(ClusterError::RingEmpty);
        }
        let position = position_of(key.as_bytes());
        // First token at or past the key position, wrapping at the end.
        let index = state
            .tokens
            .partition_point(|token| token.position < position);
        let token = state.tokens.get(index).unwrap_or(&state.tokens[0]);
        Ok(state.nodes[token.node_index].clone())
    }

    /// Returns the ids of all registered nodes.
    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.state.read().nodes.iter().map(|node| node.id.clone()).collect()
    }

    /// Returns all registered nodes.
    #[must_use]
    pub fn nodes(&self) -> Vec<Node<T>> {
        self.state.read().nodes.clone()
    }

    /// Returns the number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Returns `true` when no nodes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }
}

impl<T: Clone> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RingState<T> {
    /// Drops the node and its tokens, re-indexing surviving tokens.
    /// Returns `true` when the node existed.
    fn remove_node_id(&mut self, node_id: &str) -> bool {
        let Some(removed) = self.nodes.iter().position(|node| node.id == node_id) else {
            return false;
        };
        self.nodes.remove(removed);
        self.tokens.retain(|token| token.node_index != removed);
        for token in &mut self.tokens {
            if token.node_index > removed {
                token.node_index -= 1;
            }
        }
        true
    }

    /// Sorts by position with node id as the deterministic tie-break.
    fn sort_tokens(&mut self) {
        let nodes = &self.nodes;
        self.tokens
            .sort_by(|a, b| {
                a.position
                    .cmp(&b.position)
                    .then_with(|| nodes[a.node_index].id.cmp(&nodes[b.node_index].id))
            });
    }
}
