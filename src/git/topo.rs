//! Iterative topological ordering of a parent graph
//!
//! The walk is a depth-first post-order driven by an explicit stack, so
//! histories with tens of thousands of commits never touch the call stack.

use crate::error::GitError;
use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;

struct Frame<K> {
    node: K,
    parents: Vec<K>,
    next: usize,
}

/// Order every node reachable from `tip` so that parents come before children
///
/// `parents` is called exactly once per reachable node. Ties are broken by
/// discovery order: the ancestry of the first parent is emitted before the
/// ancestry of the second parent, and so on. The result is therefore
/// deterministic for an unchanged graph.
pub fn topological_order<K, F>(tip: K, mut parents: F) -> Result<Vec<K>, GitError>
where
    K: Clone + Eq + Hash + Display,
    F: FnMut(&K) -> Result<Vec<K>, GitError>,
{
    let mut emitted: HashSet<K> = HashSet::new();
    let mut on_path: HashSet<K> = HashSet::new();
    let mut order = Vec::new();

    let tip_parents = parents(&tip)?;
    on_path.insert(tip.clone());
    let mut stack = vec![Frame {
        node: tip,
        parents: tip_parents,
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.next < frame.parents.len() {
            let parent = frame.parents[frame.next].clone();
            frame.next += 1;

            if emitted.contains(&parent) {
                continue;
            }
            if on_path.contains(&parent) {
                return Err(GitError::CycleDetected(parent.to_string()));
            }

            let grandparents = parents(&parent)?;
            on_path.insert(parent.clone());
            stack.push(Frame {
                node: parent,
                parents: grandparents,
                next: 0,
            });
        } else if let Some(done) = stack.pop() {
            on_path.remove(&done.node);
            emitted.insert(done.node.clone());
            order.push(done.node);
        }
    }

    Ok(order)
}
