#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError<K> {
    pub path: Vec<K>,
}

impl<K: fmt::Display> CycleError<K> {
    pub fn describe(&self) -> String {
        self.path
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl<K: fmt::Debug> fmt::Display for CycleError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle detected: {:?}", self.path)
    }
}

impl<K: fmt::Debug> std::error::Error for CycleError<K> {}

/// Reachability index over a directed acyclic graph.
///
/// Edges are fed in one at a time; an edge that would close a cycle is
/// rejected before the index is touched, so the closure is acyclic at every
/// point in its life.
#[derive(Debug, Clone)]
pub struct TransitiveClosure<K: Eq + Hash + Clone> {
    reachable: HashMap<K, HashSet<K>>,
}

impl<K: Eq + Hash + Clone> Default for TransitiveClosure<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> TransitiveClosure<K> {
    pub fn new() -> Self {
        Self {
            reachable: HashMap::new(),
        }
    }

    /// Builds a closure from an edge list, rejecting cycles.
    pub fn from_edges<I>(edges: I) -> Result<Self, CycleError<K>>
    where
        I: IntoIterator<Item = (K, K)>,
    {
        let mut closure = Self::new();
        for (from, to) in edges {
            closure.add_edge(from, to)?;
        }
        Ok(closure)
    }

    pub fn add_node(&mut self, key: K) {
        self.reachable.entry(key).or_default();
    }

    pub fn add_edge(&mut self, from: K, to: K) -> Result<(), CycleError<K>> {
        if from == to {
            return Err(CycleError {
                path: vec![from.clone(), from],
            });
        }
        if self.is_reachable(&to, &from) {
            return Err(CycleError {
                path: vec![from.clone(), to, from],
            });
        }

        let mut new_targets = self.reachable.get(&to).cloned().unwrap_or_default();
        new_targets.insert(to.clone());

        self.reachable
            .entry(from.clone())
            .or_default()
            .extend(new_targets.iter().cloned());

        for targets in self.reachable.values_mut() {
            if targets.contains(&from) {
                targets.extend(new_targets.iter().cloned());
            }
        }

        Ok(())
    }

    pub fn is_reachable(&self, from: &K, to: &K) -> bool {
        self.reachable.get(from).is_some_and(|set| set.contains(to))
    }

    pub fn would_create_cycle(&self, from: &K, to: &K) -> bool {
        from == to || self.is_reachable(to, from)
    }

    pub fn reachable_from(&self, from: &K) -> HashSet<K> {
        self.reachable.get(from).cloned().unwrap_or_default()
    }

    pub fn reaching(&self, to: &K) -> HashSet<K> {
        self.reachable
            .iter()
            .filter(|(_, targets)| targets.contains(to))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.reachable.len()
    }
}

/// Longest outgoing path length per node, iterative so deep chains cannot
/// overflow the stack.
pub fn max_depth<K: Eq + Hash + Clone>(edges: &HashMap<K, Vec<K>>) -> HashMap<K, usize> {
    let mut depths: HashMap<K, usize> = HashMap::new();

    for start in edges.keys() {
        if depths.contains_key(start) {
            continue;
        }
        // (node, next child index, best depth so far)
        let mut stack: Vec<(K, usize, usize)> = vec![(start.clone(), 0, 0)];
        let mut on_stack: HashSet<K> = HashSet::new();
        on_stack.insert(start.clone());
        let mut returned: Option<usize> = None;

        while let Some((node, child_idx, best)) = stack.last_mut() {
            if let Some(depth) = returned.take() {
                *best = (*best).max(depth + 1);
            }
            let children = edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if *child_idx < children.len() {
                let child = children[*child_idx].clone();
                *child_idx += 1;
                if let Some(&cached) = depths.get(&child) {
                    returned = Some(cached);
                } else if !on_stack.contains(&child) {
                    on_stack.insert(child.clone());
                    stack.push((child, 0, 0));
                }
                // A child already on the stack would be a cycle; the closure
                // rejects those before this runs, so it is skipped here.
            } else {
                let (node, _, best) = stack.pop().expect("stack non-empty");
                on_stack.remove(&node);
                depths.insert(node, best);
                returned = Some(best);
            }
        }
    }

    depths
}
