//! Radix trie for `(method, path-pattern)` dispatch, replacing the
//! reflection-driven lookup the design notes (§9 "Map-based dispatch of
//! subscriptions") call out as something to avoid: matching a concrete
//! incoming path against declared wildcard patterns is O(path length)
//! instead of a linear scan over every subscription.

use crate::codec::PathSegment;
use std::collections::HashMap;

#[derive(Default)]
struct Node {
    literal: HashMap<String, Node>,
    wildcard: Option<Box<Node>>,
    greedy_key: Option<String>,
    key: Option<String>,
}

#[derive(Default)]
pub(crate) struct PatternTrie {
    roots: HashMap<String, Node>,
}

impl PatternTrie {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, method: &str, segments: &[PathSegment], key: String) {
        let root = self.roots.entry(method.to_string()).or_default();
        let mut node = root;
        for segment in segments {
            match segment {
                PathSegment::Literal(lit) => {
                    node = node.literal.entry(lit.clone()).or_default();
                }
                PathSegment::Wildcard(_) => {
                    node = node.wildcard.get_or_insert_with(Box::default);
                }
                PathSegment::Greedy(_) => {
                    node.greedy_key = Some(key.clone());
                    return;
                }
            }
        }
        node.key = Some(key);
    }

    pub(crate) fn remove(&mut self, key: &str) {
        for root in self.roots.values_mut() {
            remove_recursive(root, key);
        }
    }

    pub(crate) fn find(&self, method: &str, path: &str) -> Option<String> {
        let trimmed = path.trim_start_matches('/');
        let segments: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        if let Some(root) = self.roots.get(method) {
            if let Some(found) = find_recursive(root, &segments) {
                return Some(found);
            }
        }
        if method != "ANY" {
            if let Some(root) = self.roots.get("ANY") {
                return find_recursive(root, &segments);
            }
        }
        None
    }
}

fn find_recursive(node: &Node, remaining: &[&str]) -> Option<String> {
    if remaining.is_empty() {
        return node.key.clone().or_else(|| node.greedy_key.clone());
    }
    let (head, tail) = (remaining[0], &remaining[1..]);
    if let Some(child) = node.literal.get(head) {
        if let Some(found) = find_recursive(child, tail) {
            return Some(found);
        }
    }
    if let Some(child) = &node.wildcard {
        if let Some(found) = find_recursive(child, tail) {
            return Some(found);
        }
    }
    node.greedy_key.clone()
}

fn remove_recursive(node: &mut Node, key: &str) -> bool {
    if node.key.as_deref() == Some(key) {
        node.key = None;
    }
    if node.greedy_key.as_deref() == Some(key) {
        node.greedy_key = None;
    }
    for child in node.literal.values_mut() {
        remove_recursive(child, key);
    }
    if let Some(child) = &mut node.wildcard {
        remove_recursive(child, key);
    }
    true
}
