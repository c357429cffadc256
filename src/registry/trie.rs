use std::collections::HashMap;
use std::sync::Arc;

use crate::route::Pool;

/// Path-segment trie mapping normalized route keys to pools.
///
/// The first segment of a key is the host, the rest are path segments.
/// Every node is reachable only while it holds a pool or an ancestor of
/// one; `delete` and `retain_pools` collapse empty branches on the way
/// back up to keep that invariant.
pub(crate) struct Trie {
    pool: Option<Arc<Pool>>,
    children: HashMap<String, Trie>,
}

fn split_segment(key: &str) -> (&str, &str) {
    match key.split_once('/') {
        Some((head, rest)) => (head, rest),
        None => (key, ""),
    }
}

impl Trie {
    pub(crate) fn new() -> Self {
        Self {
            pool: None,
            children: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, pool: Arc<Pool>) {
        if key.is_empty() {
            self.pool = Some(pool);
            return;
        }
        let (head, rest) = split_segment(key);
        self.children
            .entry(head.to_string())
            .or_insert_with(Trie::new)
            .insert(rest, pool);
    }

    /// Exact-key lookup.
    pub(crate) fn find(&self, key: &str) -> Option<Arc<Pool>> {
        if key.is_empty() {
            return self.pool.clone();
        }
        let (head, rest) = split_segment(key);
        self.children.get(head)?.find(rest)
    }

    /// Longest-prefix lookup: walks the key as far as the trie matches and
    /// returns the deepest pool seen along the way, so `host/a/b/c`
    /// resolves to the pool registered at `host/a` when nothing deeper
    /// exists.
    pub(crate) fn match_uri(&self, key: &str) -> Option<Arc<Pool>> {
        let mut node = self;
        let mut key = key;
        let mut last: Option<Arc<Pool>> = None;
        loop {
            let (head, rest) = split_segment(key);
            match node.children.get(head) {
                Some(child) => {
                    if child.pool.is_some() {
                        last = child.pool.clone();
                    }
                    if rest.is_empty() {
                        break;
                    }
                    node = child;
                    key = rest;
                }
                None => break,
            }
        }
        last
    }

    /// Removes the pool at `key` and snips newly-empty ancestors.
    /// Returns true when a pool was removed.
    pub(crate) fn delete(&mut self, key: &str) -> bool {
        if key.is_empty() {
            let had_pool = self.pool.is_some();
            self.pool = None;
            return had_pool;
        }
        let (head, rest) = split_segment(key);
        let Some(child) = self.children.get_mut(head) else {
            return false;
        };
        let removed = child.delete(rest);
        if child.is_deletable() {
            self.children.remove(head);
        }
        removed
    }

    pub(crate) fn pool_count(&self) -> usize {
        let own = usize::from(self.pool.is_some());
        own + self.children.values().map(Trie::pool_count).sum::<usize>()
    }

    pub(crate) fn endpoint_count(&self) -> usize {
        let own = self.pool.as_ref().map_or(0, |p| p.count());
        own + self
            .children
            .values()
            .map(Trie::endpoint_count)
            .sum::<usize>()
    }

    /// Visits every pool with its reconstructed route key.
    pub(crate) fn each_pool_with_path(&self, prefix: &str, f: &mut dyn FnMut(&str, &Arc<Pool>)) {
        if let Some(pool) = &self.pool {
            f(prefix, pool);
        }
        for (segment, child) in &self.children {
            let path = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{prefix}/{segment}")
            };
            child.each_pool_with_path(&path, f);
        }
    }

    /// Visits every pool; pools for which `should_remove` returns true are
    /// dropped and the emptied branches snipped.
    pub(crate) fn retain_pools(
        &mut self,
        prefix: &str,
        should_remove: &mut dyn FnMut(&str, &Arc<Pool>) -> bool,
    ) {
        if let Some(pool) = &self.pool {
            if should_remove(prefix, pool) {
                self.pool = None;
            }
        }
        self.children.retain(|segment, child| {
            let path = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{prefix}/{segment}")
            };
            child.retain_pools(&path, should_remove);
            !child.is_deletable()
        });
    }

    fn is_deletable(&self) -> bool {
        self.pool.is_none() && self.children.is_empty()
    }
}
