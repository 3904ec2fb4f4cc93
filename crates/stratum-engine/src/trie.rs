use std::collections::HashMap;

/// Trie of registered module prefixes, one node per dot-delimited segment.
#[derive(Debug, Default)]
pub struct PrefixIndex {
    /// Set when a registered prefix ends at this node.
    prefix: Option<String>,
    children: HashMap<String, PrefixIndex>,
}

impl PrefixIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_prefix(&mut self, prefix: &str) {
        let mut cur = self;
        for part in prefix.split('.') {
            cur = cur.children.entry(part.to_string()).or_default();
        }
        cur.prefix = Some(prefix.to_string());
    }

    /// Unmark `prefix` and prune nodes that no longer lead to any registered prefix.
    pub fn remove_prefix(&mut self, prefix: &str) {
        let parts: Vec<&str> = prefix.split('.').collect();
        Self::remove(self, &parts);
    }

    fn remove(node: &mut PrefixIndex, parts: &[&str]) -> bool {
        let Some((head, rest)) = parts.split_first() else {
            node.prefix = None;
            return true;
        };
        let Some(child) = node.children.get_mut(*head) else {
            return false;
        };
        let found = Self::remove(child, rest);
        if found && child.prefix.is_none() && child.children.is_empty() {
            node.children.remove(*head);
        }
        found
    }

    /// The first registered prefix met while walking `key` from the root.
    ///
    /// Ancestors win: with `a.b` and `a.b.c` registered, `a.b.c.d` resolves to `a.b`.
    pub fn find_prefix(&self, key: &str) -> Option<&str> {
        let mut cur = self;
        for part in key.split('.') {
            if let Some(prefix) = &cur.prefix {
                return Some(prefix);
            }
            cur = cur.children.get(part)?;
        }
        cur.prefix.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.children.is_empty()
    }

    /// Every registered prefix, sorted.
    pub fn prefixes(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out.sort();
        out
    }

    fn collect(&self, out: &mut Vec<String>) {
        if let Some(prefix) = &self.prefix {
            out.push(prefix.clone());
        }
        for child in self.children.values() {
            child.collect(out);
        }
    }
}
