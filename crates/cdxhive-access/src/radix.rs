//! Inverted prefix index over SSURT strings.
//!
//! A compressed radix tree mapping each stored prefix to the rule ids filed
//! under it. Lookup walks the tree once along the document string and
//! collects the ids of every stored key that is a prefix of it, shortest
//! key first, so general rules come back before specific ones.
//!
//! Keys may be empty: a bare `*` rule expands to the empty prefix, which
//! lives at the root and matches every document.

/// Compressed prefix tree of rule ids.
///
/// Edges carry multi-character labels and are split lazily on insert, so a
/// lookup touches one node per shared label run rather than one per
/// character. Ids filed under the same key keep their insertion order.
#[derive(Default)]
pub(crate) struct RadixTree {
    root: Node,
}

#[derive(Default)]
struct Node {
    /// Edge label leading from the parent into this node. Empty only at
    /// the root.
    label: String,
    /// Ids filed at exactly this node's full key, in insertion order.
    ids: Vec<u64>,
    children: Vec<Node>,
}

impl RadixTree {
    pub(crate) fn insert(&mut self, key: &str, id: u64) {
        insert_at(&mut self.root, key, id);
    }

    /// Removes one id filed under `key`, pruning and re-compressing the
    /// path it leaves behind.
    pub(crate) fn remove(&mut self, key: &str, id: u64) {
        remove_at(&mut self.root, key, id);
    }

    /// Scrubs an id from every node. Used when a rule's keys can no longer
    /// be recomputed from its patterns.
    pub(crate) fn remove_id(&mut self, id: u64) {
        scrub(&mut self.root, id);
    }

    /// Ids of every stored key that is a prefix of `document`, shortest
    /// key first.
    pub(crate) fn ids_prefixing(&self, document: &str) -> Vec<u64> {
        let mut ids = self.root.ids.clone();
        let mut node = &self.root;
        let mut rest = document;
        'walk: loop {
            for child in &node.children {
                if let Some(remainder) = rest.strip_prefix(child.label.as_str()) {
                    ids.extend_from_slice(&child.ids);
                    node = child;
                    rest = remainder;
                    continue 'walk;
                }
            }
            // no edge label is consumed entirely by what is left of the
            // document, so no deeper key can be a prefix of it
            return ids;
        }
    }
}

impl Node {
    fn leaf(key: &str, id: u64) -> Node {
        Node {
            label: key.to_string(),
            ids: vec![id],
            children: Vec::new(),
        }
    }

    /// Splits this node's edge after `at` bytes, pushing its contents and
    /// the label tail down into a new child.
    fn split(&mut self, at: usize) {
        let tail = Node {
            label: self.label[at..].to_string(),
            ids: std::mem::take(&mut self.ids),
            children: std::mem::take(&mut self.children),
        };
        self.label.truncate(at);
        self.children.push(tail);
    }
}

fn insert_at(node: &mut Node, key: &str, id: u64) {
    if key.is_empty() {
        node.ids.push(id);
        return;
    }
    for child in &mut node.children {
        let shared = common_prefix_len(&child.label, key);
        if shared == 0 {
            continue;
        }
        if shared < child.label.len() {
            child.split(shared);
        }
        insert_at(child, &key[shared..], id);
        return;
    }
    node.children.push(Node::leaf(key, id));
}

fn remove_at(node: &mut Node, key: &str, id: u64) {
    if key.is_empty() {
        node.ids.retain(|other| *other != id);
        return;
    }
    let index = match node
        .children
        .iter()
        .position(|child| key.starts_with(child.label.as_str()))
    {
        Some(index) => index,
        None => return,
    };
    let rest = &key[node.children[index].label.len()..];
    remove_at(&mut node.children[index], rest, id);

    let child = &node.children[index];
    if child.ids.is_empty() && child.children.is_empty() {
        node.children.swap_remove(index);
    } else if child.ids.is_empty() && child.children.len() == 1 {
        // the emptied node and its only child collapse back into one edge
        let mut emptied = std::mem::take(&mut node.children[index]);
        if let Some(mut grandchild) = emptied.children.pop() {
            grandchild.label.insert_str(0, &emptied.label);
            node.children[index] = grandchild;
        }
    }
}

fn scrub(node: &mut Node, id: u64) {
    node.ids.retain(|other| *other != id);
    for child in &mut node.children {
        scrub(child, id);
    }
    node.children
        .retain(|child| !child.ids.is_empty() || !child.children.is_empty());
}

/// Length in bytes of the longest common prefix of `a` and `b` that ends on
/// a character boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    let mut len = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .take_while(|(x, y)| x == y)
        .count();
    while !a.is_char_boundary(len) {
        len -= 1;
    }
    len
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
