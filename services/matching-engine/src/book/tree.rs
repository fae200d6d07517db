//! Ordered map price → price level, as a red-black tree.
//!
//! Classic CLRS red-black tree with a sentinel NIL node, stored in a
//! flat node arena with u32 indices instead of pointers (parent links
//! make a pointer-based tree unworkable here). The leftmost and
//! rightmost nodes are cached so best-price lookups are O(1).
//!
//! Duplicate keys are impossible by construction: `get_or_create`
//! returns the existing level.

use super::price_level::PriceLevel;

/// Sentinel node index. Slot 0 is always the NIL sentinel.
const NIL: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct Node {
    key: i64,
    left: u32,
    right: u32,
    parent: u32,
    color: Color,
    level: PriceLevel,
}

impl Node {
    fn sentinel() -> Self {
        Self {
            key: 0,
            left: NIL,
            right: NIL,
            parent: NIL,
            color: Color::Black,
            level: PriceLevel::new(0),
        }
    }
}

pub struct PriceTree {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: u32,
    /// Cached leftmost node (lowest price), NIL when empty.
    min: u32,
    /// Cached rightmost node (highest price), NIL when empty.
    max: u32,
    len: usize,
}

impl PriceTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
            root: NIL,
            min: NIL,
            max: NIL,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Existing level at `price`, or a freshly inserted empty one.
    pub fn get_or_create(&mut self, price: i64) -> &mut PriceLevel {
        let mut idx = self.find_node(price);
        if idx == NIL {
            idx = self.insert_node(price);
        }
        &mut self.nodes[idx as usize].level
    }

    pub fn find(&self, price: i64) -> Option<&PriceLevel> {
        let idx = self.find_node(price);
        if idx == NIL {
            None
        } else {
            Some(&self.nodes[idx as usize].level)
        }
    }

    pub fn find_mut(&mut self, price: i64) -> Option<&mut PriceLevel> {
        let idx = self.find_node(price);
        if idx == NIL {
            None
        } else {
            Some(&mut self.nodes[idx as usize].level)
        }
    }

    /// Lowest price in the tree.
    pub fn best_min_price(&self) -> Option<i64> {
        if self.min == NIL {
            None
        } else {
            Some(self.nodes[self.min as usize].key)
        }
    }

    /// Highest price in the tree.
    pub fn best_max_price(&self) -> Option<i64> {
        if self.max == NIL {
            None
        } else {
            Some(self.nodes[self.max as usize].key)
        }
    }

    pub fn best_min(&self) -> Option<&PriceLevel> {
        if self.min == NIL {
            None
        } else {
            Some(&self.nodes[self.min as usize].level)
        }
    }

    pub fn best_max(&self) -> Option<&PriceLevel> {
        if self.max == NIL {
            None
        } else {
            Some(&self.nodes[self.max as usize].level)
        }
    }

    /// Delete the level at `price`. Returns false when absent.
    pub fn remove(&mut self, price: i64) -> bool {
        let z = self.find_node(price);
        if z == NIL {
            return false;
        }
        if z == self.min {
            self.min = self.successor(z);
        }
        if z == self.max {
            self.max = self.predecessor(z);
        }
        self.delete_node(z);
        self.free.push(z);
        self.len -= 1;
        true
    }

    /// In-order ascending walk; the visitor returns false to stop early.
    pub fn walk_asc(&self, mut visit: impl FnMut(&PriceLevel) -> bool) {
        let mut n = self.min;
        while n != NIL {
            if !visit(&self.nodes[n as usize].level) {
                return;
            }
            n = self.successor(n);
        }
    }

    /// In-order descending walk; the visitor returns false to stop early.
    pub fn walk_desc(&self, mut visit: impl FnMut(&PriceLevel) -> bool) {
        let mut n = self.max;
        while n != NIL {
            if !visit(&self.nodes[n as usize].level) {
                return;
            }
            n = self.predecessor(n);
        }
    }

    // ── internal ────────────────────────────────────────────────────

    fn find_node(&self, price: i64) -> u32 {
        let mut n = self.root;
        while n != NIL {
            let node = &self.nodes[n as usize];
            if price < node.key {
                n = node.left;
            } else if price > node.key {
                n = node.right;
            } else {
                return n;
            }
        }
        NIL
    }

    fn alloc_node(&mut self, key: i64) -> u32 {
        let node = Node {
            key,
            left: NIL,
            right: NIL,
            parent: NIL,
            color: Color::Red,
            level: PriceLevel::new(key),
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn insert_node(&mut self, key: i64) -> u32 {
        let z = self.alloc_node(key);

        let mut parent = NIL;
        let mut cursor = self.root;
        while cursor != NIL {
            parent = cursor;
            cursor = if key < self.nodes[cursor as usize].key {
                self.nodes[cursor as usize].left
            } else {
                self.nodes[cursor as usize].right
            };
        }

        self.nodes[z as usize].parent = parent;
        if parent == NIL {
            self.root = z;
        } else if key < self.nodes[parent as usize].key {
            self.nodes[parent as usize].left = z;
        } else {
            self.nodes[parent as usize].right = z;
        }

        self.insert_fixup(z);

        if self.min == NIL || key < self.nodes[self.min as usize].key {
            self.min = z;
        }
        if self.max == NIL || key > self.nodes[self.max as usize].key {
            self.max = z;
        }
        self.len += 1;
        z
    }

    fn insert_fixup(&mut self, mut z: u32) {
        while self.color(self.parent(z)) == Color::Red {
            let parent = self.parent(z);
            let grand = self.parent(parent);
            if parent == self.nodes[grand as usize].left {
                let uncle = self.nodes[grand as usize].right;
                if self.color(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grand, Color::Red);
                    z = grand;
                } else {
                    if z == self.nodes[parent as usize].right {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = self.parent(z);
                    let grand = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grand, Color::Red);
                    self.rotate_right(grand);
                }
            } else {
                let uncle = self.nodes[grand as usize].left;
                if self.color(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grand, Color::Red);
                    z = grand;
                } else {
                    if z == self.nodes[parent as usize].left {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = self.parent(z);
                    let grand = self.parent(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grand, Color::Red);
                    self.rotate_left(grand);
                }
            }
        }
        let root = self.root;
        self.set_color(root, Color::Black);
        self.nodes[NIL as usize].color = Color::Black;
    }

    fn delete_node(&mut self, z: u32) {
        let mut y = z;
        let mut y_color = self.color(y);
        let x;

        if self.nodes[z as usize].left == NIL {
            x = self.nodes[z as usize].right;
            self.transplant(z, x);
        } else if self.nodes[z as usize].right == NIL {
            x = self.nodes[z as usize].left;
            self.transplant(z, x);
        } else {
            y = self.subtree_min(self.nodes[z as usize].right);
            y_color = self.color(y);
            x = self.nodes[y as usize].right;
            if self.parent(y) == z {
                self.nodes[x as usize].parent = y;
            } else {
                self.transplant(y, x);
                let z_right = self.nodes[z as usize].right;
                self.nodes[y as usize].right = z_right;
                self.nodes[z_right as usize].parent = y;
            }
            self.transplant(z, y);
            let z_left = self.nodes[z as usize].left;
            self.nodes[y as usize].left = z_left;
            self.nodes[z_left as usize].parent = y;
            let z_color = self.color(z);
            self.set_color(y, z_color);
        }

        if y_color == Color::Black {
            self.delete_fixup(x);
        }
        self.nodes[NIL as usize].parent = NIL;
        self.nodes[NIL as usize].color = Color::Black;
    }

    fn delete_fixup(&mut self, mut x: u32) {
        while x != self.root && self.color(x) == Color::Black {
            let parent = self.parent(x);
            if x == self.nodes[parent as usize].left {
                let mut w = self.nodes[parent as usize].right;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_left(parent);
                    w = self.nodes[self.parent(x) as usize].right;
                }
                let wl = self.nodes[w as usize].left;
                let wr = self.nodes[w as usize].right;
                if self.color(wl) == Color::Black && self.color(wr) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = self.parent(x);
                } else {
                    if self.color(wr) == Color::Black {
                        self.set_color(wl, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_right(w);
                        w = self.nodes[self.parent(x) as usize].right;
                    }
                    let parent = self.parent(x);
                    let parent_color = self.color(parent);
                    self.set_color(w, parent_color);
                    self.set_color(parent, Color::Black);
                    let wr = self.nodes[w as usize].right;
                    self.set_color(wr, Color::Black);
                    self.rotate_left(parent);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[parent as usize].left;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_right(parent);
                    w = self.nodes[self.parent(x) as usize].left;
                }
                let wl = self.nodes[w as usize].left;
                let wr = self.nodes[w as usize].right;
                if self.color(wl) == Color::Black && self.color(wr) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = self.parent(x);
                } else {
                    if self.color(wl) == Color::Black {
                        self.set_color(wr, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_left(w);
                        w = self.nodes[self.parent(x) as usize].left;
                    }
                    let parent = self.parent(x);
                    let parent_color = self.color(parent);
                    self.set_color(w, parent_color);
                    self.set_color(parent, Color::Black);
                    let wl = self.nodes[w as usize].left;
                    self.set_color(wl, Color::Black);
                    self.rotate_right(parent);
                    x = self.root;
                }
            }
        }
        self.set_color(x, Color::Black);
        self.nodes[NIL as usize].color = Color::Black;
    }

    /// Replace the subtree rooted at `u` with the one rooted at `v`.
    fn transplant(&mut self, u: u32, v: u32) {
        let u_parent = self.parent(u);
        if u_parent == NIL {
            self.root = v;
        } else if u == self.nodes[u_parent as usize].left {
            self.nodes[u_parent as usize].left = v;
        } else {
            self.nodes[u_parent as usize].right = v;
        }
        // The sentinel's parent is set on purpose: delete_fixup walks it.
        self.nodes[v as usize].parent = u_parent;
    }

    fn rotate_left(&mut self, x: u32) {
        let y = self.nodes[x as usize].right;
        let y_left = self.nodes[y as usize].left;

        self.nodes[x as usize].right = y_left;
        if y_left != NIL {
            self.nodes[y_left as usize].parent = x;
        }
        let x_parent = self.parent(x);
        self.nodes[y as usize].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.nodes[x_parent as usize].left {
            self.nodes[x_parent as usize].left = y;
        } else {
            self.nodes[x_parent as usize].right = y;
        }
        self.nodes[y as usize].left = x;
        self.nodes[x as usize].parent = y;
    }

    fn rotate_right(&mut self, x: u32) {
        let y = self.nodes[x as usize].left;
        let y_right = self.nodes[y as usize].right;

        self.nodes[x as usize].left = y_right;
        if y_right != NIL {
            self.nodes[y_right as usize].parent = x;
        }
        let x_parent = self.parent(x);
        self.nodes[y as usize].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.nodes[x_parent as usize].right {
            self.nodes[x_parent as usize].right = y;
        } else {
            self.nodes[x_parent as usize].left = y;
        }
        self.nodes[y as usize].right = x;
        self.nodes[x as usize].parent = y;
    }

    fn subtree_min(&self, mut n: u32) -> u32 {
        while self.nodes[n as usize].left != NIL {
            n = self.nodes[n as usize].left;
        }
        n
    }

    fn subtree_max(&self, mut n: u32) -> u32 {
        while self.nodes[n as usize].right != NIL {
            n = self.nodes[n as usize].right;
        }
        n
    }

    fn successor(&self, n: u32) -> u32 {
        if self.nodes[n as usize].right != NIL {
            return self.subtree_min(self.nodes[n as usize].right);
        }
        let mut n = n;
        let mut p = self.parent(n);
        while p != NIL && n == self.nodes[p as usize].right {
            n = p;
            p = self.parent(p);
        }
        p
    }

    fn predecessor(&self, n: u32) -> u32 {
        if self.nodes[n as usize].left != NIL {
            return self.subtree_max(self.nodes[n as usize].left);
        }
        let mut n = n;
        let mut p = self.parent(n);
        while p != NIL && n == self.nodes[p as usize].left {
            n = p;
            p = self.parent(p);
        }
        p
    }

    #[inline]
    fn parent(&self, n: u32) -> u32 {
        self.nodes[n as usize].parent
    }

    #[inline]
    fn color(&self, n: u32) -> Color {
        self.nodes[n as usize].color
    }

    #[inline]
    fn set_color(&mut self, n: u32, color: Color) {
        self.nodes[n as usize].color = color;
    }
}

impl Default for PriceTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    impl PriceTree {
        /// Red-black invariant check: BST order, no red-red edges,
        /// uniform black height, and accurate cached min/max.
        fn check_invariants(&self) {
            fn walk(tree: &PriceTree, n: u32, lo: Option<i64>, hi: Option<i64>) -> usize {
                if n == NIL {
                    return 1;
                }
                let node = &tree.nodes[n as usize];
                if let Some(lo) = lo {
                    assert!(node.key > lo, "BST order violated");
                }
                if let Some(hi) = hi {
                    assert!(node.key < hi, "BST order violated");
                }
                if node.color == Color::Red {
                    assert_eq!(
                        tree.color(node.left),
                        Color::Black,
                        "red node with red left child"
                    );
                    assert_eq!(
                        tree.color(node.right),
                        Color::Black,
                        "red node with red right child"
                    );
                }
                let lh = walk(tree, node.left, lo, Some(node.key));
                let rh = walk(tree, node.right, Some(node.key), hi);
                assert_eq!(lh, rh, "black height mismatch");
                lh + usize::from(node.color == Color::Black)
            }

            assert_eq!(self.color(self.root), Color::Black, "root must be black");
            walk(self, self.root, None, None);

            if self.root == NIL {
                assert_eq!(self.min, NIL);
                assert_eq!(self.max, NIL);
            } else {
                assert_eq!(self.min, self.subtree_min(self.root));
                assert_eq!(self.max, self.subtree_max(self.root));
            }
        }
    }

    fn keys_asc(tree: &PriceTree) -> Vec<i64> {
        let mut out = Vec::new();
        tree.walk_asc(|lvl| {
            out.push(lvl.price);
            true
        });
        out
    }

    #[test]
    fn test_empty_tree() {
        let tree = PriceTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.best_min_price(), None);
        assert_eq!(tree.best_max_price(), None);
        assert!(tree.find(100).is_none());
    }

    #[test]
    fn test_get_or_create_dedupes() {
        let mut tree = PriceTree::new();
        tree.get_or_create(100).total_qty = 5;
        assert_eq!(tree.len(), 1);

        // Same price returns the existing level
        assert_eq!(tree.get_or_create(100).total_qty, 5);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_min_max_tracking() {
        let mut tree = PriceTree::new();
        for price in [105, 99, 120, 101, 95] {
            tree.get_or_create(price);
        }
        assert_eq!(tree.best_min_price(), Some(95));
        assert_eq!(tree.best_max_price(), Some(120));

        assert!(tree.remove(95));
        assert_eq!(tree.best_min_price(), Some(99));

        assert!(tree.remove(120));
        assert_eq!(tree.best_max_price(), Some(105));
        tree.check_invariants();
    }

    #[test]
    fn test_remove_absent() {
        let mut tree = PriceTree::new();
        tree.get_or_create(10);
        assert!(!tree.remove(11));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_remove_to_empty() {
        let mut tree = PriceTree::new();
        tree.get_or_create(1);
        assert!(tree.remove(1));
        assert!(tree.is_empty());
        assert_eq!(tree.best_min_price(), None);
        assert_eq!(tree.best_max_price(), None);
        tree.check_invariants();

        // Node slots are reused
        tree.get_or_create(2);
        assert_eq!(tree.best_min_price(), Some(2));
    }

    #[test]
    fn test_walk_order() {
        let mut tree = PriceTree::new();
        for price in [50, 10, 90, 30, 70] {
            tree.get_or_create(price);
        }
        assert_eq!(keys_asc(&tree), vec![10, 30, 50, 70, 90]);

        let mut desc = Vec::new();
        tree.walk_desc(|lvl| {
            desc.push(lvl.price);
            true
        });
        assert_eq!(desc, vec![90, 70, 50, 30, 10]);
    }

    #[test]
    fn test_walk_early_exit() {
        let mut tree = PriceTree::new();
        for price in 1..=10 {
            tree.get_or_create(price);
        }
        let mut seen = Vec::new();
        tree.walk_asc(|lvl| {
            seen.push(lvl.price);
            lvl.price < 4
        });
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_randomized_against_btreemap() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        let mut tree = PriceTree::new();
        let mut reference: BTreeMap<i64, ()> = BTreeMap::new();

        for _ in 0..4000 {
            let price = rng.gen_range(0..200);
            if rng.gen_bool(0.6) {
                tree.get_or_create(price);
                reference.insert(price, ());
            } else {
                assert_eq!(tree.remove(price), reference.remove(&price).is_some());
            }

            assert_eq!(tree.len(), reference.len());
            assert_eq!(
                tree.best_min_price(),
                reference.keys().next().copied()
            );
            assert_eq!(
                tree.best_max_price(),
                reference.keys().next_back().copied()
            );
        }

        tree.check_invariants();
        let expected: Vec<i64> = reference.keys().copied().collect();
        assert_eq!(keys_asc(&tree), expected);
    }

    #[test]
    fn test_invariants_hold_under_churn() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut tree = PriceTree::new();
        for i in 0..500 {
            let price = rng.gen_range(0..64);
            if rng.gen_bool(0.5) {
                tree.get_or_create(price);
            } else {
                tree.remove(price);
            }
            if i % 25 == 0 {
                tree.check_invariants();
            }
        }
        tree.check_invariants();
    }

    #[test]
    fn test_ascending_and_descending_inserts() {
        let mut tree = PriceTree::new();
        for price in 0..128 {
            tree.get_or_create(price);
        }
        tree.check_invariants();
        assert_eq!(tree.len(), 128);

        let mut tree = PriceTree::new();
        for price in (0..128).rev() {
            tree.get_or_create(price);
        }
        tree.check_invariants();
        assert_eq!(tree.best_min_price(), Some(0));
        assert_eq!(tree.best_max_price(), Some(127));
    }
}
