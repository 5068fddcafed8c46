/*
 * This file is part of corebase.
 *
 * corebase is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * corebase is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with corebase. If not, see <https://www.gnu.org/licenses/>.
*/

//! A splay-indexed piece string. Every node owns a chunk of text plus a
//! `weight` (its own chunk length, plus both children's weights), so
//! locating the node that holds character `i` is a weighted binary descent,
//! and every splay re-derives weight bottom-up as it rotates nodes past
//! their ancestors.
//!
//! The source threads one arena (`x_mset`) across every rope so `merge`
//! (attach one tree under another) and `split` (detach a subtree) are
//! pointer splices. A `Vec`-backed arena can't alias across two owned
//! `Rope`s like that, so merges and splits here physically move nodes
//! between arenas (a recursive walk remapping indices) instead of
//! relinking pointers. The splay/weight machinery itself — the part worth
//! studying — is unchanged.

use std::fmt;

type NodeId = usize;

#[derive(Clone)]
struct RopeNode {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    weight: usize,
    buf: String,
}

/// A piece string indexed by character position (not byte offset).
#[derive(Clone)]
pub struct Rope {
    nodes: Vec<Option<RopeNode>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
}

impl Rope {
    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
        }
    }

    pub fn new(s: impl Into<String>) -> Self {
        let buf = s.into();
        let mut r = Self::empty();
        if buf.is_empty() {
            return r;
        }
        let size = buf.chars().count();
        let id = r.alloc(RopeNode {
            parent: None,
            left: None,
            right: None,
            weight: size,
            buf,
        });
        r.root = Some(id);
        r
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// O(1): the root's weight already is the whole rope's character count.
    pub fn len(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].as_ref().unwrap().weight)
    }

    fn alloc(&mut self, node: RopeNode) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn weight(&self, id: Option<NodeId>) -> usize {
        id.map_or(0, |id| self.nodes[id].as_ref().unwrap().weight)
    }

    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].as_ref().unwrap().left
    }
    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].as_ref().unwrap().right
    }
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].as_ref().unwrap().parent
    }
    fn set_left(&mut self, id: NodeId, child: Option<NodeId>) {
        self.nodes[id].as_mut().unwrap().left = child;
        if let Some(c) = child {
            self.nodes[c].as_mut().unwrap().parent = Some(id);
        }
    }
    fn set_right(&mut self, id: NodeId, child: Option<NodeId>) {
        self.nodes[id].as_mut().unwrap().right = child;
        if let Some(c) = child {
            self.nodes[c].as_mut().unwrap().parent = Some(id);
        }
    }
    fn is_left_child(&self, id: NodeId) -> bool {
        match self.parent(id) {
            Some(p) => self.left(p) == Some(id),
            None => false,
        }
    }

    fn recompute_weight(&mut self, id: NodeId) {
        let (l, r, size) = {
            let node = self.nodes[id].as_ref().unwrap();
            (node.left, node.right, node.buf.chars().count())
        };
        let w = size + self.weight(l) + self.weight(r);
        self.nodes[id].as_mut().unwrap().weight = w;
    }

    fn rotate(&mut self, x: NodeId) {
        let p = self.parent(x).expect("rotate on root");
        let g = self.parent(p);
        if self.is_left_child(x) {
            let b = self.right(x);
            self.set_right(x, Some(p));
            self.set_left(p, b);
        } else {
            let b = self.left(x);
            self.set_left(x, Some(p));
            self.set_right(p, b);
        }
        self.nodes[x].as_mut().unwrap().parent = g;
        if let Some(g) = g {
            if self.left(g) == Some(p) {
                self.nodes[g].as_mut().unwrap().left = Some(x);
            } else {
                self.nodes[g].as_mut().unwrap().right = Some(x);
            }
        } else {
            self.root = Some(x);
        }
        // bottom-up: the (now-child) old parent's weight depends on its new
        // children, then the (now-parent) x's weight depends on that.
        self.recompute_weight(p);
        self.recompute_weight(x);
    }

    fn splay(&mut self, x: NodeId) {
        while let Some(p) = self.parent(x) {
            match self.parent(p) {
                None => self.rotate(x),
                Some(_) => {
                    if self.is_left_child(x) == self.is_left_child(p) {
                        self.rotate(p);
                        self.rotate(x);
                    } else {
                        self.rotate(x);
                        self.rotate(x);
                    }
                }
            }
        }
        self.root = Some(x);
    }

    /// Descends from `cur` to the node whose own chunk contains `index`,
    /// returning that node and the offset of `index` within its chunk.
    fn find_node(&self, mut cur: NodeId, mut index: usize) -> (NodeId, usize) {
        loop {
            let node = self.nodes[cur].as_ref().unwrap();
            let lw = self.weight(node.left);
            let size = node.buf.chars().count();
            if index < lw {
                cur = node.left.expect("weight accounting is inconsistent");
            } else if index < lw + size {
                return (cur, index - lw);
            } else {
                index -= lw + size;
                cur = node.right.expect("weight accounting is inconsistent");
            }
        }
    }

    /// Returns the node containing character `index`, splayed to the root —
    /// the amortisation helper backing every positional operation.
    fn locate(&mut self, index: usize) -> Option<NodeId> {
        let root = self.root?;
        let (id, _) = self.find_node(root, index);
        self.splay(id);
        self.root
    }

    pub fn at(&mut self, index: usize) -> Option<char> {
        if index >= self.len() {
            return None;
        }
        let root = self.locate(index)?;
        let (id, offset) = self.find_node(root, index);
        self.nodes[id].as_ref().unwrap().buf.chars().nth(offset)
    }

    /// Moves the subtree rooted at `id` (still attached to this rope) into a
    /// freshly-allocated, independent `Rope`, recursively remapping indices.
    fn export_subtree(&mut self, id: NodeId) -> Rope {
        let mut dst = Rope::empty();
        let new_root = self.move_node(id, &mut dst);
        dst.root = Some(new_root);
        dst
    }

    fn move_node(&mut self, id: NodeId, dst: &mut Rope) -> NodeId {
        let node = self.nodes[id].take().expect("moving an already-freed rope node");
        self.free.push(id);
        let new_left = node.left.map(|l| self.move_node(l, dst));
        let new_right = node.right.map(|r| self.move_node(r, dst));
        let new_id = dst.alloc(RopeNode {
            parent: None,
            left: new_left,
            right: new_right,
            weight: node.weight,
            buf: node.buf,
        });
        if let Some(l) = new_left {
            dst.nodes[l].as_mut().unwrap().parent = Some(new_id);
        }
        if let Some(r) = new_right {
            dst.nodes[r].as_mut().unwrap().parent = Some(new_id);
        }
        new_id
    }

    /// Splits at character `i`: `self` keeps `[0, i)`, the returned rope
    /// owns `[i, len)`.
    pub fn split(&mut self, i: usize) -> Rope {
        let total = self.len();
        assert!(i <= total, "split index out of bounds");
        if i == 0 {
            return std::mem::replace(self, Rope::empty());
        }
        if i == total {
            return Rope::empty();
        }
        let root = self.locate(i).expect("non-empty rope has a root");
        let (node_id, offset) = self.find_node(root, i);
        self.splay(node_id);
        let root = self.root.unwrap();
        let size = self.nodes[root].as_ref().unwrap().buf.chars().count();

        if offset == 0 {
            let left = self.nodes[root].as_mut().unwrap().left.take();
            if let Some(l) = left {
                self.nodes[l].as_mut().unwrap().parent = None;
            }
            self.nodes[root].as_mut().unwrap().parent = None;
            self.root = left;
            return self.export_subtree(root);
        }

        if offset == size {
            let right = self.nodes[root].as_mut().unwrap().right.take();
            self.recompute_weight(root);
            return match right {
                Some(r) => {
                    self.nodes[r].as_mut().unwrap().parent = None;
                    self.export_subtree(r)
                }
                None => Rope::empty(),
            };
        }

        // the split point falls inside this node's own chunk: physically
        // split the chunk into a left piece (stays here) and a right piece
        // (heads the tail, keeping whatever was already to the right).
        let (left_part, right_part) = {
            let buf = &self.nodes[root].as_ref().unwrap().buf;
            let byte_at = buf
                .char_indices()
                .nth(offset)
                .map(|(b, _)| b)
                .unwrap_or(buf.len());
            (buf[..byte_at].to_string(), buf[byte_at..].to_string())
        };
        let old_right = self.nodes[root].as_mut().unwrap().right.take();
        self.nodes[root].as_mut().unwrap().buf = left_part;
        self.recompute_weight(root);

        let right_id = self.alloc(RopeNode {
            parent: None,
            left: None,
            right: old_right,
            weight: 0,
            buf: right_part,
        });
        if let Some(r) = old_right {
            self.nodes[r].as_mut().unwrap().parent = Some(right_id);
        }
        self.recompute_weight(right_id);
        self.export_subtree(right_id)
    }

    /// Appends `other` onto `self`, consuming it.
    pub fn merge(&mut self, other: Rope) {
        if other.is_empty() {
            return;
        }
        let other_root_weight = other.len();
        let other_root = self.import(other);
        match self.root {
            None => self.root = Some(other_root),
            Some(self_root) => {
                let w = self.nodes[self_root].as_ref().unwrap().weight + other_root_weight;
                let new_root = self.alloc(RopeNode {
                    parent: None,
                    left: Some(self_root),
                    right: Some(other_root),
                    weight: w,
                    buf: String::new(),
                });
                self.nodes[self_root].as_mut().unwrap().parent = Some(new_root);
                self.nodes[other_root].as_mut().unwrap().parent = Some(new_root);
                self.root = Some(new_root);
            }
        }
    }

    /// Imports every live node of `other` into `self`'s arena with fresh
    /// ids, remapping internal links, and returns the remapped root.
    fn import(&mut self, other: Rope) -> NodeId {
        let mut remap = vec![None; other.nodes.len()];
        let mut next = self.nodes.len();
        for (old_id, slot) in other.nodes.iter().enumerate() {
            if slot.is_some() {
                remap[old_id] = Some(next);
                next += 1;
            }
        }
        for (old_id, slot) in other.nodes.into_iter().enumerate() {
            if let Some(mut node) = slot {
                node.parent = node.parent.map(|p| remap[p].unwrap());
                node.left = node.left.map(|l| remap[l].unwrap());
                node.right = node.right.map(|r| remap[r].unwrap());
                self.nodes.push(Some(node));
            }
            let _ = old_id;
        }
        remap[other.root.unwrap()].unwrap()
    }

    /// Splices `ins` in at character `i`, consuming it.
    pub fn insert(&mut self, i: usize, ins: Rope) {
        let tail = self.split(i);
        self.merge(ins);
        self.merge(tail);
    }

    /// Excises `[i, i + len)` and returns it as its own rope.
    pub fn remove(&mut self, i: usize, len: usize) -> Rope {
        let mut tail = self.split(i);
        let rest = tail.split(len);
        self.merge(rest);
        tail
    }

    pub fn append(&mut self, s: impl Into<String>) {
        self.merge(Rope::new(s.into()));
    }

    /// Formats `args` into a fresh buffer and splices it in at `i` — the
    /// idiomatic stand-in for the source's `printf`/`vprintf` pair; call it
    /// with `format_args!(...)` the way you would `write!`.
    pub fn insert_formatted(&mut self, i: usize, args: fmt::Arguments<'_>) {
        self.insert(i, Rope::new(fmt::format(args)));
    }

    /// Materialises the whole rope into one contiguous `String`.
    pub fn splice(&self) -> String {
        let mut out = String::with_capacity(self.len());
        if let Some(root) = self.root {
            self.collect_string(root, &mut out);
        }
        out
    }

    fn collect_string(&self, id: NodeId, out: &mut String) {
        let node = self.nodes[id].as_ref().unwrap();
        if let Some(l) = node.left {
            self.collect_string(l, out);
        }
        out.push_str(&node.buf);
        if let Some(r) = node.right {
            self.collect_string(r, out);
        }
    }

    /// Rebuilds the tree as a balanced BST via an in-order walk followed by
    /// divide-and-conquer reassembly. Reuses every existing node; only
    /// `parent`/`left`/`right`/`weight` are rewritten.
    pub fn balance(&mut self) {
        let Some(root) = self.root else { return };
        let mut ids = Vec::with_capacity(self.len());
        self.collect_inorder(root, &mut ids);
        self.root = self.build_balanced(&ids);
    }

    fn collect_inorder(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = self.nodes[id].as_ref().unwrap();
        if let Some(l) = node.left {
            self.collect_inorder(l, out);
        }
        out.push(id);
        if let Some(r) = node.right {
            self.collect_inorder(r, out);
        }
    }

    fn build_balanced(&mut self, ids: &[NodeId]) -> Option<NodeId> {
        if ids.is_empty() {
            return None;
        }
        let mid = ids.len() / 2;
        let left = self.build_balanced(&ids[..mid]);
        let right = self.build_balanced(&ids[mid + 1..]);
        let id = ids[mid];
        {
            let node = self.nodes[id].as_mut().unwrap();
            node.left = left;
            node.right = right;
            node.parent = None;
        }
        if let Some(l) = left {
            self.nodes[l].as_mut().unwrap().parent = Some(id);
        }
        if let Some(r) = right {
            self.nodes[r].as_mut().unwrap().parent = Some(id);
        }
        self.recompute_weight(id);
        Some(id)
    }
}

impl Default for Rope {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rope_reports_its_length() {
        let r = Rope::new("hello");
        assert_eq!(r.len(), 5);
        assert_eq!(r.splice(), "hello");
    }

    #[test]
    fn split_then_merge_round_trips() {
        let mut r = Rope::new("hello world");
        let tail = r.split(5);
        assert_eq!(r.splice(), "hello");
        assert_eq!(tail.splice(), " world");
        r.merge(tail);
        assert_eq!(r.splice(), "hello world");
    }

    #[test]
    fn insert_splices_in_the_middle() {
        let mut r = Rope::new("hello world");
        r.insert(5, Rope::new(","));
        assert_eq!(r.splice(), "hello, world");
    }

    #[test]
    fn remove_excises_a_range() {
        let mut r = Rope::new("hello, world");
        let removed = r.remove(5, 2);
        assert_eq!(r.splice(), "hello world");
        assert_eq!(removed.splice(), ", ");
    }

    #[test]
    fn at_indexes_by_character_after_mutation() {
        let mut r = Rope::new("hello");
        r.insert(0, Rope::new("say "));
        assert_eq!(r.at(0), Some('s'));
        assert_eq!(r.at(4), Some('h'));
        assert_eq!(r.at(r.len() - 1), Some('o'));
        assert_eq!(r.at(r.len()), None);
    }

    #[test]
    fn append_and_formatted_insert() {
        let mut r = Rope::new("count: ");
        r.append("!");
        r.insert_formatted(7, format_args!("{}", 42));
        assert_eq!(r.splice(), "count: 42!");
    }

    #[test]
    fn balance_preserves_content_and_order() {
        let mut r = Rope::new("a");
        for piece in ["b", "c", "d", "e", "f", "g"] {
            r.append(piece);
        }
        let before = r.splice();
        r.balance();
        assert_eq!(r.splice(), before);
        assert_eq!(before, "abcdefg");
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let mut r = Rope::new("hello");
        let mut c = r.clone();
        c.append(" world");
        assert_eq!(r.splice(), "hello");
        assert_eq!(c.splice(), "hello world");
    }

    #[test]
    fn split_at_boundaries_is_exact() {
        let mut r = Rope::new("abc");
        let tail = r.split(0);
        assert_eq!(r.splice(), "");
        assert_eq!(tail.splice(), "abc");

        let mut r2 = Rope::new("abc");
        let tail2 = r2.split(3);
        assert_eq!(r2.splice(), "abc");
        assert_eq!(tail2.splice(), "");
    }
}
