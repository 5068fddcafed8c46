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

//! A hierarchical path-mask set: every stored path carries a bitmask, and
//! looking a path up returns the mask of the nearest ancestor that has one.
//!
//! Each mark keeps a per-segment hash chain rather than the raw path, so
//! ancestor/equality tests are array comparisons instead of string slicing.
//! `path_mark_above`/`_match`/`_contain` in the source do the same thing over
//! a flexible-array `path[]`; here that's just `Vec<u64>`.

use crate::containers::list::{List, NodeId};
use crate::util::error::{CoreResult, Error};
use log::trace;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const MAX_DEPTH: usize = 256;
const MAX_PATH_LEN: usize = 4096;

struct Mark {
    path: String,
    segments: Vec<u64>,
    is_leaf: bool,
    mask: u32,
}

impl Mark {
    fn depth(&self) -> usize {
        self.segments.len()
    }

    fn matches(&self, other: &[u64]) -> bool {
        self.segments == other
    }

    /// True if `self` is a (not necessarily strict) ancestor of `other`: a
    /// proper or equal prefix of its segment chain.
    fn is_ancestor_of(&self, other: &[u64]) -> bool {
        self.depth() <= other.len() && self.segments[..] == other[..self.depth()]
    }

    fn is_strict_ancestor_of(&self, other: &[u64]) -> bool {
        self.depth() < other.len() && self.is_ancestor_of(other)
    }
}

struct State {
    marks: List<Mark>,
    unitary_mask: u32,
}

/// Owns its marks behind a single read-write lock: mutators (`insert`,
/// `remove`, `clear`) take the writer side, `mask`/`dump`/`find_top` the
/// reader side.
pub struct PathSet {
    state: RwLock<State>,
}

fn segment_hash(segment: &str) -> u64 {
    let mut h = DefaultHasher::new();
    segment.hash(&mut h);
    h.finish()
}

/// Normalises `path`: collapses repeated `/`, resolves `.` and `..`,
/// requires a leading `/`. Returns the canonical string and its per-segment
/// hash chain.
fn canonicalize(path: &str) -> CoreResult<(String, Vec<u64>)> {
    if !path.starts_with('/') {
        return Err(Error::invalid_argument("path must be absolute"));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(Error::invalid_argument("path exceeds the platform length limit"));
    }
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            seg => stack.push(seg),
        }
    }
    if stack.len() > MAX_DEPTH {
        return Err(Error::invalid_argument("path nesting exceeds the built-in depth cap"));
    }
    let segments: Vec<u64> = stack.iter().map(|s| segment_hash(s)).collect();
    let canonical = if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    };
    Ok((canonical, segments))
}

#[derive(Debug)]
enum UpdateSite {
    Exact(NodeId),
    Ancestor(NodeId),
    None,
}

impl PathSet {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                marks: List::new(),
                unitary_mask: 0,
            }),
        }
    }

    fn find_site(state: &State, segments: &[u64], is_leaf: bool) -> UpdateSite {
        let mut best_ancestor: Option<(NodeId, usize)> = None;
        for (id, mark) in state.marks.iter() {
            if mark.is_leaf != is_leaf {
                continue;
            }
            if mark.matches(segments) {
                return UpdateSite::Exact(id);
            }
            if mark.is_ancestor_of(segments) {
                let depth = mark.depth();
                if best_ancestor.map_or(true, |(_, d)| depth > d) {
                    best_ancestor = Some((id, depth));
                }
            }
        }
        match best_ancestor {
            Some((id, _)) => UpdateSite::Ancestor(id),
            None => UpdateSite::None,
        }
    }

    /// Sets `mask_bits` on `path`'s mark (creating it if needed) and
    /// propagates the change to descendants. Returns the bits that were
    /// actually newly set (absent before the call).
    pub fn insert(&self, path: &str, is_leaf: bool, mask_bits: u32) -> CoreResult<u32> {
        let (canonical, segments) = canonicalize(path)?;
        let mut state = self.state.write();
        let site = Self::find_site(&state, &segments, is_leaf);
        trace!("pathset: insert {canonical:?} mask={mask_bits:#x} site={site:?}");
        let before = match site {
            UpdateSite::Exact(id) => {
                let mark = state.marks.get_mut(id);
                let before = mark.mask;
                mark.mask |= mask_bits;
                Self::transmit(&mut state, id, mask_bits, true);
                before
            }
            UpdateSite::Ancestor(anc) => {
                let base = state.marks.get(anc).mask;
                let id = state.marks.push_back(Mark {
                    path: canonical,
                    segments,
                    is_leaf,
                    mask: base | mask_bits,
                });
                Self::transmit(&mut state, id, mask_bits, true);
                base
            }
            UpdateSite::None => {
                let id = state.marks.push_back(Mark {
                    path: canonical,
                    segments,
                    is_leaf,
                    mask: mask_bits,
                });
                Self::transmit(&mut state, id, mask_bits, true);
                0
            }
        };
        Ok(mask_bits & !before)
    }

    /// Clears `mask_bits` on `path`'s mark, removing marks that become
    /// redundant. Returns the bits that were actually cleared.
    pub fn remove(&self, path: &str, is_leaf: bool, mask_bits: u32) -> CoreResult<u32> {
        let (canonical, segments) = canonicalize(path)?;
        let mut state = self.state.write();
        let site = Self::find_site(&state, &segments, is_leaf);
        trace!("pathset: remove {canonical:?} mask={mask_bits:#x} site={site:?}");
        let removed = match site {
            UpdateSite::Exact(id) => {
                let mark = state.marks.get_mut(id);
                let before = mark.mask;
                mark.mask &= !mask_bits;
                Self::transmit(&mut state, id, mask_bits, false);
                before & mask_bits
            }
            // nothing to clear if there's no exact mark; removing against an
            // ancestor or a blank slate starts from zero bits, so there's
            // nothing to remove
            UpdateSite::Ancestor(_) | UpdateSite::None => 0,
        };
        Ok(removed)
    }

    /// The mask of the nearest ancestor mark, or 0 if none applies.
    pub fn mask(&self, path: &str) -> CoreResult<u32> {
        let (_, segments) = canonicalize(path)?;
        let state = self.state.read();
        let mut best: Option<(usize, u32)> = None;
        for (_, mark) in state.marks.iter() {
            if mark.matches(&segments) {
                return Ok(mark.mask);
            }
            if mark.is_ancestor_of(&segments) {
                let depth = mark.depth();
                if best.map_or(true, |(d, _)| depth > d) {
                    best = Some((depth, mark.mask));
                }
            }
        }
        Ok(best.map_or(0, |(_, m)| m))
    }

    pub fn unitary_mask(&self) -> u32 {
        self.state.read().unitary_mask
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.marks = List::new();
        state.unitary_mask = 0;
    }

    /// Minimal-depth representative paths: no returned path is an ancestor
    /// of another in the set.
    pub fn find_top(&self) -> Vec<String> {
        let state = self.state.read();
        let marks: Vec<&Mark> = state.marks.iter().map(|(_, m)| m).collect();
        marks
            .iter()
            .filter(|m| {
                !marks
                    .iter()
                    .any(|other| !std::ptr::eq(*other, **m) && other.is_strict_ancestor_of(&m.segments))
            })
            .map(|m| m.path.clone())
            .collect()
    }

    pub fn dump(&self) -> String {
        let state = self.state.read();
        let mut out = String::new();
        for (_, mark) in state.marks.iter() {
            out.push_str(&format!(
                "{} [{}] mask={:#010b}\n",
                mark.path,
                if mark.is_leaf { "leaf" } else { "branch" },
                mark.mask
            ));
        }
        out
    }

    /// Propagates a bit change at `changed` to its descendants and recomputes
    /// `unitary_mask`. Leaves take the fast path (direct OR/AND-NOT); a
    /// non-leaf change walks every mark, applies the same bit change to
    /// strict descendants, and deletes any descendant whose mask becomes
    /// identical to `changed`'s (it's now redundant — `mask()` would already
    /// return the right value via the ancestor).
    fn transmit(state: &mut State, changed: NodeId, bits: u32, insert: bool) {
        let (is_leaf, changed_segments, new_mask) = {
            let m = state.marks.get(changed);
            (m.is_leaf, m.segments.clone(), m.mask)
        };

        if is_leaf {
            if insert {
                state.unitary_mask |= bits;
            } else {
                state.unitary_mask &= !bits;
            }
            return;
        }

        let ids: Vec<NodeId> = state.marks.iter().map(|(id, _)| id).collect();
        for id in &ids {
            if *id == changed {
                continue;
            }
            let descendant = {
                let m = state.marks.get(*id);
                m.depth() > changed_segments.len() && m.segments[..changed_segments.len()] == changed_segments[..]
            };
            if descendant {
                let m = state.marks.get_mut(*id);
                if insert {
                    m.mask |= bits;
                } else {
                    m.mask &= !bits;
                }
            }
        }

        let mut unitary = 0u32;
        let mut redundant = Vec::new();
        for id in &ids {
            let m = state.marks.get(*id);
            unitary |= m.mask;
            if *id != changed
                && m.depth() > changed_segments.len()
                && m.segments[..changed_segments.len()] == changed_segments[..]
                && m.mask == new_mask
            {
                redundant.push(*id);
            }
        }
        state.unitary_mask = unitary;
        if !redundant.is_empty() {
            trace!("pathset: dropping {} mark(s) made redundant by the update", redundant.len());
        }
        for id in redundant {
            state.marks.remove(id);
        }
    }
}

impl Default for PathSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_of_unlisted_path_is_zero() {
        let ps = PathSet::new();
        assert_eq!(ps.mask("/a/b/c").unwrap(), 0);
    }

    #[test]
    fn insert_then_mask_exact() {
        let ps = PathSet::new();
        ps.insert("/a/b", true, 0b0001).unwrap();
        assert_eq!(ps.mask("/a/b").unwrap(), 0b0001);
    }

    #[test]
    fn descendants_inherit_ancestor_mask() {
        let ps = PathSet::new();
        ps.insert("/a", false, 0b0010).unwrap();
        assert_eq!(ps.mask("/a/b/c").unwrap(), 0b0010);
    }

    #[test]
    fn nearest_ancestor_wins() {
        // "/a/b"'s mark starts from "/a"'s mask and ORs in its own bits, so
        // it carries the full effective mask, not just its own delta.
        let ps = PathSet::new();
        ps.insert("/a", false, 0b0001).unwrap();
        ps.insert("/a/b", false, 0b0010).unwrap();
        assert_eq!(ps.mask("/a/b/c").unwrap(), 0b0011);
        assert_eq!(ps.mask("/a/x").unwrap(), 0b0001);
    }

    #[test]
    fn remove_clears_exact_bits() {
        let ps = PathSet::new();
        ps.insert("/a", true, 0b0011).unwrap();
        ps.remove("/a", true, 0b0001).unwrap();
        assert_eq!(ps.mask("/a").unwrap(), 0b0010);
    }

    #[test]
    fn unitary_mask_ors_leaf_masks() {
        let ps = PathSet::new();
        ps.insert("/a", true, 0b0001).unwrap();
        ps.insert("/b", true, 0b0010).unwrap();
        assert_eq!(ps.unitary_mask(), 0b0011);
    }

    #[test]
    fn non_absolute_path_is_rejected() {
        let ps = PathSet::new();
        assert!(ps.insert("a/b", true, 1).is_err());
    }

    #[test]
    fn path_normalisation_collapses_dots_and_slashes() {
        let ps = PathSet::new();
        ps.insert("/a//b/./c/../c", true, 1).unwrap();
        assert_eq!(ps.mask("/a/b/c").unwrap(), 1);
    }

    #[test]
    fn find_top_drops_subsumed_descendants() {
        let ps = PathSet::new();
        ps.insert("/a", false, 1).unwrap();
        ps.insert("/a/b", false, 2).unwrap();
        ps.insert("/z", false, 4).unwrap();
        let mut top = ps.find_top();
        top.sort();
        assert_eq!(top, vec!["/a".to_string(), "/z".to_string()]);
    }

    #[test]
    fn clear_drops_every_mark() {
        let ps = PathSet::new();
        ps.insert("/a", true, 1).unwrap();
        ps.clear();
        assert_eq!(ps.mask("/a").unwrap(), 0);
        assert_eq!(ps.unitary_mask(), 0);
    }
}
