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

//! # Containers
//!
//! The leaf data structures everything else is built from. None of these are
//! thread-safe; callers serialise access (see the crate-level concurrency notes).
//!
//! These are arena/index-handle based rather than pointer-linked: a C-style
//! intrusive container keeps `prev`/`next`/`parent` pointers embedded in the
//! payload and recovers the payload from a link address with `container_of`.
//! That shape relies on stable self-addresses, which Rust's ownership model
//! doesn't give us for free. Each container here instead owns a slab of slots
//! and hands out small `Copy` index handles; "pointers" become indices into
//! that slab, so there is nothing to dangle and nothing `unsafe` to justify.

pub mod bitmap;
pub mod hashmap;
pub mod heap;
pub mod list;
pub mod mset;
pub mod splay;

pub use bitmap::Bitmap;
pub use hashmap::HashMap;
pub use heap::{Heap, HeapIndexed};
pub use list::{List, NodeId};
pub use mset::Arena;
pub use splay::Splay;
