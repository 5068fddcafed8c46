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

//! A single-process event-driven concurrency core.
//!
//! [`reactor`] multiplexes sockets, timers and user-signalled objects into a
//! single dispatch loop. [`fupool`] lets worker threads hand completions back
//! to whoever is waiting on a sequence number, optionally from inside a
//! reactor callback. [`pathset`] and [`rope`] are passive data structures —
//! a hierarchical path-mask set and a splay-indexed piece string — with no
//! reactor dependency of their own; they're here because their internals are
//! worth carrying alongside the concurrency primitives that motivated them.
//!
//! [`containers`] holds the arena-based intrusive-style structures (list,
//! splay tree, binary heap, chained hash map, bulk-free arena, bitmap) that
//! everything above is built from.

#[cfg(all(not(target_env = "msvc"), not(miri)))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod util;

pub mod config;
pub mod containers;
pub mod fupool;
pub mod pathset;
pub mod reactor;
pub mod registry;
pub mod rope;
