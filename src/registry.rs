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

//! # System-wide registry
//!
//! Interfaces for system-wide, global state management: right now a single poisoning
//! flag consulted by the reactor before it enters a wait.
//!

use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

const ORD_ACQ: Ordering = Ordering::Acquire;
const ORD_REL: Ordering = Ordering::Release;

static GLOBAL_STATE: AtomicBool = AtomicBool::new(true);

pub fn state_okay() -> bool {
    GLOBAL_STATE.load(ORD_ACQ)
}

pub fn poison() {
    GLOBAL_STATE.store(false, ORD_REL)
}

pub fn unpoison() {
    GLOBAL_STATE.store(true, ORD_REL)
}
