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

//! The handful of knobs an embedder may want to override without a
//! recompile. This crate never reads a file or an environment variable
//! itself; `ReactorConfig` derives `Deserialize` purely so it can sit as a
//! field inside an embedding binary's own YAML/JSON configuration.

use serde::Deserialize;

/// Construction-time tuning for a [`crate::reactor::Reactor`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Starting size of the mux's readiness-event buffer. The buffer still
    /// doubles on demand; this only avoids a few early reallocations for an
    /// embedder who knows roughly how many fds it'll register.
    pub initial_mux_capacity: usize,
    /// How far a timer's computed wait may be exceeded, beyond its own
    /// interval, before `wait` assumes the system clock moved backwards
    /// rather than that the thread was merely scheduled late.
    pub clock_skew_guard_ms: u64,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            initial_mux_capacity: 64,
            clock_skew_guard_ms: 5000,
        }
    }
}
