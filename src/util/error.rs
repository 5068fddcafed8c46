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

use std::{fmt, io::Error as IoError};

pub type CoreResult<T> = Result<T, Error>;

/// The error taxonomy shared by the reactor and the pathset.
///
/// Containers (list, splay, heap, hashmap, bitmap, mset) never return this type: they
/// report failure through `Option`/`bool` because they have no mutex, no I/O, and
/// nothing resembling an "error condition". The future pool also avoids this type: its
/// failure modes (timeout, all-NULL) are encoded directly in its return values.
#[derive(Debug)]
pub enum Error {
    /// a path is not absolute, an event type is unrecognized, or a caller-supplied limit
    /// (path length, nesting depth) was exceeded
    InvalidArgument(String),
    /// the event is already attached to a reactor
    AlreadyReacting,
    /// a socket event's fd is already registered with this reactor
    FdAlreadyExists,
    /// the mux (or an allocation behind it) is out of room
    ResourceExhausted(String),
    /// a syscall made on behalf of the mux failed
    Os(IoError),
    /// the global state registry is poisoned; the reactor refuses to wait
    Poisoned,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::AlreadyReacting => write!(f, "event is already attached to a reactor"),
            Self::FdAlreadyExists => write!(f, "fd is already registered"),
            Self::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            Self::Os(ioe) => write!(f, "os error: {ioe}"),
            Self::Poisoned => write!(f, "global state is poisoned"),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(ioe: IoError) -> Self {
        Self::Os(ioe)
    }
}

impl Error {
    pub fn invalid_argument(msg: impl ToString) -> Self {
        Self::InvalidArgument(msg.to_string())
    }
    pub fn resource_exhausted(msg: impl ToString) -> Self {
        Self::ResourceExhausted(msg.to_string())
    }
}
