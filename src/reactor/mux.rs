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

//! The mux plug-in contract and an epoll-flavoured reference implementation.
//!
//! `Mux` is deliberately small: `add`/`modify`/`delete`/`poll`/`next`. A
//! kqueue or IOCP backend would implement the same trait; the reactor never
//! reaches past it into platform-specific readiness APIs.

use crate::util::error::CoreResult;
use std::os::unix::io::RawFd;

/// Interest / result flags shared between socket registration and the
/// readiness words handed back by a mux. Four single-bit flags don't earn
/// the `bitflags` dependency, so this is hand-rolled in the same shape.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b0001);
    pub const WRITE: Self = Self(0b0010);
    pub const ONCE: Self = Self(0b0100);
    pub const ERROR: Self = Self(0b1000);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for Flags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for Flags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// A pluggable readiness multiplexer. `poll` blocks up to `timeout_ms`
/// (`None` is infinite, `Some(0)` is non-blocking); the readies it collects
/// are drained one at a time through `next`.
pub trait Mux {
    fn add(&mut self, fd: RawFd, flags: Flags) -> CoreResult<()>;
    fn modify(&mut self, fd: RawFd, flags: Flags) -> CoreResult<()>;
    fn delete(&mut self, fd: RawFd) -> CoreResult<()>;
    fn poll(&mut self, timeout_ms: Option<u64>) -> CoreResult<usize>;
    fn next(&mut self) -> Option<(RawFd, Flags)>;
}

pub struct EpollMux {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
    ready: usize,
    cursor: usize,
}

fn to_epoll_bits(flags: Flags) -> u32 {
    let mut bits = 0u32;
    if flags.contains(Flags::READ) {
        bits |= (libc::EPOLLIN | libc::EPOLLPRI) as u32;
    }
    if flags.contains(Flags::WRITE) {
        bits |= libc::EPOLLOUT as u32;
    }
    if flags.contains(Flags::ONCE) {
        bits |= libc::EPOLLONESHOT as u32;
    }
    bits
}

fn from_epoll_bits(bits: u32) -> Flags {
    let mut flags = Flags::NONE;
    if bits & (libc::EPOLLIN | libc::EPOLLPRI) as u32 != 0 {
        flags |= Flags::READ;
    }
    if bits & libc::EPOLLOUT as u32 != 0 {
        flags |= Flags::WRITE;
    }
    if bits & libc::EPOLLERR as u32 != 0 {
        flags |= Flags::ERROR;
    }
    flags
}

impl EpollMux {
    const INITIAL_CAPACITY: usize = 64;

    pub fn create() -> CoreResult<Self> {
        Self::create_with_capacity(Self::INITIAL_CAPACITY)
    }

    /// Same as [`EpollMux::create`], but with a caller-chosen starting size
    /// for the readiness-event buffer (see `config::ReactorConfig`).
    pub fn create_with_capacity(capacity: usize) -> CoreResult<Self> {
        let epfd = unsafe { libc::epoll_create1(0) };
        if epfd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let capacity = capacity.max(1);
        Ok(Self {
            epfd,
            events: vec![unsafe { std::mem::zeroed() }; capacity],
            ready: 0,
            cursor: 0,
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, flags: Flags) -> CoreResult<()> {
        let mut ev = libc::epoll_event {
            events: to_epoll_bits(flags),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Mux for EpollMux {
    fn add(&mut self, fd: RawFd, flags: Flags) -> CoreResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, flags)
    }

    fn modify(&mut self, fd: RawFd, flags: Flags) -> CoreResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, flags)
    }

    fn delete(&mut self, fd: RawFd) -> CoreResult<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, Flags::NONE)
    }

    fn poll(&mut self, timeout_ms: Option<u64>) -> CoreResult<usize> {
        let timeout = match timeout_ms {
            None => -1,
            Some(ms) => ms.min(i32::MAX as u64) as i32,
        };
        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                self.ready = 0;
                self.cursor = 0;
                return Ok(0);
            }
            return Err(err.into());
        }
        self.ready = rc as usize;
        self.cursor = 0;
        if self.ready == self.events.len() {
            // the source doubles its page table on a full drain; `Vec` handles the growth
            self.events.resize(self.events.len() * 2, unsafe { std::mem::zeroed() });
        }
        Ok(self.ready)
    }

    fn next(&mut self) -> Option<(RawFd, Flags)> {
        if self.cursor >= self.ready {
            return None;
        }
        let ev = &self.events[self.cursor];
        self.cursor += 1;
        Some((ev.u64 as RawFd, from_epoll_bits(ev.events)))
    }
}

impl Drop for EpollMux {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoll_roundtrips_a_pipe_write() {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let [r, w] = fds;
        let mut mux = EpollMux::create().unwrap();
        mux.add(r, Flags::READ).unwrap();
        unsafe {
            libc::write(w, b"x".as_ptr() as *const _, 1);
        }
        let n = mux.poll(Some(1000)).unwrap();
        assert_eq!(n, 1);
        let (fd, flags) = mux.next().unwrap();
        assert_eq!(fd, r);
        assert!(flags.contains(Flags::READ));
        assert!(mux.next().is_none());
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn flags_compose_with_bitor() {
        let f = Flags::READ | Flags::ONCE;
        assert!(f.contains(Flags::READ));
        assert!(f.contains(Flags::ONCE));
        assert!(!f.contains(Flags::WRITE));
    }
}
