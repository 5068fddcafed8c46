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

//! A multiplexed event loop over sockets, timers and user-signalled objects.
//!
//! The source borrows each event's struct by address: a socket event lives
//! wherever the caller put it, and the reactor threads `prev`/`next`/hash
//! links straight through it. Rust won't let us hold an aliasable pointer
//! into caller-owned memory like that, so this reactor owns every event
//! itself: [`Reactor::add`] moves an [`Event`] in and hands back an opaque
//! [`EventId`], and every other call (`modify`, `remove`, `pend`, `pop_event`)
//! addresses the event through that id instead of a pointer.
//!
//! The mux handle lives behind its own mutex, separate from the rest of the
//! reactor's state: `wait` releases the state lock before blocking in
//! `poll`, exactly so another thread can `add`/`modify`/`signal` while a
//! `wait` is in flight.

pub mod mux;

use crate::config::ReactorConfig;
use crate::containers::heap::HeapIndexed;
use crate::containers::{Heap, List};
use crate::registry;
use crate::util::error::{CoreResult, Error};
use log::{error, trace, warn};
use mux::{EpollMux, Flags, Mux};
use parking_lot::Mutex;
use std::collections::HashMap as StdHashMap;
use std::os::unix::io::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};

pub type EventId = usize;

/// What the caller asked the reactor to watch. `Event::Timer`'s fields are
/// re-read by `modify` to reposition an existing timer.
#[derive(Clone, Copy, Debug)]
pub enum Event {
    Socket { fd: RawFd, interest: Flags },
    Timer { interval_ms: u64, accurate: bool, once: bool },
    Object,
}

enum EventData {
    Socket { fd: RawFd, interest: Flags },
    Timer,
    Object,
}

enum DataKind {
    Socket,
    Timer,
    Object,
}

struct EventSlot {
    data: EventData,
    result: Flags,
    pending_node: Option<crate::containers::list::NodeId>,
    obj_node: Option<crate::containers::list::NodeId>,
}

impl EventSlot {
    fn data_kind(&self) -> DataKind {
        match self.data {
            EventData::Socket { .. } => DataKind::Socket,
            EventData::Timer => DataKind::Timer,
            EventData::Object => DataKind::Object,
        }
    }
}

struct TimerEntry {
    event: EventId,
    expiration_ms: i64,
    interval_ms: u64,
    accurate: bool,
    once: bool,
    heap_index: usize,
}

impl HeapIndexed for TimerEntry {
    fn heap_index(&self) -> usize {
        self.heap_index
    }
    fn set_heap_index(&mut self, index: usize) {
        self.heap_index = index;
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A dequeued event, as handed back by [`Reactor::pop_event`].
#[derive(Clone, Copy, Debug)]
pub struct PendingEvent {
    pub id: EventId,
    pub result: Flags,
}

struct State {
    events: Vec<Option<EventSlot>>,
    free_events: Vec<EventId>,
    pending: List<EventId>,
    sock_index: StdHashMap<RawFd, EventId>,
    timers: Heap<TimerEntry>,
    obj_list: List<EventId>,
    wake_r: RawFd,
    wake_w: RawFd,
    breaking: bool,
}

impl State {
    fn alloc_slot(&mut self, data: EventData) -> EventId {
        let slot = EventSlot {
            data,
            result: Flags::NONE,
            pending_node: None,
            obj_node: None,
        };
        if let Some(id) = self.free_events.pop() {
            self.events[id] = Some(slot);
            id
        } else {
            self.events.push(Some(slot));
            self.events.len() - 1
        }
    }

    fn slot(&self, id: EventId) -> CoreResult<&EventSlot> {
        self.events
            .get(id)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| Error::invalid_argument("unknown event id"))
    }

    fn link_pending(&mut self, id: EventId, result: Flags) {
        let slot = self.events[id].as_mut().unwrap();
        slot.result = result;
        if slot.pending_node.is_none() {
            let node = self.pending.push_back(id);
            self.events[id].as_mut().unwrap().pending_node = Some(node);
        }
    }

    fn reset_all_timer_expirations(&mut self, now: i64) {
        let mut entries = Vec::with_capacity(self.timers.len());
        while let Some(e) = self.timers.pop() {
            entries.push(e);
        }
        for mut e in entries {
            e.expiration_ms = now + e.interval_ms as i64;
            self.timers.push(e);
        }
    }
}

/// Owns a mux handle, a pending-event list, a socket→event index, a timer
/// heap and an object-event list. Generic over the mux so a non-epoll
/// backend can stand in for tests.
pub struct Reactor<M: Mux = EpollMux> {
    mux: Mutex<M>,
    state: Mutex<State>,
    config: ReactorConfig,
}

impl Reactor<EpollMux> {
    pub fn new() -> CoreResult<Self> {
        Self::with_config(ReactorConfig::default())
    }

    pub fn with_config(config: ReactorConfig) -> CoreResult<Self> {
        let mux = EpollMux::create_with_capacity(config.initial_mux_capacity)?;
        Self::with_mux_and_config(mux, config)
    }
}

impl<M: Mux> Reactor<M> {
    pub fn with_mux(mux: M) -> CoreResult<Self> {
        Self::with_mux_and_config(mux, ReactorConfig::default())
    }

    pub fn with_mux_and_config(mut mux: M, config: ReactorConfig) -> CoreResult<Self> {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let [wake_r, wake_w] = fds;
        unsafe {
            let flags = libc::fcntl(wake_r, libc::F_GETFL);
            libc::fcntl(wake_r, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        mux.add(wake_r, Flags::READ)?;

        let state = State {
            events: Vec::new(),
            free_events: Vec::new(),
            pending: List::new(),
            sock_index: StdHashMap::new(),
            timers: Heap::new(|a: &TimerEntry, b: &TimerEntry| a.expiration_ms.cmp(&b.expiration_ms)),
            obj_list: List::new(),
            wake_r,
            wake_w,
            breaking: false,
        };

        Ok(Self {
            mux: Mutex::new(mux),
            state: Mutex::new(state),
            config,
        })
    }

    fn ioevent_set(wake_w: RawFd) {
        unsafe {
            libc::write(wake_w, [1u8].as_ptr() as *const _, 1);
        }
    }

    fn ioevent_reset(wake_r: RawFd) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(wake_r, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }

    /// Attaches a new event. Fails with [`Error::AlreadyReacting`]-equivalent
    /// only in the sense that a fresh `Event` is always un-attached; the
    /// source's ALREADY case corresponds here to reusing an `EventId`, which
    /// this API makes impossible by construction.
    pub fn add(&self, event: Event) -> CoreResult<EventId> {
        let mut state = self.state.lock();
        let id = match event {
            Event::Socket { fd, interest } => {
                if state.sock_index.contains_key(&fd) {
                    return Err(Error::FdAlreadyExists);
                }
                self.mux.lock().add(fd, interest)?;
                let id = state.alloc_slot(EventData::Socket { fd, interest });
                state.sock_index.insert(fd, id);
                id
            }
            Event::Timer { interval_ms, accurate, once } => {
                let id = state.alloc_slot(EventData::Timer);
                let expiration_ms = now_ms() + interval_ms as i64;
                state.timers.push(TimerEntry {
                    event: id,
                    expiration_ms,
                    interval_ms,
                    accurate,
                    once,
                    heap_index: 0,
                });
                id
            }
            Event::Object => {
                let id = state.alloc_slot(EventData::Object);
                let node = state.obj_list.push_back(id);
                state.events[id].as_mut().unwrap().obj_node = Some(node);
                id
            }
        };
        Self::ioevent_set(state.wake_w);
        Ok(id)
    }

    /// Re-registers a socket's interest mask, or repositions a timer whose
    /// interval changed. Object events have nothing to modify.
    pub fn modify(&self, id: EventId, event: Event) -> CoreResult<()> {
        let mut state = self.state.lock();
        let kind = state.slot(id)?.data_kind();
        match (kind, event) {
            (DataKind::Socket, Event::Socket { fd, interest }) => {
                self.mux.lock().modify(fd, interest)?;
                if let EventData::Socket { interest: i, .. } =
                    &mut state.events[id].as_mut().unwrap().data
                {
                    *i = interest;
                }
            }
            (DataKind::Timer, Event::Timer { interval_ms, accurate, once }) => {
                if let Some(pos) = state.timers.position(|t| t.event == id) {
                    let mut entry = state.timers.remove_at(pos);
                    entry.interval_ms = interval_ms;
                    entry.accurate = accurate;
                    entry.once = once;
                    entry.expiration_ms = now_ms() + interval_ms as i64;
                    state.timers.push(entry);
                }
            }
            (DataKind::Object, Event::Object) => {}
            _ => return Err(Error::invalid_argument("event kind mismatch in modify")),
        }
        Self::ioevent_set(state.wake_w);
        Ok(())
    }

    /// Detaches `id`. Idempotent: removing an id that isn't (or is no longer)
    /// attached is a no-op.
    pub fn remove(&self, id: EventId) -> CoreResult<()> {
        let mut state = self.state.lock();
        if id >= state.events.len() || state.events[id].is_none() {
            return Ok(());
        }
        match state.slot(id)?.data_kind() {
            DataKind::Socket => {
                if let EventData::Socket { fd, .. } = state.events[id].as_ref().unwrap().data {
                    let _ = self.mux.lock().delete(fd);
                    state.sock_index.remove(&fd);
                }
            }
            DataKind::Timer => {
                if let Some(pos) = state.timers.position(|t| t.event == id) {
                    state.timers.remove_at(pos);
                }
            }
            DataKind::Object => {
                if let Some(node) = state.events[id].as_ref().unwrap().obj_node {
                    state.obj_list.remove(node);
                }
            }
        }
        if let Some(node) = state.events[id].as_ref().unwrap().pending_node {
            state.pending.remove(node);
        }
        state.events[id] = None;
        state.free_events.push(id);
        Ok(())
    }

    /// Caller-driven insertion into the pending list with a chosen
    /// result-flag word, bypassing the mux entirely. Used to set an object
    /// event's result flags (and requeue it) without a kernel round-trip.
    pub fn pend(&self, id: EventId, flags: Flags) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.slot(id)?;
        state.link_pending(id, flags);
        Ok(())
    }

    pub fn pop_event(&self) -> Option<PendingEvent> {
        let mut state = self.state.lock();
        let node = state.pending.front()?;
        let id = *state.pending.get(node);
        state.pending.remove(node);
        let result = {
            let slot = state.events[id].as_mut().unwrap();
            slot.pending_node = None;
            slot.result
        };
        Some(PendingEvent { id, result })
    }

    /// Wakes a blocked `wait` without marking anything ready.
    pub fn signal(&self) {
        let state = self.state.lock();
        Self::ioevent_set(state.wake_w);
    }

    /// Causes the current or next `wait` to return 0, exactly once.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.breaking = true;
        Self::ioevent_set(state.wake_w);
    }

    /// Blocks until at least one event is pendable or [`Reactor::stop`] was
    /// called. Returns the number of newly pended events, or 0 if broken out.
    pub fn wait(&self) -> CoreResult<usize> {
        if !registry::state_okay() {
            return Err(Error::Poisoned);
        }
        loop {
            let timeout_ms = {
                let mut state = self.state.lock();
                if state.breaking {
                    state.breaking = false;
                    return Ok(0);
                }
                let now = now_ms();
                match state.timers.top() {
                    None => None,
                    Some(top) => {
                        let delta = top.expiration_ms - now;
                        let skew_bound = top.interval_ms as i64 + self.config.clock_skew_guard_ms as i64;
                        if delta > skew_bound {
                            warn!("clock moved backwards by more than the skew bound; firing all timers");
                            state.reset_all_timer_expirations(now);
                            Some(0)
                        } else {
                            Some(delta.max(0) as u64)
                        }
                    }
                }
            };

            trace!("wait: polling mux with timeout_ms={timeout_ms:?}");
            let readies: Vec<(RawFd, Flags)> = {
                let mut mux = self.mux.lock();
                if let Err(e) = mux.poll(timeout_ms) {
                    error!("mux poll failed: {e}");
                    return Err(e);
                }
                let mut v = Vec::new();
                while let Some(pair) = mux.next() {
                    v.push(pair);
                }
                v
            };

            let mut state = self.state.lock();
            let now = now_ms();
            let mut npendings = 0usize;

            // step 4: timers whose expiration has passed
            while let Some(top) = state.timers.top() {
                if top.expiration_ms > now {
                    break;
                }
                let mut entry = state.timers.pop().unwrap();
                state.link_pending(entry.event, Flags::READ);
                npendings += 1;
                if !entry.once {
                    entry.expiration_ms = if entry.accurate {
                        let overdue = (now - entry.expiration_ms).max(0) as u64;
                        let periods = overdue / entry.interval_ms.max(1) + 1;
                        entry.expiration_ms + (periods * entry.interval_ms) as i64
                    } else {
                        now + entry.interval_ms as i64
                    };
                    state.timers.push(entry);
                }
            }

            // step 5: sockets ready from the mux
            for (fd, flags) in readies {
                if fd == state.wake_r {
                    Self::ioevent_reset(state.wake_r);
                    continue;
                }
                if let Some(&id) = state.sock_index.get(&fd) {
                    state.link_pending(id, flags);
                    npendings += 1;
                }
            }

            // step 6: object events with a non-zero result word
            let obj_ids: Vec<EventId> = state.obj_list.iter().map(|(_, &id)| id).collect();
            for id in obj_ids {
                let result = state.events[id].as_ref().unwrap().result;
                if !result.is_empty() {
                    state.link_pending(id, result);
                    npendings += 1;
                }
            }

            trace!("wait: dispatched {npendings} event(s) this pass");
            if npendings > 0 {
                return Ok(npendings);
            }
            // step 7: nothing pended; loop back to step 1, which re-checks `breaking`
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn socket_readiness_pends_and_pops() {
        let mut pipe_fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(pipe_fds.as_mut_ptr()) }, 0);
        let [r, w] = pipe_fds;

        let reactor = Reactor::new().unwrap();
        let id = reactor
            .add(Event::Socket { fd: r, interest: Flags::READ })
            .unwrap();

        unsafe {
            libc::write(w, b"x".as_ptr() as *const _, 1);
        }

        let n = reactor.wait().unwrap();
        assert_eq!(n, 1);
        let popped = reactor.pop_event().unwrap();
        assert_eq!(popped.id, id);
        assert!(popped.result.contains(Flags::READ));

        reactor.remove(id).unwrap();
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn timer_fires_once_and_is_not_reinserted() {
        let reactor = Reactor::new().unwrap();
        let id = reactor
            .add(Event::Timer { interval_ms: 5, accurate: false, once: true })
            .unwrap();

        let n = reactor.wait().unwrap();
        assert_eq!(n, 1);
        let popped = reactor.pop_event().unwrap();
        assert_eq!(popped.id, id);
    }

    #[test]
    fn stop_unblocks_wait_with_zero() {
        let reactor = Arc::new(Reactor::new().unwrap());
        let r2 = Arc::clone(&reactor);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            r2.stop();
        });
        let n = reactor.wait().unwrap();
        assert_eq!(n, 0);
        handle.join().unwrap();
    }

    #[test]
    fn remove_is_idempotent() {
        let reactor = Reactor::new().unwrap();
        let id = reactor.add(Event::Object).unwrap();
        reactor.remove(id).unwrap();
        reactor.remove(id).unwrap();
    }

    #[test]
    fn pend_without_mux_roundtrip() {
        let reactor = Reactor::new().unwrap();
        let id = reactor.add(Event::Object).unwrap();
        reactor.pend(id, Flags::READ).unwrap();
        let popped = reactor.pop_event().unwrap();
        assert_eq!(popped.id, id);
        assert!(popped.result.contains(Flags::READ));
    }
}
