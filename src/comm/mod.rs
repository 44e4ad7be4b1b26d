//! Communication backends for multi-partition refinement.
//!
//! A refinement pass suspends at three cross-partition points: the
//! exclusive scan that seeds the global numbering, the halo exchange of
//! `lnn2gnn`, and the all-reduce that terminates the 3D closure loop. All
//! three are expressed over the minimal non-blocking [`Communicator`]
//! trait so the same driver runs single-partition ([`NoComm`]),
//! thread-per-rank in one process ([`RayonComm`]), or across processes
//! (`MpiComm`, behind the `mpi-support` feature).
//!
//! Wire conventions: all integers are LE fixed width; payload slices are
//! `bytemuck::Pod`-safe. Receivers may truncate to their provided buffer
//! length.

pub mod collectives;

use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this partition (0..size-1).
    fn rank(&self) -> usize;
    /// Total number of partitions.
    fn size(&self) -> usize;

    /// Synchronization barrier (default: no-op for single-rank comms).
    fn barrier(&self) {}
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    /// Create a new tag from a raw `u16`.
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// Return the underlying `u16` value.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Safely offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// Fixed tags for the suspension points of one refinement pass.
///
/// Messages between a `(src, dst, tag)` triple are delivered in FIFO
/// order by every backend, so consecutive passes may reuse these without
/// an intervening barrier.
#[derive(Copy, Clone, Debug)]
pub struct RefineCommTags {
    /// Exclusive scan of vertex counts (global numbering).
    pub scan: CommTag,
    /// All-reduce of the per-iteration new-edge count (closure loop).
    pub reduce: CommTag,
    /// Halo exchange of per-vertex payloads.
    pub halo: CommTag,
}

impl RefineCommTags {
    /// Construct tags from a base, assigning deterministic offsets per phase.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            scan: base,
            reduce: base.offset(1),
            halo: base.offset(2),
        }
    }
}

impl Default for RefineCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x5200))
    }
}

/// Compile-time no-op comm for single-partition refinement.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- RayonComm: thread-per-rank within one process ---

type Key = (u64, usize, usize, u16); // (session, src, dst, tag)

#[derive(Default)]
struct Slot {
    q: VecDeque<Vec<u8>>,
}

struct Mailbox {
    map: Mutex<HashMap<Key, Arc<(Mutex<Slot>, Condvar)>>>,
}

static MAILBOX: Lazy<Mailbox> = Lazy::new(|| Mailbox {
    map: Mutex::new(HashMap::new()),
});

fn mailbox_entry(key: Key) -> Arc<(Mutex<Slot>, Condvar)> {
    let mut g = MAILBOX.map.lock().expect("MAILBOX poisoned");
    g.entry(key)
        .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
        .clone()
}

pub struct LocalSendHandle;

impl Wait for LocalSendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

pub struct LocalRecvHandle {
    cell: Arc<(Mutex<Slot>, Condvar)>,
    want_len: usize,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let (lock, cv) = &*self.cell;
        let mut slot = lock.lock().expect("Slot poisoned");
        while slot.q.is_empty() {
            slot = cv.wait(slot).expect("Condvar poisoned");
        }
        let mut msg = slot.q.pop_front().expect("q non-empty");
        msg.truncate(self.want_len.min(msg.len()));
        Some(msg)
    }
}

/// Thread-per-rank communicator backed by a process-global mailbox.
///
/// Ranks of one logical job share a `session` id; concurrent jobs in the
/// same process (e.g. parallel test binaries' threads) must use distinct
/// sessions so their mailboxes and barriers stay disjoint.
#[derive(Clone, Debug)]
pub struct RayonComm {
    session: u64,
    rank: usize,
    size: usize,
}

impl RayonComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self::with_session(0, rank, size)
    }

    pub fn with_session(session: u64, rank: usize, size: usize) -> Self {
        Self {
            session,
            rank,
            size,
        }
    }
}

impl Communicator for RayonComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.session, self.rank, peer, tag);
        let entry = mailbox_entry(key);
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("Slot poisoned");
            slot.q.push_back(buf.to_vec());
        }
        cv.notify_all();
        LocalSendHandle
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (self.session, peer, self.rank, tag);
        LocalRecvHandle {
            cell: mailbox_entry(key),
            want_len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        epoch_barrier::wait(self.session, self.size);
    }
}

mod epoch_barrier {
    //! Reusable per-session barrier for thread-per-rank jobs.
    use once_cell::sync::Lazy;
    use std::collections::HashMap;
    use std::sync::{Arc, Condvar, Mutex};

    struct EpochBarrier {
        arrived: usize,
        epoch: usize,
    }

    static BARRIERS: Lazy<Mutex<HashMap<u64, Arc<(Mutex<EpochBarrier>, Condvar)>>>> =
        Lazy::new(|| Mutex::new(HashMap::new()));

    pub fn wait(session: u64, size: usize) {
        if size <= 1 {
            return;
        }
        let cell = {
            let mut g = BARRIERS.lock().expect("BARRIERS poisoned");
            g.entry(session)
                .or_insert_with(|| {
                    Arc::new((
                        Mutex::new(EpochBarrier {
                            arrived: 0,
                            epoch: 0,
                        }),
                        Condvar::new(),
                    ))
                })
                .clone()
        };
        let (lock, cv) = &*cell;
        let mut b = lock.lock().expect("EpochBarrier poisoned");
        let e = b.epoch;
        b.arrived += 1;
        if b.arrived == size {
            b.arrived = 0;
            b.epoch += 1;
            cv.notify_all();
        } else {
            while e == b.epoch {
                b = cv.wait(b).expect("Condvar poisoned");
            }
        }
    }
}

// --- MPI backend ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use core::ptr::NonNull;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let uni = mpi::initialize().unwrap();
            let world = uni.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: uni,
                world,
                rank,
                size,
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
            use mpi::request::StaticScope;
            let boxed = buf.to_vec().into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice: &[u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, template: &mut [u8]) -> Self::RecvHandle {
            use mpi::request::StaticScope;
            let len = template.len();
            let boxed = vec![0u8; len].into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice_mut: &mut [u8] = unsafe { &mut *raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice_mut, tag as i32);
            MpiRecvHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
                len,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn barrier(&self) {
            self.world.barrier();
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
    }
    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
            None
        }
    }
    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
                #[cfg(debug_assertions)]
                eprintln!("[MpiSendHandle::drop] send not explicitly waited");
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }

    pub struct MpiRecvHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
        len: usize,
    }
    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            let ptr = self.buf.take().expect("buffer missing");
            let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
            let mut v = Vec::from(boxed);
            v.truncate(self.len);
            Some(v)
        }
    }
    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
                #[cfg(debug_assertions)]
                eprintln!("[MpiRecvHandle::drop] recv not explicitly waited");
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_comm_is_single_rank() {
        let c = NoComm;
        assert_eq!(c.rank(), 0);
        assert_eq!(c.size(), 1);
        let mut buf = [0u8; 4];
        c.isend(0, 7, &buf);
        assert_eq!(c.irecv(0, 7, &mut buf).wait(), None);
    }

    #[test]
    fn rayon_comm_point_to_point() {
        let a = RayonComm::with_session(100, 0, 2);
        let b = RayonComm::with_session(100, 1, 2);
        a.isend(1, 9, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        let got = b.irecv(0, 9, &mut buf).wait().unwrap();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn rayon_comm_fifo_per_key() {
        let a = RayonComm::with_session(101, 0, 2);
        let b = RayonComm::with_session(101, 1, 2);
        a.isend(1, 3, &[1u8]);
        a.isend(1, 3, &[2u8]);
        let mut buf = [0u8; 1];
        assert_eq!(b.irecv(0, 3, &mut buf).wait().unwrap(), vec![1u8]);
        assert_eq!(b.irecv(0, 3, &mut buf).wait().unwrap(), vec![2u8]);
    }

    #[test]
    fn sessions_are_disjoint() {
        let a = RayonComm::with_session(102, 0, 2);
        let other = RayonComm::with_session(103, 0, 2);
        other.isend(1, 5, &[9u8]);
        a.isend(1, 5, &[7u8]);
        let b = RayonComm::with_session(102, 1, 2);
        let mut buf = [0u8; 1];
        assert_eq!(b.irecv(0, 5, &mut buf).wait().unwrap(), vec![7u8]);
    }

    #[test]
    fn barrier_roundtrips() {
        let handles: Vec<_> = (0..4)
            .map(|r| {
                std::thread::spawn(move || {
                    let c = RayonComm::with_session(104, r, 4);
                    for _ in 0..16 {
                        c.barrier();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn tag_bundle_offsets_are_distinct() {
        let tags = RefineCommTags::default();
        assert_ne!(tags.scan.as_u16(), tags.reduce.as_u16());
        assert_ne!(tags.reduce.as_u16(), tags.halo.as_u16());
    }
}
