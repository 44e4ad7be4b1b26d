//! Scan and reduction collectives over the [`Communicator`] trait.
//!
//! A refinement pass only needs two: the exclusive prefix sum that seeds
//! the global numbering offsets, and the all-reduce that decides whether a
//! closure iteration produced new marks on any partition. Both are
//! expressed as point-to-point exchanges of fixed 8-byte LE payloads, the
//! same post-receives / send-all / wait shape used for sized exchanges
//! elsewhere. On a single rank they reduce to the identity.

use crate::comm::{CommTag, Communicator, Wait};
use crate::error::RefineError;

/// Exclusive prefix sum of `value` across ranks: rank `r` receives the sum
/// of the values contributed by ranks `0..r` (zero on rank 0).
pub fn exclusive_scan_sum<C: Communicator>(
    comm: &C,
    value: u64,
    tag: CommTag,
) -> Result<u64, RefineError> {
    let rank = comm.rank();
    let size = comm.size();
    if size <= 1 {
        return Ok(0);
    }

    let mut pending = Vec::with_capacity(rank);
    for peer in 0..rank {
        let mut buf = [0u8; 8];
        pending.push((peer, comm.irecv(peer, tag.as_u16(), &mut buf)));
    }
    let bytes = value.to_le_bytes();
    for peer in rank + 1..size {
        comm.isend(peer, tag.as_u16(), &bytes);
    }

    let mut sum = 0u64;
    for (peer, h) in pending {
        let data = h.wait().ok_or(RefineError::CommFailure {
            rank: peer,
            phase: "exclusive scan",
        })?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data);
        sum += u64::from_le_bytes(buf);
    }
    Ok(sum)
}

/// Sum of `value` over all ranks, available on every rank.
pub fn allreduce_sum<C: Communicator>(
    comm: &C,
    value: u64,
    tag: CommTag,
) -> Result<u64, RefineError> {
    let rank = comm.rank();
    let size = comm.size();
    if size <= 1 {
        return Ok(value);
    }

    let mut pending = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != rank) {
        let mut buf = [0u8; 8];
        pending.push((peer, comm.irecv(peer, tag.as_u16(), &mut buf)));
    }
    let bytes = value.to_le_bytes();
    for peer in (0..size).filter(|&p| p != rank) {
        comm.isend(peer, tag.as_u16(), &bytes);
    }

    let mut sum = value;
    for (peer, h) in pending {
        let data = h.wait().ok_or(RefineError::CommFailure {
            rank: peer,
            phase: "all-reduce",
        })?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data);
        sum += u64::from_le_bytes(buf);
    }
    Ok(sum)
}
