//! Bulk string exchange with LCP and prefix compression.
//!
//! Wire layout per receiver slot:
//!
//! ```text
//! header:  u32 string count
//! lcps:    count varints            (only with LCP compression)
//! strings: varint tail length + distinct tail bytes   (prefix compression)
//!          or null-terminated full strings            (otherwise)
//! ```
//!
//! With prefix compression a string contributes only the bytes past its LCP
//! with the previous string of the same slot; the receiver rebuilds the full
//! strings with `extend_prefix`. The slot-leading string always travels in
//! full. Sending and receiving is a single alltoallv; the routine variants
//! differ only in how that alltoallv is realized.

use byteorder::{ByteOrder, LittleEndian};

use crate::comm::{exclusive_prefix_sum, Communicator};
use crate::config::AllToAllRoutine;
use crate::container::{ContainerBuilder, StringDesc, StringLcpContainer};
use crate::measure::Measurements;

/// Payloads above this size are exchanged in multiple rounds by the
/// `combined` routine.
const COMBINED_CHUNK_BYTES: usize = 64 * 1024 * 1024;

pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn read_varint(bytes: &[u8], pos: &mut usize) -> u64 {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = bytes[*pos];
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return value;
        }
        shift += 7;
    }
}

/// One byte-level alltoallv, realized by the configured routine.
pub fn alltoallv_bytes<C: Communicator>(
    routine: AllToAllRoutine,
    data: &[u8],
    counts: &[usize],
    comm: &C,
) -> (Vec<u8>, Vec<usize>) {
    match routine {
        AllToAllRoutine::Small => comm.alltoallv(data, counts),
        AllToAllRoutine::Direct => alltoallv_direct(data, counts, comm),
        AllToAllRoutine::Combined => alltoallv_combined(data, counts, comm),
    }
}

/// Pairwise exchange: send to all higher ranks, drain the lower ones, then
/// the reverse. The highest rank posts its receives first, so the chain of
/// blocking sends always terminates.
fn alltoallv_direct<C: Communicator>(
    data: &[u8],
    counts: &[usize],
    comm: &C,
) -> (Vec<u8>, Vec<usize>) {
    let rank = comm.rank();
    let size = comm.size();
    let offsets = exclusive_prefix_sum(counts);
    let slice = |peer: usize| &data[offsets[peer]..offsets[peer] + counts[peer]];

    let mut received: Vec<Vec<u8>> = vec![Vec::new(); size];
    received[rank] = slice(rank).to_vec();

    for dest in rank + 1..size {
        comm.send(slice(dest), dest);
    }
    for src in 0..rank {
        received[src] = comm.recv(src);
    }
    for dest in 0..rank {
        comm.send(slice(dest), dest);
    }
    for src in rank + 1..size {
        received[src] = comm.recv(src);
    }

    let recv_counts: Vec<usize> = received.iter().map(|r| r.len()).collect();
    (received.concat(), recv_counts)
}

/// Splits oversized payloads into fixed-size rounds of plain alltoallv.
fn alltoallv_combined<C: Communicator>(
    data: &[u8],
    counts: &[usize],
    comm: &C,
) -> (Vec<u8>, Vec<usize>) {
    let rounds = comm
        .allreduce_u64(
            data.len().div_ceil(COMBINED_CHUNK_BYTES) as u64,
            crate::comm::ReduceOp::Max,
        )
        .max(1) as usize;
    if rounds == 1 {
        return comm.alltoallv(data, counts);
    }

    let offsets = exclusive_prefix_sum(counts);
    let mut received: Vec<Vec<u8>> = vec![Vec::new(); comm.size()];
    for round in 0..rounds {
        let mut payload = Vec::new();
        let mut round_counts = Vec::with_capacity(comm.size());
        for peer in 0..comm.size() {
            let count = counts[peer];
            let from = count * round / rounds;
            let to = count * (round + 1) / rounds;
            payload.extend_from_slice(&data[offsets[peer] + from..offsets[peer] + to]);
            round_counts.push(to - from);
        }
        let (chunk, chunk_counts) = comm.alltoallv(&payload, &round_counts);
        let mut offset = 0;
        for (peer, &count) in chunk_counts.iter().enumerate() {
            received[peer].extend_from_slice(&chunk[offset..offset + count]);
            offset += count;
        }
    }

    let recv_counts: Vec<usize> = received.iter().map(|r| r.len()).collect();
    (received.concat(), recv_counts)
}

/// Exchanges the strings of a locally sorted container according to
/// `send_counts` (one count per rank of `comm`). Returns the received
/// container plus the per-sender string counts, which are exactly the run
/// boundaries for the following multiway merge.
pub fn alltoall_strings<D: StringDesc, C: Communicator>(
    container: StringLcpContainer<D>,
    send_counts: &[usize],
    lcp_compression: bool,
    prefix_compression: bool,
    routine: AllToAllRoutine,
    comm: &C,
    measure: &mut Measurements,
) -> (StringLcpContainer<D>, Vec<usize>) {
    assert_eq!(send_counts.len(), comm.size());
    assert_eq!(send_counts.iter().sum::<usize>(), container.len());
    debug_assert!(!prefix_compression || lcp_compression);

    measure.start("alltoall_strings");

    // Pack one slot per receiver.
    let mut payload = Vec::new();
    let mut byte_counts = Vec::with_capacity(comm.size());
    let mut extra_words: Vec<u64> = Vec::new();
    let mut extra_counts = Vec::with_capacity(comm.size());
    let mut index = 0;
    for &count in send_counts {
        let slot_start = payload.len();
        let mut header = [0u8; 4];
        LittleEndian::write_u32(&mut header, count as u32);
        payload.extend_from_slice(&header);

        if lcp_compression {
            for i in 0..count {
                let slot_lcp = if i == 0 { 0 } else { container.lcps()[index + i] };
                write_varint(&mut payload, slot_lcp as u64);
            }
        }
        for i in 0..count {
            let bytes = container.bytes(index + i);
            if prefix_compression {
                let slot_lcp = if i == 0 { 0 } else { container.lcps()[index + i] };
                write_varint(&mut payload, (bytes.len() - slot_lcp) as u64);
                payload.extend_from_slice(&bytes[slot_lcp..]);
            } else {
                payload.extend_from_slice(bytes);
                payload.push(0);
            }
        }
        if D::EXTRA_WORDS > 0 {
            for i in 0..count {
                container.descs()[index + i].encode_extra(&mut extra_words);
            }
            extra_counts.push(count * D::EXTRA_WORDS);
        }
        index += count;
        byte_counts.push(payload.len() - slot_start);
    }

    // From here on at most the outbound and the inbound buffer are alive.
    drop(container);
    measure.add("alltoall_bytes", payload.len() as u64);

    let (received, recv_bytes) = alltoallv_bytes(routine, &payload, &byte_counts, comm);
    drop(payload);
    let received_extra = if D::EXTRA_WORDS > 0 {
        comm.alltoallv(&extra_words, &extra_counts).0
    } else {
        Vec::new()
    };

    // Unpack per sender slot.
    let mut builder = ContainerBuilder::<D>::with_capacity(received.len(), 0);
    let mut recv_lcps: Vec<usize> = Vec::new();
    let mut recv_counts = Vec::with_capacity(comm.size());
    let mut pos = 0;
    for &slot_bytes in &recv_bytes {
        let slot_end = pos + slot_bytes;
        let count = LittleEndian::read_u32(&received[pos..pos + 4]) as usize;
        pos += 4;
        recv_counts.push(count);

        let slot_lcp_start = recv_lcps.len();
        if lcp_compression {
            for _ in 0..count {
                let lcp = read_varint(&received, &mut pos) as usize;
                recv_lcps.push(lcp);
            }
        } else {
            recv_lcps.resize(slot_lcp_start + count, 0);
        }

        for _ in 0..count {
            if prefix_compression {
                let tail_len = read_varint(&received, &mut pos) as usize;
                builder.push(&received[pos..pos + tail_len]);
                pos += tail_len;
            } else {
                let end = pos
                    + received[pos..]
                        .iter()
                        .position(|&b| b == 0)
                        .expect("unterminated string in exchange payload");
                builder.push(&received[pos..end]);
                pos = end + 1;
            }
        }
        assert_eq!(pos, slot_end, "exchange slot not fully consumed");
    }

    let mut result = StringLcpContainer::new(builder.finish());
    if prefix_compression {
        result
            .extend_prefix(&recv_lcps)
            .expect("exchange produced inconsistent prefix compression");
    }
    if lcp_compression {
        result.set_lcps(recv_lcps);
    }

    if D::EXTRA_WORDS > 0 {
        assert_eq!(received_extra.len(), result.len() * D::EXTRA_WORDS);
        for (i, desc) in result.container_mut().descs_mut().iter_mut().enumerate() {
            desc.decode_extra(&received_extra[i * D::EXTRA_WORDS..(i + 1) * D::EXTRA_WORDS]);
        }
    }

    measure.stop("alltoall_strings");
    (result, recv_counts)
}
