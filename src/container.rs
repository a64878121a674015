//! String containers: a char arena plus lightweight string descriptors.
//!
//! A descriptor stores an offset/length pair into the arena owned by its
//! container, never a raw pointer; after `make_contiguous` the descriptors
//! point to disjoint, contiguous, null-terminated runs in descriptor order.
//! [`StringLcpContainer`] adds the parallel LCP array used throughout the
//! sorter: `lcps[i]` is the length of the common prefix of `strings[i-1]`
//! and `strings[i]`, with `lcps[0] == 0`.

use crate::error::{Error, Result};

/// Length of the common prefix of `a` and `b`.
pub fn lcp(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A string descriptor. Implementations carry the arena span and optionally
/// the originating rank and string index.
pub trait StringDesc: Copy + Default + Send + 'static {
    /// Number of u64 side-channel words a descriptor contributes to an
    /// exchange (origin rank and index for [`IndexedStr`]).
    const EXTRA_WORDS: usize = 0;

    fn with_span(offset: usize, len: usize) -> Self;
    fn offset(&self) -> usize;
    fn len(&self) -> usize;
    fn set_span(&mut self, offset: usize, len: usize);

    fn encode_extra(&self, _out: &mut Vec<u64>) {}
    fn decode_extra(&mut self, _words: &[u64]) {}
}

/// Plain descriptor: offset and length only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Str {
    pub offset: usize,
    pub len: usize,
}

impl StringDesc for Str {
    fn with_span(offset: usize, len: usize) -> Self {
        Str { offset, len }
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn len(&self) -> usize {
        self.len
    }

    fn set_span(&mut self, offset: usize, len: usize) {
        self.offset = offset;
        self.len = len;
    }
}

/// Descriptor that remembers where the string came from: originating rank
/// (`pe`) and string index on that rank. Used by the permutation-producing
/// sorters and the indexed sampling policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexedStr {
    pub offset: usize,
    pub len: usize,
    pub pe: usize,
    pub index: usize,
}

impl StringDesc for IndexedStr {
    const EXTRA_WORDS: usize = 2;

    fn with_span(offset: usize, len: usize) -> Self {
        IndexedStr {
            offset,
            len,
            pe: 0,
            index: 0,
        }
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn len(&self) -> usize {
        self.len
    }

    fn set_span(&mut self, offset: usize, len: usize) {
        self.offset = offset;
        self.len = len;
    }

    fn encode_extra(&self, out: &mut Vec<u64>) {
        out.push(self.pe as u64);
        out.push(self.index as u64);
    }

    fn decode_extra(&mut self, words: &[u64]) {
        self.pe = words[0] as usize;
        self.index = words[1] as usize;
    }
}

/// Owns one char arena and the descriptors into it.
#[derive(Debug, Default, Clone)]
pub struct StringContainer<D: StringDesc = Str> {
    arena: Vec<u8>,
    strings: Vec<D>,
}

impl<D: StringDesc> StringContainer<D> {
    pub fn new() -> Self {
        StringContainer {
            arena: Vec::new(),
            strings: Vec::new(),
        }
    }

    /// Parses an arena of null-terminated strings into descriptors.
    pub fn from_arena(arena: Vec<u8>) -> Self {
        let mut strings = Vec::new();
        let mut start = 0;
        for (pos, &byte) in arena.iter().enumerate() {
            if byte == 0 {
                strings.push(D::with_span(start, pos - start));
                start = pos + 1;
            }
        }
        assert_eq!(start, arena.len(), "arena does not end with a terminator");
        StringContainer { arena, strings }
    }

    /// Takes ownership of a prepared arena/descriptor pair. Descriptors may
    /// overlap (suffix inputs share their tails) but must stay in bounds.
    pub fn from_parts(arena: Vec<u8>, strings: Vec<D>) -> Self {
        let container = StringContainer { arena, strings };
        debug_assert!(container.is_consistent());
        container
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Size of the arena in bytes, terminators included.
    pub fn char_size(&self) -> usize {
        self.arena.len()
    }

    /// Sum of all string lengths, terminators excluded.
    pub fn sum_len(&self) -> usize {
        self.strings.iter().map(|s| s.len()).sum()
    }

    /// The bytes of string `i`, without the terminator.
    pub fn bytes(&self, i: usize) -> &[u8] {
        self.bytes_of(&self.strings[i])
    }

    pub fn bytes_of(&self, desc: &D) -> &[u8] {
        &self.arena[desc.offset()..desc.offset() + desc.len()]
    }

    pub fn descs(&self) -> &[D] {
        &self.strings
    }

    pub fn descs_mut(&mut self) -> &mut [D] {
        &mut self.strings
    }

    pub fn arena(&self) -> &[u8] {
        &self.arena
    }

    /// Split borrow for sorting descriptors against the arena they index.
    pub fn arena_and_descs_mut(&mut self) -> (&[u8], &mut [D]) {
        (&self.arena, &mut self.strings)
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<D>) {
        (self.arena, self.strings)
    }

    pub fn is_sorted(&self) -> bool {
        (1..self.len()).all(|i| self.bytes(i - 1) <= self.bytes(i))
    }

    /// Rewrites the arena so descriptors point to disjoint, contiguous,
    /// null-terminated runs in descriptor order. The result depends only on
    /// the current descriptor sequence, not on how it came to be.
    pub fn make_contiguous(&mut self) {
        let mut arena = Vec::with_capacity(self.sum_len() + self.len());
        for desc in &mut self.strings {
            let offset = arena.len();
            arena.extend_from_slice(&self.arena[desc.offset()..desc.offset() + desc.len()]);
            arena.push(0);
            desc.set_span(offset, desc.len());
        }
        self.arena = arena;
    }

    /// Postcondition checker: every descriptor lies in the arena's validity
    /// range and ends on a terminator.
    pub fn is_consistent(&self) -> bool {
        self.strings.iter().all(|desc| {
            let end = desc.offset() + desc.len();
            end < self.arena.len() + 1
                && self.arena.get(end).copied() == Some(0)
        })
    }
}

/// Incrementally assembles a container, one string at a time.
#[derive(Debug)]
pub struct ContainerBuilder<D: StringDesc = Str> {
    arena: Vec<u8>,
    strings: Vec<D>,
}

impl<D: StringDesc> ContainerBuilder<D> {
    pub fn new() -> Self {
        ContainerBuilder {
            arena: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn with_capacity(chars: usize, count: usize) -> Self {
        ContainerBuilder {
            arena: Vec::with_capacity(chars),
            strings: Vec::with_capacity(count),
        }
    }

    /// Appends `bytes` plus a terminator and returns the new descriptor for
    /// further decoration (origin rank, index).
    pub fn push(&mut self, bytes: &[u8]) -> &mut D {
        let offset = self.arena.len();
        self.arena.extend_from_slice(bytes);
        self.arena.push(0);
        self.strings.push(D::with_span(offset, bytes.len()));
        self.strings.last_mut().unwrap()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn finish(self) -> StringContainer<D> {
        StringContainer::from_parts(self.arena, self.strings)
    }
}

impl<D: StringDesc> Default for ContainerBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// A string container with a parallel LCP array.
#[derive(Debug, Default, Clone)]
pub struct StringLcpContainer<D: StringDesc = Str> {
    container: StringContainer<D>,
    lcps: Vec<usize>,
}

impl<D: StringDesc> StringLcpContainer<D> {
    pub fn new(container: StringContainer<D>) -> Self {
        let lcps = vec![0; container.len()];
        StringLcpContainer { container, lcps }
    }

    pub fn with_lcps(container: StringContainer<D>, lcps: Vec<usize>) -> Self {
        assert_eq!(container.len(), lcps.len(), "LCP array length mismatch");
        StringLcpContainer { container, lcps }
    }

    pub fn container(&self) -> &StringContainer<D> {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut StringContainer<D> {
        &mut self.container
    }

    pub fn into_inner(self) -> (StringContainer<D>, Vec<usize>) {
        (self.container, self.lcps)
    }

    pub fn len(&self) -> usize {
        self.container.len()
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    pub fn char_size(&self) -> usize {
        self.container.char_size()
    }

    pub fn bytes(&self, i: usize) -> &[u8] {
        self.container.bytes(i)
    }

    pub fn descs(&self) -> &[D] {
        self.container.descs()
    }

    pub fn lcps(&self) -> &[usize] {
        &self.lcps
    }

    pub fn lcps_mut(&mut self) -> &mut Vec<usize> {
        &mut self.lcps
    }

    pub fn set_lcps(&mut self, lcps: Vec<usize>) {
        assert_eq!(lcps.len(), self.container.len(), "LCP array length mismatch");
        self.lcps = lcps;
    }

    /// Checks `lcps[i] == lcp(strings[i-1], strings[i])` and `lcps[0] == 0`.
    pub fn is_consistent(&self) -> bool {
        if self.lcps.len() != self.container.len() {
            return false;
        }
        if !self.container.is_consistent() {
            return false;
        }
        self.lcps.iter().enumerate().all(|(i, &l)| {
            if i == 0 {
                l == 0
            } else {
                l == lcp(self.bytes(i - 1), self.bytes(i))
            }
        })
    }

    /// Reconstructs full strings from an LCP-compressed transmission: string
    /// `i` currently holds only its distinct tail and gains `prefix_lcps[i]`
    /// leading bytes copied from its (already extended) predecessor.
    pub fn extend_prefix(&mut self, prefix_lcps: &[usize]) -> Result<()> {
        if prefix_lcps.len() != self.container.len() {
            return Err(Error::container(format!(
                "extend_prefix got {} LCPs for {} strings",
                prefix_lcps.len(),
                self.container.len()
            )));
        }
        if let Some(&first) = prefix_lcps.first() {
            if first != 0 {
                return Err(Error::container("extend_prefix requires lcps[0] == 0"));
            }
        }

        let extra: usize = prefix_lcps.iter().sum();
        let mut arena = Vec::with_capacity(self.container.char_size() + extra);
        let mut prev_offset = 0;
        for (desc, &common) in self.container.strings.iter_mut().zip(prefix_lcps) {
            let offset = arena.len();
            // Common prefix from the previous (extended) string, then the
            // distinct tail from the old arena.
            arena.extend_from_within(prev_offset..prev_offset + common);
            arena.extend_from_slice(
                &self.container.arena[desc.offset()..desc.offset() + desc.len()],
            );
            arena.push(0);
            desc.set_span(offset, common + desc.len());
            prev_offset = offset;
        }
        self.container.arena = arena;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(strings: &[&str]) -> StringContainer {
        let mut builder = ContainerBuilder::new();
        for s in strings {
            builder.push(s.as_bytes());
        }
        builder.finish()
    }

    #[test]
    fn test_lcp() {
        assert_eq!(lcp(b"banana", b"bandana"), 3);
        assert_eq!(lcp(b"", b"x"), 0);
        assert_eq!(lcp(b"abc", b"abc"), 3);
    }

    #[test]
    fn test_from_arena_parses_terminated_runs() {
        let container: StringContainer = StringContainer::from_arena(b"foo\0ab\0\0x\0".to_vec());
        assert_eq!(container.len(), 4);
        assert_eq!(container.bytes(0), b"foo");
        assert_eq!(container.bytes(1), b"ab");
        assert_eq!(container.bytes(2), b"");
        assert_eq!(container.bytes(3), b"x");
        assert!(container.is_consistent());
    }

    #[test]
    fn test_make_contiguous_layout() {
        let mut container = build(&["cherry", "apple", "banana"]);
        // Rearrange descriptors, then restore the packed layout.
        container.descs_mut().sort_by_key(|d| d.offset + 1024 - d.len);
        container.make_contiguous();
        assert!(container.is_consistent());
        for i in 1..container.len() {
            let prev = container.descs()[i - 1];
            let curr = container.descs()[i];
            assert_eq!(prev.offset + prev.len + 1, curr.offset);
        }
    }

    #[test]
    fn test_make_contiguous_is_deterministic() {
        let mut a = build(&["aa", "b", "ccc"]);
        let mut b = build(&["aa", "b", "ccc"]);
        // Give `b` a different arena history.
        b.descs_mut().reverse();
        b.make_contiguous();
        b.descs_mut().reverse();
        b.make_contiguous();
        a.make_contiguous();
        assert_eq!(a.arena(), b.arena());
        assert_eq!(a.descs(), b.descs());
    }

    #[test]
    fn test_extend_prefix_roundtrip() {
        // Tails of ["banana", "bandana", "bar"] under LCP stripping.
        let mut builder = ContainerBuilder::<Str>::new();
        builder.push(b"banana");
        builder.push(b"dana");
        builder.push(b"r");
        let mut container = StringLcpContainer::new(builder.finish());

        container.extend_prefix(&[0, 3, 2]).unwrap();
        assert_eq!(container.bytes(0), b"banana");
        assert_eq!(container.bytes(1), b"bandana");
        assert_eq!(container.bytes(2), b"bar");
        assert!(container.container().is_consistent());
    }

    #[test]
    fn test_extend_prefix_rejects_bad_input() {
        let mut container = StringLcpContainer::new(build(&["a", "b"]));
        assert!(container.extend_prefix(&[0]).is_err());
        assert!(container.extend_prefix(&[1, 0]).is_err());
        assert!(container.extend_prefix(&[0, 0]).is_ok());
    }

    #[test]
    fn test_lcp_consistency_check() {
        let container = build(&["apple", "applet", "bar"]);
        let good = StringLcpContainer::with_lcps(container.clone(), vec![0, 5, 0]);
        assert!(good.is_consistent());
        let bad = StringLcpContainer::with_lcps(container, vec![0, 4, 0]);
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_indexed_descriptors_keep_origin() {
        let mut builder = ContainerBuilder::<IndexedStr>::new();
        let desc = builder.push(b"payload");
        desc.pe = 3;
        desc.index = 17;
        let container = builder.finish();
        assert_eq!(container.descs()[0].pe, 3);
        assert_eq!(container.descs()[0].index, 17);
        assert_eq!(container.bytes(0), b"payload");
    }
}
