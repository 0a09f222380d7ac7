//! The TCP input buffer and outbound write descriptor.
//!
//! Grounded in `platform/Darwin/src/tcp/conn.c`'s `ah_i_tcp_in_t`: a
//! page-sized record holding a read/write cursor over its own payload.
//! Unlike the C original, ownership transfer on detach is modeled directly
//! by Rust's move semantics rather than a nulled back-pointer — the
//! `Option<TcpInputBuffer>` the connection stores already says "do I have
//! one" without a sentinel field.

use crate::buf::BufCursor;
use crate::mem::page;

/// One page of storage the connection reads into, exposed as a cursor.
///
/// Always sized `page::page_size()`. Allocated and freed directly through
/// the page allocator (`crate::mem::page`), not the global allocator —
/// the same substrate that backs the event loop's completion slab.
pub struct TcpInputBuffer {
    ptr: *mut u8,
    len: usize,
    r: usize,
    w: usize,
}

impl TcpInputBuffer {
    /// Allocates a fresh, empty buffer. Returns `None` if the page
    /// allocator is out of memory — the caller (the connection) turns that
    /// into a `NoMem` read-completion error.
    pub fn alloc() -> Option<TcpInputBuffer> {
        let len = page::page_size();
        let ptr = page::alloc(len);
        if ptr.is_null() {
            return None;
        }
        Some(TcpInputBuffer { ptr, len, r: 0, w: 0 })
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` was obtained from `page::alloc(len)` and is not
        // freed until `Drop`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Runs `f` over a transient cursor built from this buffer's stored
    /// `(r, w)` position, then writes the cursor's final position back.
    pub fn with_cursor<R>(&mut self, f: impl FnOnce(&mut BufCursor) -> R) -> R {
        let (r, w) = (self.r, self.w);
        let mut cursor = BufCursor::with_state(self.as_mut_slice(), r, w);
        let result = f(&mut cursor);
        self.r = cursor.r();
        self.w = cursor.w();
        result
    }

    pub fn readable(&self) -> &[u8] {
        &self.as_slice()[self.r..self.w]
    }

    pub fn readable_len(&self) -> usize {
        self.w - self.r
    }

    pub fn writable_len(&self) -> usize {
        self.len - self.w
    }

    /// Raw pointer into the writable range, for handing to a platform
    /// backend's `submit_read`.
    pub fn writable_ptr(&mut self) -> *mut u8 {
        let w = self.w;
        unsafe { self.ptr.add(w) }
    }

    /// Marks `n` writable bytes as now readable — called once a read
    /// completion reports bytes transferred.
    pub fn commit(&mut self, n: usize) {
        self.with_cursor(|c| c.commit(n));
    }

    /// Moves unread bytes to the start, maximizing writable room without
    /// discarding anything unread.
    pub fn compact(&mut self) {
        self.with_cursor(|c| c.compact());
    }

    /// Marks `n` readable bytes consumed.
    pub fn consume(&mut self, n: usize) {
        self.with_cursor(|c| c.consume(n));
    }
}

impl Drop for TcpInputBuffer {
    fn drop(&mut self) {
        unsafe { page::free(self.ptr, self.len) };
    }
}

/// An enqueued outbound write. Tracks how much of `data` the connection
/// has already handed off to the kernel so partial writes can resume from
/// the right offset.
///
/// The original's output descriptor carries an opaque `owner` pointer the
/// caller uses to recover its own context when `on_write` fires; in Rust
/// the caller's `ConnObserver` closure/impl already has that context
/// in scope, so no owner field is needed here.
pub struct TcpOutbound {
    data: Vec<u8>,
    sent: usize,
}

impl TcpOutbound {
    pub fn new(data: Vec<u8>) -> TcpOutbound {
        TcpOutbound { data, sent: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.data[self.sent..]
    }

    pub(crate) fn remaining_ptr(&self) -> *const u8 {
        self.data[self.sent..].as_ptr()
    }

    pub(crate) fn remaining_len(&self) -> usize {
        self.data.len() - self.sent
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.data.len());
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.sent >= self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_is_full_page_writable() {
        let buf = TcpInputBuffer::alloc().unwrap();
        assert_eq!(buf.readable_len(), 0);
        assert_eq!(buf.writable_len(), page::page_size());
    }

    #[test]
    fn commit_then_consume_then_compact() {
        let mut buf = TcpInputBuffer::alloc().unwrap();
        buf.with_cursor(|c| {
            c.write_be(0x41, 1);
            c.write_be(0x42, 1);
        });
        buf.commit(0); // no-op; write_be already advanced w via the cursor
        assert_eq!(buf.readable(), b"AB");
        buf.consume(1);
        assert_eq!(buf.readable(), b"B");
        buf.compact();
        assert_eq!(buf.readable(), b"B");
        assert_eq!(buf.writable_len(), page::page_size() - 1);
    }

    #[test]
    fn outbound_tracks_partial_progress() {
        let mut out = TcpOutbound::new(b"ABBCCC".to_vec());
        assert_eq!(out.remaining(), b"ABBCCC");
        out.advance(1);
        assert_eq!(out.remaining(), b"BBCCC");
        out.advance(5);
        assert!(out.is_complete());
    }
}
