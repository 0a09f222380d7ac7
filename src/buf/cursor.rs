//! A read/write cursor over one contiguous byte region.
//!
//! Three offsets `r <= w <= e` into the same region: `[r, w)` is readable,
//! `[w, e)` is writable. Every operation here preserves that ordering —
//! there is no way to construct a `BufCursor` value that violates it.

#[derive(Debug)]
pub struct BufCursor<'a> {
    region: &'a mut [u8],
    r: usize,
    w: usize,
}

impl<'a> BufCursor<'a> {
    /// A cursor over `region` with nothing yet written: `r = w = 0`,
    /// `e = region.len()`.
    pub fn new(region: &'a mut [u8]) -> BufCursor<'a> {
        BufCursor { region, r: 0, w: 0 }
    }

    /// A cursor over `region` whose readable range is the whole slice
    /// (useful when wrapping data that already arrived, e.g. from a read
    /// completion).
    pub fn full(region: &'a mut [u8]) -> BufCursor<'a> {
        let w = region.len();
        BufCursor { region, r: 0, w }
    }

    /// Reconstructs a cursor over `region` at a previously observed `(r, w)`
    /// position. Used by owners that cannot keep the borrow alive between
    /// calls (e.g. [`crate::tcp::buffer::TcpInputBuffer`], which stores `r`
    /// and `w` alongside its raw page and hands out a transient cursor on
    /// demand).
    pub fn with_state(region: &'a mut [u8], r: usize, w: usize) -> BufCursor<'a> {
        debug_assert!(r <= w && w <= region.len());
        BufCursor { region, r, w }
    }

    pub fn r(&self) -> usize {
        self.r
    }

    pub fn w(&self) -> usize {
        self.w
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn readable(&self) -> &[u8] {
        &self.region[self.r..self.w]
    }

    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.region[self.w..]
    }

    pub fn readable_len(&self) -> usize {
        self.w - self.r
    }

    pub fn writable_len(&self) -> usize {
        self.region.len() - self.w
    }

    /// Marks `n` readable bytes as consumed. Clamped to the current
    /// readable length — never advances `r` past `w`.
    pub fn consume(&mut self, n: usize) {
        self.r += n.min(self.w - self.r);
    }

    /// Marks `n` writable bytes as now readable (e.g. after a `recv` fills
    /// part of the writable range). Clamped to the current writable length.
    pub fn commit(&mut self, n: usize) {
        self.w += n.min(self.region.len() - self.w);
    }

    /// Moves unread bytes to the start of the region, maximizing writable
    /// space. Used when an observer wants to keep unconsumed bytes but
    /// needs more room before the next read.
    pub fn compact(&mut self) {
        if self.r == 0 {
            return;
        }
        let len = self.w - self.r;
        self.region.copy_within(self.r..self.w, 0);
        self.r = 0;
        self.w = len;
    }

    pub fn reset(&mut self) {
        self.r = 0;
        self.w = 0;
    }

    /// Reads a big-endian unsigned integer of `N` bytes without advancing
    /// `r`. Returns `None` (leaving the cursor untouched) if fewer than `N`
    /// bytes are readable.
    pub fn peek_be(&self, n: usize) -> Option<u64> {
        if self.readable_len() < n || n > 8 {
            return None;
        }
        let bytes = &self.region[self.r..self.r + n];
        let mut v = 0u64;
        for &b in bytes {
            v = (v << 8) | b as u64;
        }
        Some(v)
    }

    /// Reads and consumes a big-endian unsigned integer of `N` bytes.
    /// Returns `None` and leaves `r` unchanged if not enough bytes are
    /// readable.
    pub fn read_be(&mut self, n: usize) -> Option<u64> {
        let v = self.peek_be(n)?;
        self.r += n;
        Some(v)
    }

    pub fn read_u32_be(&mut self) -> Option<u32> {
        self.read_be(4).map(|v| v as u32)
    }

    pub fn read_u64_be(&mut self) -> Option<u64> {
        self.read_be(8)
    }

    pub fn peek_le(&self, n: usize) -> Option<u64> {
        if self.readable_len() < n || n > 8 {
            return None;
        }
        let bytes = &self.region[self.r..self.r + n];
        let mut v = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            v |= (b as u64) << (8 * i);
        }
        Some(v)
    }

    pub fn read_le(&mut self, n: usize) -> Option<u64> {
        let v = self.peek_le(n)?;
        self.r += n;
        Some(v)
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.read_le(4).map(|v| v as u32)
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.read_le(8)
    }

    /// Writes a big-endian integer into the writable range and commits it.
    /// Returns `false` (no-op) if there is not enough writable space.
    pub fn write_be(&mut self, value: u64, n: usize) -> bool {
        if self.writable_len() < n || n > 8 {
            return false;
        }
        let start = self.w;
        for i in 0..n {
            self.region[start + i] = (value >> (8 * (n - 1 - i))) as u8;
        }
        self.w += n;
        true
    }

    pub fn write_le(&mut self, value: u64, n: usize) -> bool {
        if self.writable_len() < n || n > 8 {
            return false;
        }
        let start = self.w;
        for i in 0..n {
            self.region[start + i] = (value >> (8 * i)) as u8;
        }
        self.w += n;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_holds_through_operations() {
        let mut buf = [0u8; 16];
        let mut c = BufCursor::new(&mut buf);
        c.commit(10);
        c.consume(4);
        assert!(c.readable_len() <= c.capacity());
        c.compact();
        assert_eq!(c.readable_len(), 6);
    }

    #[test]
    fn overflow_guard_on_short_reads() {
        let mut buf = [1, 2, 3, 4, 5, 6, 7];
        let mut c = BufCursor::full(&mut buf);
        assert_eq!(c.read_u64_be(), None, "only 7 bytes readable, must refuse u64");
        assert_eq!(c.readable_len(), 7, "failed read must not advance r");
        assert_eq!(c.read_u32_be(), Some(0x01020304));
        assert_eq!(c.readable_len(), 3);
    }

    #[test]
    fn endian_round_trip() {
        let mut storage = [0u8; 8];
        {
            let mut w = BufCursor::new(&mut storage);
            assert!(w.write_be(0x0102030405060708, 8));
        }
        let mut r = BufCursor::full(&mut storage);
        assert_eq!(r.read_u64_be(), Some(0x0102030405060708));

        let mut storage2 = [0u8; 8];
        {
            let mut w = BufCursor::new(&mut storage2);
            assert!(w.write_le(0x0102030405060708, 8));
        }
        let mut r2 = BufCursor::full(&mut storage2);
        assert_eq!(r2.read_u64_le(), Some(0x0102030405060708));
    }
}
