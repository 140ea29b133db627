//! Growable byte-stream buffer.
//!
//! A [`ByteStream`] keeps consumed-and-gone, readable, and writable bytes in
//! one backing allocation split by two offsets: `data_offset..buffer_offset`
//! is readable data, `buffer_offset..` is writable space. Reads consume from
//! the front, writes commit at the back, and the dead prefix is compacted
//! away whenever it reaches half the live region. The backing allocation
//! only ever has power-of-two sizes.

/// A byte buffer with separate read and write cursors over one allocation.
#[derive(Debug, Default)]
pub struct ByteStream {
    base: Vec<u8>,
    data_offset: usize,
    buffer_offset: usize,
}

impl ByteStream {
    /// Creates an empty stream with no backing allocation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies readable data into `out` and consumes what was copied.
    /// Returns the number of bytes copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let data = self.data();
        let size = data.len().min(out.len());
        out[..size].copy_from_slice(&data[..size]);
        self.do_skip(size);
        size
    }

    /// Consumes up to `size` readable bytes. Returns the number consumed.
    pub fn skip(&mut self, size: usize) -> usize {
        let size = size.min(self.data_len());
        self.do_skip(size);
        size
    }

    /// Appends `data`, growing the backing allocation as needed.
    pub fn write(&mut self, data: &[u8]) {
        self.reserve_buffer(data.len());
        self.buffer_mut()[..data.len()].copy_from_slice(data);
        self.do_commit_buffer(data.len());
    }

    /// Reserves `size` writable bytes, hands them to `fill`, and commits
    /// them if `fill` succeeds. On error nothing is committed.
    pub fn write_directly<E>(
        &mut self,
        size: usize,
        fill: impl FnOnce(&mut [u8]) -> Result<(), E>,
    ) -> Result<(), E> {
        self.reserve_buffer(size);
        fill(self.buffer_mut())?;
        self.do_commit_buffer(size);
        Ok(())
    }

    /// Takes back up to `size` bytes from the end of the readable region,
    /// returning them to writable space. Returns the number taken back.
    pub fn unwrite(&mut self, size: usize) -> usize {
        let size = size.min(self.data_len());
        self.buffer_offset -= size;
        if self.data_offset * 2 >= self.buffer_offset {
            self.compact();
        }
        size
    }

    /// Ensures at least `size` writable bytes, compacting or growing the
    /// backing allocation to the next power of two as needed.
    pub fn reserve_buffer(&mut self, size: usize) {
        if self.buffer_len() >= size {
            return;
        }
        let data_len = self.data_len();
        if self.base.len() - data_len < size {
            self.reallocate((data_len + size).next_power_of_two());
        } else if data_len * 2 > self.base.len() {
            self.reallocate(self.base.len() * 2);
        } else {
            self.compact();
        }
    }

    /// Marks up to `size` writable bytes (already filled through
    /// [`buffer_mut`](Self::buffer_mut)) as readable data. Returns the
    /// number committed.
    pub fn commit_buffer(&mut self, size: usize) -> usize {
        let size = size.min(self.buffer_len());
        self.do_commit_buffer(size);
        size
    }

    /// Doubles the backing allocation.
    pub fn expand(&mut self) {
        self.reallocate((self.base.len() * 2).max(1));
    }

    /// Shrinks the backing allocation to the next power of two at or above
    /// `min_size`, never below the current data size.
    pub fn shrink(&mut self, min_size: usize) {
        let min_size = min_size.max(self.data_len()).next_power_of_two();
        if self.base.len() != min_size {
            self.reallocate(min_size);
        }
    }

    /// The readable region.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.base[self.data_offset..self.buffer_offset]
    }

    /// Length of the readable region.
    #[must_use]
    pub const fn data_len(&self) -> usize {
        self.buffer_offset - self.data_offset
    }

    /// The writable region.
    #[must_use]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.base[self.buffer_offset..]
    }

    /// Length of the writable region.
    #[must_use]
    pub const fn buffer_len(&self) -> usize {
        self.base.len() - self.buffer_offset
    }

    /// Size of the backing allocation.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.base.len()
    }

    fn do_skip(&mut self, size: usize) {
        self.data_offset += size;
        if self.data_offset * 2 >= self.buffer_offset {
            self.compact();
        }
    }

    fn do_commit_buffer(&mut self, size: usize) {
        self.buffer_offset += size;
    }

    /// Moves the readable region to the front of the allocation.
    fn compact(&mut self) {
        let len = self.data_len();
        self.base.copy_within(self.data_offset..self.buffer_offset, 0);
        self.data_offset = 0;
        self.buffer_offset = len;
    }

    fn reallocate(&mut self, new_size: usize) {
        let mut base = vec![0u8; new_size];
        let len = self.data_len();
        base[..len].copy_from_slice(self.data());
        self.base = base;
        self.data_offset = 0;
        self.buffer_offset = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_consumes_and_frees_space() {
        let mut bs = ByteStream::new();
        bs.reserve_buffer(10);
        assert_eq!(bs.buffer_len(), 16);

        bs.write(b"12345");
        let mut b2 = [0u8; 2];
        assert_eq!(bs.read(&mut b2), 2);
        assert_eq!(&b2, b"12");
        assert_eq!(bs.buffer_len(), 11);

        let mut b1 = [0u8; 1];
        assert_eq!(bs.read(&mut b1), 1);
        assert_eq!(&b1, b"3");
        // Dead prefix reached half the live region: compacted.
        assert_eq!(bs.buffer_len(), 14);

        let mut b3 = [0u8; 3];
        assert_eq!(bs.read(&mut b3), 2);
        assert_eq!(&b3, b"45\x00");
        assert_eq!(bs.buffer_len(), 16);
    }

    #[test]
    fn reserve_compacts_before_growing() {
        let mut bs = ByteStream::new();
        bs.reserve_buffer(10);
        bs.write(b"0123456789");
        bs.skip(3);
        assert_eq!(bs.buffer_len(), 6);

        // Room exists once the skipped prefix is compacted away.
        bs.reserve_buffer(8);
        assert_eq!(bs.buffer_len(), 9);

        bs.write(b"012");
        assert_eq!(bs.data(), b"3456789012");
    }

    #[test]
    fn reserve_grows_to_next_power_of_two() {
        let mut bs = ByteStream::new();
        bs.reserve_buffer(10);
        bs.write(b"0123456789");
        bs.skip(3);
        bs.reserve_buffer(10);
        assert_eq!(bs.buffer_len(), 25);
    }

    #[test]
    fn unwrite_returns_bytes_to_the_buffer() {
        let mut bs = ByteStream::new();
        bs.write(b"abcdef");
        assert_eq!(bs.unwrite(2), 2);
        assert_eq!(bs.data(), b"abcd");
        // Clamped to what is readable.
        assert_eq!(bs.unwrite(100), 4);
        assert_eq!(bs.data_len(), 0);
    }

    #[test]
    fn write_directly_commits_only_on_success() {
        let mut bs = ByteStream::new();
        bs.write_directly::<()>(4, |buf| {
            buf[..4].copy_from_slice(b"abcd");
            Ok(())
        })
        .unwrap();
        assert_eq!(bs.data(), b"abcd");

        let err = bs.write_directly(4, |_| Err("nope")).unwrap_err();
        assert_eq!(err, "nope");
        assert_eq!(bs.data(), b"abcd");
    }

    #[test]
    fn shrink_respects_live_data() {
        let mut bs = ByteStream::new();
        bs.reserve_buffer(100);
        bs.write(b"abcdef");
        bs.shrink(0);
        assert_eq!(bs.size(), 8);
        assert_eq!(bs.data(), b"abcdef");
    }
}
