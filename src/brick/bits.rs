// Bit-level cursor over the exchange buffer
//
// Every payload field is packed least-significant bit first. A call addresses the
// buffer with a (byte, bit) origin plus the running cursor, so a pass of sequential
// writes or reads only has to keep the origin fixed.

/// Capacity of the exchange buffer.
///
/// Larger than the biggest frame payload (255 bytes) so that no field layout can run
/// past the end while packing; oversized payloads are rejected by the frame codec.
pub const BUFFER_LEN: usize = 512;

/// Fixed-size byte buffer with a bit cursor, reused for every encode and decode pass
pub struct BitBuffer {
    bytes: [u8; BUFFER_LEN],
    bit_offset: usize,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0; BUFFER_LEN],
            bit_offset: 0,
        }
    }

    /// Zero the whole buffer and rewind the cursor (start of an encode pass)
    pub fn clear(&mut self) {
        self.bytes.fill(0);
        self.bit_offset = 0;
    }

    /// Replace the content with `data` (zero padded) and rewind the cursor
    /// (start of a decode pass)
    pub fn load(&mut self, data: &[u8]) {
        self.clear();
        let len = data.len().min(BUFFER_LEN);
        self.bytes[..len].copy_from_slice(&data[..len]);
    }

    pub fn reset_cursor(&mut self) {
        self.bit_offset = 0;
    }

    /// Bits consumed since the last reset
    pub fn bit_offset(&self) -> usize {
        self.bit_offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Write the `num_bits` low bits of `value`, LSB first, at
    /// `byte_offset * 8 + bit_offset + cursor`, then advance the cursor.
    ///
    /// Bits are OR-ed in, the target region must be zero (see [`BitBuffer::clear`]).
    /// Panics if the field runs past the buffer; field layouts never do.
    pub fn write_bits(&mut self, byte_offset: usize, bit_offset: usize, num_bits: u8, value: u32) {
        debug_assert!(num_bits <= 32);
        let origin = byte_offset * 8 + bit_offset + self.bit_offset;
        for i in 0..usize::from(num_bits) {
            if (value >> i) & 0x01 == 1 {
                let pos = origin + i;
                self.bytes[pos / 8] |= 1 << (pos % 8);
            }
        }
        self.bit_offset += usize::from(num_bits);
    }

    /// Read `num_bits` bits written by [`BitBuffer::write_bits`] at the same origin
    /// and advance the cursor.
    pub fn read_bits(&mut self, byte_offset: usize, bit_offset: usize, num_bits: u8) -> u32 {
        debug_assert!(num_bits <= 32);
        let origin = byte_offset * 8 + bit_offset + self.bit_offset;
        let mut result: u32 = 0;
        // Scan from the highest requested bit down, doubling as we go
        for i in (0..usize::from(num_bits)).rev() {
            let pos = origin + i;
            let bit = (self.bytes[pos / 8] >> (pos % 8)) & 0x01;
            result = (result << 1) | u32::from(bit);
        }
        self.bit_offset += usize::from(num_bits);
        result
    }
}

impl Default for BitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential field access at a fixed byte origin of a [`BitBuffer`]
pub struct FieldCursor<'a> {
    buf: &'a mut BitBuffer,
    byte_offset: usize,
}

impl<'a> FieldCursor<'a> {
    pub fn new(buf: &'a mut BitBuffer, byte_offset: usize) -> Self {
        Self { buf, byte_offset }
    }

    pub fn read(&mut self, num_bits: u8) -> u32 {
        self.buf.read_bits(self.byte_offset, 0, num_bits)
    }

    pub fn write(&mut self, num_bits: u8, value: u32) {
        self.buf.write_bits(self.byte_offset, 0, num_bits, value)
    }

    pub fn bit_offset(&self) -> usize {
        self.buf.bit_offset()
    }
}

/// Number of halvings needed to bring `value` down to zero, capped at 31
pub fn bits_needed(value: u32) -> u8 {
    let bits = (u32::BITS - value.leading_zeros()) as u8;
    bits.min(31)
}
