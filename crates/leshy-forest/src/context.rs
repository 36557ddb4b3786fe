//! Relocation-aware read cursor over a chunk's buffers.
//!
//! [`LoadContext`] turns the stored 32-bit offsets of a Forest payload into
//! live reads against one or two backing buffers: CPU-resident structure
//! data and an optional GPU-resident block (vertex, index, and texture
//! payloads). The original loader patched relocated pointers in place; this
//! decoder resolves every offset explicitly instead and keeps the
//! relocation list only as a structural hint.
//!
//! Reads are deliberately permissive: an out-of-range read yields `0`
//! (or an empty slice) instead of an error, mirroring the original
//! format's behavior. Higher layers apply their own sanity checks on the
//! values they read. The cursor never advances implicitly; loaders read at
//! explicit offsets and advance `position` themselves.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use glam::{Mat4, Vec4};
use tracing::warn;

use leshy_common::memchr::memchr;
use leshy_common::Platform;

/// Read cursor over a chunk's CPU and GPU buffers.
#[derive(Debug, Clone)]
pub struct LoadContext<'a> {
    cpu: &'a [u8],
    gpu: &'a [u8],
    platform: Platform,
    relocations: &'a [u32],
    position: usize,
}

impl<'a> LoadContext<'a> {
    /// Create a context over a CPU buffer only.
    pub fn new(cpu: &'a [u8], platform: Platform) -> Self {
        Self {
            cpu,
            gpu: &[],
            platform,
            relocations: &[],
            position: 0,
        }
    }

    /// Create a context over split CPU/GPU buffers with a relocation hint
    /// list.
    pub fn with_gpu(
        cpu: &'a [u8],
        gpu: &'a [u8],
        platform: Platform,
        relocations: &'a [u32],
    ) -> Self {
        Self {
            cpu,
            gpu,
            platform,
            relocations,
            position: 0,
        }
    }

    /// The platform descriptor for this payload.
    #[inline]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The CPU-resident buffer.
    #[inline]
    pub fn cpu(&self) -> &'a [u8] {
        self.cpu
    }

    /// The GPU-resident buffer (may be empty).
    #[inline]
    pub fn gpu(&self) -> &'a [u8] {
        self.gpu
    }

    /// The relocation hint list.
    #[inline]
    pub fn relocations(&self) -> &'a [u32] {
        self.relocations
    }

    /// Current cursor position.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor to an absolute offset.
    #[inline]
    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Advance the cursor.
    #[inline]
    pub fn advance(&mut self, count: usize) {
        self.position = self.position.saturating_add(count);
    }

    fn bytes_at(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        self.cpu.get(offset..offset.checked_add(len)?)
    }

    /// Read a byte; out of range yields 0.
    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.bytes_at(offset, 1).map_or(0, |b| b[0])
    }

    /// Read a signed byte; out of range yields 0.
    #[inline]
    pub fn read_i8(&self, offset: usize) -> i8 {
        self.read_u8(offset) as i8
    }

    /// Read a u16 in the platform byte order; out of range yields 0.
    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        self.bytes_at(offset, 2).map_or(0, |b| {
            if self.platform.endian.is_big() {
                BigEndian::read_u16(b)
            } else {
                LittleEndian::read_u16(b)
            }
        })
    }

    /// Read an i16 in the platform byte order; out of range yields 0.
    #[inline]
    pub fn read_i16(&self, offset: usize) -> i16 {
        self.read_u16(offset) as i16
    }

    /// Read a u32 in the platform byte order; out of range yields 0.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        self.bytes_at(offset, 4).map_or(0, |b| {
            if self.platform.endian.is_big() {
                BigEndian::read_u32(b)
            } else {
                LittleEndian::read_u32(b)
            }
        })
    }

    /// Read an i32 in the platform byte order; out of range yields 0.
    #[inline]
    pub fn read_i32(&self, offset: usize) -> i32 {
        self.read_u32(offset) as i32
    }

    /// Read an f32 in the platform byte order; out of range yields 0.0.
    #[inline]
    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_bits(self.read_u32(offset))
    }

    /// Read 4 consecutive floats as a vector.
    #[inline]
    pub fn read_vec4(&self, offset: usize) -> Vec4 {
        Vec4::new(
            self.read_f32(offset),
            self.read_f32(offset + 4),
            self.read_f32(offset + 8),
            self.read_f32(offset + 12),
        )
    }

    /// Read 16 consecutive floats as a row-major 4x4 matrix.
    pub fn read_matrix4x4(&self, offset: usize) -> Mat4 {
        let mut m = [0.0f32; 16];
        for (i, slot) in m.iter_mut().enumerate() {
            *slot = self.read_f32(offset + i * 4);
        }
        // Stored row-major; glam matrices are column-major.
        Mat4::from_cols_array(&m).transpose()
    }

    /// Read a stored pointer field: the raw 32-bit offset, unvalidated.
    ///
    /// Validation is the caller's job; see [`LoadContext::resolve_pointer`].
    #[inline]
    pub fn read_pointer(&self, offset: usize) -> i32 {
        self.read_i32(offset)
    }

    /// Validate a stored offset as an address into the CPU buffer.
    #[inline]
    pub fn resolve_pointer(&self, address: i32) -> Option<usize> {
        if address >= 0 && (address as usize) < self.cpu.len() {
            Some(address as usize)
        } else {
            None
        }
    }

    /// Dereference a pointer field to a string.
    ///
    /// Wide (big-endian) platforms store length-prefixed strings; others
    /// are NUL-terminated. Returns `None` on an invalid pointer or
    /// non-UTF-8 bytes.
    pub fn read_string_pointer(&self, offset: usize) -> Option<&'a str> {
        let address = self.resolve_pointer(self.read_pointer(offset))?;

        if self.platform.length_prefixed_strings() {
            let len = self.read_u32(address) as usize;
            let bytes = self.bytes_at(address + 4, len)?;
            std::str::from_utf8(bytes).ok()
        } else {
            let tail = &self.cpu[address..];
            let nul = memchr(0, tail)?;
            std::str::from_utf8(&tail[..nul]).ok()
        }
    }

    /// Borrow `size` bytes at `offset` from the CPU or GPU buffer.
    ///
    /// Returns an empty slice when the range exceeds the selected buffer;
    /// callers treat empty as "unavailable" and retry against the other
    /// buffer or degrade gracefully.
    pub fn load_buffer(&self, offset: usize, size: usize, prefer_gpu: bool) -> &'a [u8] {
        let buffer = if prefer_gpu { self.gpu } else { self.cpu };
        match offset.checked_add(size).and_then(|end| buffer.get(offset..end)) {
            Some(slice) => slice,
            None => &[],
        }
    }
}

/// Clamp an array-count field read from the stream.
///
/// Corrupt or misread pointers regularly masquerade as counts; a negative
/// or implausibly large value is treated as zero so the loader never
/// allocates proportional to garbage.
pub fn sanitize_count(raw: i32, max: usize, what: &'static str) -> usize {
    if raw < 0 {
        warn!(raw, what, "negative count, treating as empty");
        return 0;
    }
    let count = raw as usize;
    if count > max {
        warn!(count, max, what, "implausible count, treating as empty");
        return 0;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use leshy_common::{Endian, PointerWidth};

    fn le_ctx(data: &[u8]) -> LoadContext<'_> {
        LoadContext::new(data, Platform::pc())
    }

    #[test]
    fn test_out_of_range_reads_yield_zero() {
        let ctx = le_ctx(&[0xFF, 0xFF]);

        assert_eq!(ctx.read_u32(0), 0);
        assert_eq!(ctx.read_u16(1), 0);
        assert_eq!(ctx.read_u8(100), 0);
        assert_eq!(ctx.read_f32(0), 0.0);
        assert_eq!(ctx.read_vec4(50), Vec4::ZERO);
    }

    #[test]
    fn test_endian_honored() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let le = le_ctx(&data);
        let be = LoadContext::new(&data, Platform::console());

        assert_eq!(le.read_u32(0), 0x04030201);
        assert_eq!(be.read_u32(0), 0x01020304);
    }

    #[test]
    fn test_matrix_row_major() {
        let mut data = Vec::new();
        for i in 0..16 {
            data.extend_from_slice(&(i as f32).to_le_bytes());
        }
        let ctx = le_ctx(&data);
        let m = ctx.read_matrix4x4(0);

        // Row 0 of the stored matrix is (0, 1, 2, 3).
        assert_eq!(m.row(0), Vec4::new(0.0, 1.0, 2.0, 3.0));
        assert_eq!(m.col(0), Vec4::new(0.0, 4.0, 8.0, 12.0));
    }

    #[test]
    fn test_string_pointer_nul_terminated() {
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(&8i32.to_le_bytes());
        data.extend_from_slice(b"birch\0");
        let ctx = le_ctx(&data);

        assert_eq!(ctx.read_string_pointer(0), Some("birch"));
    }

    #[test]
    fn test_string_pointer_length_prefixed() {
        let platform = Platform {
            endian: Endian::Big,
            pointer_width: PointerWidth::W64,
        };
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(&8i32.to_be_bytes());
        data.extend_from_slice(&5u32.to_be_bytes());
        data.extend_from_slice(b"birch");
        let ctx = LoadContext::new(&data, platform);

        assert_eq!(ctx.read_string_pointer(0), Some("birch"));
    }

    #[test]
    fn test_invalid_string_pointer() {
        let data = (-1i32).to_le_bytes();
        let ctx = le_ctx(&data);
        assert_eq!(ctx.read_string_pointer(0), None);
    }

    #[test]
    fn test_load_buffer_prefers_selected() {
        let cpu = [1u8, 2, 3, 4];
        let gpu = [9u8, 9];
        let ctx = LoadContext::with_gpu(&cpu, &gpu, Platform::pc(), &[]);

        assert_eq!(ctx.load_buffer(0, 4, false), &[1, 2, 3, 4]);
        assert_eq!(ctx.load_buffer(0, 2, true), &[9, 9]);
        // Out of range on the selected buffer yields empty, never errors.
        assert_eq!(ctx.load_buffer(0, 4, true), &[] as &[u8]);
        assert_eq!(ctx.load_buffer(2, 100, false), &[] as &[u8]);
    }

    #[test]
    fn test_sanitize_count() {
        assert_eq!(sanitize_count(5, 100, "test"), 5);
        assert_eq!(sanitize_count(-1, 100, "test"), 0);
        assert_eq!(sanitize_count(101, 100, "test"), 0);
        assert_eq!(sanitize_count(0, 100, "test"), 0);
    }
}
