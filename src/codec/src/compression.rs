//! Optional LZ4 step between the encoded body and the frame.
//!
//! The frame flags record whether it ran; the compressed form carries its
//! original length as a little-endian prefix.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

/// LZ4 block with size prefix, or None when the body should go out raw:
/// below `threshold`, `threshold` is 0, or the block would not be smaller.
pub fn compress_if_needed(data: &[u8], threshold: usize) -> Option<Vec<u8>> {
    if threshold == 0 || data.len() < threshold {
        return None;
    }

    let packed = compress_prepend_size(data);
    (packed.len() < data.len()).then_some(packed)
}

/// Inverse of [`compress_if_needed`]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, lz4_flex::block::DecompressError> {
    decompress_size_prepended(data)
}
