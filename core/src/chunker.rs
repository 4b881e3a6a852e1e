//! Bounded-size slicing of ordered sequences.

use crate::error::{ReconError, ReconResult};

/// Split `items` into consecutive sub-slices of at most `size` elements.
///
/// Every chunk but the last has exactly `size` elements; concatenating
/// the chunks reproduces `items`. A zero size is a configuration error.
pub fn chunks<T>(items: &[T], size: usize) -> ReconResult<std::slice::Chunks<'_, T>> {
    check_chunk_size(size)?;
    Ok(items.chunks(size))
}

pub fn check_chunk_size(size: usize) -> ReconResult<()> {
    if size == 0 {
        return Err(ReconError::InvalidChunkSize { size });
    }
    Ok(())
}
