//! Fixed-window text chunker with overlap.
//!
//! Splits extracted manual text into windows of `size` characters where each
//! window repeats the last `overlap` characters of the previous one, so a
//! sentence cut at a boundary still appears whole in one of the two chunks.
//! Lengths are counted in `char`s; a window never splits a UTF-8 sequence.

/// Default window length in characters.
pub const DEFAULT_SIZE: usize = 1200;
/// Default number of characters shared by consecutive windows.
pub const DEFAULT_OVERLAP: usize = 200;

/// Split `text` into overlapping windows.
///
/// `overlap` is clamped to `size - 1` so the cursor always advances. A `size`
/// of zero is treated as one. Returns an empty vector for empty input.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let size = size.max(1);
    let safe_overlap = overlap.min(size - 1);

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut i = 0usize;
    loop {
        let end = (i + size).min(len);
        chunks.push(text[bounds[i]..bounds[end]].to_string());
        if end >= len {
            break;
        }
        let mut next = end - safe_overlap;
        if next <= i {
            next = end;
        }
        i = next;
    }

    chunks
}

/// Number of windows [`chunk_text`] produces for a text of `len` characters.
pub fn expected_chunk_count(len: usize, size: usize, overlap: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let size = size.max(1);
    let step = size - overlap.min(size - 1);
    if len <= size {
        1
    } else {
        (len - size).div_ceil(step) + 1
    }
}
