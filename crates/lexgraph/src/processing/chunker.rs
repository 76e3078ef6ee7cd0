//! Sliding-window chunking with sentence-boundary preference.
//!
//! Windows are `chunk_size` bytes with `overlap` bytes carried between
//! consecutive chunks. When a window does not end the text, the cut point
//! prefers the latest period in the back half of the window, then the latest
//! newline, then a hard cut. Boundary preference is best-effort; the hard
//! bound is chunk length.

/// Split `text` into overlapping chunks of at most `chunk_size` bytes.
/// `overlap` must be strictly less than `chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(overlap < chunk_size, "overlap must be < chunk_size");
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let raw_end = start + chunk_size;
        if raw_end >= text.len() {
            chunks.push(text[start..].to_string());
            break;
        }

        let end = find_cut(text, start, chunk_size);
        chunks.push(text[start..end].to_string());

        // Advance with overlap; a cut too close to the start would loop, so
        // fall forward to the cut itself.
        let next = if end - start > overlap {
            end - overlap
        } else {
            end
        };
        start = snap_to_char_boundary(text, next);
    }

    chunks
}

/// Cut position for the window starting at `start`: latest '.' in the back
/// half of the window (cut after it), else latest '\n' (cut after it), else
/// the full window.
fn find_cut(text: &str, start: usize, chunk_size: usize) -> usize {
    let hard_end = snap_to_char_boundary(text, start + chunk_size);
    let search_start = snap_to_char_boundary(text, start + chunk_size / 2);
    if search_start >= hard_end {
        return hard_end;
    }

    let region = &text[search_start..hard_end];
    if let Some(pos) = region.rfind('.') {
        return search_start + pos + 1;
    }
    if let Some(pos) = region.rfind('\n') {
        return search_start + pos + 1;
    }
    hard_end
}

/// Snap a byte offset down to the nearest UTF-8 char boundary.
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}
