/// Split normalized text into windows of at most `size` characters with at
/// most `overlap` characters shared between consecutive chunks. Each window
/// ends on the last sentence boundary inside it when one falls within the
/// overlap tail; otherwise it breaks hard at `size`. Order is preserved.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size.saturating_sub(1));
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= size {
        let only = text.trim();
        return if only.is_empty() {
            Vec::new()
        } else {
            vec![only.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            if let Some(boundary) = last_sentence_boundary(&chars[start..end]) {
                // only accept a boundary that falls in the overlap tail, so
                // chunks cannot degenerate to a sentence fragment each
                if boundary + 1 > size - overlap {
                    end = start + boundary + 1;
                }
            }
        }
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end >= chars.len() {
            break;
        }
        // step forward keeping the overlap; always make progress
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Index (within the window) of the last `.`, `!` or `?` that ends a
/// sentence, i.e. is followed by whitespace or the window edge.
fn last_sentence_boundary(window: &[char]) -> Option<usize> {
    (0..window.len()).rev().find(|&i| {
        matches!(window[i], '.' | '!' | '?')
            && window.get(i + 1).is_none_or(|c| c.is_whitespace())
    })
}
