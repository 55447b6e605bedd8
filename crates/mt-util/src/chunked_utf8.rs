/// One emitted chunk of a chunked UTF-8 stream (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utf8Chunk {
    pub bytes: Vec<u8>,
    pub chunk_idx: usize,
    pub num_chunks: usize,
}

/// Splits `input` into chunks of at most `max_chars` UTF-8 *characters*
/// each, never splitting a codepoint, and invokes `emit` once per chunk in
/// ascending order. `num_chunks` is known to every invocation of `emit`
/// because this function makes one pass over `input`'s char boundaries
/// before emitting anything.
///
/// Empty input yields zero chunks. `max_chars` must be at least 1.
pub fn chunk_utf8(input: &str, max_chars: usize, mut emit: impl FnMut(Utf8Chunk)) {
    assert!(max_chars > 0, "max_chars must be at least 1");

    if input.is_empty() {
        return;
    }

    // One pass over char boundaries to know the chunk count up front.
    let char_count = input.chars().count();
    let num_chunks = char_count.div_ceil(max_chars);

    let mut char_indices = input.char_indices().peekable();
    let mut chunk_idx = 0;
    while char_indices.peek().is_some() {
        let start = char_indices.peek().unwrap().0;
        let mut end = input.len();
        for _ in 0..max_chars {
            match char_indices.next() {
                Some((idx, ch)) => end = idx + ch.len_utf8(),
                None => break,
            }
        }
        emit(Utf8Chunk {
            bytes: input[start..end].as_bytes().to_vec(),
            chunk_idx,
            num_chunks,
        });
        chunk_idx += 1;
    }
}

/// Convenience wrapper that collects all chunks instead of using a callback.
pub fn chunk_utf8_vec(input: &str, max_chars: usize) -> Vec<Utf8Chunk> {
    let mut out = Vec::new();
    chunk_utf8(input, max_chars, |c| out.push(c));
    out
}
