//! 256-bit Merkle-tree strong hash (BLAKE3, hash mode), implemented in-crate.
//!
//! # Construction
//!
//! Input is cut into 1 KiB chunks; every chunk is compressed block by block
//! (64 B blocks) starting from the fixed IV.  The chaining value of the last
//! block is the chunk's CV.  Chunk CVs are merged into a binary tree with
//! parent compressions; the final node is compressed with the `ROOT` flag and
//! its first eight words, serialized little-endian, form the digest.
//!
//! | Flag | Bit | Set on |
//! |------|-----|--------|
//! | `CHUNK_START` | 0 | first block of a chunk |
//! | `CHUNK_END`   | 1 | last block of a chunk |
//! | `PARENT`      | 2 | every parent node |
//! | `ROOT`        | 3 | the single final compression |
//!
//! # Merkle stack
//!
//! Completed subtrees live on an explicit stack of chaining values.  When a
//! chunk completes *and more input follows*, its CV is pushed and the stack
//! is folded once for every trailing zero bit in the running chunk count.
//! The last chunk is never pushed eagerly: it stays in the chunk state until
//! `finalize`, which then folds the stack right-to-left and sets `ROOT` only
//! on the very last compression.  This keeps the digest identical to the
//! reference for inputs that are an exact power-of-two number of chunks.

use std::io;

/// Output length in bytes.
pub const OUT_LEN:   usize = 32;
/// Compression block length in bytes.
pub const BLOCK_LEN: usize = 64;
/// Chunk length in bytes.
pub const CHUNK_LEN: usize = 1024;

const CHUNK_START: u32 = 1 << 0;
const CHUNK_END:   u32 = 1 << 1;
const PARENT:      u32 = 1 << 2;
const ROOT:        u32 = 1 << 3;

const IV: [u32; 8] = [
    0x6A09_E667, 0xBB67_AE85, 0x3C6E_F372, 0xA54F_F53A,
    0x510E_527F, 0x9B05_688C, 0x1F83_D9AB, 0x5BE0_CD19,
];

const MSG_PERMUTATION: [usize; 16] = [2, 6, 3, 10, 7, 0, 4, 13, 1, 11, 12, 5, 9, 14, 15, 8];

/// Chaining value: eight little-endian words.
pub type ChainingValue = [u32; 8];

// ── Compression function ─────────────────────────────────────────────────────

#[inline(always)]
fn g(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize, mx: u32, my: u32) {
    state[a] = state[a].wrapping_add(state[b]).wrapping_add(mx);
    state[d] = (state[d] ^ state[a]).rotate_right(16);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_right(12);
    state[a] = state[a].wrapping_add(state[b]).wrapping_add(my);
    state[d] = (state[d] ^ state[a]).rotate_right(8);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_right(7);
}

#[inline(always)]
fn round(state: &mut [u32; 16], m: &[u32; 16]) {
    // Columns.
    g(state, 0, 4,  8, 12, m[0],  m[1]);
    g(state, 1, 5,  9, 13, m[2],  m[3]);
    g(state, 2, 6, 10, 14, m[4],  m[5]);
    g(state, 3, 7, 11, 15, m[6],  m[7]);
    // Diagonals.
    g(state, 0, 5, 10, 15, m[8],  m[9]);
    g(state, 1, 6, 11, 12, m[10], m[11]);
    g(state, 2, 7,  8, 13, m[12], m[13]);
    g(state, 3, 4,  9, 14, m[14], m[15]);
}

#[inline(always)]
fn permute(m: &mut [u32; 16]) {
    let mut permuted = [0u32; 16];
    for (slot, &src) in permuted.iter_mut().zip(MSG_PERMUTATION.iter()) {
        *slot = m[src];
    }
    *m = permuted;
}

/// Run the 7-round compression function and return the full 16-word state
/// after feed-forward.
fn compress(
    cv:          &ChainingValue,
    block_words: &[u32; 16],
    counter:     u64,
    block_len:   u32,
    flags:       u32,
) -> [u32; 16] {
    let mut state = [
        cv[0], cv[1], cv[2], cv[3],
        cv[4], cv[5], cv[6], cv[7],
        IV[0], IV[1], IV[2], IV[3],
        counter as u32,
        (counter >> 32) as u32,
        block_len,
        flags,
    ];
    let mut block = *block_words;

    for r in 0..7 {
        round(&mut state, &block);
        if r < 6 {
            permute(&mut block);
        }
    }

    for i in 0..8 {
        state[i]     ^= state[i + 8];
        state[i + 8] ^= cv[i];
    }
    state
}

fn first_8_words(state: [u32; 16]) -> ChainingValue {
    let mut out = [0u32; 8];
    out.copy_from_slice(&state[..8]);
    out
}

fn block_words(block: &[u8; BLOCK_LEN]) -> [u32; 16] {
    let mut words = [0u32; 16];
    for (word, bytes) in words.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    words
}

/// Serialize a chaining value as its 32-byte little-endian digest form.
pub fn cv_to_bytes(cv: &ChainingValue) -> [u8; OUT_LEN] {
    let mut out = [0u8; OUT_LEN];
    for (dst, word) in out.chunks_exact_mut(4).zip(cv.iter()) {
        dst.copy_from_slice(&word.to_le_bytes());
    }
    out
}

// ── Output node ──────────────────────────────────────────────────────────────

/// A node whose compression has been deferred until we know whether it is
/// the root.
struct Output {
    input_cv:    ChainingValue,
    block_words: [u32; 16],
    counter:     u64,
    block_len:   u32,
    flags:       u32,
}

impl Output {
    fn chaining_value(&self) -> ChainingValue {
        first_8_words(compress(
            &self.input_cv,
            &self.block_words,
            self.counter,
            self.block_len,
            self.flags,
        ))
    }

    fn root_bytes(&self) -> [u8; OUT_LEN] {
        // Root output is always taken at counter 0; 32 bytes need one block.
        let state = compress(
            &self.input_cv,
            &self.block_words,
            0,
            self.block_len,
            self.flags | ROOT,
        );
        cv_to_bytes(&first_8_words(state))
    }
}

fn parent_output(left: &ChainingValue, right: &ChainingValue) -> Output {
    let mut block_words = [0u32; 16];
    block_words[..8].copy_from_slice(left);
    block_words[8..].copy_from_slice(right);
    Output {
        input_cv: IV,
        block_words,
        counter:  0,
        block_len: BLOCK_LEN as u32,
        flags:    PARENT,
    }
}

/// Combine two child chaining values into a non-root parent CV.
pub fn parent_cv(left: &ChainingValue, right: &ChainingValue) -> ChainingValue {
    parent_output(left, right).chaining_value()
}

// ── Chunk state ──────────────────────────────────────────────────────────────

struct ChunkState {
    cv:                ChainingValue,
    chunk_counter:     u64,
    block:             [u8; BLOCK_LEN],
    block_len:         usize,
    blocks_compressed: usize,
}

impl ChunkState {
    fn new(chunk_counter: u64) -> Self {
        Self {
            cv:                IV,
            chunk_counter,
            block:             [0u8; BLOCK_LEN],
            block_len:         0,
            blocks_compressed: 0,
        }
    }

    fn len(&self) -> usize {
        BLOCK_LEN * self.blocks_compressed + self.block_len
    }

    fn start_flag(&self) -> u32 {
        if self.blocks_compressed == 0 { CHUNK_START } else { 0 }
    }

    fn update(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            // A full buffered block is only compressed once more input
            // arrives; the last block must carry CHUNK_END.
            if self.block_len == BLOCK_LEN {
                let words = block_words(&self.block);
                self.cv = first_8_words(compress(
                    &self.cv,
                    &words,
                    self.chunk_counter,
                    BLOCK_LEN as u32,
                    self.start_flag(),
                ));
                self.blocks_compressed += 1;
                self.block     = [0u8; BLOCK_LEN];
                self.block_len = 0;
            }

            let take = (BLOCK_LEN - self.block_len).min(input.len());
            self.block[self.block_len..self.block_len + take].copy_from_slice(&input[..take]);
            self.block_len += take;
            input = &input[take..];
        }
    }

    fn output(&self) -> Output {
        Output {
            input_cv:    self.cv,
            block_words: block_words(&self.block),
            counter:     self.chunk_counter,
            block_len:   self.block_len as u32,
            flags:       self.start_flag() | CHUNK_END,
        }
    }
}

// ── Hasher ───────────────────────────────────────────────────────────────────

/// Incremental strong hasher.
///
/// Feeding the same bytes in any split produces the same digest as
/// [`hash`] over the concatenation.  Implements [`io::Write`] so readers can
/// be streamed in with `io::copy`.
pub struct Hasher {
    chunk_state: ChunkState,
    cv_stack:    Vec<ChainingValue>,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            chunk_state: ChunkState::new(0),
            cv_stack:    Vec::new(),
        }
    }

    // Fold one completed subtree per trailing zero bit of `total_chunks`.
    fn add_chunk_cv(&mut self, mut new_cv: ChainingValue, mut total_chunks: u64) {
        while total_chunks & 1 == 0 {
            let left = match self.cv_stack.pop() {
                Some(cv) => cv,
                None     => break,
            };
            new_cv = parent_cv(&left, &new_cv);
            total_chunks >>= 1;
        }
        self.cv_stack.push(new_cv);
    }

    /// Absorb more input.
    pub fn update(&mut self, mut input: &[u8]) -> &mut Self {
        while !input.is_empty() {
            if self.chunk_state.len() == CHUNK_LEN {
                let chunk_cv     = self.chunk_state.output().chaining_value();
                let total_chunks = self.chunk_state.chunk_counter + 1;
                self.add_chunk_cv(chunk_cv, total_chunks);
                self.chunk_state = ChunkState::new(total_chunks);
            }

            let take = (CHUNK_LEN - self.chunk_state.len()).min(input.len());
            self.chunk_state.update(&input[..take]);
            input = &input[take..];
        }
        self
    }

    /// Produce the 32-byte digest.  The hasher may keep absorbing input
    /// afterwards; `finalize` does not consume state.
    pub fn finalize(&self) -> [u8; OUT_LEN] {
        let mut output = self.chunk_state.output();
        for left in self.cv_stack.iter().rev() {
            output = parent_output(left, &output.chaining_value());
        }
        output.root_bytes()
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One-shot strong hash.
pub fn hash(input: &[u8]) -> [u8; OUT_LEN] {
    let mut hasher = Hasher::new();
    hasher.update(input);
    hasher.finalize()
}
