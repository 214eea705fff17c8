//! Adaptive block compression.
//!
//! The write path tries to shrink every block with LZ4, but skips the work
//! when it cannot pay off (the payload already carries a compressed-format
//! magic) or when the machine is busy (1-minute load average above the
//! threshold). Whatever lane is taken, the stored bytes round-trip:
//! `decompress(compress(x), x.len()) == x`.

use crate::sys::BLOCK_SIZE;

/// Leading magics of formats that are already compressed; spending LZ4
/// cycles on these loses.
const COMPRESSED_MAGICS: &[&[u8]] = &[
    // JPEG
    &[0xff, 0xd8, 0xff],
    // PNG
    &[0x89, 0x50, 0x4e, 0x47],
    // ZIP
    &[0x50, 0x4b, 0x03, 0x04],
    // gzip
    &[0x1f, 0x8b],
];

/// 1-minute load average above which the write path stores blocks verbatim
/// instead of compressing.
const LOAD_SKIP_THRESHOLD: f64 = 2.0;

/// How a block should be treated by [`compress_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the block through LZ4, keeping the input when LZ4 does not win.
    Default,
    /// Store the input verbatim.
    Skip,
}

/// True when the payload starts with a known compressed-format magic.
pub fn looks_compressed(data: &[u8]) -> bool {
    COMPRESSED_MAGICS
        .iter()
        .any(|magic| data.len() >= magic.len() && &data[..magic.len()] == *magic)
}

fn load_average_1m() -> Option<f64> {
    let mut avg = [0_f64; 1];
    let got = unsafe { libc::getloadavg(avg.as_mut_ptr(), 1) };
    if got == 1 {
        Some(avg[0])
    } else {
        None
    }
}

/// Pick the lane for a payload: skip for already-compressed content and for
/// busy machines, LZ4 otherwise.
pub fn choose_mode(data: &[u8]) -> Mode {
    if looks_compressed(data) {
        return Mode::Skip;
    }
    match load_average_1m() {
        Some(load) if load > LOAD_SKIP_THRESHOLD => Mode::Skip,
        _ => Mode::Default,
    }
}

/// Compress a payload, choosing the lane from its content and the current
/// system load.
pub fn compress(data: &[u8]) -> Vec<u8> {
    compress_with(data, choose_mode(data))
}

/// Compress a payload on an explicit lane. Never returns more bytes than it
/// was given: a compression "win" of zero or less stores the input verbatim.
pub fn compress_with(data: &[u8], mode: Mode) -> Vec<u8> {
    match mode {
        Mode::Skip => data.to_vec(),
        Mode::Default => {
            let compressed = lz4_flex::block::compress(data);
            if compressed.len() >= data.len() {
                data.to_vec()
            } else {
                compressed
            }
        }
    }
}

/// Safe decompression into at most `max_out` bytes. Input that is not valid
/// LZ4 is assumed to be a verbatim-stored block and is copied through,
/// which absorbs both skip lanes of [`compress_with`].
pub fn decompress(data: &[u8], max_out: usize) -> Vec<u8> {
    match lz4_flex::block::decompress(data, max_out.max(BLOCK_SIZE)) {
        Ok(mut out) => {
            out.truncate(max_out);
            out
        }
        Err(_) => data[..data.len().min(max_out)].to_vec(),
    }
}
