//! Hole-preserving file copy
//!
//! Blocks that read back as all zeroes are skipped with a seek instead of
//! being written, so they become holes in the destination. This matches
//! `cp --sparse=always`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Granularity at which zero runs are detected.
const BLOCK_SIZE: usize = 4096;

/// Copy `src` into `dst`, leaving zeroed blocks unallocated.
///
/// Returns the number of bytes copied. `dst` ends up exactly as long as
/// the data read, including a trailing hole.
pub fn copy_sparse(src: &mut impl Read, dst: &mut File) -> io::Result<u64> {
    let mut buf = vec![0u8; 64 * BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for block in buf[..n].chunks(BLOCK_SIZE) {
            if block.iter().all(|&b| b == 0) {
                dst.seek(SeekFrom::Current(block.len() as i64))?;
            } else {
                dst.write_all(block)?;
            }
        }
        total += n as u64;
    }
    // Seeking past the end does not extend the file
    dst.set_len(total)?;
    Ok(total)
}
