//! Segment payload generation.
//!
//! A segment stands in for a chunk of video: random bytes sized so that
//! downloading it in [`params::ELAPSED_TARGET`] seconds emulates a given
//! bitrate. Requested sizes are clamped into [`params::MIN_SIZE`] ..=
//! [`params::MAX_SIZE`].

use bytes::Bytes;
use rand::RngCore;

use crate::error::Result;
use crate::params;

/// Source of segment bytes.
pub trait SegmentSource: Send + Sync {
    /// Fill `buf` entirely.
    fn fill(&self, buf: &mut [u8]) -> Result<()>;
}

/// Fills segments with bytes from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSegments;

impl SegmentSource for RandomSegments {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        rand::rng().fill_bytes(buf);
        Ok(())
    }
}

/// Clamp a requested byte count into the range the server is willing to send.
pub fn clamp_size(requested: i64) -> usize {
    if requested < params::MIN_SIZE as i64 {
        params::MIN_SIZE
    } else if requested > params::MAX_SIZE as i64 {
        params::MAX_SIZE
    } else {
        requested as usize
    }
}

/// Generate a segment of (clamped) `requested` bytes.
///
/// The length of the returned buffer is the authoritative segment size.
pub fn generate(source: &dyn SegmentSource, requested: i64) -> Result<Bytes> {
    let mut data = vec![0u8; clamp_size(requested)];
    source.fill(&mut data)?;
    Ok(Bytes::from(data))
}
