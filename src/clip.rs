//! The static PCM source and the gain transform applied while streaming.
//!
//! A clip is a raw, headerless sample buffer baked into the binary
//! (`include_bytes!` or a linker-placed asset). One source byte becomes one
//! output sample, widened to the peripheral word size with a fixed left-shift
//! gain. Sample rate and width must match the amplifier configuration; that
//! is a build-time contract, not checked here.

/// Immutable PCM source, addressed start to end-exclusive. Shared by all
/// playback sessions, never mutated.
#[derive(Clone, Copy)]
pub struct PcmClip {
    data: &'static [u8],
}

impl PcmClip {
    pub const fn new(data: &'static [u8]) -> Self {
        Self { data }
    }

    /// Length in source bytes (= output samples).
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn bytes(&self) -> &'static [u8] {
        self.data
    }
}

/// Fixed playback gain, applied as a left shift of each 8-bit source sample
/// into the 16-bit output word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Gain {
    /// 6-bit shift: loud but clear.
    Clear = 6,
    /// 7-bit shift: maximal amplitude, audibly distorted on most drivers.
    Max = 7,
}

impl Gain {
    #[inline]
    pub const fn shift(self) -> u8 {
        self as u8
    }
}

/// Fill `buf` with one window of output samples starting at byte `offset`.
///
/// Returns the number of samples produced: the window length, or the source
/// remainder for the final partial window. The caller advances its offset by
/// the return value, so streaming a clip of `len` bytes in windows of `chunk`
/// samples performs exactly `len.div_ceil(chunk)` writes and emits every
/// trailing byte (no zero padding, no dropped tail).
pub(crate) fn fill_window(clip: &PcmClip, offset: usize, gain: Gain, buf: &mut [u16]) -> usize {
    let src = clip.bytes();
    if offset >= src.len() {
        return 0;
    }
    let n = buf.len().min(src.len() - offset);
    for (out, &byte) in buf[..n].iter_mut().zip(&src[offset..offset + n]) {
        *out = (byte as u16) << gain.shift();
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    static SRC: [u8; 10] = [0, 1, 2, 3, 4, 5, 250, 251, 252, 255];

    #[test]
    fn fill_applies_gain_shift() {
        let clip = PcmClip::new(&SRC);
        let mut buf = [0u16; 4];

        let n = fill_window(&clip, 0, Gain::Clear, &mut buf);
        assert_eq!(n, 4);
        assert_eq!(buf, [0 << 6, 1 << 6, 2 << 6, 3 << 6]);

        let n = fill_window(&clip, 6, Gain::Max, &mut buf);
        assert_eq!(n, 4);
        assert_eq!(buf, [250 << 7, 251 << 7, 252 << 7, 255 << 7]);
    }

    #[test]
    fn max_gain_stays_in_u16() {
        let clip = PcmClip::new(&[255]);
        let mut buf = [0u16; 1];
        fill_window(&clip, 0, Gain::Max, &mut buf);
        assert_eq!(buf[0], 32640); // 255 << 7, no wrap
    }

    #[test]
    fn final_window_is_exact_remainder() {
        let clip = PcmClip::new(&SRC);
        let mut buf = [0xAAAAu16; 4];
        let n = fill_window(&clip, 8, Gain::Clear, &mut buf);
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[252 << 6, 255 << 6]);
        // Beyond the remainder the buffer is untouched; the engine only
        // writes the first `n` samples out.
        assert_eq!(buf[2], 0xAAAA);
    }

    #[test]
    fn window_count_is_ceil_of_len_over_chunk() {
        let clip = PcmClip::new(&SRC);
        let mut buf = [0u16; 4];
        let mut offset = 0;
        let mut windows = 0;
        loop {
            let n = fill_window(&clip, offset, Gain::Clear, &mut buf);
            if n == 0 {
                break;
            }
            offset += n;
            windows += 1;
        }
        assert_eq!(windows, SRC.len().div_ceil(4));
        assert_eq!(offset, SRC.len());
    }

    #[test]
    fn empty_clip_fills_nothing() {
        let clip = PcmClip::new(&[]);
        let mut buf = [0u16; 4];
        assert_eq!(fill_window(&clip, 0, Gain::Clear, &mut buf), 0);
        assert!(clip.is_empty());
    }
}
