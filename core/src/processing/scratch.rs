use num_complex::Complex32;
use rustfft::num_traits::Zero;

/// Reusable work buffer that only ever grows.
///
/// Hot paths call [`ScratchBuffer::prepare`] once per frame; after the first
/// frame of a given shape no further allocation happens.
#[derive(Debug, Default, Clone)]
pub struct ScratchBuffer {
    buffer: Vec<Complex32>,
}

impl ScratchBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Returns a zeroed slice of exactly `len` samples.
    pub fn prepare(&mut self, len: usize) -> &mut [Complex32] {
        if self.buffer.len() < len {
            self.buffer.resize(len, Complex32::zero());
        }
        let slice = &mut self.buffer[..len];
        slice.fill(Complex32::zero());
        slice
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn release(&mut self) {
        self.buffer = Vec::new();
    }
}

/// Work areas for one block convolution: the zero-padded input staging and
/// the per-block spectra.
#[derive(Debug, Default, Clone)]
pub struct ConvolutionScratch {
    pub(crate) input: ScratchBuffer,
    pub(crate) blocks: ScratchBuffer,
}

impl ConvolutionScratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.input.capacity() + self.blocks.capacity()
    }
}
