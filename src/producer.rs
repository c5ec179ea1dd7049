// -------------------------------------------------------------------------------------------------

/// Number of output samples in a single [`AudioFrame`].
pub const FRAME_SIZE: usize = 128;

/// A fixed-size block of mono, 16 bit linear output samples.
pub type AudioFrame = [i16; FRAME_SIZE];

// -------------------------------------------------------------------------------------------------

/// Types that produce fixed-size blocks of audio at a fixed block cadence. `Send`able across
/// threads, so they can be moved into the host's audio thread.
///
/// A host's block scheduler calls `produce_frame` once per block period for each producer and
/// mixes the returned frames into its output bus.
pub trait FrameProducer: Send + 'static {
    /// Produce the next frame of output. Returns `None` when the producer currently is silent.
    /// Must never block and should not allocate.
    fn produce_frame(&mut self) -> Option<AudioFrame>;

    /// Returns true as long as the producer is (or will be) producing frames.
    fn is_playing(&self) -> bool;
}
