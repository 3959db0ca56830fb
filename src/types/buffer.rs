//! Buffer usage flags.

use bitflags::bitflags;

bitflags! {
    /// How a buffer is going to be used. Also selects its memory location.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        /// Content is rewritten often from the CPU.
        const DYNAMIC = 1 << 0;
        const TRANSFER_SRC = 1 << 1;
        const TRANSFER_DST = 1 << 2;
        const UNIFORM = 1 << 3;
        const STORAGE = 1 << 4;
        const INDEX = 1 << 5;
        const VERTEX = 1 << 6;
        /// Host-visible, read back by the CPU.
        const MAP_READ = 1 << 7;
        /// Host-visible, written by the CPU.
        const MAP_WRITE = 1 << 8;
    }
}

impl BufferUsage {
    /// Whether the buffer lives in host-visible memory.
    pub fn is_host_visible(self) -> bool {
        self.intersects(Self::MAP_READ | Self::MAP_WRITE | Self::DYNAMIC)
    }
}
