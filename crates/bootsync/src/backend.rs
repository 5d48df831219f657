pub mod alsa;
pub mod memory;

pub use self::alsa::AlsaBackend;
pub use memory::MemoryBackend;
