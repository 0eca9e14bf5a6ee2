//! Built-in isolation levels, weakest first.

pub mod almost_full;
pub mod blob_exclusive;
pub mod file_exclusive;
pub mod full;
pub mod unsafe_level;

pub use almost_full::AlmostFull;
pub use blob_exclusive::BlobExclusive;
pub use file_exclusive::FileExclusive;
pub use full::Full;
pub use unsafe_level::Unsafe;
