//! Logical chunk extraction: nine chunk kinds with context bundles and
//! stable content hashes.

pub mod chunker;
pub mod normalize;

pub use chunker::Chunker;
pub use chunker::ChunkingResult;
pub use chunker::DEFAULT_LARGE_CHUNK_THRESHOLD;
pub use chunker::LargeChunkEvent;
pub use normalize::chunk_hash;
pub use normalize::normalize;
