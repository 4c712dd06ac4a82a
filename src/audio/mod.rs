pub mod capture;
pub mod chunk;
pub mod processing;
pub mod source;

pub use capture::CpalAudioSource;
pub use chunk::{AudioChunk, AudioLevel, DB_FLOOR};
pub use source::{AudioSource, ChunkSink, FeedSource, SamplingConfig, StreamHandle, StreamState};
