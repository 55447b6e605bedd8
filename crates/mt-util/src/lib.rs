//! Common utilities shared by the control-plane crates: id issuing, an
//! ordered fixed-capacity circular queue, and chunked UTF-8 streaming.

mod chunked_utf8;
mod circular_queue;
mod id_manager;

pub use chunked_utf8::{chunk_utf8, Utf8Chunk};
pub use circular_queue::CircularQueue;
pub use id_manager::IdManager;
