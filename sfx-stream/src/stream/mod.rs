//! Source streams and asynchronous packet reading

pub mod packet;
pub mod packet_stream;
pub mod reader_pool;
pub mod source_stream;

pub use packet::Packet;
pub use packet_stream::{PacketStream, PacketStreamConfig, StreamId, StreamNotice};
pub use reader_pool::{ReaderPool, ReaderPoolHandle};
pub use source_stream::{MemoryStream, SourceStream, StreamProvider, ToneStream};
