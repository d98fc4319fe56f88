//! Synchronous concurrent I/O fabric: typed streams over pipes, files and
//! sockets; a splice engine; line/printf helpers; TCP/UDP servers; a
//! managed child process; and the mutex/rwlock/monitor/thread/pool
//! synchronization primitives built on top of them.

#![deny(clippy::correctness)]
#![warn(
    clippy::perf,
    clippy::complexity,
    clippy::style,
    clippy::clone_on_ref_ptr,
    clippy::float_cmp_const,
    clippy::multiple_inherent_impl,
    clippy::unwrap_used,
    clippy::cargo_common_metadata,
    clippy::used_underscore_binding
)]

pub mod addr;
pub mod allocator;
pub mod blob;
pub mod error;
pub mod fd_util;
pub mod file_stream;
pub mod line;
pub mod pipe_stream;
pub mod pool;
pub mod process;
pub mod socket_stream;
pub mod splice;
pub mod stream;
pub mod sync;
pub mod tcp_server;
pub mod transform;
pub mod udp_server;

pub use addr::{AddrBits, Net, NetAddr, ProtoHint, Transport};
pub use blob::Blob;
pub use error::{ErrorCode, Result};
pub use stream::{SocketQuery, Stream, StreamType};
