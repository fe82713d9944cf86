/// Backend submodules for the session side of the client
///
/// - `services`: traits for history, send and live transport, plus in-memory versions
/// - `connection`: TCP live transport
/// - `handlers`: action routing, live event routing and the send task
/// - `main_loop`: runtime setup and the session event loop
mod connection;
mod handlers;
mod main_loop;
mod services;

pub use connection::{parse_frame, TcpTransport};
pub use main_loop::{run_backend, run_session};
pub use services::{
    ChannelFeed, ChannelTransport, HistorySource, LiveEvent, LiveTransport, MemoryHistory,
    MemorySender, MessageSender, ScriptedSend, Services,
};
