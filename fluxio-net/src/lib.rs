//! TCP networking on top of [`fluxio_core`]'s reactor: a multi-threaded server and a
//! single-connection client, both built from the same [`Connection`] state machine.

mod acceptor;
mod client;
mod connection;
mod context;
mod error;
mod inet_addr;
mod server;
mod thread_pool;

pub use acceptor::Acceptor;
pub use client::Client;
pub use connection::{
    CloseCallback, ConnState, ConnectCallback, Connection, ConnectionHandle, MessageCallback, Role,
    WriteCompleteCallback,
};
pub use context::Context;
pub use error::NetError;
pub use inet_addr::InetAddr;
pub use server::Server;
pub use thread_pool::{IoThread, ThreadPool};
