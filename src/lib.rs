pub mod backend;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod props;
pub mod protocol;
pub mod restriction;
pub mod rowset;
pub mod session;

pub use backend::{MemoryBackend, SearchBackend};
pub use client::SearchClient;
pub use command::Command;
pub use dispatch::Dispatcher;
