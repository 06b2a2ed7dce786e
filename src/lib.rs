pub mod checkpoint;
pub mod config;
pub mod error;
pub mod feed;

pub mod kafka;

pub use config::Config;
pub use error::{Error, Result};
pub use feed::{CheckpointCommit, ListenerContext};
pub use kafka::Producer;
