//! Built-in collector kinds and their collector-bound steps.

pub mod http;
pub mod terraform;
