//! Helper utilities, macros, and shared plumbing.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;

pub use error::ChainKvError;

pub(crate) use safetcp::{
    recv_msg, send_msg, tcp_bind_with_retry, tcp_connect_with_retry,
    LEN_HEADER_WIDTH,
};
