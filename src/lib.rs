#![forbid(unsafe_code)]
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod event;
pub mod network;
pub mod piece;
pub mod player;
pub mod server;
