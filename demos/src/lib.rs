//! # Rivet Demos
//!
//! Example servers built with the rivet crates.
//!
//! ## Running Examples
//!
//! ```bash
//! cargo run --example echo_server -- --debug
//! cargo run --example chat_server -- --port 8080 --threads 4
//! ```
//!
//! Then connect with `nc 127.0.0.1 8080` from another shell.

#![warn(rust_2018_idioms)]

pub mod helpers;
