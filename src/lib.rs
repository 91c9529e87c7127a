//! krait - a lightweight JavaScript runtime with Web Workers
//!
//! krait combines:
//! - Boa: ECMAScript engine written in Rust
//! - boa_runtime: console support for scripts
//! - An HTML5-style Worker model: one OS thread and one engine context per
//!   worker, JSON-copied messages over refcounted ports, and a collection
//!   rendezvous that reclaims idle worker subtrees

pub mod runtime;

// Re-export commonly used types
pub use runtime::{Runtime, RuntimeConfig, RuntimeError, RuntimeResult};
