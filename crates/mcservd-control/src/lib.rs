//! Control socket: the local IPC surface of the daemon.
//!
//! External callers connect to a unix socket, send one length-prefixed JSON
//! request `[method, ...args]`, and receive one JSON reply `[true, ...]` or
//! `[false, null, description]`. Dispatch goes through a fixed allow-list
//! of supervisor operations; the server itself holds no locks and lets the
//! supervisor's own locking serialize concurrent calls.

mod client;
mod method;
mod server;
mod wire;

pub use client::{ControlClientError, send_request};
pub use method::Method;
pub use server::{ControlError, ControlServer};
pub use wire::{ControlWireError, MAX_REQUEST_LEN};
