//! HTTP surface of the host: execution API plus reverse-proxy gateway.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌─────────────────────────────────────────────┐
//! │  Mobile  │ ───────> │  server.rs  (axum Router, HostSession)      │
//! │  client  │ <─────── │    ├─ api.rs    (execute / server / health) │
//! └──────────┘          │    └─ proxy.rs  (/proxy/{port}/* forwarding,│
//!                       │                  HTML stylesheet inlining)  │
//!                       │         │                                   │
//!                       │         │ CommandExecutor::execute()        │
//!                       │         v                                   │
//!                       │  executor.rs → supervisor.rs / ports.rs     │
//!                       └─────────────────────────────────────────────┘
//! ```
//!
//! Every handler except `/health` touches the idle governor; liveness
//! probes alone never keep the host alive.

pub mod api;
pub mod proxy;
pub mod server;

pub use server::{HostSession, ServerConfig, build_router, start_server};
