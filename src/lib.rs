pub mod classify;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod idle;
pub mod ports;
pub mod supervisor;
pub mod workdir;
