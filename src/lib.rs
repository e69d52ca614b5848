//! Controller-side core of the UBNT/Ubiquiti inform protocol: wire codec,
//! reconcile engine, per-device state tree, and command queue. The HTTP
//! adapter (`server`) and binary entrypoint are thin wiring over these.

pub mod codec;
pub mod config;
pub mod control;
pub mod crypto;
pub mod devicekeys;
pub mod keybag;
pub mod message;
pub mod queue;
pub mod reconcile;
pub mod server;
pub mod state;
