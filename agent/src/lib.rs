//! relhook library
//!
//! Webhook-triggered deploys: signature verification, event dispatch and a
//! single-flight deploy sequencer per app.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod utils;
