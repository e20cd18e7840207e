pub mod app;
pub mod webhook;
