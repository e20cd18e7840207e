//! Integration tests for relhook

mod support;
mod test_dispatcher;
mod test_server;
