//! Deployment pipeline

pub mod git;
pub mod runner;
pub mod sequencer;
