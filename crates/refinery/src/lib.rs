//! Refinery - merge queue coordination for worker rigs
//!
//! The binary drives `refinery-core`: `mq` subcommands for operators,
//! `run` for the long-lived queue processor.

pub mod cli;
pub mod commands;
