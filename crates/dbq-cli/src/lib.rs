//! Library side of the `dbq` binary: subcommands, built-in handlers and the
//! signal bridge, so other binaries can embed them.

pub mod builtins;
pub mod commands;
pub mod context;
pub mod output;
pub mod signals;
