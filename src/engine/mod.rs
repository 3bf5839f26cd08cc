//! Engine process supervision and output decoding.
mod command;
mod framer;
mod parser;
mod runner;

#[cfg(test)]
mod tests;

pub use command::{
    ENGINE_ENV, EngineCommand, build_command, error_rate_expression, latency_expression,
};
pub use framer::{LineFramer, MAX_LINE_BYTES};
pub use parser::OutputParser;
pub use runner::{EngineRunner, ExitKind, ExitOutcome, ProcessEvent, ProcessHandle, RunnerSettings};
