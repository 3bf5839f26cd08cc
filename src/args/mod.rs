//! CLI argument types and parsing helpers.
mod cli;
mod defaults;
pub(crate) mod parsers;
mod types;

#[cfg(test)]
mod tests;

pub use cli::ServerArgs;
pub use types::PositiveUsize;

pub(crate) use defaults::DEFAULT_CONFIG_FILES;
pub(crate) use parsers::parse_listen_addr;
