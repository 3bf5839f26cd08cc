mod app;
mod config;
mod engine;
mod metrics;
mod parse;
mod report;
mod script;
mod server;
mod session;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use engine::EngineError;
pub use metrics::MetricsError;
pub use parse::ParseError;
pub use report::ReportError;
pub use script::ScriptError;
pub use server::ServerError;
pub use session::SessionError;
pub use validation::ValidationError;
