pub mod config;
pub mod context;
pub mod dictionary;
pub mod kernel;
pub mod resolve;
pub mod services;

pub use config::Config;
pub use kernel::reactor::Reactor;
