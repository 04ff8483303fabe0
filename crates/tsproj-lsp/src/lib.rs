pub mod config;
pub mod file_watcher;
pub mod project;
pub mod server;
pub mod service;
mod test_utils;

// Re-export commonly used types
pub use config::ServiceConfig;
pub use server::Backend;
pub use service::ProjectService;
