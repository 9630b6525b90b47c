pub mod compress;
pub mod context;
pub mod handler;
pub mod static_files;

pub use handler::dispatch;
