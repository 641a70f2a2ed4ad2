pub mod builtin;
pub mod registry;
pub mod repository;

pub use registry::ToolRegistry;
pub use repository::{infer_root, Repository, FALLBACK_ROOT};
