pub mod bash;
pub mod documents;

pub use bash::BashTool;
pub use documents::{AddDocumentTool, DeleteDocumentTool, UpdateDocumentTool, ViewDocumentTool};
