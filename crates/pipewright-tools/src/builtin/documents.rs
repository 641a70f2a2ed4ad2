use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::RunState;
use pipewright_core::traits::Tool;
use pipewright_core::types::ToolOutcome;

#[derive(Deserialize)]
struct NameInput {
    document_name: String,
}

#[derive(Deserialize)]
struct ContentInput {
    document_name: String,
    content: String,
}

fn parse<T: for<'de> Deserialize<'de>>(input: serde_json::Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| PipewrightError::ToolValidation(e.to_string()))
}

fn name_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "document_name": {
                "type": "string",
                "description": "Document name, or a file path inside the generated code"
            }
        },
        "required": ["document_name"]
    })
}

fn content_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "document_name": {
                "type": "string",
                "description": "Document name, or a file path inside the generated code"
            },
            "content": {
                "type": "string",
                "description": "Full new content of the document"
            }
        },
        "required": ["document_name", "content"]
    })
}

/// Read a document for review.
pub struct ViewDocumentTool;

impl Tool for ViewDocumentTool {
    fn name(&self) -> &str {
        "view_document"
    }

    fn description(&self) -> &str {
        "Retrieve a document or generated source file for inspection."
    }

    fn input_schema(&self) -> serde_json::Value {
        name_schema()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<ToolOutcome>> {
        Box::pin(async move {
            let params: NameInput = parse(input)?;
            Ok(match state.find_document(&params.document_name) {
                Some(content) => ToolOutcome::Done(content.to_string()),
                None => ToolOutcome::NotFound(params.document_name),
            })
        })
    }
}

/// Replace the content of an existing document.
pub struct UpdateDocumentTool;

impl Tool for UpdateDocumentTool {
    fn name(&self) -> &str {
        "update_document"
    }

    fn description(&self) -> &str {
        "Replace the content of an existing document or generated source file."
    }

    fn input_schema(&self) -> serde_json::Value {
        content_schema()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<ToolOutcome>> {
        Box::pin(async move {
            let params: ContentInput = parse(input)?;
            if state.update_document(&params.document_name, params.content) {
                debug!(document = %params.document_name, "Document updated");
                Ok(ToolOutcome::Done(format!("updated {}", params.document_name)))
            } else {
                Ok(ToolOutcome::NotFound(params.document_name))
            }
        })
    }
}

/// Create a new text document, or overwrite a text document with the same name.
pub struct AddDocumentTool;

impl Tool for AddDocumentTool {
    fn name(&self) -> &str {
        "add_document"
    }

    fn description(&self) -> &str {
        "Add a new document to the run."
    }

    fn input_schema(&self) -> serde_json::Value {
        content_schema()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<ToolOutcome>> {
        Box::pin(async move {
            let params: ContentInput = parse(input)?;
            if state
                .get_document(&params.document_name)
                .and_then(|doc| doc.as_files())
                .is_some()
            {
                return Ok(ToolOutcome::Failed(format!(
                    "{} is a file map; edit its files by path",
                    params.document_name
                )));
            }
            let changed = state.add_document(params.document_name.clone(), params.content);
            Ok(ToolOutcome::Done(if changed {
                format!("added {}", params.document_name)
            } else {
                format!("{} unchanged", params.document_name)
            }))
        })
    }
}

/// Remove a document or generated source file.
pub struct DeleteDocumentTool;

impl Tool for DeleteDocumentTool {
    fn name(&self) -> &str {
        "delete_document"
    }

    fn description(&self) -> &str {
        "Delete a document or generated source file from the run."
    }

    fn input_schema(&self) -> serde_json::Value {
        name_schema()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<ToolOutcome>> {
        Box::pin(async move {
            let params: NameInput = parse(input)?;
            if state.remove_document(&params.document_name) {
                Ok(ToolOutcome::Done(format!("deleted {}", params.document_name)))
            } else {
                Ok(ToolOutcome::NotFound(params.document_name))
            }
        })
    }
}
