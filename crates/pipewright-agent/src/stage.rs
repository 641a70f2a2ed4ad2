//! The five production stages and the documents they read and write.

use std::fmt;

use serde::{Deserialize, Serialize};

use pipewright_core::error::Result;
use pipewright_core::state::RunState;
use pipewright_core::types::{Field, FieldKind, Message, Shape};

/// Declarative description of one approval-gated stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Approval key and log name.
    pub name: String,
    /// Fields the generator must produce.
    pub shape: Shape,
    /// Criteria the judge decides individually.
    pub criteria: Vec<String>,
    /// Documents rendered into the production prompt.
    pub inputs: Vec<String>,
    /// Documents rendered into the review prompt.
    pub review_inputs: Vec<String>,
    /// Generated fields recorded as messages rather than documents.
    pub status_fields: Vec<String>,
    pub instructions: String,
    pub review_instructions: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn render_documents(keys: &[String], state: &RunState) -> Result<String> {
    let mut sections = Vec::with_capacity(keys.len());
    for key in keys {
        sections.push(format!("## {}\n{}", key, state.document(key)?.render()));
    }
    Ok(sections.join("\n\n"))
}

impl StageSpec {
    pub fn is_status_field(&self, field: &str) -> bool {
        self.status_fields.iter().any(|f| f == field)
    }

    /// Prompt for the generator. Rejection feedback, when present, is
    /// appended as the final turn.
    pub fn production_prompt(&self, state: &RunState, feedback: Option<&str>) -> Result<Vec<Message>> {
        let mut prompt = vec![
            Message::system(self.instructions.clone()),
            Message::user(render_documents(&self.inputs, state)?),
        ];
        if let Some(feedback) = feedback {
            prompt.push(Message::user(format!(
                "The previous {} was rejected. Reviewer feedback:\n{}",
                self.name, feedback
            )));
        }
        Ok(prompt)
    }

    pub fn review_prompt(&self, state: &RunState) -> Result<Vec<Message>> {
        Ok(vec![
            Message::system(self.review_instructions.clone()),
            Message::user(render_documents(&self.review_inputs, state)?),
        ])
    }
}

/// The stages of the production pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Design,
    Setup,
    Implementation,
    AcceptanceTests,
    UnitTests,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Design,
        Stage::Setup,
        Stage::Implementation,
        Stage::AcceptanceTests,
        Stage::UnitTests,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Design => "design",
            Stage::Setup => "setup",
            Stage::Implementation => "implementation",
            Stage::AcceptanceTests => "acceptance_tests",
            Stage::UnitTests => "unit_tests",
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Design => Some(Stage::Setup),
            Stage::Setup => Some(Stage::Implementation),
            Stage::Implementation => Some(Stage::AcceptanceTests),
            Stage::AcceptanceTests => Some(Stage::UnitTests),
            Stage::UnitTests => None,
        }
    }

    pub fn spec(&self) -> StageSpec {
        match self {
            Stage::Design => StageSpec {
                name: self.name().to_string(),
                shape: Shape::new(vec![
                    Field::new("UML_class", FieldKind::Text, "UML class diagram using mermaid syntax"),
                    Field::new(
                        "UML_sequence",
                        FieldKind::Text,
                        "UML sequence diagram using mermaid syntax",
                    ),
                    Field::new(
                        "architecture_design",
                        FieldKind::Text,
                        "Architecture design as a text-based representation of the file tree",
                    ),
                ]),
                criteria: strings(&["UML_class", "UML_sequence", "architecture_design"]),
                inputs: strings(&["PRD"]),
                review_inputs: strings(&["PRD", "UML_class", "UML_sequence", "architecture_design"]),
                status_fields: Vec::new(),
                instructions: "You are a software architect. Based on the product requirements \
                    document, produce a UML class diagram, a UML sequence diagram, and an \
                    architecture design describing the project's file tree."
                    .to_string(),
                review_instructions: "You are reviewing a software design against its product \
                    requirements document. Decide for each design document whether it is \
                    complete and consistent with the requirements."
                    .to_string(),
            },
            Stage::Setup => StageSpec {
                name: self.name().to_string(),
                shape: Shape::new(vec![
                    Field::new(
                        "requirements",
                        FieldKind::Text,
                        "All expected dependencies, written as the content of requirements.txt",
                    ),
                    Field::new(
                        "setup_message",
                        FieldKind::Text,
                        "Message confirming that the environment has been set up",
                    ),
                ]),
                criteria: strings(&["requirements"]),
                inputs: strings(&["architecture_design", "UML_class"]),
                review_inputs: strings(&["architecture_design", "requirements"]),
                status_fields: strings(&["setup_message"]),
                instructions: "You are setting up a Python project. Based on the design, list \
                    every dependency the implementation and its tests will need."
                    .to_string(),
                review_instructions: "You are reviewing a requirements.txt file. Decide whether \
                    it covers every dependency the design needs, including the test runner."
                    .to_string(),
            },
            Stage::Implementation => StageSpec {
                name: self.name().to_string(),
                shape: Shape::new(vec![
                    Field::new(
                        "code",
                        FieldKind::Files,
                        "Mapping of file path to file content for the implemented functionality",
                    ),
                    Field::new(
                        "implementation_message",
                        FieldKind::Text,
                        "Message confirming the implementation has been completed",
                    ),
                ]),
                criteria: strings(&["implementation"]),
                inputs: strings(&[
                    "PRD",
                    "UML_class",
                    "UML_sequence",
                    "architecture_design",
                    "requirements",
                ]),
                review_inputs: strings(&["architecture_design", "code"]),
                status_fields: strings(&["implementation_message"]),
                instructions: "You are a software engineer. Implement the design in Python. \
                    Follow the architecture's file tree exactly and use only the listed \
                    requirements."
                    .to_string(),
                review_instructions: "You are reviewing an implementation against its \
                    architecture design. Decide whether every file exists and the code is \
                    complete."
                    .to_string(),
            },
            Stage::AcceptanceTests => StageSpec {
                name: self.name().to_string(),
                shape: Shape::new(vec![
                    Field::new(
                        "acceptance_tests",
                        FieldKind::Files,
                        "Mapping of test file name to pytest acceptance tests covering the PRD",
                    ),
                    Field::new("command", FieldKind::Text, "The command to run the acceptance tests"),
                    Field::new(
                        "acceptance_message",
                        FieldKind::Text,
                        "Message confirming whether acceptance criteria were met",
                    ),
                ]),
                criteria: strings(&["acceptance_tests"]),
                inputs: strings(&["PRD", "architecture_design", "code"]),
                review_inputs: strings(&["PRD", "acceptance_tests", "command"]),
                status_fields: strings(&["acceptance_message"]),
                instructions: "You are a QA engineer. Write acceptance tests that exercise every \
                    feature in the product requirements document against the implementation."
                    .to_string(),
                review_instructions: "You are reviewing acceptance tests. Decide whether they \
                    cover every feature in the product requirements document."
                    .to_string(),
            },
            Stage::UnitTests => StageSpec {
                name: self.name().to_string(),
                shape: Shape::new(vec![
                    Field::new(
                        "unit_tests",
                        FieldKind::Files,
                        "Mapping of test file name to pytest unit tests for the implementation",
                    ),
                    Field::new(
                        "unit_test_message",
                        FieldKind::Text,
                        "Message confirming whether unit tests passed",
                    ),
                ]),
                criteria: strings(&["unit_tests"]),
                inputs: strings(&["architecture_design", "code"]),
                review_inputs: strings(&["code", "unit_tests"]),
                status_fields: strings(&["unit_test_message"]),
                instructions: "You are a software engineer. Write unit tests for every module of \
                    the implementation."
                    .to_string(),
                review_instructions: "You are reviewing unit tests. Decide whether every module \
                    and public function of the implementation is tested."
                    .to_string(),
            },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
