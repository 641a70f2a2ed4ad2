use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use pipewright_core::config::ModelConfig;
use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::traits::{Judge, LlmClient};
use pipewright_core::types::{Message, Verdict};

use crate::generator::extract_json;

/// Judge backed by a chat-completion model.
///
/// Each criterion gets its own boolean decision; the stage is approved only
/// if all of them are true.
pub struct LlmJudge {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

#[derive(Deserialize)]
struct JudgeResponse {
    criteria: BTreeMap<String, bool>,
    #[serde(default)]
    message: String,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }
}

fn review_instruction(criteria: &[String]) -> String {
    let example: Vec<String> = criteria.iter().map(|c| format!("\"{}\": true", c)).collect();
    format!(
        "Decide each criterion independently: {}.\n\
         Respond with ONLY a JSON object of the form \
         {{\"criteria\": {{{}}}, \"message\": \"<feedback for the author>\"}}. \
         Use false for any criterion that is not fully satisfied and explain why in the message.",
        criteria.join(", "),
        example.join(", ")
    )
}

/// Parse a judgment reply. Every criterion must be decided.
fn parse_verdict(stage: &str, response: &str, criteria: &[String]) -> Result<Verdict> {
    let malformed = |reason: String| PipewrightError::MalformedJudgment {
        stage: stage.to_string(),
        reason,
    };

    let parsed: JudgeResponse = serde_json::from_str(extract_json(response)).map_err(|e| {
        warn!(stage, error = %e, "Failed to parse judge response");
        malformed(format!("invalid JSON: {}", e))
    })?;

    let mut decided = BTreeMap::new();
    for criterion in criteria {
        let ok = parsed
            .criteria
            .get(criterion)
            .copied()
            .ok_or_else(|| malformed(format!("no decision for {}", criterion)))?;
        decided.insert(criterion.clone(), ok);
    }

    Ok(Verdict::from_criteria(decided, parsed.message))
}

impl Judge for LlmJudge {
    fn judge<'a>(
        &'a self,
        stage: &'a str,
        mut prompt: Vec<Message>,
        criteria: &'a [String],
    ) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(async move {
            prompt.push(Message::user(review_instruction(criteria)));
            let response = self.llm.complete(&self.config, prompt).await?;
            let verdict = parse_verdict(stage, &response, criteria)?;
            debug!(stage, approved = verdict.approved, "Judgment parsed");
            Ok(verdict)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_test_utils::{test_model, MockLlmClient};

    fn design_criteria() -> Vec<String> {
        vec!["UML_class".into(), "UML_sequence".into(), "architecture_design".into()]
    }

    #[test]
    fn test_parse_all_true() {
        let v = parse_verdict(
            "design",
            r#"{"criteria": {"UML_class": true, "UML_sequence": true, "architecture_design": true}, "message": "good"}"#,
            &design_criteria(),
        )
        .unwrap();
        assert!(v.approved);
        assert_eq!(v.message, "good");
    }

    #[test]
    fn test_parse_one_false_rejects() {
        let v = parse_verdict(
            "design",
            r#"```json
{"criteria": {"UML_class": true, "UML_sequence": false, "architecture_design": true}, "message": "sequence diagram lacks the save flow"}
```"#,
            &design_criteria(),
        )
        .unwrap();
        assert!(!v.approved);
        assert_eq!(v.criteria["UML_sequence"], false);
    }

    #[test]
    fn test_parse_missing_criterion() {
        let err = parse_verdict(
            "design",
            r#"{"criteria": {"UML_class": true}, "message": "ok"}"#,
            &design_criteria(),
        )
        .unwrap_err();
        assert!(matches!(err, PipewrightError::MalformedJudgment { .. }));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_verdict("setup", "Looks fine to me!", &["requirements".to_string()]).unwrap_err();
        assert!(matches!(err, PipewrightError::MalformedJudgment { .. }));
    }

    #[tokio::test]
    async fn test_judge_sends_instruction() {
        let llm = Arc::new(MockLlmClient::new([
            r#"{"criteria": {"requirements": true}, "message": "complete"}"#.to_string(),
        ]));
        let judge = LlmJudge::new(llm.clone(), test_model());
        let criteria = vec!["requirements".to_string()];
        let verdict = judge
            .judge("setup", vec![Message::user("requirements: pytest")], &criteria)
            .await
            .unwrap();
        assert!(verdict.approved);

        let sent = llm.requests();
        assert!(sent[0].last().unwrap().content.contains("\"requirements\": true"));
    }
}
