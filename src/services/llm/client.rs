use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::resolve::{ClassifierError, ClassifierRequest, ClassifierResponse, IntentClassifier};

/// Tier-3 classifier backed by a llama-server style `/completion` endpoint.
#[derive(Clone)]
pub struct LlmClassifier {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct CompletionRequest {
    prompt: String,
    stream: bool,
    n_predict: u32,
    temperature: f32,
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

impl LlmClassifier {
    pub fn new(cfg: &ClassifierConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_millis(cfg.timeout_ms))
                .build()
                .unwrap_or_default(),
            base_url: cfg.url.trim_end_matches('/').to_string(),
        }
    }

    fn prompt(request: &ClassifierRequest) -> String {
        let system = "You map a spoken command to one action name. Reply with a single JSON object \
             {\"action\": <name or null>, \"confidence\": <0..1>, \"params\": <object or null>} and nothing else. \
             Only use names from the action list. Use null when nothing fits.";
        let recent = if request.context_summary.recent_actions.is_empty() {
            "none".to_string()
        } else {
            request.context_summary.recent_actions.join(", ")
        };
        format!(
            "System: {}\nActions: {}\nFocus: {}\nRecent: {}\nUser: {}\nAssistant:",
            system,
            request.known_actions.join(", "),
            request.context_summary.focused,
            recent,
            request.utterance
        )
    }
}

impl IntentClassifier for LlmClassifier {
    async fn classify(&self, request: ClassifierRequest) -> Result<ClassifierResponse, ClassifierError> {
        let body = CompletionRequest {
            prompt: Self::prompt(&request),
            stream: false,
            n_predict: request.token_budget,
            temperature: 0.0,
            stop: vec!["User:".to_string(), "\n\n".to_string()],
        };

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(ClassifierError::Status(response.status().as_u16()));
        }

        let completion: CompletionResponse = response.json().await.map_err(transport)?;
        debug!("Classifier replied with {} bytes", completion.content.len());
        parse_reply(&completion.content)
    }
}

fn transport(e: reqwest::Error) -> ClassifierError {
    if e.is_timeout() {
        ClassifierError::Timeout
    } else {
        ClassifierError::Transport(e.to_string())
    }
}

/// Pull the first JSON object out of a model reply.
pub fn parse_reply(content: &str) -> Result<ClassifierResponse, ClassifierError> {
    let start = content
        .find('{')
        .ok_or_else(|| ClassifierError::Malformed("no JSON object in reply".into()))?;
    let end = content
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ClassifierError::Malformed("unterminated JSON object".into()))?;
    serde_json::from_str(&content[start..=end]).map_err(|e| ClassifierError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_json() {
        let reply = "Sure. {\"action\": \"volume_up\", \"confidence\": 0.8, \"params\": null} ";
        let parsed = parse_reply(reply).unwrap();
        assert_eq!(parsed.action.as_deref(), Some("volume_up"));
        assert!((parsed.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(parse_reply("no idea"), Err(ClassifierError::Malformed(_))));
        assert!(matches!(parse_reply("{\"action\": "), Err(ClassifierError::Malformed(_))));
    }

    #[test]
    fn prompt_lists_actions() {
        let request = ClassifierRequest {
            utterance: "crank it".into(),
            context_summary: crate::resolve::ContextSummary {
                focused: "app=spotify".into(),
                recent_actions: vec![],
            },
            known_actions: vec!["volume_up".into(), "volume_down".into()],
            token_budget: 64,
        };
        let prompt = LlmClassifier::prompt(&request);
        assert!(prompt.contains("volume_up, volume_down"));
        assert!(prompt.contains("Recent: none"));
        assert!(prompt.ends_with("User: crank it\nAssistant:"));
    }
}
