use serde::{Deserialize, Serialize};

/// What the transcription collaborator knows about the user's surroundings
/// when an utterance arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionContext {
    #[serde(default)]
    pub focused_app_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub recent_actions: Vec<String>,
}

impl ResolutionContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn in_app(app_id: &str) -> Self {
        Self {
            focused_app_id: Some(app_id.to_string()),
            ..Self::default()
        }
    }

    /// Stable key over the focused-context fields. Recent actions are not part of it.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.focused_app_id.as_deref().unwrap_or("-"),
            self.category.as_deref().unwrap_or("-"),
            self.mode.as_deref().unwrap_or("-"),
        )
    }

    /// Short human-readable descriptor used in classifier requests.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(app) = &self.focused_app_id {
            parts.push(format!("app={app}"));
        }
        if let Some(category) = &self.category {
            parts.push(format!("category={category}"));
        }
        if let Some(mode) = &self.mode {
            parts.push(format!("mode={mode}"));
        }
        if parts.is_empty() {
            "unknown".to_string()
        } else {
            parts.join(", ")
        }
    }
}
