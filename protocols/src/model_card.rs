//! Model card definitions for the `/v1/models` listing.
//!
//! Defines [`ModelCard`], the description of the single model this server
//! exposes: identity, ownership and what it can do.

use serde::{Deserialize, Serialize};

fn default_list_object() -> String {
    "list".to_string()
}

fn default_model_object() -> String {
    "model".to_string()
}

/// Feature flags advertised for a model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub vision: bool,
    pub chat: bool,
    pub embeddings: bool,
    pub text_completion: bool,
}

/// Model card as returned by `GET /v1/models`.
///
/// # Example
///
/// ```
/// use openai_protocol::model_card::{ModelCapabilities, ModelCard};
///
/// let card = ModelCard::new("Qwen/Qwen2.5-VL-7B-Instruct-AWQ", "Qwen", 1_709_251_200)
///     .with_capabilities(ModelCapabilities {
///         vision: true,
///         chat: true,
///         embeddings: false,
///         text_completion: true,
///     })
///     .with_context_window(131_072)
///     .with_max_tokens(8192);
///
/// assert!(card.supports_vision());
/// assert_eq!(card.object, "model");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCard {
    /// Primary model ID (e.g., "Qwen/Qwen2.5-VL-7B-Instruct-AWQ")
    pub id: String,

    #[serde(default = "default_model_object")]
    pub object: String,

    /// Unix timestamp advertised as the model's creation time
    pub created: u64,

    pub owned_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ModelCapabilities>,

    /// Maximum context length in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,

    /// Largest `max_tokens` a request may ask for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelCard {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>, created: u64) -> Self {
        let id = id.into();
        Self {
            root: Some(id.clone()),
            id,
            object: default_model_object(),
            created,
            owned_by: owned_by.into(),
            capabilities: None,
            context_window: None,
            max_tokens: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn supports_vision(&self) -> bool {
        self.capabilities.is_some_and(|c| c.vision)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelList {
    #[serde(default = "default_list_object")]
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    pub fn new(data: Vec<ModelCard>) -> Self {
        Self {
            object: default_list_object(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_list_serialization() {
        let list = ModelList::new(vec![ModelCard::new("m", "Qwen", 1)]);
        let value = serde_json::to_value(&list).unwrap();
        assert_eq!(value["object"], "list");
        assert_eq!(value["data"][0]["id"], "m");
        assert_eq!(value["data"][0]["object"], "model");
        assert!(value["data"][0].get("capabilities").is_none());
    }
}
