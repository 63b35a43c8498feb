//! Provider detection: maps a target URL onto the AI provider behind it so
//! traffic can be labelled and parsed per provider.

use serde::Serialize;
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Openai,
    Anthropic,
    Google,
    Ollama,
    AzureOpenai,
    Mistral,
    Cohere,
    Deepseek,
    Unknown,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Openai => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google AI",
            Provider::Ollama => "Ollama (Local)",
            Provider::AzureOpenai => "Azure OpenAI",
            Provider::Mistral => "Mistral AI",
            Provider::Cohere => "Cohere",
            Provider::Deepseek => "DeepSeek",
            Provider::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub is_chat: bool,
    pub is_streaming: bool,
}

/// Closed hostname → provider mapping. OpenRouter speaks the OpenAI format.
const URL_PATTERNS: &[(&str, Provider)] = &[
    ("api.openai.com", Provider::Openai),
    ("api.anthropic.com", Provider::Anthropic),
    ("generativelanguage.googleapis.com", Provider::Google),
    ("aiplatform.googleapis.com", Provider::Google),
    ("openrouter.ai", Provider::Openai),
    ("api.mistral.ai", Provider::Mistral),
    ("api.cohere.ai", Provider::Cohere),
    ("api.deepseek.com", Provider::Deepseek),
    ("localhost:11434", Provider::Ollama),
    ("127.0.0.1:11434", Provider::Ollama),
];

const CHAT_PATH_PATTERNS: &[&str] = &[
    "/chat/completions",
    "/v1/messages",     // Anthropic
    "/generateContent", // Google
    "/api/chat",        // Ollama
];

/// Detect the provider from the target URL, with the parsed request body
/// (when available) supplying the model name and streaming flag.
pub fn detect_provider(target_url: &str, body: Option<&Value>) -> ProviderInfo {
    let parsed = match Url::parse(target_url) {
        Ok(u) => u,
        Err(_) => {
            return ProviderInfo {
                provider: Provider::Unknown,
                model: extract_model(body),
                base_url: target_url.to_string(),
                is_chat: true,
                is_streaming: false,
            }
        }
    };

    let host = netloc(&parsed).to_lowercase();
    let base_url = format!("{}://{}", parsed.scheme(), netloc(&parsed));
    let is_streaming = body
        .and_then(|b| b.get("stream"))
        .and_then(|s| s.as_bool())
        .unwrap_or(false);

    // Azure OpenAI lives on per-resource subdomains.
    if host.contains(".openai.azure.com") {
        return ProviderInfo {
            provider: Provider::AzureOpenai,
            model: extract_model(body),
            base_url,
            is_chat: parsed.path().contains("/chat/"),
            is_streaming,
        };
    }

    for (pattern, provider) in URL_PATTERNS {
        if host.contains(pattern) {
            return ProviderInfo {
                provider: *provider,
                model: extract_model(body),
                base_url,
                is_chat: CHAT_PATH_PATTERNS.iter().any(|p| parsed.path().contains(p)),
                is_streaming,
            };
        }
    }

    ProviderInfo {
        provider: Provider::Unknown,
        model: extract_model(body),
        base_url: target_url.to_string(),
        is_chat: true,
        is_streaming,
    }
}

fn netloc(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

fn extract_model(body: Option<&Value>) -> String {
    body.and_then(|b| b.get("model"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
