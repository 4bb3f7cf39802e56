//! Provider registry: maps provider names to endpoint configurations.
//!
//! Every supported backend speaks the OpenAI wire format, so a provider is
//! just a base URL, a few paths, and how to authenticate. Both the chat
//! adapter and the embedding adapter resolve their endpoints here.

use docent_core::types::ModelInfo;

/// How to attach auth credentials to requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// No authentication required (local servers).
    None,
}

/// Static model definition for a provider.
#[derive(Debug, Clone)]
pub struct ModelDef {
    pub id: &'static str,
    pub name: &'static str,
    pub context_length: u32,
    pub max_output_tokens: Option<u32>,
}

impl ModelDef {
    pub fn to_model_info(&self, provider: &str) -> ModelInfo {
        ModelInfo {
            id: self.id.into(),
            name: self.name.into(),
            provider: provider.into(),
            context_length: self.context_length,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// Configuration for a single provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider identifier.
    pub name: &'static str,
    /// Base URL for the API.
    pub base_url: &'static str,
    /// Path for chat completions endpoint (appended to base_url).
    pub chat_path: &'static str,
    /// Path for embeddings, if the provider serves them.
    pub embeddings_path: Option<&'static str>,
    /// Path for listing models (appended to base_url).
    pub models_path: &'static str,
    /// Environment variable names to try for the API key (in order).
    pub env_keys: &'static [&'static str],
    /// How to send auth credentials.
    pub auth_style: AuthStyle,
    /// Environment variable to override the base URL (e.g., OLLAMA_HOST).
    pub base_url_env: Option<&'static str>,
    /// Catalog returned by `list_models` when the live listing is unavailable.
    pub default_models: &'static [ModelDef],
}

impl ProviderConfig {
    /// First non-empty API key among the provider's environment variables.
    pub fn env_api_key(&self) -> Option<String> {
        self.env_keys
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Base URL after applying the provider's override variable.
    pub fn resolved_base_url(&self) -> String {
        self.base_url_env
            .and_then(|env_key| {
                let val = std::env::var(env_key).ok()?;
                // For OLLAMA_HOST / LLAMACPP_HOST, append /v1 if not present
                if val.ends_with("/v1") {
                    Some(val)
                } else {
                    Some(format!("{}/v1", val.trim_end_matches('/')))
                }
            })
            .unwrap_or_else(|| self.base_url.to_string())
    }
}

// ─── Provider Definitions ────────────────────────────────────────────────────

/// Catalog entry; `max_output == 0` means the provider publishes no limit.
const fn model(id: &'static str, name: &'static str, context_length: u32, max_output: u32) -> ModelDef {
    ModelDef {
        id,
        name,
        context_length,
        max_output_tokens: if max_output == 0 { None } else { Some(max_output) },
    }
}

static OPENAI_MODELS: &[ModelDef] = &[
    model("gpt-4o", "GPT-4o", 128000, 4096),
    model("gpt-4o-mini", "GPT-4o Mini", 128000, 4096),
];

static OPENROUTER_MODELS: &[ModelDef] = &[
    model("openai/gpt-4o-mini", "GPT-4o Mini (OpenRouter)", 128000, 4096),
    model("openai/gpt-4o", "GPT-4o (OpenRouter)", 128000, 4096),
];

static DEEPSEEK_MODELS: &[ModelDef] = &[model("deepseek-chat", "DeepSeek Chat", 128000, 8192)];

static GROQ_MODELS: &[ModelDef] = &[
    model("llama-3.3-70b-versatile", "Llama 3.3 70B", 128000, 32768),
    model("llama-3.1-8b-instant", "Llama 3.1 8B", 128000, 8192),
];

static MISTRAL_MODELS: &[ModelDef] = &[model("mistral-small-latest", "Mistral Small", 128000, 8192)];

static OLLAMA_MODELS: &[ModelDef] = &[model("llama3.2", "Llama 3.2 (Ollama)", 4096, 4096)];

static LLAMACPP_MODELS: &[ModelDef] = &[model("local-model", "Local llama.cpp Model", 4096, 4096)];

// ─── Registry ────────────────────────────────────────────────────────────────

/// All known providers.
static PROVIDERS: &[ProviderConfig] = &[
    ProviderConfig {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        chat_path: "/chat/completions",
        embeddings_path: Some("/embeddings"),
        models_path: "/models",
        env_keys: &["OPENAI_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: Some("OPENAI_API_BASE"),
        default_models: OPENAI_MODELS,
    },
    ProviderConfig {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        chat_path: "/chat/completions",
        embeddings_path: None,
        models_path: "/models",
        env_keys: &["OPENROUTER_API_KEY", "OPENAI_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
        default_models: OPENROUTER_MODELS,
    },
    ProviderConfig {
        name: "deepseek",
        base_url: "https://api.deepseek.com",
        chat_path: "/chat/completions",
        embeddings_path: None,
        models_path: "/models",
        env_keys: &["DEEPSEEK_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
        default_models: DEEPSEEK_MODELS,
    },
    ProviderConfig {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        chat_path: "/chat/completions",
        embeddings_path: None,
        models_path: "/models",
        env_keys: &["GROQ_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
        default_models: GROQ_MODELS,
    },
    ProviderConfig {
        name: "mistral",
        base_url: "https://api.mistral.ai/v1",
        chat_path: "/chat/completions",
        embeddings_path: Some("/embeddings"),
        models_path: "/models",
        env_keys: &["MISTRAL_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
        default_models: MISTRAL_MODELS,
    },
    ProviderConfig {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        chat_path: "/chat/completions",
        embeddings_path: Some("/embeddings"),
        models_path: "/models",
        env_keys: &["TOGETHER_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
        default_models: &[model("meta-llama/Llama-3.3-70B-Instruct-Turbo", "Llama 3.3 70B (Together)", 128000, 4096)],
    },
    ProviderConfig {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        chat_path: "/chat/completions",
        embeddings_path: Some("/embeddings"),
        models_path: "/models",
        env_keys: &[],
        auth_style: AuthStyle::None,
        base_url_env: Some("OLLAMA_HOST"),
        default_models: OLLAMA_MODELS,
    },
    ProviderConfig {
        name: "llamacpp",
        base_url: "http://localhost:8080/v1",
        chat_path: "/chat/completions",
        embeddings_path: Some("/embeddings"),
        models_path: "/models",
        env_keys: &[],
        auth_style: AuthStyle::None,
        base_url_env: Some("LLAMACPP_HOST"),
        default_models: LLAMACPP_MODELS,
    },
    ProviderConfig {
        name: "vllm",
        base_url: "http://localhost:8000/v1",
        chat_path: "/chat/completions",
        embeddings_path: Some("/embeddings"),
        models_path: "/models",
        env_keys: &["VLLM_API_KEY"],
        auth_style: AuthStyle::None,
        base_url_env: Some("VLLM_HOST"),
        default_models: &[],
    },
];

/// Look up a provider config by name.
pub fn get_provider_config(name: &str) -> Option<&'static ProviderConfig> {
    // Also match aliases
    let lookup = match name {
        "llama.cpp" => "llamacpp",
        "together_ai" | "togetherai" => "together",
        other => other,
    };
    PROVIDERS.iter().find(|p| p.name == lookup)
}

/// List all known provider names.
pub fn all_provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|p| p.name).collect()
}
