//! CHARON's reply generation: an OpenAI-compatible chat call wrapped in
//! persona config, location knowledge, and a fail-open fallback path.
//! Players never see a raw failure; the GM sees the cause in the logs.

use crate::config::Config;
use crate::knowledge::KnowledgeLoader;
use crate::locations::LocationProvider;
use crate::session::{ChannelMessage, Role};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const NO_LOCATION_KEY: &str = "__no_location__";
const DEFAULT_FALLBACK: &str = "[SYSTEM ERROR] Unable to process query at this time.";

/// Persona record from `<data>/charon/context.yaml`. Every field has a
/// usable default so a missing or partial file still yields a working
/// CHARON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_response_length")]
    pub max_response_length: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_fallback_responses")]
    pub fallback_responses: Vec<String>,
}

fn default_name() -> String {
    "CHARON".to_string()
}

fn default_system_prompt() -> String {
    "You are CHARON, a ship AI. Be terse and technical.".to_string()
}

fn default_max_response_length() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_fallback_responses() -> Vec<String> {
    vec![DEFAULT_FALLBACK.to_string()]
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            designation: None,
            version: None,
            system_prompt: default_system_prompt(),
            max_response_length: default_max_response_length(),
            temperature: default_temperature(),
            fallback_responses: default_fallback_responses(),
        }
    }
}

/// GM-facing summary of a responder instance.
#[derive(Clone, Debug, Serialize)]
pub struct ResponderInfo {
    pub name: String,
    pub designation: String,
    pub version: String,
    pub ai_available: bool,
}

pub struct Responder {
    client: Option<Client<OpenAIConfig>>,
    model: String,
    persona: PersonaConfig,
    knowledge_context: String,
    history_window: usize,
    timeout: Duration,
}

impl Responder {
    /// Building a responder does the file I/O (persona + knowledge);
    /// callers should go through [`ResponderCache`] rather than
    /// constructing one per query.
    pub fn new(
        config: &Config,
        locations: &LocationProvider,
        location_path: Option<&str>,
    ) -> Self {
        let persona = load_persona(config);
        let knowledge_context = location_path
            .map(|path| {
                KnowledgeLoader::new(locations.clone(), config.vault_path.clone(), path)
                    .build_context_string()
            })
            .unwrap_or_default();

        let client = config.llm_api_key.as_ref().map(|key| {
            let openai_config = OpenAIConfig::new()
                .with_api_base(&config.llm_url)
                .with_api_key(key);
            Client::with_config(openai_config)
        });
        if client.is_none() {
            info!("no LLM credential configured; CHARON will serve fallback lines");
        }

        Self {
            client,
            model: config.llm_model.clone(),
            persona,
            knowledge_context,
            history_window: config.history_window,
            timeout: config.llm_timeout(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    pub fn describe(&self) -> ResponderInfo {
        ResponderInfo {
            name: self.persona.name.clone(),
            designation: self
                .persona
                .designation
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            version: self
                .persona
                .version
                .clone()
                .unwrap_or_else(|| "0.0.0".to_string()),
            ai_available: self.is_available(),
        }
    }

    /// Generates CHARON's reply to a query against the trailing
    /// conversation history. Never errors and never returns an empty
    /// string: any failure degrades to a random fallback line, with the
    /// cause logged for the GM.
    pub async fn generate_response(&self, query: &str, history: &[ChannelMessage]) -> String {
        let Some(client) = &self.client else {
            return self.fallback_response();
        };

        let messages = self.build_messages(query, history);
        let request = match CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(self.persona.max_response_length)
            .temperature(self.persona.temperature)
            .build()
        {
            Ok(request) => request,
            Err(e) => {
                warn!("charon request build failed: {}", e);
                return self.fallback_response();
            }
        };

        match tokio::time::timeout(self.timeout, client.chat().create(request)).await {
            Err(_) => {
                warn!("charon model call timed out after {:?}", self.timeout);
                self.fallback_response()
            }
            Ok(Err(e)) => {
                warn!("charon model call failed: {}", e);
                self.fallback_response()
            }
            Ok(Ok(response)) => {
                match response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                {
                    Some(text) if !text.trim().is_empty() => text,
                    _ => {
                        warn!("charon model returned an empty response");
                        self.fallback_response()
                    }
                }
            }
        }
    }

    /// System prompt + trailing history (charon turns become assistant
    /// turns, everything else user turns) + the query as the final user
    /// turn.
    fn build_messages(
        &self,
        query: &str,
        history: &[ChannelMessage],
    ) -> Vec<ChatCompletionRequestMessage> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Ok(system) = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.build_system_prompt())
            .build()
        {
            messages.push(system.into());
        }

        let start = history.len().saturating_sub(self.history_window);
        for msg in &history[start..] {
            let converted: Option<ChatCompletionRequestMessage> = match msg.role {
                Role::Charon => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .ok()
                    .map(|m| m.into()),
                _ => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()
                    .ok()
                    .map(|m| m.into()),
            };
            if let Some(m) = converted {
                messages.push(m);
            }
        }

        if let Ok(user) = ChatCompletionRequestUserMessageArgs::default()
            .content(query.to_string())
            .build()
        {
            messages.push(user.into());
        }

        messages
    }

    fn build_system_prompt(&self) -> String {
        if self.knowledge_context.is_empty() {
            return self.persona.system_prompt.clone();
        }
        format!(
            "{}\n\n---\nYOUR DATABANKS CONTAIN:\n{}",
            self.persona.system_prompt, self.knowledge_context
        )
    }

    fn fallback_response(&self) -> String {
        self.persona
            .fallback_responses
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_FALLBACK.to_string())
    }
}

fn load_persona(config: &Config) -> PersonaConfig {
    let path = config.data_dir.join("charon").join("context.yaml");
    let Ok(text) = fs::read_to_string(&path) else {
        return PersonaConfig::default();
    };
    match serde_yaml::from_str(&text) {
        Ok(persona) => persona,
        Err(e) => {
            warn!("unparsable persona config {:?}: {}", path, e);
            PersonaConfig::default()
        }
    }
}

/// Keyed cache of responder instances, one per location path, so config
/// and knowledge files are not re-read on every query. Injected through
/// [`crate::AppState`]; cleared explicitly when the GM edits the
/// underlying files. Two callers racing on a missing key may build the
/// instance twice; the first insert wins and the duplicate work is
/// harmless.
#[derive(Default)]
pub struct ResponderCache {
    inner: Mutex<HashMap<String, Arc<Responder>>>,
}

impl ResponderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        config: &Config,
        locations: &LocationProvider,
        location_path: Option<&str>,
    ) -> Arc<Responder> {
        let key = location_path.unwrap_or(NO_LOCATION_KEY).to_string();
        if let Some(existing) = self.inner.lock().unwrap().get(&key) {
            return existing.clone();
        }
        // Built outside the lock: construction reads files.
        let built = Arc::new(Responder::new(config, locations, location_path));
        self.inner
            .lock()
            .unwrap()
            .entry(key)
            .or_insert(built)
            .clone()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
