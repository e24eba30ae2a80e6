//! LLM-backed `FollowupMessageAdapter`: rewrites a rule's raw
//! template using the centurion's persona and recent conversation history
//! so a re-engagement message reads like a natural continuation rather than
//! a canned blast. Any failure (no provider, empty/garbled reply) leaves the
//! caller to use the raw template untouched — never a partial rewrite.

use crate::worker::FollowupMessageAdapter;
use async_trait::async_trait;
use centurion_agent::{ChatRequest, LlmProvider, Message, Role};
use std::sync::Arc;
use tracing::warn;

const MAX_TOKENS: u32 = 300;
const MODEL: &str = "gpt-4o-mini";

pub struct LlmFollowupAdapter {
    llm: Arc<dyn LlmProvider>,
}

impl LlmFollowupAdapter {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl FollowupMessageAdapter for LlmFollowupAdapter {
    async fn adapt(&self, persona_prompt: &str, history_text: &str, template: &str) -> Option<String> {
        let system = format!(
            "{persona_prompt}\n\nVocê está reengajando um lead inativo. Adapte a mensagem modelo abaixo \
             ao contexto da conversa, mantendo a mesma intenção, em um parágrafo curto e natural."
        );
        let user = format!("Mensagem modelo: {template}\n\nHistórico recente:\n{history_text}");

        let request = ChatRequest {
            model: MODEL.to_string(),
            system,
            messages: vec![Message { role: Role::User, content: user }],
            max_tokens: MAX_TOKENS,
            tools: Vec::new(),
        };

        match self.llm.send(&request).await {
            Ok(resp) => {
                let text = resp.content.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(text.to_string())
                }
            }
            Err(e) => {
                warn!(error = %e, "follow-up message adaptation failed, using raw template");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use centurion_agent::{ChatResponse, ProviderError};

    struct FakeLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmProvider for FakeLlm {
        fn name(&self) -> &str {
            "fake"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: self.reply.clone(),
                model: "fake".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn returns_adapted_text_when_non_empty() {
        let adapter = LlmFollowupAdapter::new(Arc::new(FakeLlm { reply: "  Oi, ainda pensando no orçamento? ".to_string() }));
        let out = adapter.adapt("persona", "historico", "template base").await;
        assert_eq!(out, Some("Oi, ainda pensando no orçamento?".to_string()));
    }

    #[tokio::test]
    async fn falls_back_to_none_on_empty_reply() {
        let adapter = LlmFollowupAdapter::new(Arc::new(FakeLlm { reply: "   ".to_string() }));
        let out = adapter.adapt("persona", "historico", "template base").await;
        assert_eq!(out, None);
    }
}
