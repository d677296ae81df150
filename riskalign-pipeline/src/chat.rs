//! Intent chat. Never memoized.

use riskalign_core::{ChatBackend, Context, ConversationState, PipelineError, PipelineResult};
use std::sync::Arc;

use crate::broadcaster::{NoticeSource, ProviderFailureBroadcaster, ProviderNotice};

pub struct IntentChat {
    backend: Arc<dyn ChatBackend>,
    broadcaster: Arc<ProviderFailureBroadcaster>,
}

impl IntentChat {
    pub fn new(backend: Arc<dyn ChatBackend>, broadcaster: Arc<ProviderFailureBroadcaster>) -> Self {
        Self {
            backend,
            broadcaster,
        }
    }

    /// Send `prompt` on behalf of the context's provider and return the
    /// conversation extended by the user turn and the reply.
    ///
    /// A reply flagged with a provider error is still returned; the flag is
    /// reported once on the failure channel.
    pub async fn send(
        &self,
        conversation: &ConversationState,
        prompt: &str,
        context: &Context,
    ) -> PipelineResult<ConversationState> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::validation("chat", "prompt is empty"));
        }

        let provider = context.provider_id();
        let reply = match self.backend.chat(conversation, prompt, provider).await {
            Ok(reply) => reply,
            Err(error) => {
                self.broadcaster
                    .publish_error(provider, NoticeSource::Chat, &error);
                return Err(error);
            }
        };

        if let Some(message) = &reply.provider_error {
            self.broadcaster.publish(&ProviderNotice::new(
                provider,
                NoticeSource::Chat,
                None,
                message.clone(),
            ));
        }

        tracing::debug!(
            provider = %provider,
            intent = %reply.intent,
            turns = conversation.len() + 2,
            "chat reply received"
        );
        Ok(conversation.with_exchange(prompt, reply.content))
    }
}

impl std::fmt::Debug for IntentChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentChat").finish_non_exhaustive()
    }
}
