use std::sync::Arc;

use hearth_llm::provider::{ChatMessage, LlmProvider};
use tracing::Instrument;

use crate::capability::automation::{AutomationStore, MemoryAutomationStore};
use crate::capability::backend::{DryRunBackend, HomeBackend, HomeDirectory};
use crate::capability::router::{RouteTable, RouteTableError, Translator};
use crate::cognition::normalizer::{ResponseShape, assistant_from_cached};
use crate::cognition::prompt::{TurnContext, assemble_model_input};
use crate::cognition::response::{self, Speech};
use crate::cognition::tool_call::dispatch_tool_calls;
use crate::config::HearthCfg;
use crate::error::TurnError;
use crate::io::cache::{CacheEntry, CacheService, DisabledCache};
use crate::io::status::{NoopStatus, SpeakerStatus, StatusPublisher};
use crate::memory::{MemorySessionStore, MessageStore, SessionStore, StoredMessage};
use crate::types::{Reply, ReplyKind, TurnRequest, Utterance};

/// Everything the orchestrator talks to besides the model.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionStore>,
    pub cache: Arc<dyn CacheService>,
    pub directory: Arc<dyn HomeDirectory>,
    pub backend: Arc<dyn HomeBackend>,
    pub automations: Arc<dyn AutomationStore>,
    pub status: Arc<dyn StatusPublisher>,
}

impl Collaborators {
    /// Process-local collaborators: no cache, a dry-run home, nothing persisted.
    pub fn in_memory() -> Self {
        let home = Arc::new(DryRunBackend::new());
        Self {
            sessions: Arc::new(MemorySessionStore::new()),
            cache: Arc::new(DisabledCache),
            directory: home.clone(),
            backend: home,
            automations: Arc::new(MemoryAutomationStore::new()),
            status: Arc::new(NoopStatus),
        }
    }
}

/// Drives one utterance from text to reply.
pub struct Orchestrator {
    cfg: Arc<HearthCfg>,
    llm: Arc<dyn LlmProvider>,
    messages: MessageStore,
    cache: Arc<dyn CacheService>,
    directory: Arc<dyn HomeDirectory>,
    translator: Translator,
    status: Arc<dyn StatusPublisher>,
}

impl Orchestrator {
    /// Fails only if the endpoint route table is inconsistent.
    pub fn new(
        cfg: Arc<HearthCfg>,
        llm: Arc<dyn LlmProvider>,
        collaborators: Collaborators,
    ) -> Result<Self, RouteTableError> {
        let translator = Translator::new(
            RouteTable::home_assistant()?,
            collaborators.backend,
            collaborators.automations,
        );
        Ok(Self {
            messages: MessageStore::new(collaborators.sessions, cfg.history_trigger_limit),
            cfg,
            llm,
            cache: collaborators.cache,
            directory: collaborators.directory,
            translator,
            status: collaborators.status,
        })
    }

    pub fn message_store(&self) -> &MessageStore {
        &self.messages
    }

    /// Handle one utterance. Never fails: errors become an apology reply.
    pub async fn process(&self, request: TurnRequest) -> Reply {
        let utterance = request.resolve(&self.cfg.default_speaker);
        let span = tracing::info_span!("turn", speaker = %utterance.speaker);
        async {
            tracing::info!(text = %utterance.text, "utterance received");
            match self.run_turn(&request, &utterance).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(error = %e, "turn failed");
                    let (speech, code, summary) = response::apology(&self.cfg, &e);
                    Reply::apology(speech, code, summary, &request)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_turn(&self, request: &TurnRequest, utterance: &Utterance) -> Result<Reply, TurnError> {
        let speaker = utterance.speaker.as_str();
        self.status.publish(SpeakerStatus::heard(speaker, &utterance.text));

        if utterance.text == self.cfg.reset_phrase {
            self.messages.reset(speaker).await?;
            return Ok(Reply::new(&self.cfg.reset_confirmation, ReplyKind::Neutral, request));
        }

        self.messages.add(speaker, ChatMessage::user(&utterance.text)).await?;

        let (cached, patterns) = tokio::join!(
            self.cache.lookup(speaker, &utterance.text),
            self.cache.patterns(speaker),
        );

        let (assistant, kind) = match cached {
            Some(payload) => {
                tracing::info!("cache hit");
                let assistant = assistant_from_cached(&payload)?;
                (self.promote_if_requested(speaker, assistant).await?, ReplyKind::Cache)
            }
            None => (self.ask_model(speaker, patterns).await?, ReplyKind::Model),
        };

        tracing::info!(kind = ?kind, shape = ?ResponseShape::of(&assistant), "assistant message ready");
        let dispatch = dispatch_tool_calls(&self.translator, assistant).await;
        let executed = dispatch.executed;
        let content = dispatch.assistant.content().map(str::to_string);
        self.messages.add_all(speaker, dispatch.into_messages()).await?;

        match response::compose_speech(&self.cfg, content.as_deref(), executed, &utterance.text) {
            Speech::HandOff(text) => {
                tracing::info!("handing turn off");
                Ok(Reply::new(text, ReplyKind::HandOff, request))
            }
            Speech::Say(text) => {
                self.status
                    .publish(SpeakerStatus::answered(speaker, &utterance.text, &text));
                Ok(Reply::new(text, kind, request))
            }
        }
    }

    async fn ask_model(&self, speaker: &str, patterns: Vec<String>) -> Result<ChatMessage, TurnError> {
        let (states, services) = tokio::join!(self.directory.states(), self.directory.services());
        let context = TurnContext {
            patterns,
            states: states.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "entity snapshot unavailable");
                Vec::new()
            }),
            services: services.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "service catalog unavailable");
                Vec::new()
            }),
        };

        let history = self.messages.model_history(speaker).await?;
        let marker = self.cfg.handoff_markers.first().map(String::as_str).unwrap_or_default();
        let input = assemble_model_input(marker, &context, history, chrono::Local::now().naive_local());
        Ok(response::generate(self.llm.as_ref(), input, &self.cfg).await?)
    }

    /// A cached reply carrying the register token promotes the previous
    /// command/reply pair into the cache; its content becomes the outcome text.
    async fn promote_if_requested(
        &self,
        speaker: &str,
        assistant: ChatMessage,
    ) -> Result<ChatMessage, TurnError> {
        let (content, tool_calls) = match assistant {
            ChatMessage::Assistant { content, tool_calls } => (content, tool_calls),
            other => return Ok(other),
        };
        let token = self.cfg.register_cache_token.as_str();
        let requested = !token.is_empty() && content.as_deref().is_some_and(|c| c.contains(token));
        if !requested {
            return Ok(ChatMessage::Assistant { content, tool_calls });
        }

        let log = self.messages.messages(speaker).await?;
        let text = match find_promotable(&log, self.cfg.promote_window) {
            Some((previous, command_text)) => {
                let entry = CacheEntry {
                    speaker_id: speaker.to_string(),
                    content: previous.content().map(str::to_string),
                    tool_calls: previous.tool_calls().to_vec(),
                    command_text: command_text.clone(),
                };
                if let Err(e) = self.cache.register(&entry).await {
                    tracing::warn!(error = %e, command = %command_text, "cache registration failed");
                }
                self.cfg.register_confirmation.replace("{command}", &command_text)
            }
            None => {
                tracing::info!(window = self.cfg.promote_window, "no previous command to register");
                self.cfg.register_not_found.clone()
            }
        };
        Ok(ChatMessage::Assistant { content: Some(text), tool_calls })
    }
}

/// Scan the `window` messages before the newest one, newest first: take the
/// first assistant message, then the nearest earlier user message.
fn find_promotable(log: &[StoredMessage], window: usize) -> Option<(ChatMessage, String)> {
    let end = log.len().saturating_sub(1);
    let start = end.saturating_sub(window);
    let mut assistant: Option<&ChatMessage> = None;
    for stored in log[start..end].iter().rev() {
        match (&stored.message, assistant) {
            (ChatMessage::Assistant { .. }, None) => assistant = Some(&stored.message),
            (ChatMessage::User { content, .. }, Some(found)) => {
                return Some((found.clone(), content.clone()));
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_llm::provider::ToolCall;

    fn stored(messages: Vec<ChatMessage>) -> Vec<StoredMessage> {
        messages
            .into_iter()
            .enumerate()
            .map(|(i, m)| StoredMessage::new(i as u64, m))
            .collect()
    }

    fn with_call(text: &str) -> ChatMessage {
        ChatMessage::Assistant {
            content: Some(text.into()),
            tool_calls: vec![ToolCall::function("c1", "home_assistant_api", "{}")],
        }
    }

    #[test]
    fn promotes_latest_pair_skipping_tool_messages() {
        let log = stored(vec![
            ChatMessage::user("lights on"),
            with_call("Turning on."),
            ChatMessage::tool("c1", "Success"),
            ChatMessage::user("remember that"),
        ]);
        let (assistant, command) = find_promotable(&log, 4).unwrap();
        assert_eq!(command, "lights on");
        assert_eq!(assistant.content(), Some("Turning on."));
        assert_eq!(assistant.tool_calls().len(), 1);
    }

    #[test]
    fn most_recent_assistant_wins() {
        let log = stored(vec![
            ChatMessage::user("one"),
            ChatMessage::assistant_text("first"),
            ChatMessage::user("two"),
            ChatMessage::assistant_text("second"),
            ChatMessage::user("remember that"),
        ]);
        let (assistant, command) = find_promotable(&log, 4).unwrap();
        assert_eq!(assistant.content(), Some("second"));
        assert_eq!(command, "two");
    }

    #[test]
    fn pair_outside_window_is_not_found() {
        let log = stored(vec![
            ChatMessage::user("fans and lights on"),
            with_call("On."),
            ChatMessage::tool("c1", "Success"),
            ChatMessage::tool("c2", "Success"),
            ChatMessage::tool("c3", "Success"),
            ChatMessage::user("remember that"),
        ]);
        assert!(find_promotable(&log, 4).is_none());
        assert!(find_promotable(&log, 5).is_some());
    }

    #[test]
    fn empty_or_fresh_log_finds_nothing() {
        assert!(find_promotable(&[], 4).is_none());
        let log = stored(vec![ChatMessage::user("remember that")]);
        assert!(find_promotable(&log, 4).is_none());
    }
}
