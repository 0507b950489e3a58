use async_trait::async_trait;

use tollgate_core::{CallError, Event, Policy, ReplyComposer, ReplyDraft, ReplyMode};

/// Deterministic English replies built from fixed templates.
#[derive(Clone, Debug, Default)]
pub struct TemplateComposer;

impl TemplateComposer {
    pub fn render(&self, event: &Event, mode: ReplyMode, policy: &Policy) -> String {
        let greeting = if event.author.trim().is_empty() {
            "Hi there.".to_string()
        } else {
            format!("Hi @{}.", event.author.trim())
        };

        let mut sentences = vec![greeting];
        match mode {
            ReplyMode::Refuse => {
                sentences.push("I can't help with passwords, keys or other credentials.".into());
                sentences.push("Please never share secrets in public threads.".into());
            }
            ReplyMode::Redirect => {
                sentences.push("That one is outside what I cover here.".into());
                let topics: Vec<&str> =
                    policy.allow_keywords().iter().take(3).map(String::as_str).collect();
                if !topics.is_empty() {
                    sentences.push(format!("Ask me about {} and I'll gladly help.", topics.join(", ")));
                }
            }
            ReplyMode::Normal if event.is_question() => {
                sentences.push("Thanks for the question.".into());
                sentences.push("I'll follow up with the details shortly.".into());
            }
            ReplyMode::Normal => {
                sentences.push("Thanks for sharing this.".into());
            }
        }

        let limit = usize::try_from(policy.max_sentences()).unwrap_or(usize::MAX);
        sentences.truncate(limit.max(1));
        sentences.join(" ")
    }
}

#[async_trait]
impl ReplyComposer for TemplateComposer {
    async fn compose(
        &self,
        event: &Event,
        mode: ReplyMode,
        policy: &Policy,
    ) -> Result<ReplyDraft, CallError> {
        Ok(ReplyDraft { text: self.render(event, mode, policy), usage: None })
    }
}
