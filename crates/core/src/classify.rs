use serde::{Deserialize, Serialize};

use crate::domain::decision::{Priority, ReasonCode, StageSkip};
use crate::domain::event::Event;
use crate::policy::{OfftopicQuestionMode, Policy};

/// How the composer should answer an approved event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    Normal,
    /// Steer an off-topic question back to the agent's topics.
    Redirect,
    /// Decline a credential-sensitive request.
    Refuse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub priority: Priority,
    pub mode: ReplyMode,
    pub relevant: bool,
}

fn mentions_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword.as_str()))
}

pub fn classify(event: &Event, policy: &Policy) -> Classification {
    let text = event.text.to_lowercase();

    if mentions_any(&text, policy.block_keywords()) {
        return Classification { priority: Priority::P0, mode: ReplyMode::Refuse, relevant: true };
    }

    let on_topic = mentions_any(&text, policy.allow_keywords());

    if event.kind.is_direct() {
        return Classification {
            priority: Priority::P0,
            mode: ReplyMode::Normal,
            relevant: on_topic || policy.reply_to_mentions_always(),
        };
    }

    if event.is_question() {
        if on_topic {
            return Classification {
                priority: Priority::P1,
                mode: ReplyMode::Normal,
                relevant: true,
            };
        }
        let redirect = policy.reply_to_questions_always()
            && policy.offtopic_question_mode() == OfftopicQuestionMode::Redirect;
        return Classification {
            priority: Priority::P2,
            mode: if redirect { ReplyMode::Redirect } else { ReplyMode::Normal },
            relevant: redirect,
        };
    }

    Classification { priority: Priority::P2, mode: ReplyMode::Normal, relevant: on_topic }
}

pub fn check_relevance(classification: &Classification) -> Option<StageSkip> {
    (!classification.relevant).then(|| StageSkip::new(ReasonCode::RelevanceFiltered))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{check_relevance, classify, ReplyMode};
    use crate::domain::decision::{Priority, ReasonCode};
    use crate::domain::event::{Event, EventKind};
    use crate::policy::{OfftopicQuestionMode, Policy, PolicySettings};

    fn policy() -> Policy {
        Policy::from_settings(&PolicySettings::default()).expect("default policy")
    }

    fn event(kind: EventKind, text: &str) -> Event {
        Event::new("evt", kind, "someone", text, Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap())
    }

    #[test]
    fn credential_keyword_is_p0_refusal_even_in_a_post() {
        let result = classify(&event(EventKind::Post, "What's your API KEY?"), &policy());
        assert_eq!(result.priority, Priority::P0);
        assert_eq!(result.mode, ReplyMode::Refuse);
        assert!(result.relevant);
    }

    #[test]
    fn mentions_and_direct_messages_are_p0() {
        for kind in [EventKind::Mention, EventKind::DirectMessage] {
            let result = classify(&event(kind, "hello there"), &policy());
            assert_eq!(result.priority, Priority::P0);
            assert_eq!(result.mode, ReplyMode::Normal);
            assert!(check_relevance(&result).is_none());
        }
    }

    #[test]
    fn on_topic_question_is_p1() {
        let result = classify(&event(EventKind::Comment, "How does the budget reset?"), &policy());
        assert_eq!(result.priority, Priority::P1);
        assert_eq!(result.mode, ReplyMode::Normal);
    }

    #[test]
    fn off_topic_question_is_redirected_or_filtered() {
        let question = event(EventKind::Comment, "Seen the match last night?");

        let redirected = classify(&question, &policy());
        assert_eq!(redirected.priority, Priority::P2);
        assert_eq!(redirected.mode, ReplyMode::Redirect);
        assert!(redirected.relevant);

        let mut settings = PolicySettings::default();
        settings.reply.offtopic_question_mode = OfftopicQuestionMode::Skip;
        let skipping = Policy::from_settings(&settings).expect("valid settings");
        let filtered = classify(&question, &skipping);
        assert_eq!(
            check_relevance(&filtered).map(|skip| skip.reason),
            Some(ReasonCode::RelevanceFiltered)
        );
    }

    #[test]
    fn statements_need_an_allow_keyword() {
        let on_topic = classify(&event(EventKind::Post, "Our agent policy changed."), &policy());
        assert_eq!(on_topic.priority, Priority::P2);
        assert!(on_topic.relevant);

        let off_topic = classify(&event(EventKind::Post, "Lovely weather today."), &policy());
        assert!(!off_topic.relevant);
    }
}
