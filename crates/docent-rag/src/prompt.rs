//! Prompt Assembler: renders the grounding prompt.
//!
//! Pure and deterministic: the same bundle and query always produce a
//! byte-identical prompt. Nothing time- or request-dependent is injected.

use docent_core::types::{ContextBundle, Message, Query, RenderedPrompt};

pub const SYSTEM_INSTRUCTIONS: &str = "You are a helpful assistant. Answer the user's question using only the \
information in the context below. If the context does not contain the answer, say that you do not know \
instead of guessing. Reason step by step before giving the final answer.";

pub const CONTEXT_START: &str = "=== CONTEXT START ===";
pub const CONTEXT_END: &str = "=== CONTEXT END ===";

/// Rendered in place of passages when retrieval found nothing.
pub const NO_CONTEXT_MARKER: &str = "[no context found]";

#[derive(Debug, Clone, Default)]
pub struct PromptAssembler {
    /// Character budget for the rendered context bundle.
    max_context_chars: Option<usize>,
}

impl PromptAssembler {
    pub fn new(max_context_chars: Option<usize>) -> Self {
        Self { max_context_chars }
    }

    pub fn max_context_chars(&self) -> Option<usize> {
        self.max_context_chars
    }

    /// Drop lowest-ranked passages until the bundle fits the budget.
    pub fn fit(&self, bundle: ContextBundle) -> ContextBundle {
        match self.max_context_chars {
            Some(max) if bundle.rendered_chars() > max => {
                let total = bundle.len();
                let fitted = bundle.fit_to(max);
                tracing::debug!(
                    "Context budget {max} chars: kept {} of {total} passages",
                    fitted.len()
                );
                fitted
            }
            _ => bundle,
        }
    }

    pub fn assemble(&self, bundle: &ContextBundle, query: &Query) -> RenderedPrompt {
        let fitted;
        let bundle = match self.max_context_chars {
            Some(max) if bundle.rendered_chars() > max => {
                fitted = self.fit(bundle.clone());
                &fitted
            }
            _ => bundle,
        };

        let context = if bundle.is_empty() {
            NO_CONTEXT_MARKER.to_string()
        } else {
            bundle.render()
        };

        let user = format!(
            "Context:\n{CONTEXT_START}\n{context}\n{CONTEXT_END}\n\nUser Question: {query}\n\nAnswer:"
        );

        RenderedPrompt {
            messages: vec![Message::system(SYSTEM_INSTRUCTIONS), Message::user(user)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::types::Role;

    fn query() -> Query {
        Query::parse("What is the capital of France?").unwrap()
    }

    #[test]
    fn test_deterministic() {
        let assembler = PromptAssembler::default();
        let bundle = ContextBundle::new(vec!["Paris is the capital of France.".into()]);
        assert_eq!(
            assembler.assemble(&bundle, &query()),
            assembler.assemble(&bundle, &query())
        );
    }

    #[test]
    fn test_template_order() {
        let prompt = PromptAssembler::default().assemble(
            &ContextBundle::new(vec!["Paris is the capital of France.".into()]),
            &query(),
        );
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert!(prompt.messages[0].content.contains("step by step"));

        let user = &prompt.messages[1].content;
        let start = user.find(CONTEXT_START).unwrap();
        let passage = user.find("Paris is the capital of France.").unwrap();
        let end = user.find(CONTEXT_END).unwrap();
        let question = user.find("What is the capital of France?").unwrap();
        assert!(start < passage && passage < end && end < question);
        assert!(user.ends_with("Answer:"));
    }

    #[test]
    fn test_empty_bundle_has_marker() {
        let prompt = PromptAssembler::default().assemble(&ContextBundle::empty(), &query());
        let user = &prompt.messages[1].content;
        assert!(user.contains(&format!("{CONTEXT_START}\n{NO_CONTEXT_MARKER}\n{CONTEXT_END}")));
    }

    #[test]
    fn test_budget_drops_lowest_ranked_whole_passages() {
        let bundle = ContextBundle::new(vec!["a".repeat(50), "b".repeat(50), "c".repeat(50)]);
        let two = ContextBundle::new(vec!["a".repeat(50), "b".repeat(50)]).rendered_chars();
        let prompt = PromptAssembler::new(Some(two)).assemble(&bundle, &query());
        let user = &prompt.messages[1].content;
        assert!(user.contains(&"b".repeat(50)));
        assert!(!user.contains(&"c".repeat(50)));
    }

    #[test]
    fn test_fit_is_noop_within_budget() {
        let bundle = ContextBundle::new(vec!["short".into()]);
        assert_eq!(PromptAssembler::new(Some(1000)).fit(bundle.clone()).len(), 1);
        assert!(PromptAssembler::new(Some(3)).fit(bundle).is_empty());
    }

    #[test]
    fn test_budget_too_small_for_any_passage() {
        let bundle = ContextBundle::new(vec!["x".repeat(100)]);
        let prompt = PromptAssembler::new(Some(10)).assemble(&bundle, &query());
        assert!(prompt.messages[1].content.contains(NO_CONTEXT_MARKER));
    }
}
