//! Question text provider used when a round begins.

use std::collections::HashMap;

use futures::future::{BoxFuture, ready};
use rand::{rng, seq::IndexedRandom};

/// Placeholder replaced by the target's display name.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Raw question picked for a theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionTemplate {
    /// Identifier of the template in its source, when it has one.
    pub id: Option<String>,
    pub text_template: String,
}

/// Supplies question templates per theme. `None` means the theme has nothing to offer.
pub trait QuestionSource: Send + Sync {
    fn fetch_question(&self, theme: &str) -> BoxFuture<'static, Option<QuestionTemplate>>;
}

/// Personalise a template with the target's display name.
pub fn format_question(text_template: &str, display_name: &str) -> String {
    text_template.replace(NAME_PLACEHOLDER, display_name)
}

/// Question source backed by the configured question bank.
pub struct BankQuestionSource {
    bank: HashMap<String, Vec<String>>,
}

impl BankQuestionSource {
    pub fn new(bank: HashMap<String, Vec<String>>) -> Self {
        Self { bank }
    }
}

impl QuestionSource for BankQuestionSource {
    fn fetch_question(&self, theme: &str) -> BoxFuture<'static, Option<QuestionTemplate>> {
        let picked = self.bank.get(theme).and_then(|templates| {
            let mut rng = rng();
            let indexed: Vec<(usize, &String)> = templates.iter().enumerate().collect();
            indexed
                .choose(&mut rng)
                .map(|(index, template)| QuestionTemplate {
                    id: Some(format!("{theme}:{index}")),
                    text_template: (*template).clone(),
                })
        });
        Box::pin(ready(picked))
    }
}
