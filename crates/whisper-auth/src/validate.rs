//! Caller-supplied field rules for the sign-in and sign-up forms.
//!
//! The client ships no built-in policy; a rule is any predicate returning an
//! error message for a bad value.

use std::collections::BTreeMap;
use std::sync::Arc;
use whisper_core::{ClientError, ClientResult, FieldErrors};

type Rule = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Field name to the rules checked against that field, in order.
#[derive(Clone, Default)]
pub struct FieldRules {
    rules: BTreeMap<String, Vec<Rule>>,
}

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for `field`. Rules for one field run in insertion order and
    /// the first failure wins.
    pub fn rule<F>(mut self, field: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.rules.entry(field.into()).or_default().push(Arc::new(rule));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check `(field, value)` pairs. Fields without rules pass.
    pub fn check(&self, values: &[(&str, &str)]) -> ClientResult<()> {
        let mut errors = FieldErrors::new();

        for &(field, value) in values {
            let Some(rules) = self.rules.get(field) else {
                continue;
            };
            if let Some(message) = rules.iter().find_map(|rule| rule(value)) {
                errors.insert(field.to_string(), message);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ClientError::validation_fields("Please correct the highlighted fields.", errors))
        }
    }
}

impl std::fmt::Debug for FieldRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.rules.iter().map(|(field, rules)| (field, rules.len())))
            .finish()
    }
}
