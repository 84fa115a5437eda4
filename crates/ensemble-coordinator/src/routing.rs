//! Intent routing.
//!
//! Decides whether user input should open a structured workflow or stay
//! conversational.  The default classifier is deterministic and tiered:
//! exact phrases through an [`aho_corasick`] automaton first, then regex
//! patterns in registration order, then the conversational fallback.

use aho_corasick::AhoCorasick;
use regex::Regex;
use tracing::debug;

use crate::error::{CoordError, CoordResult};

/// Where one piece of user input should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Free-form dialogue; no structured task recognized.
    Conversation,
    /// Start the named workflow.
    Task { workflow_type: String },
}

/// Maps raw user input to a routing decision.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, input: &str) -> RouteDecision;
}

#[derive(Debug)]
struct PatternRoute {
    compiled: Regex,
    workflow_type: String,
}

/// Deterministic keyword classifier.
///
/// Matching is case-insensitive.  Exact phrases win over patterns; among
/// overlapping exact phrases the longest match wins, so "set a timer for
/// tea" routes by the longer of "timer" and "set a timer".
pub struct KeywordClassifier {
    phrases: Vec<(String, String)>,
    automaton: Option<AhoCorasick>,
    patterns: Vec<PatternRoute>,
}

impl KeywordClassifier {
    pub fn builder() -> KeywordClassifierBuilder {
        KeywordClassifierBuilder {
            phrases: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, input: &str) -> RouteDecision {
        let lowered = input.to_lowercase();

        if let Some(ac) = &self.automaton {
            let mut best: Option<(usize, usize)> = None; // (phrase index, length)
            for mat in ac.find_overlapping_iter(&lowered) {
                let len = mat.end() - mat.start();
                if best.is_none_or(|(_, best_len)| len > best_len) {
                    best = Some((mat.pattern().as_usize(), len));
                }
            }
            if let Some((ix, _)) = best {
                let (phrase, workflow_type) = &self.phrases[ix];
                debug!(%phrase, %workflow_type, "exact phrase route");
                return RouteDecision::Task {
                    workflow_type: workflow_type.clone(),
                };
            }
        }

        for route in &self.patterns {
            if route.compiled.is_match(&lowered) {
                debug!(pattern = %route.compiled, workflow_type = %route.workflow_type,
                       "pattern route");
                return RouteDecision::Task {
                    workflow_type: route.workflow_type.clone(),
                };
            }
        }

        RouteDecision::Conversation
    }
}

/// Builder for [`KeywordClassifier`].
#[derive(Debug)]
pub struct KeywordClassifierBuilder {
    phrases: Vec<(String, String)>,
    patterns: Vec<PatternRoute>,
}

impl KeywordClassifierBuilder {
    /// Route inputs containing `phrase` (case-insensitive) to a workflow.
    pub fn exact(mut self, phrase: impl Into<String>, workflow_type: impl Into<String>) -> Self {
        self.phrases
            .push((phrase.into().to_lowercase(), workflow_type.into()));
        self
    }

    /// Route inputs matching `pattern` to a workflow.  Patterns are
    /// evaluated in registration order, after all exact phrases.
    pub fn pattern(
        mut self,
        pattern: impl Into<String>,
        workflow_type: impl Into<String>,
    ) -> CoordResult<Self> {
        let pattern = pattern.into();
        let compiled = Regex::new(&pattern).map_err(|e| CoordError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        self.patterns.push(PatternRoute {
            compiled,
            workflow_type: workflow_type.into(),
        });
        Ok(self)
    }

    pub fn build(self) -> CoordResult<KeywordClassifier> {
        let automaton = if self.phrases.is_empty() {
            None
        } else {
            let phrases: Vec<&str> = self.phrases.iter().map(|(p, _)| p.as_str()).collect();
            Some(
                AhoCorasick::new(&phrases).map_err(|e| CoordError::InvalidPattern {
                    pattern: phrases.join(", "),
                    reason: e.to_string(),
                })?,
            )
        };
        Ok(KeywordClassifier {
            phrases: self.phrases,
            automaton,
            patterns: self.patterns,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::builder()
            .exact("set a timer", "timer")
            .exact("timer", "timer_short")
            .exact("remind me", "reminder")
            .pattern(r"\bdeploy\b.*\bto\b", "deploy")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn exact_phrase_routes_to_task() {
        let decision = classifier().classify("Remind me to water the plants");
        assert_eq!(
            decision,
            RouteDecision::Task {
                workflow_type: "reminder".into()
            }
        );
    }

    #[test]
    fn longest_overlapping_phrase_wins() {
        // "set a timer" and "timer" both match; the longer one decides.
        let decision = classifier().classify("set a timer for ten minutes");
        assert_eq!(
            decision,
            RouteDecision::Task {
                workflow_type: "timer".into()
            }
        );
    }

    #[test]
    fn pattern_routes_after_phrases() {
        let decision = classifier().classify("deploy the release to staging");
        assert_eq!(
            decision,
            RouteDecision::Task {
                workflow_type: "deploy".into()
            }
        );
    }

    #[test]
    fn unmatched_input_is_conversation() {
        let decision = classifier().classify("what a lovely morning");
        assert_eq!(decision, RouteDecision::Conversation);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = KeywordClassifier::builder()
            .pattern("[unclosed(", "broken")
            .unwrap_err();
        assert!(matches!(err, CoordError::InvalidPattern { .. }));
    }

    #[test]
    fn empty_classifier_always_converses() {
        let classifier = KeywordClassifier::builder().build().unwrap();
        assert_eq!(
            classifier.classify("set a timer"),
            RouteDecision::Conversation
        );
    }
}
