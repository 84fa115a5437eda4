//! Reusable step templates.
//!
//! Definitions are mostly assembled from these: free-text input,
//! constrained choice, yes/no confirmation, pure processing, and a
//! review checkpoint.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::result::{StepResult, VarBag};
use crate::step::{Step, StepKind};

/// Input step that stores the raw user text under `key`.
/// Empty input fails the step so the user is re-prompted.
pub fn prompt_input(name: &str, prompt: &str, key: &str) -> Step {
    let key = key.to_owned();
    Step::new(
        name,
        StepKind::Input,
        Some(prompt.to_owned()),
        Arc::new(move |_bag, input| {
            let text = input.unwrap_or("").trim();
            if text.is_empty() {
                return StepResult::failure("input required");
            }
            let mut data = VarBag::new();
            data.insert(key.clone(), json!(text));
            StepResult::success_with(format!("recorded {key}"), data)
        }),
    )
}

/// Input step that accepts one of `options`, by name (case-insensitive)
/// or 1-based index, and stores the selection under `key`.
pub fn choice(name: &str, prompt: &str, options: Vec<String>, key: &str) -> Step {
    let key = key.to_owned();
    Step::new(
        name,
        StepKind::Input,
        Some(prompt.to_owned()),
        Arc::new(move |_bag, input| {
            let text = input.unwrap_or("").trim();
            let selected = options
                .iter()
                .position(|o| o.eq_ignore_ascii_case(text))
                .or_else(|| {
                    text.parse::<usize>()
                        .ok()
                        .filter(|n| (1..=options.len()).contains(n))
                        .map(|n| n - 1)
                });
            match selected {
                Some(ix) => {
                    let mut data = VarBag::new();
                    data.insert(key.clone(), json!(options[ix]));
                    StepResult::success_with(format!("selected {}", options[ix]), data)
                }
                None => StepResult::failure(format!(
                    "please choose one of: {}",
                    options.join(", ")
                )),
            }
        }),
    )
}

/// Yes/no gate.  "yes" stores `confirmed = true` and continues; "no"
/// cancels the workflow; anything else re-prompts.
pub fn confirm(name: &str, prompt: &str) -> Step {
    Step::new(
        name,
        StepKind::Input,
        Some(prompt.to_owned()),
        Arc::new(|_bag, input| {
            match input.unwrap_or("").trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "confirm" | "ok" => {
                    let mut data = VarBag::new();
                    data.insert("confirmed".into(), json!(true));
                    StepResult::success_with("confirmed", data)
                }
                "no" | "n" | "cancel" => StepResult::cancel("declined by user"),
                _ => StepResult::failure("please answer yes or no"),
            }
        }),
    )
}

/// Processing step around a bag-to-result function.  Never sees input.
pub fn compute<F>(name: &str, f: F) -> Step
where
    F: Fn(&mut VarBag) -> StepResult + Send + Sync + 'static,
{
    Step::new(
        name,
        StepKind::Processing,
        None,
        Arc::new(move |bag, _input| f(bag)),
    )
}

/// Review checkpoint.  The workflow suspends here until an explicit
/// approve, modify or reject; the action itself only acknowledges.
pub fn review(name: &str, prompt: &str) -> Step {
    Step::new(
        name,
        StepKind::Review,
        Some(prompt.to_owned()),
        Arc::new(|_bag, _input| StepResult::success("reviewed")),
    )
}

/// Convenience for building `compute` results that publish one value.
pub fn computed_value(key: &str, value: Value, message: &str) -> StepResult {
    let mut data = VarBag::new();
    data.insert(key.to_owned(), value);
    StepResult::success_with(message, data)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(step: &Step, input: Option<&str>) -> (StepResult, VarBag) {
        let mut bag = VarBag::new();
        let result = step.run(&mut bag, input);
        (result, bag)
    }

    #[test]
    fn prompt_input_requires_text() {
        let step = prompt_input("ask_city", "Which city?", "city");
        let (result, _) = run(&step, Some("  "));
        assert!(result.is_failure());

        let (result, _) = run(&step, Some("Lisbon"));
        match result {
            StepResult::Success { data, .. } => assert_eq!(data["city"], json!("Lisbon")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn choice_accepts_name_or_index() {
        let step = choice(
            "pick",
            "Pick one",
            vec!["alpha".into(), "beta".into()],
            "picked",
        );

        let (result, _) = run(&step, Some("BETA"));
        match result {
            StepResult::Success { data, .. } => assert_eq!(data["picked"], json!("beta")),
            other => panic!("unexpected result: {other:?}"),
        }

        let (result, _) = run(&step, Some("1"));
        match result {
            StepResult::Success { data, .. } => assert_eq!(data["picked"], json!("alpha")),
            other => panic!("unexpected result: {other:?}"),
        }

        let (result, _) = run(&step, Some("gamma"));
        assert!(result.is_failure());
    }

    #[test]
    fn confirm_handles_all_answers() {
        let step = confirm("check", "Proceed?");

        let (result, _) = run(&step, Some("y"));
        assert!(result.is_success());

        let (result, _) = run(&step, Some("no"));
        assert!(matches!(result, StepResult::CancelWorkflow { .. }));

        let (result, _) = run(&step, Some("maybe"));
        assert!(result.is_failure());
    }

    #[test]
    fn compute_sees_and_mutates_bag() {
        let step = compute("double", |bag| {
            let x = bag.get("x").and_then(Value::as_i64).unwrap_or(0);
            computed_value("doubled", json!(x * 2), "doubled x")
        });

        let mut bag = VarBag::new();
        bag.insert("x".into(), json!(21));
        let result = step.run(&mut bag, None);
        match result {
            StepResult::Success { data, .. } => assert_eq!(data["doubled"], json!(42)),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
