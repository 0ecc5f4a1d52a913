//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const PLANNER: &str = include_str!("../../prompts/planner.pmt");
pub const EXPANSION: &str = include_str!("../../prompts/expansion.pmt");
pub const WORKER: &str = include_str!("../../prompts/worker.pmt");
pub const REVIEWER: &str = include_str!("../../prompts/reviewer.pmt");
pub const BATCH_REVIEWER: &str = include_str!("../../prompts/batch-reviewer.pmt");
pub const COORDINATOR: &str = include_str!("../../prompts/coordinator.pmt");
pub const CLASSIFIER: &str = include_str!("../../prompts/classifier.pmt");

/// All template names, in the order they are documented
pub const NAMES: [&str; 7] = [
    "planner",
    "expansion",
    "worker",
    "reviewer",
    "batch-reviewer",
    "coordinator",
    "classifier",
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "planner" => Some(PLANNER),
        "expansion" => Some(EXPANSION),
        "worker" => Some(WORKER),
        "reviewer" => Some(REVIEWER),
        "batch-reviewer" => Some(BATCH_REVIEWER),
        "coordinator" => Some(COORDINATOR),
        "classifier" => Some(CLASSIFIER),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_names_embedded() {
        for name in NAMES {
            assert!(get_embedded(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_reviewer_prompts_describe_grammar() {
        for prompt in [REVIEWER, BATCH_REVIEWER] {
            assert!(prompt.contains("ACCEPT or REDO"));
            assert!(prompt.contains("REVISED_TEXT:"));
        }
    }

    #[test]
    fn test_expansion_prompt_names_marker() {
        assert!(EXPANSION.contains("cover full content"));
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
