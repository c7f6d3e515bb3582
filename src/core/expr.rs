//! Guard condition grammar for `if:` clauses.
//!
//! Deliberately small: status functions plus single comparisons against a
//! quoted literal. Anything richer belongs in the step command itself.
//!
//! ```text
//! success() | failure() | always()
//! <path> == '<literal>'
//! <path> != '<literal>'
//! ```
//!
//! `<path>` is a dotted context lookup, e.g. `steps.cache-deps.outputs.cache-hit`.

use std::collections::HashMap;

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Run only when no earlier step has failed. The implicit default.
    Success,
    /// Run only when an earlier step has failed.
    Failure,
    /// Run regardless of earlier step outcomes.
    Always,
    Equals { path: String, literal: String },
    NotEquals { path: String, literal: String },
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        match trimmed {
            "success()" => return Ok(Condition::Success),
            "failure()" => return Ok(Condition::Failure),
            "always()" => return Ok(Condition::Always),
            _ => {}
        }

        let re = Regex::new(r"^([A-Za-z0-9_.\-]+)\s*(==|!=)\s*'([^']*)'$")
            .expect("condition regex is valid");

        let caps = re.captures(trimmed).ok_or_else(|| {
            Error::workflow_invalid_value(
                "if",
                Some(trimmed.to_string()),
                "Expected success()/failure()/always() or <path> ==/!= '<literal>'",
            )
        })?;

        let path = caps[1].to_string();
        let literal = caps[3].to_string();
        match &caps[2] {
            "==" => Ok(Condition::Equals { path, literal }),
            _ => Ok(Condition::NotEquals { path, literal }),
        }
    }

    /// Evaluate against the accumulated run state.
    ///
    /// `vars` carries dotted context paths (step outputs, matrix values).
    /// Missing paths compare as the empty string, matching how absent step
    /// outputs behave on hosted CI runners.
    pub fn evaluate(&self, vars: &HashMap<String, String>, prior_failure: bool) -> bool {
        match self {
            Condition::Success => !prior_failure,
            Condition::Failure => prior_failure,
            Condition::Always => true,
            Condition::Equals { path, literal } => {
                !prior_failure && vars.get(path).map(String::as_str).unwrap_or("") == literal
            }
            Condition::NotEquals { path, literal } => {
                !prior_failure && vars.get(path).map(String::as_str).unwrap_or("") != literal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_status_functions() {
        assert_eq!(Condition::parse("success()").unwrap(), Condition::Success);
        assert_eq!(Condition::parse(" always() ").unwrap(), Condition::Always);
        assert_eq!(Condition::parse("failure()").unwrap(), Condition::Failure);
    }

    #[test]
    fn parses_comparison() {
        let cond = Condition::parse("steps.cache-deps.outputs.cache-hit != 'true'").unwrap();
        assert_eq!(
            cond,
            Condition::NotEquals {
                path: "steps.cache-deps.outputs.cache-hit".to_string(),
                literal: "true".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_grammar() {
        assert!(Condition::parse("steps.a.outputs.x > 3").is_err());
        assert!(Condition::parse("${{ always }}").is_err());
    }

    #[test]
    fn cache_hit_guard_skips_on_hit() {
        let cond = Condition::parse("steps.cache-deps.outputs.cache-hit != 'true'").unwrap();
        let hit = vars(&[("steps.cache-deps.outputs.cache-hit", "true")]);
        assert!(!cond.evaluate(&hit, false));

        let miss = vars(&[("steps.cache-deps.outputs.cache-hit", "false")]);
        assert!(cond.evaluate(&miss, false));

        // Output never recorded: treated as empty string, guard passes.
        assert!(cond.evaluate(&vars(&[]), false));
    }

    #[test]
    fn comparisons_do_not_run_after_failure() {
        let cond = Condition::parse("steps.a.outputs.x == '1'").unwrap();
        assert!(!cond.evaluate(&vars(&[("steps.a.outputs.x", "1")]), true));
    }

    #[test]
    fn always_runs_after_failure() {
        assert!(Condition::Always.evaluate(&vars(&[]), true));
        assert!(Condition::Failure.evaluate(&vars(&[]), true));
        assert!(!Condition::Success.evaluate(&vars(&[]), true));
    }
}
