//! `BuildError` (`# 7`): the crate's single fallible-entry-point error
//! type, with a hand-written `Display` rather than a derive macro (see
//! `DESIGN.md`), implementing `Display`/`std::error::Error` by hand
//! instead of reaching for `thiserror`.

use std::fmt;

/// One of the five error kinds `# 7` specifies. Each carries the
/// `(heading, rows, body)` shape described there so a presentation layer
/// can render any of them uniformly, while `Display` still renders a
/// reasonable default text form.
#[derive(Debug)]
pub enum BuildError {
    /// A key was reached again while still on its own call stack (`#
    /// 4.6`).
    RuleRecursion {
        heading: String,
        rows: Vec<(String, String)>,
        body: String,
    },
    /// A rule's `execute` returned an error.
    RuleExecution {
        heading: String,
        rows: Vec<(String, String)>,
        body: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The dependency-order emitter (`# 4.7`) found a cycle among
    /// `depends` edges that the call-stack check did not catch (e.g.
    /// because the cycle only exists across separate top-level builds
    /// restored from the journal).
    DatabaseCyclic {
        heading: String,
        rows: Vec<(String, String)>,
        body: String,
    },
    /// `checkValid` (`# 4.9`) found a key whose stored value disagreed
    /// with what `stored` currently reports, after a run that should
    /// have left it consistent.
    LintFailure {
        heading: String,
        rows: Vec<(String, String)>,
        body: String,
    },
    /// An invariant internal to this crate's bookkeeping was violated
    /// (e.g. a dependency id referenced in a `Record` was never
    /// interned). Not expected to occur; reported rather than panicking
    /// so a caller embedding this crate in a long-running process can
    /// recover.
    InternalInvariant {
        heading: String,
        rows: Vec<(String, String)>,
        body: String,
    },
}

impl BuildError {
    pub fn recursion(key_debug: String, chain: &[String]) -> Self {
        let body = format!(
            "cycle detected while building {key_debug}: {}",
            chain.join(" -> ")
        );
        BuildError::RuleRecursion {
            heading: "rule recursion".to_string(),
            rows: vec![("key".to_string(), key_debug)],
            body,
        }
    }

    pub fn execution(
        key_debug: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        let body = format!("{source}");
        BuildError::RuleExecution {
            heading: "rule execution failed".to_string(),
            rows: vec![("key".to_string(), key_debug)],
            body,
            source,
        }
    }

    pub fn cyclic(offenders: &[String], overflow: usize) -> Self {
        let mut body = format!("dependency cycle among: {}", offenders.join(", "));
        if overflow > 0 {
            body.push_str(&format!(" (and {overflow} more)"));
        }
        BuildError::DatabaseCyclic {
            heading: "database cyclic".to_string(),
            rows: offenders
                .iter()
                .map(|k| ("key".to_string(), k.clone()))
                .collect(),
            body,
        }
    }

    /// Builds a `LintFailure` from every `(key, old, new)` mismatch
    /// `checkValid` (`# 4.9`) found, without truncation -- unlike the
    /// cycle error's 10-offender cap, `# 4.9` asks for "up to all".
    pub fn lint_failures(mismatches: &[(String, String, String)]) -> Self {
        let rows = mismatches
            .iter()
            .map(|(k, _, _)| ("key".to_string(), k.clone()))
            .collect();
        let body = mismatches
            .iter()
            .map(|(k, old, new)| format!("{k}: recorded {old}, now {new}"))
            .collect::<Vec<_>>()
            .join("\n");
        BuildError::LintFailure {
            heading: "stored value disagrees with rule output".to_string(),
            rows,
            body,
        }
    }

    pub fn internal_invariant(body: impl Into<String>) -> Self {
        BuildError::InternalInvariant {
            heading: "internal invariant violated".to_string(),
            rows: Vec::new(),
            body: body.into(),
        }
    }

    fn parts(&self) -> (&str, &[(String, String)], &str) {
        match self {
            BuildError::RuleRecursion { heading, rows, body }
            | BuildError::DatabaseCyclic { heading, rows, body }
            | BuildError::LintFailure { heading, rows, body }
            | BuildError::InternalInvariant { heading, rows, body } => {
                (heading, rows, body)
            }
            BuildError::RuleExecution { heading, rows, body, .. } => (heading, rows, body),
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (heading, rows, body) = self.parts();
        writeln!(f, "{heading}")?;
        for (k, v) in rows {
            writeln!(f, "  {k}: {v}")?;
        }
        write!(f, "{body}")
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::RuleExecution { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursion_message_names_key_and_chain() {
        let e = BuildError::recursion("Key(a)".to_string(), &["a".to_string(), "b".to_string()]);
        let s = format!("{e}");
        assert!(s.contains("cycle detected while building Key(a): a -> b"));
    }

    #[test]
    fn cyclic_reports_overflow_count() {
        let offenders: Vec<String> = (0..3).map(|i| format!("k{i}")).collect();
        let e = BuildError::cyclic(&offenders, 7);
        let s = format!("{e}");
        assert!(s.contains("and 7 more"));
    }
}
