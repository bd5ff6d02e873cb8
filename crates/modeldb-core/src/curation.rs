//! Output curation: strip non-semantic noise from captured simulator output
//! before two runs are compared.
//!
//! Rules are applied in declaration order, each over the output of the
//! previous one. A rule that reduces a line to the empty string removes it.

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::error::{ModelDbError, Result};
use crate::domain::instruction::CurationPattern;

/// Global rules, in application order.
pub const GLOBAL_RULES: &[(&str, &str)] = &[
    // absolute path to the simulator binary vs. the compiled special binary
    (r"^/.*?/nrniv:", "%neuron-executable%:"),
    (r"^\./x86_64/special:", "%neuron-executable%:"),
    (r"^nrniv:", "%neuron-executable%:"),
    (r"^special:", "%neuron-executable%:"),
    (
        r"(Mon|Tue|Wed|Thu|Fri|Sat|Sun) (Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d+\s+\d+:\d+:\d+ [A-Z\s]+ \d+",
        "%date_command%",
    ),
    (r"total run time [0-9\.]+", "total run time %run_time%"),
    (r"(^.*distutils.*$)", ""),
    (r"/.*?/lib/python.*/site-packages/", "%python-site-packages%"),
];

/// One compiled substitution.
#[derive(Debug, Clone)]
pub struct CurationRule {
    source: String,
    regex: Regex,
    replacement: String,
}

impl CurationRule {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| ModelDbError::InvalidCuration {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            replacement: replacement.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.source
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }
}

/// Ordered rule set for one model.
#[derive(Debug, Clone)]
pub struct Curator {
    rules: Vec<CurationRule>,
}

impl Curator {
    /// The global rules only.
    pub fn global() -> Result<Self> {
        let rules = GLOBAL_RULES
            .iter()
            .map(|(pattern, repl)| CurationRule::new(pattern, repl))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Global rules extended with model-specific patterns.
    ///
    /// A model pattern textually identical to an existing rule replaces that
    /// rule's replacement in place, keeping its position; any other pattern is
    /// appended. Patterns that fail to compile are skipped with a warning so a
    /// single bad override cannot break the whole comparison.
    pub fn for_model(overrides: &[CurationPattern]) -> Result<Self> {
        Ok(Self::global()?.with_overrides(overrides))
    }

    /// A copy of this rule set extended with `overrides`; compiled rules are
    /// shared, only the new patterns are compiled.
    pub fn with_overrides(&self, overrides: &[CurationPattern]) -> Self {
        let mut curator = self.clone();
        for ov in overrides {
            curator.push_override(ov);
        }
        curator
    }

    fn push_override(&mut self, ov: &CurationPattern) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.source == ov.pattern) {
            rule.replacement = ov.repl.clone();
            return;
        }
        match CurationRule::new(&ov.pattern, &ov.repl) {
            Ok(rule) => self.rules.push(rule),
            Err(e) => warn!(error = %e, "ignoring model curation pattern"),
        }
    }

    pub fn rules(&self) -> &[CurationRule] {
        &self.rules
    }

    /// Apply every rule in order; empty lines produced by a rule are dropped.
    pub fn curate<S: AsRef<str>>(&self, lines: &[S]) -> Vec<String> {
        let mut curated: Vec<String> = lines.iter().map(|l| l.as_ref().to_string()).collect();
        for rule in &self.rules {
            curated = curated
                .into_iter()
                .filter_map(|line| {
                    let replaced = rule.regex.replace_all(&line, rule.replacement.as_str());
                    if replaced != line {
                        debug!(pattern = %rule.source, from = %line, to = %replaced, "curated line");
                    }
                    let replaced = replaced.into_owned();
                    (!replaced.is_empty()).then_some(replaced)
                })
                .collect();
        }
        curated
    }
}

/// Replace every occurrence of `path` with `%model_dir%`.
pub fn mask_model_dir(text: &str, path: &str) -> String {
    if path.is_empty() {
        return text.to_string();
    }
    text.replace(path, "%model_dir%")
}
