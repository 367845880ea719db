//! Ordered error-pattern table for dev server output.
//!
//! Each output line is checked against the table top to bottom; the first matching
//! pattern decides the error kind. Patterns from the config file come first so they
//! can shadow the built-ins.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

use crate::domain::config::PatternConfig;
use crate::domain::types::ErrorKind;

const BUILTIN_PATTERNS: &[(&str, ErrorKind)] = &[
    (
        r"(?i)(module not found|cannot find module|no module named|modulenotfounderror|err_module_not_found|unresolved import)",
        ErrorKind::Import,
    ),
    (
        r"(?i)(syntax ?error|unexpected token|indentationerror)",
        ErrorKind::Syntax,
    ),
    (
        r"(?i)\b(error|exception|failed to compile|compilation failed)\b",
        ErrorKind::Compile,
    ),
];

#[derive(Debug)]
pub struct PatternTable {
    entries: Vec<(Regex, ErrorKind)>,
}

impl PatternTable {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_PATTERNS
                .iter()
                .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, *kind)))
                .collect(),
        }
    }

    /// Config patterns followed by the built-ins. Config patterns match case-insensitively
    /// like the built-ins do.
    pub fn with_extra(extra: &[PatternConfig]) -> Result<Self> {
        let mut entries = Vec::with_capacity(extra.len() + BUILTIN_PATTERNS.len());
        for entry in extra {
            let re = RegexBuilder::new(&entry.pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid monitor pattern: {}", entry.pattern))?;
            entries.push((re, entry.kind));
        }
        entries.extend(Self::builtin().entries);
        Ok(Self { entries })
    }

    pub fn detect(&self, line: &str) -> Option<ErrorKind> {
        self.entries
            .iter()
            .find(|(re, _)| re.is_match(line))
            .map(|(_, kind)| *kind)
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_detection() {
        let table = PatternTable::builtin();
        assert_eq!(table.detect("Module not found: 'lodash'"), Some(ErrorKind::Import));
        assert_eq!(
            table.detect("Error: Cannot find module 'express'"),
            Some(ErrorKind::Import)
        );
        assert_eq!(
            table.detect("ModuleNotFoundError: No module named 'flask'"),
            Some(ErrorKind::Import)
        );
        assert_eq!(
            table.detect("SyntaxError: Unexpected token '}'"),
            Some(ErrorKind::Syntax)
        );
        assert_eq!(table.detect("Failed to compile."), Some(ErrorKind::Compile));
        assert_eq!(table.detect("TypeError: x is undefined (error)"), Some(ErrorKind::Compile));
    }

    #[test]
    fn test_quiet_lines() {
        let table = PatternTable::builtin();
        for line in [
            "ready - started server on 0.0.0.0:3000",
            "compiled successfully, 0 errors",
            "GET /api/items 200 in 12ms",
        ] {
            assert_eq!(table.detect(line), None, "{line}");
        }
    }

    #[test]
    fn test_config_patterns_take_precedence() {
        let table = PatternTable::with_extra(&[PatternConfig {
            pattern: r"(?i)panicked at".into(),
            kind: ErrorKind::Compile,
        }, PatternConfig {
            pattern: r"Module not found".into(),
            kind: ErrorKind::Syntax,
        }])
        .unwrap();
        assert_eq!(table.detect("thread 'main' panicked at src/main.rs"), Some(ErrorKind::Compile));
        assert_eq!(table.detect("Module not found: x"), Some(ErrorKind::Syntax));
    }

    #[test]
    fn test_config_patterns_ignore_case() {
        let table = PatternTable::with_extra(&[PatternConfig {
            pattern: r"panicked at".into(),
            kind: ErrorKind::Syntax,
        }])
        .unwrap();
        assert_eq!(table.detect("thread 'main' PANICKED AT src/main.rs"), Some(ErrorKind::Syntax));
        assert_eq!(table.detect("Panicked At line 3"), Some(ErrorKind::Syntax));
    }

    #[test]
    fn test_invalid_config_pattern() {
        let result = PatternTable::with_extra(&[PatternConfig {
            pattern: "(".into(),
            kind: ErrorKind::Compile,
        }]);
        assert!(result.is_err());
    }
}
