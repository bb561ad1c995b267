//! Name filters for listing.
//!
//! `*` matches any run of characters (including none); every other character
//! matches itself. An empty filter matches every name.

use regex::Regex;

#[derive(Clone, Debug)]
pub struct NameFilter {
    pattern: Option<Regex>,
}

impl NameFilter {
    /// Filter matching every name.
    pub fn all() -> Self {
        Self { pattern: None }
    }

    pub fn parse(filter: &str) -> Result<Self, regex::Error> {
        if filter.is_empty() {
            return Ok(Self::all());
        }

        let body = filter
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let pattern = Regex::new(&format!("^(?s:{body})$"))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(name),
            None => true,
        }
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(filter: &str, name: &str) -> bool {
        NameFilter::parse(filter).unwrap().matches(name)
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(matches("", "anything"));
        assert!(matches("", ""));
    }

    #[test]
    fn test_star_matches_any_run() {
        assert!(matches("*", "build"));
        assert!(matches("build*", "build"));
        assert!(matches("build*", "build-linux"));
        assert!(matches("*-linux", "build-linux"));
        assert!(matches("b*d*x", "build-linux"));
        assert!(!matches("build*", "rebuild"));
    }

    #[test]
    fn test_other_characters_are_literal() {
        assert!(matches("a.c", "a.c"));
        assert!(!matches("a.c", "abc"));
        assert!(matches("v1?[x]", "v1?[x]"));
        assert!(!matches("Build", "build"));
        assert!(!matches("build", "build-linux"));
    }
}
