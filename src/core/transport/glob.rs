use regex::{Regex, RegexBuilder};

/// Filename wildcard: `*` matches any run of characters, `?` exactly one.
/// Anchored at both ends and case-insensitive.
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(pattern)
            .replace(r"\*", ".*")
            .replace(r"\?", ".");
        let regex = RegexBuilder::new(&format!("^{}$", escaped))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run_but_is_anchored() {
        let pattern = FilePattern::new("*.csv").unwrap();
        assert!(pattern.matches("extract_2024.CSV"));
        assert!(pattern.matches(".csv"));
        assert!(!pattern.matches("extract_2024.CSV.bak"));
        assert!(!pattern.matches("extract_2024.txt"));
    }

    #[test]
    fn question_mark_matches_exactly_one_character() {
        let pattern = FilePattern::new("data?.txt").unwrap();
        assert!(pattern.matches("data1.txt"));
        assert!(pattern.matches("DATAx.TXT"));
        assert!(!pattern.matches("data12.txt"));
        assert!(!pattern.matches("data.txt"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let pattern = FilePattern::new("report(1)+[a].csv").unwrap();
        assert!(pattern.matches("report(1)+[a].csv"));
        assert!(!pattern.matches("report1a.csv"));

        let dot = FilePattern::new("a.b").unwrap();
        assert!(!dot.matches("axb"));
    }

    #[test]
    fn bare_star_matches_everything() {
        let pattern = FilePattern::new("*").unwrap();
        assert!(pattern.matches("anything.at.all"));
        assert!(pattern.matches(""));
    }
}
