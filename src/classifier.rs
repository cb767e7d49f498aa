//! Filename-based routing of source objects to SFTP sub-folders.
//!
//! Rules are evaluated in order and the first prefix that matches wins.
//! Matching is ordinal and case-insensitive: each character is folded with
//! its simple uppercase mapping, independent of any locale.

use std::str::FromStr;

/// One `prefix → sub_path` routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule {
    pub prefix: String,
    pub sub_path: String,
}

impl ClassificationRule {
    pub fn new(prefix: &str, sub_path: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            sub_path: sub_path.to_string(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        starts_with_ignore_case(name, &self.prefix)
    }
}

impl FromStr for ClassificationRule {
    type Err = String;

    /// Parses `PREFIX=SUB_PATH`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, sub_path) = s
            .split_once('=')
            .ok_or_else(|| format!("classification rule must be PREFIX=SUB_PATH: {s}"))?;
        let prefix = prefix.trim();
        let sub_path = sub_path.trim().trim_matches('/');
        if prefix.is_empty() || sub_path.is_empty() {
            return Err(format!(
                "classification rule must have a non-empty prefix and sub path: {s}"
            ));
        }
        Ok(ClassificationRule::new(prefix, sub_path))
    }
}

/// The routing table used when no rules are configured.
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new("Invoice_", "Invoices"),
        ClassificationRule::new("Credit_", "Credits"),
        ClassificationRule::new("Stock_", "Stock"),
    ]
}

/// Ordered rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Returns the destination sub path for `name`, or `None` when no rule matches.
    pub fn classify(&self, name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| rule.sub_path.as_str())
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    let mut name_chars = name.chars();
    for prefix_char in prefix.chars() {
        match name_chars.next() {
            Some(name_char) if fold(name_char) == fold(prefix_char) => {}
            _ => return false,
        }
    }
    true
}

fn fold(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => c,
    }
}
