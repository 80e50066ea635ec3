//! Ordered first-match classification over tag bags.

use regex::Regex;

use crate::element::Tags;

/// A predicate over an element's tags.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Tag has exactly this value.
    TagEquals(&'static str, &'static str),
    /// Tag has one of these values.
    TagIn(&'static str, &'static [&'static str]),
    /// Tag is present with a value other than `no`.
    TagYes(&'static str),
    /// `name`, `brand` or `operator` matches the pattern.
    NameMatches(Regex),
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
}

impl Matcher {
    pub fn matches(&self, tags: &Tags) -> bool {
        let get = |key: &str| tags.get(key).map(String::as_str);
        match self {
            Self::TagEquals(key, value) => get(key) == Some(*value),
            Self::TagIn(key, values) => get(key).is_some_and(|v| values.contains(&v)),
            Self::TagYes(key) => get(key).is_some_and(|v| v != "no"),
            Self::NameMatches(re) => ["name", "brand", "operator"]
                .iter()
                .filter_map(|k| get(k))
                .any(|v| re.is_match(v)),
            Self::All(all) => all.iter().all(|m| m.matches(tags)),
            Self::Any(any) => any.iter().any(|m| m.matches(tags)),
        }
    }
}

/// One classification rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub category: &'static str,
    pub matcher: Matcher,
}

impl Rule {
    pub fn new(category: &'static str, matcher: Matcher) -> Self {
        Self { category, matcher }
    }
}

/// Ordered rule list with a fallback category.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
    fallback: &'static str,
}

impl Classifier {
    pub fn new(rules: Vec<Rule>, fallback: &'static str) -> Self {
        Self { rules, fallback }
    }

    /// Category of the first matching rule, or the fallback.
    pub fn classify(&self, tags: &Tags) -> &'static str {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(tags))
            .map_or(self.fallback, |rule| rule.category)
    }

    /// Every category this classifier can produce, in rule order.
    pub fn categories(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for category in self.rules.iter().map(|r| r.category).chain([self.fallback]) {
            if !out.contains(&category) {
                out.push(category);
            }
        }
        out
    }
}
