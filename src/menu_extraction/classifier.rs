// Menu-line classifier - labels recognized lines and assembles candidate dishes
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::ConfigError;

// A bare amount such as "$6.99" or "12".
static PRICE_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$?\d{1,4}(?:\.\d{1,2})?$").unwrap());

// Leading capital, then word characters, spaces, hyphens, apostrophes, commas, periods.
static DISH_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\p{Lu}[\w\s\-',.]*$").unwrap());

pub const DEFAULT_BLACKLIST: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "open",
    "close",
    "hour",
    "wifi",
    "password",
    "www",
    ".com",
    "reservation",
    "phone",
    "call",
    "email",
];

/// Tunable thresholds for the line rules and the final dish filter.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// Lines shorter than this (in chars) are noise.
    pub min_line_length: usize,
    /// Price-only lines are dropped only when shorter than this.
    pub price_max_length: usize,
    /// Lines whose alphabetic fraction is below this are noise.
    pub line_alpha_floor: f64,
    /// Fraction of long words (4+ letters) that must be capitalized in a dish name.
    pub title_case_ratio: f64,
    /// Final dish names must be longer than this.
    pub final_min_length: usize,
    /// Final dish names must have an alphabetic fraction above this.
    pub final_alpha_ratio: f64,
    /// Lowercase substrings that mark a line as non-food.
    pub blacklist: Vec<String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            min_line_length: 3,
            price_max_length: 10,
            line_alpha_floor: 0.3,
            title_case_ratio: 0.5,
            final_min_length: 5,
            final_alpha_ratio: 0.5,
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClassifierRules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratios = [
            ("classifier.line_alpha_floor", self.line_alpha_floor),
            ("classifier.title_case_ratio", self.title_case_ratio),
            ("classifier.final_alpha_ratio", self.final_alpha_ratio),
        ];
        for (key, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: format!("{} is outside 0.0..=1.0", value),
                });
            }
        }
        // An empty entry is a substring of every line.
        if self.blacklist.iter().any(|word| word.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "classifier.blacklist",
                reason: "entries must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReason {
    TooShort,
    BarePrice,
    LowAlphaRatio,
    BlacklistedKeyword,
    /// Not a dish name, and no dish to attach it to.
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "label", content = "reason")]
pub enum LineLabel {
    Noise(NoiseReason),
    DishName,
    DescriptionContinuation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub name: String,
    pub description: Option<String>,
}

/// The dish that description lines currently attach to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DishContext {
    #[default]
    NoCurrentDish,
    CurrentDish { name: String, description: String },
}

impl DishContext {
    pub fn has_dish(&self) -> bool {
        matches!(self, DishContext::CurrentDish { .. })
    }

    /// Apply one labeled line. A new dish name closes the previous dish,
    /// which is returned as a finished entry.
    pub fn advance(self, line: &str, label: LineLabel) -> (DishContext, Option<MenuEntry>) {
        match label {
            LineLabel::DishName => {
                let next = DishContext::CurrentDish {
                    name: line.to_string(),
                    description: String::new(),
                };
                (next, self.finish())
            }
            LineLabel::DescriptionContinuation => match self {
                DishContext::CurrentDish {
                    name,
                    mut description,
                } => {
                    if !description.is_empty() {
                        description.push(' ');
                    }
                    description.push_str(line);
                    (DishContext::CurrentDish { name, description }, None)
                }
                DishContext::NoCurrentDish => (DishContext::NoCurrentDish, None),
            },
            LineLabel::Noise(_) => (self, None),
        }
    }

    pub fn finish(self) -> Option<MenuEntry> {
        match self {
            DishContext::NoCurrentDish => None,
            DishContext::CurrentDish { name, description } => Some(MenuEntry {
                name,
                description: (!description.is_empty()).then_some(description),
            }),
        }
    }
}

/// Fraction of chars that are alphabetic. Zero for an empty line.
pub fn alpha_ratio(line: &str) -> f64 {
    let total = line.chars().count();
    if total == 0 {
        return 0.0;
    }
    let alphabetic = line.chars().filter(|c| c.is_alphabetic()).count();
    alphabetic as f64 / total as f64
}

#[derive(Debug, Clone, Default)]
pub struct MenuClassifier {
    rules: ClassifierRules,
}

impl MenuClassifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    /// Label one line. `index` is the line's position in the page sequence;
    /// the first line of a page is never a continuation.
    pub fn classify_line(&self, line: &str, index: usize, context: &DishContext) -> LineLabel {
        let line = line.trim();
        let length = line.chars().count();

        if length < self.rules.min_line_length {
            return LineLabel::Noise(NoiseReason::TooShort);
        }
        if length < self.rules.price_max_length && PRICE_ONLY.is_match(line) {
            return LineLabel::Noise(NoiseReason::BarePrice);
        }
        if alpha_ratio(line) < self.rules.line_alpha_floor {
            return LineLabel::Noise(NoiseReason::LowAlphaRatio);
        }
        if self.is_blacklisted(line) {
            return LineLabel::Noise(NoiseReason::BlacklistedKeyword);
        }
        if self.looks_like_dish_name(line) {
            return LineLabel::DishName;
        }
        if context.has_dish() && index > 0 {
            return LineLabel::DescriptionContinuation;
        }
        LineLabel::Noise(NoiseReason::Unclassified)
    }

    fn is_blacklisted(&self, line: &str) -> bool {
        let lowered = line.to_lowercase();
        self.rules
            .blacklist
            .iter()
            .any(|word| lowered.contains(&word.to_lowercase()))
    }

    fn looks_like_dish_name(&self, line: &str) -> bool {
        if !DISH_SHAPE.is_match(line) {
            return false;
        }
        let starts_with_the = line
            .split_whitespace()
            .next()
            .map(|word| word.eq_ignore_ascii_case("the"))
            .unwrap_or(false);
        !starts_with_the && self.is_title_cased(line)
    }

    // Short words ("of", "and", "with") are ignored either way.
    fn is_title_cased(&self, line: &str) -> bool {
        let long_words: Vec<&str> = line
            .split_whitespace()
            .filter(|word| word.chars().filter(|c| c.is_alphabetic()).count() >= 4)
            .collect();
        if long_words.is_empty() {
            return true;
        }
        let capitalized = long_words
            .iter()
            .filter(|word| word.chars().next().map(char::is_uppercase).unwrap_or(false))
            .count();
        capitalized as f64 / long_words.len() as f64 >= self.rules.title_case_ratio
    }

    /// Label every line in order, threading the dish context through.
    pub fn explain<S: AsRef<str>>(&self, lines: &[S]) -> Vec<(String, LineLabel)> {
        let mut context = DishContext::NoCurrentDish;
        let mut labeled = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            let line = line.as_ref().trim();
            let label = self.classify_line(line, index, &context);
            context = context.advance(line, label).0;
            labeled.push((line.to_string(), label));
        }
        labeled
    }

    /// Dish entries with their accumulated descriptions, in first-seen order.
    pub fn classify<S: AsRef<str>>(&self, lines: &[S]) -> Vec<MenuEntry> {
        let mut context = DishContext::NoCurrentDish;
        let mut entries = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let line = line.as_ref().trim();
            let label = self.classify_line(line, index, &context);
            let (next, finished) = context.advance(line, label);
            context = next;
            entries.extend(finished);
        }
        entries.extend(context.finish());
        entries
    }

    pub fn final_quality_filter(&self, names: Vec<String>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| {
                name.chars().count() > self.rules.final_min_length
                    && alpha_ratio(name) > self.rules.final_alpha_ratio
            })
            .collect()
    }

    /// Ordered candidate dish names for one deduplicated line sequence.
    pub fn candidate_dishes<S: AsRef<str>>(&self, lines: &[S]) -> Vec<String> {
        let names = self
            .classify(lines)
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        self.final_quality_filter(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> MenuClassifier {
        MenuClassifier::default()
    }

    fn label(line: &str) -> LineLabel {
        classifier().classify_line(line, 0, &DishContext::NoCurrentDish)
    }

    #[test]
    fn test_short_price_discarded() {
        assert_eq!(label("$6.99"), LineLabel::Noise(NoiseReason::BarePrice));
        assert_eq!(label("12.50"), LineLabel::Noise(NoiseReason::BarePrice));
        assert_ne!(
            label("Grilled Salmon - market price $6.99"),
            LineLabel::Noise(NoiseReason::BarePrice)
        );
    }

    #[test]
    fn test_alpha_ratio_floor() {
        assert_eq!(label("1234567"), LineLabel::Noise(NoiseReason::LowAlphaRatio));
        assert_eq!(label("Tom Yum Soup"), LineLabel::DishName);
        assert_eq!(alpha_ratio(""), 0.0);
        assert_eq!(alpha_ratio("Tom Yum Soup"), 10.0 / 12.0);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(label("Ab"), LineLabel::Noise(NoiseReason::TooShort));
        assert_eq!(label("  Ab  "), LineLabel::Noise(NoiseReason::TooShort));
    }

    #[test]
    fn test_blacklist_is_literal_substring() {
        assert_eq!(
            label("Open Monday-Friday 9am-9pm"),
            LineLabel::Noise(NoiseReason::BlacklistedKeyword)
        );
        assert_eq!(
            label("www.restaurant.com"),
            LineLabel::Noise(NoiseReason::BlacklistedKeyword)
        );
        // Abbreviated day names are not in the list.
        assert_ne!(
            label("Mon-Fri 9am-9pm"),
            LineLabel::Noise(NoiseReason::BlacklistedKeyword)
        );
        // Substrings match inside words too.
        assert_eq!(
            label("Seared Scallops"),
            LineLabel::Noise(NoiseReason::BlacklistedKeyword)
        );
    }

    #[test]
    fn test_dish_name_shape() {
        assert_eq!(label("Pad Thai"), LineLabel::DishName);
        assert_eq!(label("Chef's Special, Large"), LineLabel::DishName);
        assert_eq!(label("Kimchi Jjigae"), LineLabel::DishName);
        assert_eq!(label("The Classic Burger"), LineLabel::Noise(NoiseReason::Unclassified));
        assert_eq!(label("lower case start"), LineLabel::Noise(NoiseReason::Unclassified));
        assert_eq!(label("Fish & Chips"), LineLabel::Noise(NoiseReason::Unclassified));
        // "Theater" is not the word "the".
        assert_eq!(label("Theater Platter"), LineLabel::DishName);
    }

    #[test]
    fn test_sentence_case_line_is_continuation() {
        let classifier = classifier();
        let context = DishContext::CurrentDish {
            name: "Grilled Salmon".to_string(),
            description: String::new(),
        };
        assert_eq!(
            classifier.classify_line("Served with lemon butter", 1, &context),
            LineLabel::DescriptionContinuation
        );
        // Never a continuation on the first line of a page.
        assert_eq!(
            classifier.classify_line("Served with lemon butter", 0, &context),
            LineLabel::Noise(NoiseReason::Unclassified)
        );
        assert_eq!(
            classifier.classify_line("served with lemon butter", 1, &DishContext::NoCurrentDish),
            LineLabel::Noise(NoiseReason::Unclassified)
        );
    }

    #[test]
    fn test_context_transitions() {
        let context = DishContext::default();
        let (context, done) = context.advance("Noodles", LineLabel::DishName);
        assert!(done.is_none());
        let (context, _) = context.advance("with egg", LineLabel::DescriptionContinuation);
        let (context, _) = context.advance("and scallion", LineLabel::DescriptionContinuation);
        let (context, _) = context.advance("$9", LineLabel::Noise(NoiseReason::BarePrice));
        let (context, done) = context.advance("Dumplings", LineLabel::DishName);
        assert_eq!(
            done,
            Some(MenuEntry {
                name: "Noodles".to_string(),
                description: Some("with egg and scallion".to_string()),
            })
        );
        assert_eq!(
            context.finish(),
            Some(MenuEntry {
                name: "Dumplings".to_string(),
                description: None,
            })
        );
    }

    #[test]
    fn test_end_to_end_lines() {
        let lines = [
            "Appetizers",
            "Spring Rolls",
            "Crispy vegetable rolls with sweet chili sauce",
            "Grilled Salmon",
            "Served with lemon butter",
            "www.restaurant.com",
        ];
        let classifier = classifier();
        assert_eq!(
            classifier.candidate_dishes(&lines),
            vec!["Appetizers", "Spring Rolls", "Grilled Salmon"]
        );

        let entries = classifier.classify(&lines);
        assert_eq!(
            entries[1].description.as_deref(),
            Some("Crispy vegetable rolls with sweet chili sauce")
        );
        assert_eq!(
            entries[2].description.as_deref(),
            Some("Served with lemon butter")
        );
    }

    #[test]
    fn test_final_filter_is_stricter_and_idempotent() {
        let classifier = classifier();
        let names: Vec<String> = ["Pho", "Pad Thai", "Soup 123", "Ramen-1-2-3-4", "Bibimbap"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let once = classifier.final_quality_filter(names);
        assert_eq!(once, vec!["Pad Thai", "Bibimbap"]);
        let twice = classifier.final_quality_filter(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rules_validation() {
        assert!(ClassifierRules::default().validate().is_ok());
        let rules = ClassifierRules {
            line_alpha_floor: -0.1,
            ..ClassifierRules::default()
        };
        assert!(rules.validate().is_err());
        let rules = ClassifierRules {
            blacklist: vec!["open".to_string(), " ".to_string()],
            ..ClassifierRules::default()
        };
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier = MenuClassifier::new(ClassifierRules {
            final_min_length: 2,
            ..ClassifierRules::default()
        });
        assert_eq!(
            classifier.candidate_dishes(&["Pho", "Laksa"]),
            vec!["Pho", "Laksa"]
        );
    }
}
