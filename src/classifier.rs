use regex::Regex;

/// Phrases that count as answering the challenge.
pub const AFFIRMATIVE_PHRASES: &[&str] = &[
    "yes",
    "yea",
    "yeah",
    "yah",
    "definitely",
    "absolutely",
    "certainly",
    "i think so",
    "of course",
];

/// Case-insensitive substring match against [`AFFIRMATIVE_PHRASES`].
/// No negation handling: "not yes" still counts.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    pattern: Regex,
}

impl ResponseClassifier {
    pub fn new() -> Self {
        let alternation = AFFIRMATIVE_PHRASES
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!("(?i){}", alternation))
            .expect("escaped literal alternation is a valid regex");
        Self { pattern }
    }

    /// The first affirmative phrase found in `snippet`, as written.
    pub fn matched<'a>(&self, snippet: &'a str) -> Option<&'a str> {
        self.pattern.find(snippet).map(|m| m.as_str())
    }
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new()
    }
}
