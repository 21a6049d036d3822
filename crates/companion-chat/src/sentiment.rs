//! Rule-based sentiment classification.
//!
//! Coarser than the responder's emotion annotation and computed locally:
//! the user's message is matched against curated keyword lists and the
//! counts decide the label. Ties break in a fixed order — surprise wins
//! whenever its count is at least the larger of the other two, then
//! positive over negative, then neutral.

use companion_types::Sentiment;

const POSITIVE_KEYWORDS: &[&str] = &[
    "happy",
    "glad",
    "thank",
    "thanks",
    "great",
    "love",
    "wonderful",
    "awesome",
    "amazing",
    "excited",
    "fantastic",
    "yay",
    "proud",
    "relieved",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "sad",
    "upset",
    "hate",
    "angry",
    "worried",
    "anxious",
    "lonely",
    "tired",
    "stressed",
    "stress",
    "frustrated",
    "annoyed",
    "terrible",
    "awful",
];

const SURPRISE_KEYWORDS: &[&str] = &[
    "wow",
    "whoa",
    "surprised",
    "unbelievable",
    "incredible",
    "shocked",
    "no way",
    "can't believe",
    "seriously",
];

fn count_matches(message: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| message.contains(*kw)).count()
}

/// Classifies the sentiment of a user message.
pub fn analyze(user_message: &str) -> Sentiment {
    let message = user_message.to_lowercase();

    let positive = count_matches(&message, POSITIVE_KEYWORDS);
    let negative = count_matches(&message, NEGATIVE_KEYWORDS);
    let surprise = count_matches(&message, SURPRISE_KEYWORDS);

    if surprise > 0 && surprise >= positive.max(negative) {
        Sentiment::Surprised
    } else if positive > negative {
        Sentiment::Positive
    } else if negative > positive {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}
