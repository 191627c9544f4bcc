//! Keyword-based topic tagging for user turns.
//!
//! Keywords are scored by frequency, length and how early they appear; each
//! keyword is compared against every topic name (and every word of it) and
//! the best-scoring topic wins if it clears the threshold.

use std::collections::{HashMap, HashSet};

use cb_domain::config::TopicsConfig;
use cb_domain::message::Topic;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "and", "any", "are", "because",
    "been", "before", "being", "below", "between", "both", "but", "can", "could", "did", "does",
    "doing", "don", "down", "during", "each", "few", "for", "from", "further", "get", "had", "has",
    "have", "having", "her", "here", "hers", "herself", "him", "himself", "his", "how", "into",
    "its", "itself", "just", "know", "let", "like", "more", "most", "much", "myself", "need",
    "nor", "not", "now", "off", "once", "only", "other", "our", "ours", "ourselves", "out",
    "over", "own", "please", "same", "she", "should", "some", "such", "than", "thank", "thanks",
    "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they",
    "this", "those", "through", "too", "under", "until", "very", "want", "was", "were", "what",
    "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you",
    "your", "yours", "yourself", "yourselves",
];

const MIN_KEYWORD_LEN: usize = 3;

pub struct TopicTagger {
    catalog: HashMap<String, Vec<Topic>>,
    max_keywords: usize,
    threshold: f64,
    fallback_name: String,
    stopwords: HashSet<&'static str>,
}

impl TopicTagger {
    pub fn new(config: &TopicsConfig) -> Self {
        Self {
            catalog: config.catalog.clone(),
            max_keywords: config.max_keywords,
            threshold: config.threshold,
            fallback_name: config.fallback_name.to_lowercase(),
            stopwords: STOPWORDS.iter().copied().collect(),
        }
    }

    /// Topic id for a user message, or `None` when nothing matches and the
    /// chatbot has no fallback topic.
    pub fn tag(&self, chatbot_id: &str, message: &str) -> Option<String> {
        let topics = self.catalog.get(chatbot_id)?;
        if topics.is_empty() {
            return None;
        }

        let keywords = self.keywords(message);
        let mut best: Option<(&Topic, f64)> = None;
        for topic in topics {
            let score = keywords
                .iter()
                .map(|k| topic_similarity(k, &topic.name))
                .fold(0.0_f64, f64::max);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((topic, score));
            }
        }

        match best {
            Some((topic, score)) if score >= self.threshold => Some(topic.id.clone()),
            _ => topics
                .iter()
                .find(|t| t.name.to_lowercase() == self.fallback_name)
                .map(|t| t.id.clone()),
        }
    }

    /// Up to `max_keywords` keywords, highest score first.
    pub fn keywords(&self, message: &str) -> Vec<String> {
        let tokens: Vec<String> = tokenize(message)
            .filter(|t| t.chars().count() >= MIN_KEYWORD_LEN && !self.stopwords.contains(t.as_str()))
            .collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        // token -> (frequency, first position)
        let mut stats: HashMap<&str, (usize, usize)> = HashMap::new();
        for (pos, tok) in tokens.iter().enumerate() {
            stats.entry(tok.as_str()).or_insert((0, pos)).0 += 1;
        }

        let total = tokens.len() as f64;
        let mut scored: Vec<(&str, f64, usize)> = stats
            .into_iter()
            .map(|(tok, (freq, first))| {
                let length = tok.chars().count().min(10) as f64 * 0.1;
                let position = (1.0 - first as f64 / total) * 0.5;
                (tok, freq as f64 + length + position, first)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));

        scored
            .into_iter()
            .take(self.max_keywords)
            .map(|(tok, _, _)| tok.to_string())
            .collect()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Best similarity of `keyword` against the whole topic name or any word
/// of it.
fn topic_similarity(keyword: &str, topic_name: &str) -> f64 {
    let full = topic_name.to_lowercase();
    std::iter::once(full.clone())
        .chain(tokenize(&full))
        .map(|candidate| similarity(keyword, &candidate))
        .fold(0.0, f64::max)
}

/// 1.0 for an exact match, 0.8 when one contains the other, otherwise the
/// Jaccard index of the character bigram sets.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let shorter = a.chars().count().min(b.chars().count());
    if shorter >= MIN_KEYWORD_LEN && (a.contains(b) || b.contains(a)) {
        return 0.8;
    }
    let ba = bigrams(a);
    let bb = bigrams(b);
    let union = ba.union(&bb).count();
    if union == 0 {
        return 0.0;
    }
    ba.intersection(&bb).count() as f64 / union as f64
}

fn bigrams(s: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: &str, name: &str) -> Topic {
        Topic {
            id: id.into(),
            name: name.into(),
        }
    }

    fn tagger(topics: Vec<Topic>) -> TopicTagger {
        let mut cfg = TopicsConfig::default();
        cfg.catalog.insert("bot".into(), topics);
        TopicTagger::new(&cfg)
    }

    #[test]
    fn refund_question_lands_in_billing() {
        let t = tagger(vec![topic("t-billing", "Billing"), topic("t-other", "Other")]);
        assert_eq!(
            t.tag("bot", "What's the refund policy for billing?").as_deref(),
            Some("t-billing")
        );
    }

    #[test]
    fn no_overlap_falls_back_to_other() {
        let t = tagger(vec![topic("t-billing", "Billing"), topic("t-other", "Other")]);
        assert_eq!(
            t.tag("bot", "Can I book a flight tomorrow?").as_deref(),
            Some("t-other")
        );
    }

    #[test]
    fn no_match_and_no_fallback_is_none() {
        let t = tagger(vec![topic("t-billing", "Billing")]);
        assert_eq!(t.tag("bot", "Can I book a flight tomorrow?"), None);
        assert_eq!(t.tag("unknown-bot", "billing"), None);
    }

    #[test]
    fn multi_word_topic_matches_any_word() {
        let t = tagger(vec![
            topic("t-ship", "Shipping and Delivery"),
            topic("t-billing", "Billing"),
        ]);
        assert_eq!(
            t.tag("bot", "my delivery is late again").as_deref(),
            Some("t-ship")
        );
    }

    #[test]
    fn keywords_drop_stopwords_and_short_tokens() {
        let t = tagger(vec![]);
        let kws = t.keywords("What is the status of my order? Order 42 please");
        assert_eq!(kws[0], "order");
        assert!(kws.contains(&"status".to_string()));
        assert!(!kws.iter().any(|k| k == "the" || k == "is" || k == "42"));
        assert!(kws.len() <= 4);
    }

    #[test]
    fn similarity_tiers() {
        assert_eq!(similarity("billing", "billing"), 1.0);
        assert_eq!(similarity("bill", "billing"), 0.8);
        assert_eq!(similarity("refund", "refund policy"), 0.8);
        assert!(similarity("hello", "billing") < 0.3);
        assert_eq!(similarity("", "x"), 0.0);
    }
}
