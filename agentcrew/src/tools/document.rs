//! Heuristic document analysis: statistics, key phrases, lexicon sentiment,
//! capitalized-entity spotting and extractive key sentences.
//!
//! Everything here is deterministic and local; no completion calls.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{Capability, ToolDef, ToolError, Toolkit, str_arg, string_schema};

const MAX_PHRASES: usize = 10;
const REPORT_PHRASES: usize = 5;
const REPORT_ENTITIES: usize = 10;
const KEY_SENTENCES: usize = 3;
const SENTIMENT_THRESHOLD: f64 = 0.2;

const STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
    "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
    "for", "with", "about", "against", "between", "into", "through", "during", "before",
    "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
    "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will",
    "just", "don", "should", "now", "d", "ll", "m", "o", "re", "ve", "y",
];

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "positive", "best", "innovative", "impressive", "helpful",
    "beneficial", "advantage", "success", "happy", "pleased", "effective", "useful", "better",
    "remarkable",
];

const NEGATIVE: &[&str] = &[
    "bad", "poor", "negative", "worst", "problem", "issue", "disappointing", "difficult",
    "failure", "concern", "weakness", "disadvantage", "trouble", "ineffective", "useless",
    "worse",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
        }
    }
}

/// Full analysis result; [`render`](Self::render) produces the tool text.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentAnalysis {
    pub word_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub avg_sentence_length: f64,
    pub key_phrases: Vec<(String, f64)>,
    pub sentiment: Sentiment,
    pub sentiment_score: f64,
    pub entities: Vec<String>,
    pub key_sentences: Vec<String>,
}

impl DocumentAnalysis {
    pub fn analyze(text: &str) -> Result<Self, ToolError> {
        if text.trim().is_empty() {
            return Err(ToolError::Validation("empty document provided".into()));
        }

        let word_count = count_words(text);
        let sentences = split_sentences(text);
        let sentence_count = sentences.len().max(1);
        let key_phrases = key_phrases(text, &sentences);
        let (sentiment_score, sentiment) = sentiment(text);

        Ok(Self {
            word_count,
            sentence_count: sentences.len(),
            paragraph_count: text.split("\n\n").count(),
            avg_sentence_length: word_count as f64 / sentence_count as f64,
            entities: entities(&sentences),
            key_sentences: key_sentences(&sentences, &key_phrases),
            key_phrases,
            sentiment,
            sentiment_score,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Document Analysis Report\n========================\n\n");
        let _ = writeln!(out, "Basic statistics:");
        let _ = writeln!(out, "  Word count: {}", self.word_count);
        let _ = writeln!(out, "  Sentence count: {}", self.sentence_count);
        let _ = writeln!(out, "  Paragraph count: {}", self.paragraph_count);
        let _ = writeln!(
            out,
            "  Average sentence length: {:.1} words",
            self.avg_sentence_length
        );

        out.push_str("\nKey phrases:\n");
        for (i, (phrase, score)) in self.key_phrases.iter().take(REPORT_PHRASES).enumerate() {
            let _ = writeln!(out, "{}. {phrase} (relevance: {score:.2})", i + 1);
        }

        let _ = writeln!(
            out,
            "\nSentiment: {} (score: {:.2})",
            self.sentiment, self.sentiment_score
        );

        if !self.entities.is_empty() {
            out.push_str("\nPotential entities:\n");
            for (i, entity) in self.entities.iter().take(REPORT_ENTITIES).enumerate() {
                let _ = writeln!(out, "{}. {entity}", i + 1);
            }
        }

        if !self.key_sentences.is_empty() {
            out.push_str("\nKey content:\n");
            for (i, sentence) in self.key_sentences.iter().enumerate() {
                let _ = writeln!(out, "{}. {sentence}", i + 1);
            }
        }
        out
    }
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

fn count_words(text: &str) -> usize {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .count()
}

/// Alphanumeric runs are words; every other non-space char is its own token.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

fn is_word(token: &str) -> bool {
    token.chars().all(char::is_alphanumeric)
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|next| next.is_whitespace());
        if at_boundary {
            let s = current.trim();
            if !s.is_empty() {
                sentences.push(s.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn key_phrases(text: &str, sentences: &[String]) -> Vec<(String, f64)> {
    let words: Vec<String> = tokenize(&text.to_lowercase())
        .into_iter()
        .filter(|w| is_word(w) && !is_stop_word(w))
        .collect();
    let total = words.len() as f64;

    let mut freq: HashMap<&str, usize> = HashMap::new();
    for w in &words {
        *freq.entry(w.as_str()).or_default() += 1;
    }
    let scores: HashMap<&str, f64> = freq
        .iter()
        .map(|(w, &count)| {
            let count = count as f64;
            (*w, count * (total / (count + 1.0) + 1.0).ln())
        })
        .collect();
    let score_of = |w: &str| scores.get(w).copied().unwrap_or(0.0);

    let mut candidates: Vec<(String, f64)> = Vec::new();
    for sentence in sentences {
        let tokens = tokenize(&sentence.to_lowercase());
        for t in &tokens {
            if is_word(t) && !is_stop_word(t) {
                candidates.push((t.clone(), score_of(t)));
            }
        }
        for pair in tokens.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if is_word(a) && is_word(b) && !is_stop_word(a) {
                let score = (score_of(a) + score_of(b)) / 2.0 * 1.5;
                candidates.push((format!("{a} {b}"), score));
            }
        }
    }
    candidates.sort_by(|x, y| y.1.total_cmp(&x.1));

    let mut unique: Vec<(String, f64)> = Vec::new();
    for (phrase, score) in candidates {
        if unique.len() >= MAX_PHRASES {
            break;
        }
        if !unique.iter().any(|(kept, _)| kept.contains(&phrase)) {
            unique.push((phrase, score));
        }
    }
    unique
}

fn sentiment(text: &str) -> (f64, Sentiment) {
    let tokens = tokenize(&text.to_lowercase());
    let pos = tokens.iter().filter(|t| POSITIVE.contains(&t.as_str())).count();
    let neg = tokens.iter().filter(|t| NEGATIVE.contains(&t.as_str())).count();
    let total = pos + neg;
    let score = if total == 0 {
        0.0
    } else {
        (pos as f64 - neg as f64) / total as f64
    };
    let label = if score > SENTIMENT_THRESHOLD {
        Sentiment::Positive
    } else if score < -SENTIMENT_THRESHOLD {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    };
    (score, label)
}

fn starts_upper(token: &str) -> bool {
    token.chars().next().is_some_and(char::is_uppercase)
}

fn entities(sentences: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for sentence in sentences {
        let tokens = tokenize(sentence);
        // Sentence-initial words are capitalized anyway.
        for i in 1..tokens.len() {
            let word = &tokens[i];
            let candidate = starts_upper(word)
                && word.chars().all(char::is_alphabetic)
                && word.chars().count() > 1
                && !is_stop_word(&word.to_lowercase());
            if !candidate {
                continue;
            }
            let entity = match tokens.get(i + 1) {
                Some(next) if starts_upper(next) => format!("{word} {next}"),
                _ => word.clone(),
            };
            if seen.insert(entity.clone()) {
                found.push(entity);
            }
        }
    }
    found
}

fn key_sentences(sentences: &[String], phrases: &[(String, f64)]) -> Vec<String> {
    let mut scored: Vec<(&String, f64)> = sentences
        .iter()
        .map(|sentence| {
            let lower = sentence.to_lowercase();
            let mut score: f64 = phrases
                .iter()
                .filter(|(p, _)| lower.contains(p.as_str()))
                .map(|(_, s)| s)
                .sum();
            let len = tokenize(sentence).len();
            if len < 5 {
                score *= 0.5;
            } else if len > 25 {
                score *= 0.8;
            }
            (sentence, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
        .into_iter()
        .filter(|(_, score)| *score > 0.0)
        .take(KEY_SENTENCES)
        .map(|(s, _)| s.clone())
        .collect()
}

pub struct DocumentToolkit;

#[async_trait]
impl Toolkit for DocumentToolkit {
    fn capability(&self) -> Capability {
        Capability::Document
    }

    fn defs(&self) -> Vec<ToolDef> {
        vec![ToolDef::new(
            "analyze_document",
            "Analyze document text: statistics, key phrases, sentiment, entities and key sentences.",
            string_schema(&["text"], &[("text", "The document text to analyze")]),
        )]
    }

    async fn call(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        match name {
            "analyze_document" => Ok(DocumentAnalysis::analyze(str_arg(input, "text")?)?.render()),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
