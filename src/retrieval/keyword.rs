//! Lexical relevance scoring for hybrid re-ranking

use crate::corpus::text::{contains_word, tokenize};

const TITLE_HIT: f32 = 3.0;
const BODY_HIT: f32 = 1.0;
const TITLE_PHRASE: f32 = 2.0;
const BODY_PHRASE: f32 = 0.7;
const TITLE_SYNONYM: f32 = 1.0;
const BODY_SYNONYM: f32 = 0.3;

/// Domain synonyms used for gentle query expansion
const SYNONYMS: &[(&str, &[&str])] = &[
    ("cargo", &["resupply", "supplies", "crs", "dragon", "station", "iss"]),
    (
        "station",
        &["iss", "dragon", "crs", "resupply", "cargo", "international space station"],
    ),
    ("resupply", &["crs", "dragon", "cargo", "iss", "station"]),
    ("crs", &["resupply", "dragon", "cargo", "iss", "station"]),
    ("dragon", &["crs", "resupply", "station", "iss", "cargo"]),
    ("iss", &["station", "dragon", "crs", "resupply", "cargo"]),
    ("moon", &["lunar", "artemis"]),
    ("lunar", &["moon", "artemis"]),
    ("artemis", &["moon", "lunar"]),
];

/// Query terms that make station/cargo vocabulary mandatory in a match
const MUST_TERMS: &[&str] = &["cargo", "resupply", "dragon", "crs", "station", "iss"];

fn synonyms(token: &str) -> &'static [&'static str] {
    SYNONYMS
        .iter()
        .find(|(word, _)| *word == token)
        .map(|(_, syns)| *syns)
        .unwrap_or(&[])
}

/// Unnormalized keyword score of an article for a query
///
/// Query tokens count three times per title occurrence and once per body
/// occurrence. The whole query phrase and domain synonyms add bonuses. The
/// phrase is matched as a plain substring, so "launch" also credits "launches".
pub fn keyword_score(query: &str, title: &str, body: &str) -> f32 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }

    let title_tokens = tokenize(title);
    let body_tokens = tokenize(body);
    let hits = |tokens: &[String]| -> f32 {
        query_tokens
            .iter()
            .map(|q| tokens.iter().filter(|t| *t == q).count())
            .sum::<usize>() as f32
    };
    let mut score = TITLE_HIT * hits(&title_tokens) + BODY_HIT * hits(&body_tokens);

    let phrase = query_tokens.join(" ");
    if title.to_lowercase().contains(&phrase) {
        score += TITLE_PHRASE;
    }
    if body.to_lowercase().contains(&phrase) {
        score += BODY_PHRASE;
    }

    for token in &query_tokens {
        for synonym in synonyms(token) {
            if contains_word(title, synonym) {
                score += TITLE_SYNONYM;
            } else if contains_word(body, synonym) {
                score += BODY_SYNONYM;
            }
        }
    }

    score
}

/// False when the query names a station/cargo term and the article mentions none
pub fn passes_must_have(query: &str, title: &str, body: &str) -> bool {
    let query_tokens = tokenize(query);
    if !query_tokens.iter().any(|t| MUST_TERMS.contains(&t.as_str())) {
        return true;
    }
    MUST_TERMS
        .iter()
        .any(|term| contains_word(title, term) || contains_word(body, term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_hits_outweigh_body_hits() {
        let in_title = keyword_score("comet", "Comet spotted", "Astronomers report");
        let in_body = keyword_score("comet", "Astronomers report", "A comet was spotted");
        assert!(in_title > in_body);
        assert_eq!(keyword_score("the", "The comet", ""), 0.0);
    }

    #[test]
    fn test_phrase_and_synonym_bonuses() {
        // 3 + 3 title hits, +2 phrase
        assert_eq!(keyword_score("rocket launch", "Rocket launch today", ""), 8.0);
        // "moon" expands to "artemis" found in the title
        assert_eq!(keyword_score("moon", "Artemis crew named", ""), 1.0);
        assert!((keyword_score("moon", "Crew named", "for Artemis II") - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_phrase_matches_inside_longer_words() {
        // No token hit for "launches", but the phrase is a substring
        assert_eq!(keyword_score("launch", "SpaceX launches Starlink", ""), 2.0);
        assert!((keyword_score("launch", "", "Relaunched booster") - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_must_have_gate() {
        assert!(passes_must_have("comet", "Anything", ""));
        assert!(passes_must_have("cargo run", "Dragon docks", ""));
        assert!(!passes_must_have("station cargo", "Comet spotted", "near Jupiter"));
    }
}
