// src/keywords/defaults.rs
use super::types::Keyword;

/// Built-in keywords used when neither the live source nor a usable cache is available.
///
/// Tier 1 holds the headline terms, tier 2 the broader AI vocabulary, tier 3 the technology
/// terms. Never empty.
pub fn default_keywords() -> Vec<Keyword> {
    const TABLE: &[(&str, &str, u32)] = &[
        ("AI", "AI", 1),
        ("인공지능", "AI", 1),
        ("ChatGPT", "AI", 1),
        ("생성형 AI", "AI", 1),
        ("머신러닝", "AI", 1),
        ("artificial intelligence", "AI", 2),
        ("machine learning", "AI", 2),
        ("deep learning", "AI", 2),
        ("OpenAI", "AI", 2),
        ("LLM", "AI", 2),
        ("딥러닝", "AI", 2),
        ("technology", "TECH", 3),
        ("스타트업", "TECH", 3),
        ("자율주행", "TECH", 3),
    ];
    TABLE
        .iter()
        .map(|(text, category, priority)| Keyword::new(*text, *category, *priority))
        .collect()
}
