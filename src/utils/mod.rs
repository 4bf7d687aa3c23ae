// src/utils/mod.rs
pub mod text; // tokenization, stopwords, char-safe truncation
