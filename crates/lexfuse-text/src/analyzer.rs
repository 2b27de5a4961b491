use serde::{Deserialize, Serialize};
use std::fmt;
use tantivy::tokenizer::{
	AsciiFoldingFilter, Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer,
	TokenStream,
};

use lexfuse_core::config::{SparseConfig, TextLanguage};

/// Tokens longer than this (in bytes) are dropped; they are almost always noise from OCR or tables.
const MAX_TOKEN_LEN: usize = 40;

const SPANISH_STOP_WORDS: &[&str] = &[
	"a", "al", "algo", "algunas", "algunos", "ante", "antes", "como", "con", "contra", "cual",
	"cuál", "cuales", "cuáles", "cuando", "cuándo", "de", "del", "desde", "donde", "dónde",
	"durante", "e", "el", "él", "ella", "ellas", "ellos", "en", "entre", "era", "es", "esa", "esas",
	"ese", "eso", "esos", "esta", "está", "estas", "este", "esto", "estos", "fue", "ha", "han",
	"hasta", "hay", "la", "las", "le", "les", "lo", "los", "mas", "más", "me", "mi", "muy", "ni",
	"no", "nos", "o", "otra", "otro", "para", "pero", "por", "porque", "qué", "que", "quien",
	"quién", "se", "sea", "ser", "si", "sí", "sin", "sobre", "son", "su", "sus", "también", "te",
	"tiene", "todo", "todos", "tu", "un", "una", "uno", "unos", "y", "ya",
];

const ENGLISH_STOP_WORDS: &[&str] = &[
	"a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
	"its", "of", "on", "that", "the", "to", "was", "will", "with", "or", "but", "not", "this",
	"these", "they", "them", "their", "there", "then", "than", "so", "if", "when", "where", "why",
	"how", "what", "which", "who", "whom", "whose", "can", "could", "should", "would", "may",
	"might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

/// Settings the analyzer chain is built from. Persisted with the index so a
/// loaded index is never queried with a different tokenization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerConfig {
	pub language: TextLanguage,
	pub stopwords: bool,
	pub stemming: bool,
}

impl From<&SparseConfig> for AnalyzerConfig {
	fn from(config: &SparseConfig) -> Self {
		Self { language: config.language, stopwords: config.stopwords, stemming: config.stemming }
	}
}

impl Default for AnalyzerConfig {
	fn default() -> Self {
		AnalyzerConfig::from(&SparseConfig::default())
	}
}

/// SimpleTokenizer -> RemoveLong -> LowerCaser -> [stop words] -> AsciiFolding -> [stemmer]
#[derive(Clone)]
pub struct Analyzer {
	config: AnalyzerConfig,
	inner: TextAnalyzer,
}

impl fmt::Debug for Analyzer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Analyzer").field("config", &self.config).finish()
	}
}

impl Analyzer {
	pub fn new(config: AnalyzerConfig) -> Self {
		Self { config, inner: build_text_analyzer(&config) }
	}

	pub fn config(&self) -> &AnalyzerConfig {
		&self.config
	}

	/// Terms in text order; repeated terms are kept.
	pub fn tokens(&self, text: &str) -> Vec<String> {
		// token_stream needs &mut, so each call works on its own copy of the chain.
		let mut analyzer = self.inner.clone();
		let mut stream = analyzer.token_stream(text);
		let mut tokens = Vec::new();
		while stream.advance() {
			tokens.push(stream.token().text.clone());
		}
		tokens
	}
}

fn stop_words(language: TextLanguage) -> Vec<String> {
	let words = match language {
		TextLanguage::Spanish => SPANISH_STOP_WORDS,
		TextLanguage::English => ENGLISH_STOP_WORDS,
	};
	words.iter().map(|s| s.to_string()).collect()
}

fn build_text_analyzer(config: &AnalyzerConfig) -> TextAnalyzer {
	let language = match config.language {
		TextLanguage::Spanish => Language::Spanish,
		TextLanguage::English => Language::English,
	};
	let base = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
		.filter(LowerCaser);
	match (config.stopwords, config.stemming) {
		(true, true) => base
			.filter(StopWordFilter::remove(stop_words(config.language)))
			.filter(AsciiFoldingFilter)
			.filter(Stemmer::new(language))
			.build(),
		(true, false) => base
			.filter(StopWordFilter::remove(stop_words(config.language)))
			.filter(AsciiFoldingFilter)
			.build(),
		(false, true) => base.filter(AsciiFoldingFilter).filter(Stemmer::new(language)).build(),
		(false, false) => base.filter(AsciiFoldingFilter).build(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn plain() -> AnalyzerConfig {
		AnalyzerConfig { language: TextLanguage::Spanish, stopwords: false, stemming: false }
	}

	#[test]
	fn lowercases_and_folds_accents() {
		let analyzer = Analyzer::new(plain());
		assert_eq!(analyzer.tokens("VIÁTICO por Día"), vec!["viatico", "por", "dia"]);
	}

	#[test]
	fn spanish_stop_words_are_removed_before_folding() {
		let analyzer = Analyzer::new(AnalyzerConfig { stopwords: true, ..plain() });
		assert_eq!(analyzer.tokens("¿Cuál es el monto máximo para viáticos?"), vec!["monto", "maximo", "viaticos"]);
	}

	#[test]
	fn stemming_conflates_inflections() {
		let analyzer = Analyzer::new(AnalyzerConfig { stemming: true, ..plain() });
		assert_eq!(analyzer.tokens("viáticos"), analyzer.tokens("viático"));
	}

	#[test]
	fn stop_word_only_text_has_no_tokens() {
		let analyzer = Analyzer::new(AnalyzerConfig::default());
		assert!(analyzer.tokens("de la y el").is_empty());
		assert!(analyzer.tokens("").is_empty());
	}

	#[test]
	fn overlong_tokens_are_dropped() {
		let analyzer = Analyzer::new(plain());
		let noise = "x".repeat(64);
		assert_eq!(analyzer.tokens(&format!("monto {noise}")), vec!["monto"]);
	}

	#[test]
	fn stop_word_lists_are_lowercase_and_unique() {
		for words in [SPANISH_STOP_WORDS, ENGLISH_STOP_WORDS] {
			let unique: std::collections::HashSet<_> = words.iter().collect();
			assert_eq!(unique.len(), words.len());
			assert!(words.iter().all(|w| !w.is_empty() && w.to_lowercase() == *w), "{words:?}");
		}
	}

	#[test]
	fn english_chain_uses_english_stop_words() {
		let analyzer = Analyzer::new(AnalyzerConfig { language: TextLanguage::English, stopwords: true, stemming: false });
		assert_eq!(analyzer.tokens("The maximum of the allowance"), vec!["maximum", "allowance"]);
	}
}
