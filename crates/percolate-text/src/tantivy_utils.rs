use std::str::FromStr;

use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

const STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalyzerKind {
	#[default]
	Standard,
	Stopwords,
}

impl FromStr for AnalyzerKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"standard" => Ok(AnalyzerKind::Standard),
			"stopwords" | "text_with_stopwords" => Ok(AnalyzerKind::Stopwords),
			other => Err(format!("unknown analyzer '{other}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedToken {
	pub text: String,
	pub position: usize,
}

/// Tantivy tokenizer chain used for both documents and query text.
#[derive(Clone)]
pub struct Analyzer {
	kind: AnalyzerKind,
	inner: TextAnalyzer,
}

impl Analyzer {
	pub fn new(kind: AnalyzerKind) -> Self {
		let inner = match kind {
			AnalyzerKind::Standard => TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build(),
			AnalyzerKind::Stopwords => TextAnalyzer::builder(SimpleTokenizer::default())
				.filter(LowerCaser)
				.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
				.build(),
		};
		Self { kind, inner }
	}

	pub fn kind(&self) -> AnalyzerKind { self.kind }

	pub fn analyze(&mut self, text: &str) -> Vec<AnalyzedToken> {
		let mut stream = self.inner.token_stream(text);
		let mut tokens = Vec::new();
		while stream.advance() {
			let token = stream.token();
			tokens.push(AnalyzedToken { text: token.text.clone(), position: token.position });
		}
		tokens
	}
}

impl Default for Analyzer {
	fn default() -> Self { Self::new(AnalyzerKind::Standard) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn standard_lowercases_and_splits() {
		let mut analyzer = Analyzer::default();
		let tokens: Vec<String> = analyzer.analyze("Virginia POTTS, b-c").into_iter().map(|t| t.text).collect();
		assert_eq!(tokens, vec!["virginia", "potts", "b", "c"]);
	}

	#[test]
	fn stopwords_are_removed_but_positions_kept() {
		let mut analyzer = Analyzer::new(AnalyzerKind::Stopwords);
		let tokens = analyzer.analyze("the quick fox");
		assert_eq!(tokens.len(), 2);
		assert_eq!(tokens[0].text, "quick");
		assert_eq!(tokens[1].position, 2);
	}
}
