//! Text analysis for sift indexes.
//!
//! Named analyzers are built from configuration as a four-stage pipeline:
//! 1. `SimpleTokenizer` - splits on whitespace and punctuation
//! 2. `LowerCaser` - converts tokens to lowercase
//! 3. `RemoveLongFilter` - removes tokens longer than the configured limit
//! 4. `Stemmer` - applies language-specific stemming
//!
//! Two analyzers exist without configuration: `default` (no stemming) and `raw` (the whole
//! value is one token).
//!
//! Each index keeps an index-time and a query-time [`UpdatableAnalyzers`]. A request pins the
//! set it started with through an [`AnalyzerHandle`]; swapping in a new set never disturbs
//! requests already running, and the old set is dropped when its last handle goes away.

use std::{
    collections::{BTreeMap, HashMap},
    mem,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use sift_config::{AnalyzerDefinition, DEFAULT_ANALYZER};
use tantivy::tokenizer::{
    Language, LowerCaser, RawTokenizer, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer,
    TokenStream, TokenizerManager,
};
use tracing::info;

use crate::IndexError;

/// Name of the analyzer that keeps the whole value as one token.
pub const RAW_ANALYZER: &str = "raw";

/// Token length limit of the built-in `default` analyzer.
const DEFAULT_MAX_TOKEN_LENGTH: usize = 40;

/// Parses a stemmer language string into a Tantivy `Language`.
///
/// Supports lowercase language names matching Tantivy's `Language` enum.
/// Returns an error if the language is not recognized.
pub fn parse_language(name: &str) -> Result<Language, IndexError> {
    match name.to_lowercase().as_str() {
        "arabic" => Ok(Language::Arabic),
        "danish" => Ok(Language::Danish),
        "dutch" => Ok(Language::Dutch),
        "english" => Ok(Language::English),
        "finnish" => Ok(Language::Finnish),
        "french" => Ok(Language::French),
        "german" => Ok(Language::German),
        "greek" => Ok(Language::Greek),
        "hungarian" => Ok(Language::Hungarian),
        "italian" => Ok(Language::Italian),
        "norwegian" => Ok(Language::Norwegian),
        "portuguese" => Ok(Language::Portuguese),
        "romanian" => Ok(Language::Romanian),
        "russian" => Ok(Language::Russian),
        "spanish" => Ok(Language::Spanish),
        "swedish" => Ok(Language::Swedish),
        "tamil" => Ok(Language::Tamil),
        "turkish" => Ok(Language::Turkish),
        other => Err(IndexError::InvalidLanguage(other.to_string())),
    }
}

/// Builds a stemming analyzer.
pub fn build_analyzer(language: Language, max_token_length: usize) -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(RemoveLongFilter::limit(max_token_length))
        .filter(Stemmer::new(language))
        .build()
}

/// Builds an analyzer from its configuration.
pub fn build_analyzer_from_definition(
    definition: &AnalyzerDefinition,
) -> Result<TextAnalyzer, IndexError> {
    let language = parse_language(&definition.language)?;
    Ok(build_analyzer(language, definition.max_token_length))
}

/// Tokenizes `text`, returning the token texts in order.
pub fn tokenize(analyzer: &TextAnalyzer, text: &str) -> Vec<String> {
    let mut analyzer = analyzer.clone();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while let Some(token) = stream.next() {
        tokens.push(token.text.clone());
    }
    tokens
}

/// One immutable generation of named analyzers.
pub struct AnalyzerSet {
    /// Analyzers by name, built-ins included.
    analyzers: HashMap<String, TextAnalyzer>,
    /// Position of this set in the update sequence.
    generation: u64,
}

impl AnalyzerSet {
    /// Builds a set from definitions plus the built-in analyzers.
    fn build(
        definitions: &BTreeMap<String, AnalyzerDefinition>,
        generation: u64,
    ) -> Result<Self, IndexError> {
        let mut analyzers = HashMap::with_capacity(definitions.len() + 2);
        analyzers.insert(
            DEFAULT_ANALYZER.to_string(),
            TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(RemoveLongFilter::limit(DEFAULT_MAX_TOKEN_LENGTH))
                .filter(LowerCaser)
                .build(),
        );
        analyzers.insert(
            RAW_ANALYZER.to_string(),
            TextAnalyzer::from(RawTokenizer::default()),
        );
        for (name, definition) in definitions {
            analyzers.insert(name.clone(), build_analyzer_from_definition(definition)?);
        }
        Ok(Self {
            analyzers,
            generation,
        })
    }

    /// Looks up an analyzer by name.
    pub fn get(&self, name: &str) -> Option<&TextAnalyzer> {
        self.analyzers.get(name)
    }

    /// Position of this set in the update sequence.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Registers every analyzer with a tokenizer manager.
    fn register(&self, tokenizers: &TokenizerManager) {
        for (name, analyzer) in &self.analyzers {
            tokenizers.register(name, analyzer.clone());
        }
    }
}

/// A pinned analyzer set. The set stays alive until every handle is dropped.
#[derive(Clone)]
pub struct AnalyzerHandle {
    /// The pinned set.
    set: Arc<AnalyzerSet>,
}

impl AnalyzerHandle {
    /// Looks up an analyzer by name.
    pub fn get(&self, name: &str) -> Option<&TextAnalyzer> {
        self.set.get(name)
    }

    /// Tokenizes text with the named analyzer, or the raw analyzer if unknown.
    pub fn tokenize(&self, analyzer: &str, text: &str) -> Vec<String> {
        match self.set.get(analyzer) {
            Some(analyzer) => tokenize(analyzer, text),
            None => vec![text.to_string()],
        }
    }

    /// Generation of the pinned set.
    pub fn generation(&self) -> u64 {
        self.set.generation()
    }
}

/// Mutable part of [`UpdatableAnalyzers`].
struct AnalyzerSlots {
    /// Current set handed out by `acquire`.
    current: Arc<AnalyzerSet>,
    /// Sets replaced by an update, tracked until their last handle drops.
    retired: Vec<Weak<AnalyzerSet>>,
}

/// A hot-swappable analyzer set with reference-counted generations.
pub struct UpdatableAnalyzers {
    /// Current and retired sets.
    slots: Mutex<AnalyzerSlots>,
    /// Tokenizer manager kept in sync with the current set (index-time analyzers only).
    tokenizers: Option<TokenizerManager>,
}

impl UpdatableAnalyzers {
    /// Creates query-time analyzers.
    pub fn new(definitions: &BTreeMap<String, AnalyzerDefinition>) -> Result<Self, IndexError> {
        Ok(Self {
            slots: Mutex::new(AnalyzerSlots {
                current: Arc::new(AnalyzerSet::build(definitions, 0)?),
                retired: Vec::new(),
            }),
            tokenizers: None,
        })
    }

    /// Creates index-time analyzers registered with the engine's tokenizer manager.
    pub fn registered(
        definitions: &BTreeMap<String, AnalyzerDefinition>,
        tokenizers: TokenizerManager,
    ) -> Result<Self, IndexError> {
        let set = AnalyzerSet::build(definitions, 0)?;
        set.register(&tokenizers);
        Ok(Self {
            slots: Mutex::new(AnalyzerSlots {
                current: Arc::new(set),
                retired: Vec::new(),
            }),
            tokenizers: Some(tokenizers),
        })
    }

    /// Pins the current set for the duration of a request.
    pub fn acquire(&self) -> AnalyzerHandle {
        AnalyzerHandle {
            set: Arc::clone(&self.slots.lock().current),
        }
    }

    /// Replaces the current set. Requests holding the old set keep using it.
    pub fn update(
        &self,
        definitions: &BTreeMap<String, AnalyzerDefinition>,
    ) -> Result<(), IndexError> {
        let mut slots = self.slots.lock();
        let generation = slots.current.generation() + 1;
        let set = Arc::new(AnalyzerSet::build(definitions, generation)?);
        if let Some(tokenizers) = &self.tokenizers {
            set.register(tokenizers);
        }
        let old = mem::replace(&mut slots.current, set);
        slots.retired.retain(|weak| weak.strong_count() > 0);
        if Arc::strong_count(&old) > 1 {
            slots.retired.push(Arc::downgrade(&old));
        }
        info!(generation, analyzers = definitions.len(), "analyzers updated");
        Ok(())
    }

    /// Number of live sets: the current one plus retired sets still pinned by requests.
    pub fn active_count(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.retired.retain(|weak| weak.strong_count() > 0);
        slots.retired.len() + 1
    }
}
