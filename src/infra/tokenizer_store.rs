// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Finds, builds and persists the HuggingFace tokenizer, and
// wraps it as the TextCodec both loops use.
//
// Lookup order for a run:
//   1. an explicit tokenizer.json (e.g. the GPT-2 one)
//   2. tokenizer.json inside the pretrained checkpoint dir
//   3. build a word-level tokenizer from the training corpus
//
// The output checkpoint dir is never read: a tokenizer left
// there by an earlier run may not match the current corpus.
//
// The word-level tokenizer is written as tokenizer JSON and
// loaded back, which keeps it in the exact format that
// Tokenizer::from_file() reads for the `generate` command.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokenizers::{AddedToken, Tokenizer};

use crate::domain::error::{FinetuneError, FinetuneResult};
use crate::domain::traits::TextCodec;

pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Special token registered for padding.
pub const PAD_TOKEN: &str = "<|pad|>";

/// Token that ends a generation when the vocabulary has one.
pub const EOS_TOKEN: &str = "<|endoftext|>";

pub struct TokenizerStore {
    dir: Option<PathBuf>,
}

impl TokenizerStore {
    /// `dir` is where a built tokenizer gets saved; `None` keeps
    /// it in memory only.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Load the first existing candidate file, or build a new
    /// word-level tokenizer from `texts`. Nothing is written;
    /// call save() once the pad token has been added.
    pub fn load_or_build(
        &self,
        candidates: &[PathBuf],
        texts:      &[String],
        vocab_size: usize,
    ) -> FinetuneResult<Tokenizer> {
        if let Some(path) = candidates.iter().find(|p| p.exists()) {
            tracing::info!("Loading tokenizer from '{}'", path.display());
            return Self::load(path);
        }
        tracing::info!("Building new word-level tokenizer (vocab_size={})", vocab_size);
        build_word_level(texts, vocab_size)
    }

    pub fn load(path: &Path) -> FinetuneResult<Tokenizer> {
        Tokenizer::from_file(path).map_err(|e| {
            FinetuneError::Tokenizer(format!("cannot load '{}': {e}", path.display()))
        })
    }

    /// Write `tokenizer` to `<dir>/tokenizer.json`. No-op without a dir.
    pub fn save(&self, tokenizer: &Tokenizer) -> FinetuneResult<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        std::fs::create_dir_all(dir).map_err(|e| FinetuneError::io(dir, e))?;
        let path = dir.join(TOKENIZER_FILE);
        tokenizer
            .save(&path, true)
            .map_err(|e| FinetuneError::Tokenizer(format!("cannot write '{}': {e}", path.display())))?;
        tracing::debug!("Saved tokenizer to '{}'", path.display());
        Ok(())
    }
}

/// Word-level tokenizer over the `vocab_size - 1` most frequent
/// lowercased words of `texts`; id 0 is `[UNK]`.
///
/// `[UNK]` is also an added token, matched before normalization,
/// so a decoded `[UNK]` encodes back to id 0 instead of to the
/// word pieces of its spelling.
pub fn build_word_level(texts: &[String], vocab_size: usize) -> FinetuneResult<Tokenizer> {
    // ── Step 1: Count word frequencies ────────────────────────────────────────
    let mut freq: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for word in split_words(&text.to_lowercase()) {
            *freq.entry(word).or_insert(0) += 1;
        }
    }

    // Most frequent first, ties alphabetical so the ids are stable
    let mut words: Vec<(String, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(vocab_size.saturating_sub(1));

    // ── Step 2: Build vocab JSON ──────────────────────────────────────────────
    let mut vocab = serde_json::Map::new();
    vocab.insert("[UNK]".to_string(), serde_json::json!(0));
    for (id, (word, _)) in words.iter().enumerate() {
        vocab.insert(word.clone(), serde_json::json!(id + 1));
    }

    // ── Step 3: HuggingFace tokenizer JSON ────────────────────────────────────
    let tokenizer_json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [{
            "id": 0,
            "content": "[UNK]",
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": false
        }],
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": true
        },
        "pre_tokenizer": {
            "type": "Whitespace"
        },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    });

    Tokenizer::from_str(&tokenizer_json.to_string())
        .map_err(|e| FinetuneError::Tokenizer(format!("cannot build word-level tokenizer: {e}")))
}

/// Same split the Whitespace pre-tokenizer applies: runs of word
/// characters, and runs of other non-space characters.
fn split_words(text: &str) -> Vec<String> {
    let mut out     = Vec::new();
    let mut current = String::new();
    let mut in_word = false;

    for c in text.chars() {
        if c.is_whitespace() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        let word_char = c.is_alphanumeric() || c == '_';
        if !current.is_empty() && word_char != in_word {
            out.push(std::mem::take(&mut current));
        }
        in_word = word_char;
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

// ─── DialogueTokenizer ────────────────────────────────────────────────────────
/// A HuggingFace tokenizer with a dedicated pad token.
#[derive(Clone)]
pub struct DialogueTokenizer {
    inner:      Tokenizer,
    pad_id:     u32,
    vocab_size: usize,
}

impl DialogueTokenizer {
    /// Register `<|pad|>` as a special token. Fails if its id is
    /// already used by a regular vocabulary entry.
    pub fn new(mut inner: Tokenizer) -> FinetuneResult<Self> {
        inner.add_special_tokens(&[AddedToken::from(PAD_TOKEN, true)]);
        let pad_id = inner
            .token_to_id(PAD_TOKEN)
            .ok_or_else(|| FinetuneError::Tokenizer("pad token was not registered".to_string()))?;

        if inner.get_vocab(false).values().any(|&id| id == pad_id) {
            return Err(FinetuneError::Tokenizer(format!(
                "pad id {pad_id} collides with a vocabulary token"
            )));
        }

        let vocab_size = inner
            .get_vocab(true)
            .values()
            .max()
            .map_or(0, |&max| max as usize + 1);

        Ok(Self { inner, pad_id, vocab_size })
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.inner
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.inner.token_to_id(EOS_TOKEN)
    }
}

impl TextCodec for DialogueTokenizer {
    fn encode(&self, text: &str) -> FinetuneResult<Vec<u32>> {
        let enc = self
            .inner
            .encode(text, false)
            .map_err(|e| FinetuneError::Tokenizer(format!("encode: {e}")))?;
        Ok(enc.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> FinetuneResult<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| FinetuneError::Tokenizer(format!("decode: {e}")))
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// Small word-level tokenizer over a fixed dialogue corpus.
#[cfg(test)]
pub fn test_tokenizer() -> DialogueTokenizer {
    let corpus: Vec<String> = [
        "hello there", "hi back", "how are you", "fine thanks",
        "hello", "hi", "good morning", "see you later",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    DialogueTokenizer::new(build_word_level(&corpus, 100).unwrap()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words_matches_whitespace_pretokenizer() {
        assert_eq!(split_words("hi, you there!"), vec!["hi", ",", "you", "there", "!"]);
    }

    #[test]
    fn test_pad_id_outside_vocabulary() {
        let tok = test_tokenizer();
        let base = tok.inner().get_vocab(false);
        assert!(!base.values().any(|&id| id == tok.pad_id()));
        assert!((tok.pad_id() as usize) < tok.vocab_size());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let tok = test_tokenizer();
        assert_eq!(tok.encode("hello there").unwrap(), tok.encode("hello there").unwrap());
        assert_eq!(tok.encode("hi back").unwrap().len(), 2);
    }

    #[test]
    fn test_decode_encode_is_stable() {
        let tok = test_tokenizer();
        for text in ["Hello   there", "how are you", "see you later, hi", "unknownword fine"] {
            let once  = tok.decode(&tok.encode(text).unwrap()).unwrap();
            let twice = tok.decode(&tok.encode(&once).unwrap()).unwrap();
            assert_eq!(once, twice, "not stable for '{text}'");
        }
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let tok = test_tokenizer();
        assert_eq!(tok.encode("zebra").unwrap(), vec![0]);
    }

    #[test]
    fn test_decoded_unk_encodes_back_to_unk() {
        let tok = test_tokenizer();
        assert_eq!(tok.encode("[UNK]").unwrap(), vec![0]);

        let ids  = tok.encode("zebra says hi").unwrap();
        let text = tok.decode(&ids).unwrap();
        assert_eq!(text.split_whitespace().count(), 3);
        assert_eq!(tok.encode(&text).unwrap(), ids);
    }

    #[test]
    fn test_vocab_size_limit() {
        let texts = vec!["a a a b b c".to_string()];
        let tok   = build_word_level(&texts, 3).unwrap();
        // [UNK] + the two most frequent words
        assert_eq!(tok.get_vocab_size(false), 3);
        assert_eq!(tok.token_to_id("a"), Some(1));
        assert_eq!(tok.token_to_id("c"), None);
    }

    #[test]
    fn test_save_and_reload_keeps_pad_id() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(Some(dir.path().to_path_buf()));
        let tok   = test_tokenizer();
        store.save(tok.inner()).unwrap();

        let reloaded = TokenizerStore::load(&dir.path().join(TOKENIZER_FILE)).unwrap();
        let reloaded = DialogueTokenizer::new(reloaded).unwrap();
        assert_eq!(reloaded.pad_id(), tok.pad_id());
        assert_eq!(reloaded.encode("fine thanks").unwrap(), tok.encode("fine thanks").unwrap());
    }

    #[test]
    fn test_load_or_build_prefers_existing_file() {
        let dir   = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(Some(dir.path().to_path_buf()));
        let built = store
            .load_or_build(&[], &["one two three".to_string()], 10)
            .unwrap();
        assert!(!dir.path().join(TOKENIZER_FILE).exists());
        store.save(&built).unwrap();

        let loaded = store
            .load_or_build(&[dir.path().join(TOKENIZER_FILE)], &["other words".to_string()], 10)
            .unwrap();
        assert_eq!(loaded.get_vocab(false), built.get_vocab(false));
    }
}
