// nllb-sidecar: translation engine capability (spec.md §9 Design Notes)
//
// The actual NLLB/CTranslate2 engine is out of scope; it is consumed
// behind these traits. A deployment wires in a real implementation at
// startup. The `EchoTranslator` here is a reference/test double used by
// the test suite and as a fallback so the server is exercisable without
// a real model.

use async_trait::async_trait;

use crate::error::SidecarResult;
use crate::models::{ComputeType, Device};

/// A loaded, ready-to-use translation model.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source_lang` to `target_lang`, returning
    /// the translated text, the number of output tokens produced, and
    /// the wall-clock time spent generating, in milliseconds.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> SidecarResult<TranslationOutput>;

    /// Release any engine-held resources (weights, KV cache arenas).
    /// Called before dropping the handle during unload/stepdown.
    fn unload(&self);
}

/// Static query for the compute types the engine actually supports on a
/// given device (mirrors `ctranslate2.get_supported_compute_types`).
/// Implemented as a free function rather than a method on a loaded
/// `Translator` since the query has to run before a model is loaded, to
/// pick the compute type in the first place.
pub trait SupportedComputeTypes: Send + Sync {
    fn supported_compute_types(&self, device: Device) -> Vec<ComputeType>;
}

/// Reference implementation: claims support for every compute type the
/// catalog knows about, on any device.
pub struct EchoEngineCapabilities;

impl SupportedComputeTypes for EchoEngineCapabilities {
    fn supported_compute_types(&self, _device: Device) -> Vec<ComputeType> {
        crate::models::ALL_COMPUTE_TYPES.to_vec()
    }
}

pub struct TranslationOutput {
    pub text: String,
    pub output_token_count: usize,
    pub generate_ms: f64,
}

/// Tokenizer companion, kept separate from `Translator` since the
/// original loads sentencepiece independently of the CTranslate2 model
/// and the two have distinct lifecycle/fallback paths.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<String>;
    fn decode(&self, tokens: &[String]) -> String;
}

/// Reference implementation used when no real engine is configured.
/// Echoes the input tagged with the target language, at a token count
/// proportional to whitespace-split word count, just well-formed enough
/// to exercise the server's metrics and stepdown paths in tests.
pub struct EchoTranslator;

#[async_trait]
impl Translator for EchoTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
    ) -> SidecarResult<TranslationOutput> {
        let start = std::time::Instant::now();
        let output_token_count = text.split_whitespace().count().max(1);
        let text = format!("[{target_lang}] {text}");
        Ok(TranslationOutput {
            text,
            output_token_count,
            generate_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn unload(&self) {}
}

pub struct EchoTokenizer;

impl Tokenizer for EchoTokenizer {
    fn encode(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|s| s.to_string()).collect()
    }

    fn decode(&self, tokens: &[String]) -> String {
        tokens.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_translator_prefixes_target_lang() {
        let t = EchoTranslator;
        let out = t.translate("hello world", "eng_Latn", "fra_Latn").await.unwrap();
        assert!(out.text.starts_with("[fra_Latn]"));
        assert_eq!(out.output_token_count, 2);
    }
}
