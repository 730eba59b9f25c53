//! Embedder (component F).
//!
//! Turns a list of parsed nodes into a `{qualifiedName -> vector}` map,
//! minimizing calls to the external embedding service via skip-embed on an
//! unchanged body hash, then batches and retries transient failures with
//! exponential backoff and jitter.
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use codetrace_core::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tiktoken_rs::CoreBPE;
use tracing::warn;

pub const TOKEN_LIMIT: usize = 8191;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const JITTER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct EmbedInput {
    pub qualified_name: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub source_text: String,
}

#[derive(Debug, Clone)]
pub struct PreparedText {
    pub qualified_name: String,
    pub text: String,
    pub truncated: bool,
}

/// Assemble newline-separated text from signature, docstring, source,
/// omitting empty fields entirely, and truncate to fit the model's
/// per-input token limit.
pub fn prepare_text(input: &EmbedInput) -> PreparedText {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(sig) = input.signature.as_deref().filter(|s| !s.is_empty()) {
        parts.push(sig);
    }
    if let Some(doc) = input.docstring.as_deref().filter(|s| !s.is_empty()) {
        parts.push(doc);
    }
    let has_source = !input.source_text.is_empty();
    if has_source {
        parts.push(&input.source_text);
    }

    let full = parts.join("\n");
    if count_tokens(&full) <= TOKEN_LIMIT {
        return PreparedText {
            qualified_name: input.qualified_name.clone(),
            text: full,
            truncated: false,
        };
    }

    // Preserve signature + docstring, truncate source from the end to fit.
    let head: Vec<&str> = parts[..parts.len() - if has_source { 1 } else { 0 }].to_vec();
    let head_text = head.join("\n");
    if !has_source || count_tokens(&head_text) >= TOKEN_LIMIT {
        // signature+docstring alone exceed the limit: hard-truncate.
        return PreparedText {
            qualified_name: input.qualified_name.clone(),
            text: truncate_to_tokens(&head_text, TOKEN_LIMIT),
            truncated: true,
        };
    }

    let budget = TOKEN_LIMIT.saturating_sub(count_tokens(&head_text) + 1);
    let truncated_source = truncate_to_tokens(&input.source_text, budget);
    let mut text = head_text;
    text.push('\n');
    text.push_str(&truncated_source);

    PreparedText {
        qualified_name: input.qualified_name.clone(),
        text,
        truncated: true,
    }
}

/// `text-embedding-3-small`'s tokenizer (`cl100k_base`), built once and
/// reused for every call — `cl100k_base()` loads and parses the BPE rank
/// table, which is too costly to repeat per node.
fn bpe() -> &'static CoreBPE {
    static BPE: OnceLock<CoreBPE> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base ranks are bundled with tiktoken-rs"))
}

/// Exact token count using the embedding model's own tokenizer, per spec's
/// "count tokens using the same tokenizer the external model uses".
fn count_tokens(text: &str) -> usize {
    bpe().encode_ordinary(text).len()
}

/// Same tokenizer, exposed for the context assembler's budget packing so
/// both components agree on what a "token" costs.
pub fn count_tokens_for_context(text: &str) -> usize {
    count_tokens(text)
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let tokens = bpe().encode_ordinary(text);
    if tokens.len() <= max_tokens {
        return text.to_string();
    }
    bpe().decode(tokens[..max_tokens].to_vec()).unwrap_or_default()
}

pub fn body_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cosine similarity; returns 0 for mismatched lengths, empty vectors, or
/// zero-magnitude operands.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[derive(Debug, Clone)]
pub struct StoredEmbeddingState {
    pub body_hash: String,
    pub embedding: Vec<f32>,
}

pub struct Embedder {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
    endpoint: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

impl Embedder {
    pub fn new(api_key: Option<String>, model: String, batch_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model,
            batch_size,
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Embed `inputs`, skipping any whose prepared-text body hash matches
    /// `previous` and that already has a stored embedding. Returns a map
    /// keyed by qualified name; input order is preserved within each batch
    /// sent to the service.
    pub async fn embed_changed(
        &self,
        inputs: &[EmbedInput],
        previous: &HashMap<String, StoredEmbeddingState>,
    ) -> Result<HashMap<String, Vec<f32>>> {
        if self.api_key.is_none() {
            warn!("no embedding API key configured; skipping embedding for this run");
            return Ok(HashMap::new());
        }

        let mut results = HashMap::new();
        let mut to_embed: Vec<PreparedText> = Vec::new();

        for input in inputs {
            let prepared = prepare_text(input);
            let hash = body_hash(&prepared.text);
            match previous.get(&input.qualified_name) {
                Some(state) if state.body_hash == hash => {
                    results.insert(input.qualified_name.clone(), state.embedding.clone());
                }
                _ => to_embed.push(prepared),
            }
        }

        for batch in to_embed.chunks(self.batch_size.max(1)) {
            let vectors = self.embed_batch_with_retry(batch).await?;
            for (prepared, vector) in batch.iter().zip(vectors.into_iter()) {
                results.insert(prepared.qualified_name.clone(), vector);
            }
        }

        Ok(results)
    }

    async fn embed_batch_with_retry(&self, batch: &[PreparedText]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let mut attempt: u32 = 0;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            attempt += 1;
            match self.call_embedding_api(&texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let sleep_for = jittered(backoff);
                    warn!(attempt, backoff_ms = sleep_for.as_millis() as u64, "embedding call failed, retrying");
                    tokio::time::sleep(sleep_for).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_embedding_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self.api_key.as_deref().unwrap_or_default();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| Error::Transient(format!("embedding request failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Error::Transient(format!("embedding service returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::Permanent(format!("embedding service returned {status}")));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| Error::Permanent(format!("invalid embedding response: {e}")))?;

        let mut ordered = vec![Vec::new(); texts.len()];
        for datum in parsed.data {
            if datum.index < ordered.len() {
                ordered[datum.index] = datum.embedding;
            }
        }
        Ok(ordered)
    }
}

/// Apply +/-25% jitter to a backoff duration.
fn jittered(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_text_omits_empty_fields_without_blank_separators() {
        let input = EmbedInput {
            qualified_name: "foo".into(),
            signature: Some("fn foo()".into()),
            docstring: None,
            source_text: "fn foo() {}".into(),
        };
        let prepared = prepare_text(&input);
        assert_eq!(prepared.text, "fn foo()\nfn foo() {}");
        assert!(!prepared.truncated);
    }

    #[test]
    fn prepare_text_truncates_long_source_preserving_signature() {
        let long_source = "word ".repeat(TOKEN_LIMIT + 500);
        let input = EmbedInput {
            qualified_name: "foo".into(),
            signature: Some("fn foo()".into()),
            docstring: Some("doc".into()),
            source_text: long_source,
        };
        let prepared = prepare_text(&input);
        assert!(prepared.truncated);
        assert!(prepared.text.starts_with("fn foo()\ndoc\n"));
        assert!(count_tokens(&prepared.text) <= TOKEN_LIMIT);
    }

    #[test]
    fn cosine_similarity_edge_cases_return_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = [1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn no_api_key_returns_empty_map_gracefully() {
        let embedder = Embedder::new(None, "text-embedding-3-small".into(), 1000).unwrap();
        let inputs = vec![EmbedInput {
            qualified_name: "foo".into(),
            signature: None,
            docstring: None,
            source_text: "fn foo() {}".into(),
        }];
        let result = embedder.embed_changed(&inputs, &HashMap::new()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds_within_attempt_bound() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

        struct Sequence {
            calls: AtomicUsize,
        }
        impl Respond for Sequence {
            fn respond(&self, _req: &Request) -> ResponseTemplate {
                match self.calls.fetch_add(1, Ordering::SeqCst) {
                    0 => ResponseTemplate::new(429),
                    1 => ResponseTemplate::new(500),
                    _ => ResponseTemplate::new(200).set_body_json(serde_json::json!({
                        "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}]
                    })),
                }
            }
        }

        let server = MockServer::start().await;
        let responder = std::sync::Arc::new(Sequence { calls: AtomicUsize::new(0) });
        Mock::given(method("POST"))
            .respond_with(responder.clone())
            .expect(3)
            .mount(&server)
            .await;

        let embedder = Embedder::new(Some("key".into()), "text-embedding-3-small".into(), 1000)
            .unwrap()
            .with_endpoint(server.uri());
        let input = EmbedInput {
            qualified_name: "foo".into(),
            signature: None,
            docstring: None,
            source_text: "fn foo() {}".into(),
        };

        let started = std::time::Instant::now();
        let result = embedder.embed_changed(&[input], &HashMap::new()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result.get("foo"), Some(&vec![0.1, 0.2, 0.3]));
        assert_eq!(responder.calls.load(Ordering::SeqCst), 3);
        // Two backoffs (base 500ms then 1000ms, -25% jitter floor) must
        // elapse before the third attempt succeeds.
        assert!(elapsed >= Duration::from_millis(375 + 750));
    }

    #[tokio::test]
    async fn non_429_4xx_fails_after_exactly_one_attempt() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = Embedder::new(Some("key".into()), "text-embedding-3-small".into(), 1000)
            .unwrap()
            .with_endpoint(server.uri());
        let input = EmbedInput {
            qualified_name: "foo".into(),
            signature: None,
            docstring: None,
            source_text: "fn foo() {}".into(),
        };

        let result = embedder.embed_changed(&[input], &HashMap::new()).await;
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::Permanent(_)));
    }

    #[tokio::test]
    async fn skip_embed_reuses_unchanged_body_hash() {
        let embedder = Embedder::new(Some("key".into()), "text-embedding-3-small".into(), 1000).unwrap();
        let input = EmbedInput {
            qualified_name: "foo".into(),
            signature: None,
            docstring: None,
            source_text: "fn foo() {}".into(),
        };
        let hash = body_hash(&prepare_text(&input).text);
        let mut previous = HashMap::new();
        previous.insert(
            "foo".to_string(),
            StoredEmbeddingState {
                body_hash: hash,
                embedding: vec![0.1, 0.2, 0.3],
            },
        );
        let result = embedder.embed_changed(&[input], &previous).await.unwrap();
        assert_eq!(result.get("foo"), Some(&vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn skip_embed_reuses_unchanged_hash_with_signature_and_docstring() {
        // Regression: body_hash must be computed over prepare_text's full
        // signature+docstring+source join, not source_text alone, or skip
        // embed never fires for a real node (which always has a signature).
        let embedder = Embedder::new(Some("key".into()), "text-embedding-3-small".into(), 1000).unwrap();
        let input = EmbedInput {
            qualified_name: "foo".into(),
            signature: Some("fn foo(x: i32) -> i32".into()),
            docstring: Some("doubles x".into()),
            source_text: "fn foo(x: i32) -> i32 { x * 2 }".into(),
        };
        let hash = body_hash(&prepare_text(&input).text);
        let mut previous = HashMap::new();
        previous.insert(
            "foo".to_string(),
            StoredEmbeddingState {
                body_hash: hash,
                embedding: vec![0.4, 0.5, 0.6],
            },
        );
        let result = embedder.embed_changed(&[input], &previous).await.unwrap();
        assert_eq!(result.get("foo"), Some(&vec![0.4, 0.5, 0.6]));
    }
}
