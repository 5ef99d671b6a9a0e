//! Generation engine
//!
//! `Engine` owns one inference context (one logical compute session) and
//! drives the decode -> sample -> feedback cycle. Token delivery is a
//! pull-based iterator: nothing is decoded until the consumer asks for a
//! fragment, so backpressure is inherent and cancellation always lands
//! between steps, never in the middle of one.

use crate::config::SamplingConfig;
use crate::context::InferenceContext;
use crate::error::{Error, Result};
use crate::memory::{CacheController, CacheStats};
use crate::sampling::TokenSampler;
use crate::types::{FinishReason, GenerationMetrics, RequestId, SequenceId, TokenId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cloneable handle that stops a generation stream.
///
/// Cancellation is observed before the next decode step starts; a token is
/// either fully applied to the cache or not applied at all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Mutable state of one generation request
#[derive(Debug, Default)]
pub struct GenerationState {
    /// Tokens emitted so far
    pub tokens: Vec<TokenId>,

    /// Decoded text accumulated for stop-sequence matching
    pub text: String,

    /// Set once the stream reaches a terminal state
    pub finish_reason: Option<FinishReason>,
}

/// The generation engine over one inference context.
///
/// All decode and cache-mutation calls take `&mut self`; the borrow checker
/// enforces the single-writer discipline the context requires.
pub struct Engine {
    ctx: Box<dyn InferenceContext>,
}

impl Engine {
    /// Create an engine over a loaded context
    pub fn new(ctx: Box<dyn InferenceContext>) -> Self {
        Self { ctx }
    }

    /// Vocabulary size of the underlying model
    pub fn vocab_size(&self) -> usize {
        self.ctx.vocab_size()
    }

    /// Convert text into token IDs
    pub fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        self.ctx.tokenize(text)
    }

    /// Convert token IDs back into text
    pub fn detokenize(&self, tokens: &[TokenId]) -> Result<String> {
        self.ctx.detokenize(tokens)
    }

    /// Raw score vector for the last decoded token
    pub fn current_logits(&self) -> Result<&[f32]> {
        self.ctx.current_logits()
    }

    /// Raw score vector for a specific decode-step index
    pub fn logits_at(&self, index: usize) -> Result<&[f32]> {
        self.ctx.logits_at(index)
    }

    /// Controller over the context's cache memory
    pub fn cache(&mut self) -> CacheController<'_> {
        CacheController::new(self.ctx.as_mut())
    }

    /// Snapshot of cache occupancy
    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.memory_stats()
    }

    /// Snapshot the full session state into an opaque blob
    pub fn save_session(&self) -> Result<Vec<u8>> {
        self.ctx.save_session()
    }

    /// Restore the full session state from an opaque blob
    pub fn load_session(&mut self, blob: &[u8]) -> Result<()> {
        self.ctx.load_session(blob)
    }

    /// Snapshot a single sequence's state
    pub fn save_sequence(&self, seq: SequenceId) -> Result<Vec<u8>> {
        self.ctx.save_sequence(seq)
    }

    /// Restore a single sequence's state
    pub fn load_sequence(&mut self, seq: SequenceId, blob: &[u8]) -> Result<()> {
        self.ctx.load_sequence(seq, blob)
    }

    /// Start a generation request.
    ///
    /// The returned stream is lazy, finite and non-restartable: the prompt
    /// is decoded on the first pull, fragments arrive one per pull, and the
    /// stream stays empty after any terminal condition. The cache is reset
    /// before the prompt decode, like a fresh completion request.
    ///
    /// Fails immediately with a configuration error if `config` is invalid.
    pub fn generate(
        &mut self,
        prompt: Vec<TokenId>,
        config: SamplingConfig,
    ) -> Result<Generation<'_>> {
        let sampler = TokenSampler::new(config.clone())?;
        let request_id = RequestId::new();
        tracing::info!(
            request = %request_id,
            prompt_tokens = prompt.len(),
            seed = sampler.seed(),
            max_tokens = config.max_tokens,
            "generation request"
        );
        Ok(Generation::new(
            self.ctx.as_mut(),
            Mode::Configured {
                sampler,
                stop: config.stop,
            },
            prompt,
            config.max_tokens,
            request_id,
        ))
    }

    /// Tokenize `text` and start a generation request over it
    pub fn generate_from_text(
        &mut self,
        text: &str,
        config: SamplingConfig,
    ) -> Result<Generation<'_>> {
        let prompt = self.ctx.tokenize(text)?;
        self.generate(prompt, config)
    }

    /// Start a generation request whose token selection is delegated to
    /// `selector`.
    ///
    /// The selector receives the raw score vector and the current output
    /// position and returns the next token, or `None` to terminate
    /// immediately. The cache is left untouched so callers can continue an
    /// existing sequence.
    pub fn generate_with_custom_sampler<'s, F>(
        &'s mut self,
        prompt: Vec<TokenId>,
        max_tokens: usize,
        selector: F,
    ) -> Generation<'s>
    where
        F: FnMut(&[f32], usize) -> Option<TokenId> + 's,
    {
        let request_id = RequestId::new();
        tracing::info!(
            request = %request_id,
            prompt_tokens = prompt.len(),
            max_tokens,
            "custom-sampler generation request"
        );
        Generation::new(
            self.ctx.as_mut(),
            Mode::Custom {
                selector: Box::new(selector),
            },
            prompt,
            max_tokens,
            request_id,
        )
    }
}

enum Mode<'a> {
    Configured {
        sampler: TokenSampler,
        stop: Vec<String>,
    },
    Custom {
        selector: Box<dyn FnMut(&[f32], usize) -> Option<TokenId> + 'a>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// A lazy, finite, non-restartable stream of generated text fragments.
///
/// Produced by [`Engine::generate`] and
/// [`Engine::generate_with_custom_sampler`]; iterate to pull fragments one
/// at a time. A mid-stream failure yields the causing error once, then the
/// stream is closed for good.
pub struct Generation<'a> {
    ctx: &'a mut dyn InferenceContext,
    mode: Mode<'a>,
    prompt: Vec<TokenId>,
    prompt_len: usize,
    max_tokens: usize,
    state: GenerationState,
    /// Sampled token awaiting its feedback decode at the start of the next step
    pending: Option<TokenId>,
    cancel: CancellationToken,
    request_id: RequestId,
    started: Instant,
    first_token_at: Option<Instant>,
    phase: Phase,
}

impl<'a> std::fmt::Debug for Generation<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("prompt_len", &self.prompt_len)
            .field("max_tokens", &self.max_tokens)
            .field("state", &self.state)
            .field("request_id", &self.request_id)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<'a> Generation<'a> {
    fn new(
        ctx: &'a mut dyn InferenceContext,
        mode: Mode<'a>,
        prompt: Vec<TokenId>,
        max_tokens: usize,
        request_id: RequestId,
    ) -> Self {
        let prompt_len = prompt.len();
        Self {
            ctx,
            mode,
            prompt,
            prompt_len,
            max_tokens,
            state: GenerationState::default(),
            pending: None,
            cancel: CancellationToken::new(),
            request_id,
            started: Instant::now(),
            first_token_at: None,
            phase: Phase::Idle,
        }
    }

    /// Handle for cancelling this stream from elsewhere
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The request's identifier
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Tokens emitted so far
    pub fn tokens(&self) -> &[TokenId] {
        &self.state.tokens
    }

    /// Decoded text accumulated so far
    pub fn text(&self) -> &str {
        &self.state.text
    }

    /// Why the stream terminated, once it has
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.state.finish_reason
    }

    /// Effective sampling seed; `None` in custom-sampler mode
    pub fn seed(&self) -> Option<u64> {
        match &self.mode {
            Mode::Configured { sampler, .. } => Some(sampler.seed()),
            Mode::Custom { .. } => None,
        }
    }

    /// Timing and throughput for the request so far
    pub fn metrics(&self) -> GenerationMetrics {
        let total_time = self.started.elapsed().as_secs_f64();
        let generated = self.state.tokens.len();
        GenerationMetrics {
            prompt_tokens: self.prompt_len,
            generated_tokens: generated,
            time_to_first_token: self
                .first_token_at
                .map(|t| t.duration_since(self.started).as_secs_f64()),
            total_time,
            tokens_per_second: if total_time > 0.0 {
                generated as f64 / total_time
            } else {
                0.0
            },
        }
    }

    fn finish(&mut self, reason: FinishReason) {
        if self.state.finish_reason.is_none() {
            self.state.finish_reason = Some(reason);
        }
        self.phase = Phase::Stopped;
        tracing::debug!(
            request = %self.request_id,
            reason = ?reason,
            generated = self.state.tokens.len(),
            "generation finished"
        );
    }

    fn fail(&mut self, err: Error) -> Option<Result<String>> {
        tracing::error!(request = %self.request_id, error = %err, "generation aborted");
        self.finish(FinishReason::Error);
        Some(Err(err))
    }

    fn begin(&mut self) -> Option<Result<String>> {
        if self.max_tokens == 0 {
            self.finish(FinishReason::Length);
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finish(FinishReason::Cancelled);
            return None;
        }
        if self.prompt.is_empty() {
            return self.fail(Error::state("prompt must not be empty"));
        }
        // A configured request starts from a clean cache, like a fresh
        // completion; custom-sampler requests continue whatever is cached.
        if matches!(self.mode, Mode::Configured { .. }) {
            self.ctx.clear_memory(true);
        }
        let prompt = std::mem::take(&mut self.prompt);
        if let Err(e) = self.ctx.decode(&prompt) {
            return self.fail(e);
        }
        self.phase = Phase::Running;
        self.step()
    }

    fn step(&mut self) -> Option<Result<String>> {
        if self.cancel.is_cancelled() {
            self.finish(FinishReason::Cancelled);
            return None;
        }
        if self.state.tokens.len() >= self.max_tokens {
            self.finish(FinishReason::Length);
            return None;
        }

        // Apply the previously sampled token before producing the next one.
        if let Some(token) = self.pending.take() {
            if let Err(e) = self.ctx.decode(&[token]) {
                return self.fail(e);
            }
        }

        let logits = match self.ctx.current_logits() {
            Ok(logits) => {
                let expected = self.ctx.vocab_size();
                if logits.len() != expected {
                    let actual = logits.len();
                    return self.fail(Error::DimensionMismatch { expected, actual });
                }
                logits.to_vec()
            }
            Err(e) => return self.fail(e),
        };

        let position = self.state.tokens.len();
        let token = match &mut self.mode {
            Mode::Configured { sampler, .. } => match sampler.sample(&logits) {
                Ok(token) => token,
                Err(e) => return self.fail(e),
            },
            Mode::Custom { selector } => match selector(&logits, position) {
                Some(token) => token,
                None => {
                    self.finish(FinishReason::Stop);
                    return None;
                }
            },
        };

        if (token as usize) >= self.ctx.vocab_size() {
            return self.fail(Error::state(format!(
                "selector produced out-of-vocabulary token {token}"
            )));
        }

        if matches!(self.mode, Mode::Configured { .. }) && self.ctx.is_end_of_generation(token) {
            self.finish(FinishReason::Stop);
            return None;
        }

        let piece = match self.ctx.detokenize(&[token]) {
            Ok(piece) => piece,
            Err(e) => return self.fail(e),
        };

        self.state.tokens.push(token);
        self.state.text.push_str(&piece);

        let stop_hit = match &self.mode {
            Mode::Configured { stop, .. } => {
                stop.iter().any(|s| self.state.text.ends_with(s.as_str()))
            }
            Mode::Custom { .. } => false,
        };
        if stop_hit {
            self.finish(FinishReason::StopSequence);
            return None;
        }

        self.pending = Some(token);
        if self.first_token_at.is_none() {
            self.first_token_at = Some(Instant::now());
        }
        Some(Ok(piece))
    }
}

impl Iterator for Generation<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.phase {
            Phase::Idle => self.begin(),
            Phase::Running => self.step(),
            Phase::Stopped => None,
        }
    }
}

impl std::iter::FusedIterator for Generation<'_> {}
