//! Multi-stage symbolic compression pipeline.
//!
//! Each [`CompressionStage`] is total on UTF-8 text; a [`Pipeline`] chains stages left-to-right
//! on encode and right-to-left on decode. Stages that would net-increase the character count for
//! a given input are skipped for that input (and that skip is remembered so decode doesn't try
//! to invert something that never happened).

pub mod abbreviator;
pub mod binary_encoder;
pub mod chunker;
pub mod normalizer;
pub mod symbol_compressor;
pub mod vowel_stripper;

use std::panic::{catch_unwind, AssertUnwindSafe};

pub use abbreviator::Abbreviator;
pub use binary_encoder::BinaryEncoder;
pub use chunker::LogarithmicChunker;
pub use normalizer::Normalizer;
pub use symbol_compressor::SymbolCompressor;
pub use vowel_stripper::VowelStripper;

use crate::gateway::config::CompressionLevel;

/// A single reversible-or-lossy text transform.
pub trait CompressionStage: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether [`CompressionStage::decode`] exactly inverts [`CompressionStage::encode`].
    fn reversible(&self) -> bool;
    fn encode(&self, text: &str) -> String;
    fn decode(&self, text: &str) -> String;
}

/// Per-stage character counts recorded for one encode pass, plus whether the stage actually
/// ran (it is skipped, and the pre-stage text kept, when it would have net-increased length).
#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub name: &'static str,
    pub in_chars: usize,
    pub out_chars: usize,
    pub applied: bool,
}

/// Result of running a [`Pipeline`] encode pass.
#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub text: String,
    /// Set when any stage panicked and the pipeline fell back to the pre-stage text for it.
    /// Never a hard failure.
    pub compression_degraded: bool,
    pub stage_metrics: Vec<StageMetrics>,
}

/// An ordered sequence of stages applied as one encode/decode unit.
pub struct Pipeline {
    stages: Vec<Box<dyn CompressionStage>>,
    /// When set, the `binary_encoder` stage is skipped (left un-applied) for any input whose
    /// pre-stage size is below this many bytes.
    gzip_size_threshold: Option<usize>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn CompressionStage>>) -> Self {
        Self { stages, gzip_size_threshold: None }
    }

    fn with_gzip_size_threshold(mut self, threshold: usize) -> Self {
        self.gzip_size_threshold = Some(threshold);
        self
    }

    /// A pipeline is reversible iff every stage is reversible.
    pub fn is_reversible(&self) -> bool {
        self.stages.iter().all(|s| s.reversible())
    }

    pub fn encode(&self, text: &str) -> EncodeResult {
        let mut current = text.to_string();
        let mut degraded = false;
        let mut metrics = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let before = current.clone();

            if stage.name() == "binary_encoder" {
                if let Some(threshold) = self.gzip_size_threshold {
                    if before.len() < threshold {
                        metrics.push(StageMetrics {
                            name: stage.name(),
                            in_chars: before.chars().count(),
                            out_chars: before.chars().count(),
                            applied: false,
                        });
                        continue;
                    }
                }
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| stage.encode(&before)));
            match outcome {
                Ok(encoded) if encoded.chars().count() <= before.chars().count() => {
                    metrics.push(StageMetrics {
                        name: stage.name(),
                        in_chars: before.chars().count(),
                        out_chars: encoded.chars().count(),
                        applied: true,
                    });
                    current = encoded;
                }
                Ok(_) => {
                    // Net character increase: no-op for this input.
                    metrics.push(StageMetrics {
                        name: stage.name(),
                        in_chars: before.chars().count(),
                        out_chars: before.chars().count(),
                        applied: false,
                    });
                }
                Err(_) => {
                    log::warn!("compression stage {} panicked, falling back to pre-stage text", stage.name());
                    degraded = true;
                    metrics.push(StageMetrics {
                        name: stage.name(),
                        in_chars: before.chars().count(),
                        out_chars: before.chars().count(),
                        applied: false,
                    });
                }
            }
        }

        EncodeResult {
            text: current,
            compression_degraded: degraded,
            stage_metrics: metrics,
        }
    }

    /// Decode using the applied-flags recorded by a prior [`Pipeline::encode`] call, so a stage
    /// that no-op'd on encode is correctly skipped on decode too.
    pub fn decode(&self, text: &str, stage_metrics: &[StageMetrics]) -> String {
        let mut current = text.to_string();
        for (stage, metric) in self.stages.iter().zip(stage_metrics.iter()).rev() {
            if metric.applied {
                current = stage.decode(&current);
            }
        }
        current
    }

    /// Stage names in encode order, for callers (the debug HTTP surface) that need to decode
    /// without a prior encode's recorded [`StageMetrics`].
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Build the stage list for a named preset.
pub fn preset_stages(level: CompressionLevel) -> Vec<Box<dyn CompressionStage>> {
    let mut stages: Vec<Box<dyn CompressionStage>> =
        vec![Box::new(Normalizer::default()), Box::new(Abbreviator::default())];
    match level {
        CompressionLevel::Low => {}
        CompressionLevel::Medium => {
            stages.push(Box::new(VowelStripper::default()));
            stages.push(Box::new(SymbolCompressor::default()));
        }
        CompressionLevel::High => {
            stages.push(Box::new(VowelStripper::default()));
            stages.push(Box::new(SymbolCompressor::default()));
            stages.push(Box::new(LogarithmicChunker::default()));
        }
    }
    stages
}

/// Build a [`Pipeline`] for `level`, appending [`BinaryEncoder`] when requested. The encoder is
/// still skipped at encode time for any input whose post-preset-stages size is under
/// `gzip_size_threshold` bytes.
pub fn build_pipeline(level: CompressionLevel, append_gzip: bool, gzip_size_threshold: usize) -> Pipeline {
    let mut stages = preset_stages(level);
    if append_gzip {
        stages.push(Box::new(BinaryEncoder::default()));
    }
    let pipeline = Pipeline::new(stages);
    if append_gzip {
        pipeline.with_gzip_size_threshold(gzip_size_threshold)
    } else {
        pipeline
    }
}
