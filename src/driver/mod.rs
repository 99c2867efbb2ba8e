//! Superset decode driver: runs the decoder at every address of every
//! executable section and merges the results into the fact sink.
//!
//! Decoding is parallel over chunks of addresses. Interning and recording
//! happen afterwards on one thread in ascending address order, so operand
//! identities never depend on worker scheduling.

mod superset;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::builder::InstructionBuilder;
use crate::decoder::{DecodeFailure, DecodeOptions, IsaDecoder};
use crate::sink::{FactSink, FactSnapshot};
use crate::{ByteView, Decoder, DisassemblyError, Module};

use self::superset::Attempt;

/// Tuning knobs for a decode pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Distance between start addresses; `1` is a full superset decode
    pub stride: usize,
    /// Start addresses per parallel work item
    pub chunk_size: usize,
    /// Decode chunks on the rayon pool instead of the calling thread
    pub parallel: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            chunk_size: 4096,
            parallel: true,
        }
    }
}

/// Cooperative cancellation flag shared with a running pass.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every pass holding this token to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs superset decode passes with one decoder.
#[derive(Debug)]
pub struct DecodeDriver<D> {
    decoder: D,
    builder: InstructionBuilder,
    config: DriverConfig,
    cancel: CancelToken,
}

impl<D: Decoder> DecodeDriver<D> {
    /// Create a new driver with the default configuration
    pub fn new(decoder: D) -> Self {
        let builder = InstructionBuilder::new(decoder.isa());
        Self {
            decoder,
            builder,
            config: DriverConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Decode every address of one byte view.
    pub fn decode_section(&self, view: &ByteView<'_>) -> Result<FactSnapshot, DisassemblyError> {
        let mut sink = FactSink::new(self.decoder.isa());
        self.decode_into(None, view, &mut sink)?;
        Ok(sink.finish())
    }

    /// Decode every executable section of `module` into one snapshot.
    ///
    /// Sections are decoded in ascending address order and share one operand
    /// table. Non-executable sections are skipped.
    pub fn decode_module(&self, module: &Module<'_>) -> Result<FactSnapshot, DisassemblyError> {
        let sections: Vec<_> = module
            .executable_sections()
            .into_iter()
            .filter(|s| !s.view.is_empty())
            .collect();

        // sorted by base, so any overlap shows up between neighbours
        for pair in sections.windows(2) {
            if pair[0].view.overlaps(&pair[1].view) {
                return Err(DisassemblyError::OverlappingSections {
                    first: pair[0].name.to_string(),
                    second: pair[1].name.to_string(),
                });
            }
        }

        log::info!(
            "Decoding {} executable sections of module '{}' as {}",
            sections.len(),
            module.name,
            self.decoder.isa()
        );

        let mut sink = FactSink::new(self.decoder.isa());
        for section in sections {
            self.decode_into(Some(section.name), &section.view, &mut sink)?;
        }
        Ok(sink.finish())
    }

    fn decode_into(&self, name: Option<&str>, view: &ByteView<'_>, sink: &mut FactSink) -> Result<(), DisassemblyError> {
        let start_time = Instant::now();
        log::debug!(
            "Starting superset decode of {} bytes at 0x{:x}",
            view.len(),
            view.base()
        );

        if let Some(name) = name {
            sink.push_section(name, view);
        }

        let before = sink.stats();

        superset::scan(view, &self.decoder, &self.builder, &self.config, &self.cancel, |address, attempt| {
            match attempt {
                Attempt::Decoded(insn) => {
                    let record = insn
                        .intern_into(sink.operands_mut())
                        .map_err(|source| DisassemblyError::ResourceExhausted { address, source })?;
                    sink.push_instruction(record)
                }
                Attempt::Failed(DecodeFailure::Malformed(reason)) => {
                    log::error!("Aborting pass: malformed decode at 0x{:x}: {}", address, reason);
                    Err(DisassemblyError::Malformed { address, reason })
                }
                Attempt::Failed(failure) => sink.push_failure(address, &failure),
            }
        })?;

        let after = sink.stats();
        let elapsed = start_time.elapsed();
        log::info!(
            "Superset decode of {} bytes completed in {:?}: {} instructions, {} truncated, {} invalid, {} unsupported, {} operands so far",
            view.len(),
            elapsed,
            after.decoded - before.decoded,
            after.truncated - before.truncated,
            after.invalid - before.invalid,
            after.unsupported - before.unsupported,
            sink.operand_count()
        );
        Ok(())
    }
}

/// Decode every executable section of `module` with a decoder chosen from
/// the module's ISA and the option strings.
///
/// Unrecognized option strings are ignored.
pub fn decode<S: AsRef<str>>(module: &Module<'_>, options: &[S]) -> Result<FactSnapshot, DisassemblyError> {
    let (options, _unrecognized) = DecodeOptions::parse(options);
    let decoder = IsaDecoder::for_isa(module.isa, &options)?;
    DecodeDriver::new(decoder).decode_module(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Isa, Section};

    #[test]
    fn test_config_default() {
        let config = DriverConfig::default();
        assert_eq!(config.stride, 1);
        assert_eq!(config.chunk_size, 4096);
        assert!(config.parallel);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_stride_limits_attempts() {
        let bytes = [0x90u8; 16];
        let view = ByteView::new(0x1000, &bytes).unwrap();
        let decoder = IsaDecoder::for_architecture(Isa::X86_64).unwrap();
        let driver = DecodeDriver::new(decoder).with_config(DriverConfig {
            stride: 4,
            ..DriverConfig::default()
        });

        let facts = driver.decode_section(&view).unwrap();
        let addrs: Vec<_> = facts.instructions().iter().map(|i| i.address).collect();
        assert_eq!(addrs, vec![0x1000, 0x1004, 0x1008, 0x100c]);
        assert_eq!(facts.stats().attempts, 4);
    }

    #[test]
    fn test_many_batches_match_one_chunk() {
        // push rbp; mov rbp, rsp; pop rbp; ret
        let bytes: Vec<u8> = [0x55, 0x48, 0x89, 0xe5, 0x5d, 0xc3].iter().copied().cycle().take(600).collect();
        let view = ByteView::new(0x1000, &bytes).unwrap();
        let run = |config: DriverConfig| {
            let decoder = IsaDecoder::for_architecture(Isa::X86_64).unwrap();
            DecodeDriver::new(decoder).with_config(config).decode_section(&view).unwrap()
        };

        let whole = run(DriverConfig {
            chunk_size: bytes.len(),
            parallel: false,
            ..DriverConfig::default()
        });
        let batched = run(DriverConfig {
            chunk_size: 1,
            ..DriverConfig::default()
        });
        assert_eq!(whole, batched);
        assert_eq!(batched.stats().attempts, 600);
    }

    #[test]
    fn test_overlapping_sections_rejected() {
        let a = [0x90u8; 8];
        let b = [0x90u8; 8];
        let module = Module::new("m", Isa::X86_64)
            .with_section(Section::new(".text", ByteView::new(0x1000, &a).unwrap(), true))
            .with_section(Section::new(".init", ByteView::new(0x1004, &b).unwrap(), true));

        let err = decode(&module, &["no-avx"]).unwrap_err();
        assert!(matches!(err, DisassemblyError::OverlappingSections { .. }));
    }
}
