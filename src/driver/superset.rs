//! Decode attempts at every offset of a view, chunked for parallel workers.

use rayon::prelude::*;

use crate::builder::{InstructionBuilder, NormalizedInstruction};
use crate::decoder::DecodeFailure;
use crate::{Address, ByteView, Decoder, DisassemblyError};

use super::{CancelToken, DriverConfig};

/// Outcome of one decode attempt, before interning.
#[derive(Debug)]
pub(crate) enum Attempt {
    Decoded(NormalizedInstruction),
    Failed(DecodeFailure),
}

/// Attempt a decode at every `stride`-th address of `view` and hand each
/// result to `merge`.
///
/// Work is split into chunks of `chunk_size` start addresses; a batch of
/// chunks is decoded in parallel, then merged in ascending address order
/// before the next batch starts, so at most one batch of attempts is held at
/// a time. Cancellation is observed between chunks.
pub(crate) fn scan<D, M>(
    view: &ByteView<'_>,
    decoder: &D,
    builder: &InstructionBuilder,
    config: &DriverConfig,
    cancel: &CancelToken,
    mut merge: M,
) -> Result<(), DisassemblyError>
where
    D: Decoder,
    M: FnMut(Address, Attempt) -> Result<(), DisassemblyError>,
{
    let stride = config.stride.max(1);
    let chunk_size = config.chunk_size.max(1);
    let starts = view.len().div_ceil(stride);
    let chunk_count = starts.div_ceil(chunk_size);
    let batch_chunks = if config.parallel {
        rayon::current_num_threads().max(1) * 4
    } else {
        1
    };

    log::debug!(
        "Scanning {} start addresses in {} chunks of {}, {} chunks per batch",
        starts,
        chunk_count,
        chunk_size,
        batch_chunks
    );

    let run_chunk = |chunk_idx: usize| -> Option<Vec<(Address, Attempt)>> {
        if cancel.is_cancelled() {
            return None;
        }
        let first = chunk_idx * chunk_size;
        let last = (first + chunk_size).min(starts);
        let attempts = (first..last)
            .map(|i| {
                let address = view.base() + (i * stride) as Address;
                (address, attempt_at(view, decoder, builder, address))
            })
            .collect();
        log::trace!("Chunk {}/{} done", chunk_idx + 1, chunk_count);
        Some(attempts)
    };

    let mut batch_start = 0;
    while batch_start < chunk_count {
        let batch_end = (batch_start + batch_chunks).min(chunk_count);
        let chunks: Option<Vec<Vec<(Address, Attempt)>>> = if config.parallel {
            (batch_start..batch_end).into_par_iter().map(&run_chunk).collect()
        } else {
            (batch_start..batch_end).map(&run_chunk).collect()
        };

        for (address, attempt) in chunks.ok_or(DisassemblyError::Cancelled)?.into_iter().flatten() {
            merge(address, attempt)?;
        }
        batch_start = batch_end;
    }
    Ok(())
}

fn attempt_at<D: Decoder>(view: &ByteView<'_>, decoder: &D, builder: &InstructionBuilder, address: Address) -> Attempt {
    match decoder.decode_one(view, address) {
        Ok(raw) => match builder.normalize(raw, address) {
            Ok(insn) => Attempt::Decoded(insn),
            Err(failure) => Attempt::Failed(failure),
        },
        Err(failure) => Attempt::Failed(failure),
    }
}
