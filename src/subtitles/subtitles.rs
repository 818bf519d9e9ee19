// SPDX-License-Identifier: GPL-2.0-or-later

//! PGS→text pipeline (§4.G): drives the PGS decoder over a `.sup` stream,
//! batches the resulting bitmaps through the OCR engine, and emits a
//! sequential subtitle track. Batching-in-50s is modeled on the originating
//! codebase's batched per-frame processing in its `tflite` plugin, adapted
//! from a fixed-rate video feed to a PGS display-set stream.

use common::time::PgsTick;
use ocr::{family_for_language, Fetcher, HyperFetcher, OcrEngine, OcrModelRegistry};
use pgs::{PgsDecodeError, PgsDecoder, PgsDisplaySet};
use std::io::Read;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Frames processed per OCR batch (§4.G: "bound memory").
const BATCH_SIZE: usize = 50;

/// One recognized subtitle cue.
#[derive(Clone, Debug, PartialEq)]
pub struct SubtitleEvent {
    pub id: u64,
    pub start: PgsTick,
    pub end: PgsTick,
    pub text: String,
}

/// Ordered sequence of recognized cues for one PGS track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubtitleTrack {
    pub events: Vec<SubtitleEvent>,
}

/// Converts PGS bitmap subtitle streams into text, given a registry/engine
/// pair already wired up for model download and inference.
pub struct SubtitleConverter<F: Fetcher + Send + Sync + 'static = HyperFetcher> {
    registry: Arc<OcrModelRegistry<F>>,
    engine: OcrEngine<F>,
}

impl<F: Fetcher + Send + Sync + 'static> SubtitleConverter<F> {
    #[must_use]
    pub fn new(registry: Arc<OcrModelRegistry<F>>, engine: OcrEngine<F>) -> Self {
        Self { registry, engine }
    }

    /// `convert_range`: only display sets starting in `[range.0, range.1)`
    /// are considered.
    pub async fn convert_range<R: Read>(
        &self,
        reader: R,
        language: &str,
        range: (PgsTick, PgsTick),
        cancel: &CancellationToken,
    ) -> SubtitleTrack {
        let decoder = PgsDecoder::new(reader).with_window(range.0, range.1);
        self.convert(decoder, language, cancel).await
    }

    /// `convert_full`: the entire stream, processed in batches of
    /// [`BATCH_SIZE`] to bound memory.
    pub async fn convert_full<R: Read>(
        &self,
        reader: R,
        language: &str,
        cancel: &CancellationToken,
    ) -> SubtitleTrack {
        let decoder = PgsDecoder::new(reader);
        self.convert(decoder, language, cancel).await
    }

    async fn convert<R: Read>(
        &self,
        mut decoder: PgsDecoder<R>,
        language: &str,
        cancel: &CancellationToken,
    ) -> SubtitleTrack {
        let Some(family) = family_for_language(language) else {
            return SubtitleTrack::default();
        };
        if !self.registry.has_models(family) {
            return SubtitleTrack::default();
        }

        let mut events = Vec::new();
        let mut next_id = 1u64;
        let mut batch: Vec<PgsDisplaySet> = Vec::with_capacity(BATCH_SIZE);

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match decoder.next() {
                Some(Ok(set)) => {
                    batch.push(set);
                    if batch.len() >= BATCH_SIZE {
                        let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE));
                        self.flush_batch(full, family, cancel, &mut next_id, &mut events)
                            .await;
                    }
                }
                Some(Err(PgsDecodeError::Io(_))) | None => break,
            }
        }
        if !batch.is_empty() {
            self.flush_batch(batch, family, cancel, &mut next_id, &mut events)
                .await;
        }

        SubtitleTrack { events }
    }

    async fn flush_batch(
        &self,
        batch: Vec<PgsDisplaySet>,
        family: common::ScriptFamily,
        cancel: &CancellationToken,
        next_id: &mut u64,
        events: &mut Vec<SubtitleEvent>,
    ) {
        if batch.is_empty() {
            return;
        }
        let windows: Vec<(PgsTick, PgsTick)> = batch.iter().map(|s| (s.start, s.end)).collect();
        let images: Vec<(Vec<u8>, u32, u32)> = batch
            .into_iter()
            .map(|s| (s.rgba, u32::from(s.width), u32::from(s.height)))
            .collect();

        let results = self.engine.recognize_batch(images, family, cancel).await;

        for ((start, end), result) in windows.into_iter().zip(results) {
            let text = result.text.trim();
            if text.is_empty() {
                continue;
            }
            events.push(SubtitleEvent {
                id: next_id_take(next_id),
                start,
                end,
                text: text.to_owned(),
            });
        }
    }
}

fn next_id_take(next_id: &mut u64) -> u64 {
    let id = *next_id;
    *next_id += 1;
    id
}
