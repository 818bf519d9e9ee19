// SPDX-License-Identifier: GPL-2.0-or-later

//! OCR model registry (§4.E) and recognition engine (§4.F): downloads the
//! per-`ScriptFamily` ONNX recognition models and runs row-scan line
//! detection plus CTC-decoded recognition against composited subtitle
//! bitmaps. Grounded on the originating codebase's `tflite` plugin shape
//! (`LabelCache`'s atomic install, `Fetcher`/`fetch` HTTP pattern,
//! `DetectorManager`'s per-name lazy construction), adapted from TFLite
//! detection models to ONNX recognition models.

pub mod engine;
pub mod language;
pub mod registry;

pub use engine::{OcrEngine, RecognizeResult};
pub use language::family_for_language;
pub use registry::{EnsureError, Fetcher, FetchError, HyperFetcher, OcrModelPaths, OcrModelRegistry};
