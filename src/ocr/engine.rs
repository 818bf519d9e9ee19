//! §4.F OCR engine: composites a subtitle bitmap over white, locates text
//! lines by a row-scan, and runs CTC-decoded recognition per line. Holds at
//! most one loaded ONNX session per `ScriptFamily`, loaded lazily and
//! single-flight the first time a family is used.

use crate::registry::{Fetcher, HyperFetcher, OcrModelPaths, OcrModelRegistry};
use common::{ArcMsgLogger, LogLevel, ScriptFamily};
use ndarray::{Array3, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::{collections::HashMap, path::Path, sync::Arc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boundary the recognition step runs against, so the concrete inference
/// runtime is swappable and unit tests can supply a fake session in place
/// of a loaded ONNX model.
trait InferenceSession: Send + Sync {
    fn run(&self, tensor: Array3<f32>) -> Result<(Vec<f32>, usize, usize), ort::Error>;
}

struct OrtInferenceSession(Session);

impl InferenceSession for OrtInferenceSession {
    fn run(&self, tensor: Array3<f32>) -> Result<(Vec<f32>, usize, usize), ort::Error> {
        let batched = tensor.insert_axis(Axis(0));
        let value = Value::from_array(batched)?;
        let outputs = self.0.run(ort::inputs![value]?)?;
        let (shape, data) = outputs[0].try_extract_raw_tensor::<f32>()?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        let timesteps = usize::try_from(*dims.get(1).unwrap_or(&0)).unwrap_or(0);
        let classes = usize::try_from(*dims.get(2).unwrap_or(&0)).unwrap_or(0);
        Ok((data.to_vec(), timesteps, classes))
    }
}

const LINE_DETECT_THRESHOLD: u32 = 200;
const LINE_PADDING_PX: u32 = 5;
const MIN_REGION_WIDTH_PX: u32 = 5;
const RESIZE_HEIGHT_PX: u32 = 48;
const MAX_RESIZE_WIDTH_PX: u32 = 1920;

/// Result of recognizing one subtitle bitmap (§4.F).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecognizeResult {
    pub text: String,
    pub confidence: f32,
    pub regions: u32,
}

impl RecognizeResult {
    fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error)]
enum RecognizeError {
    #[error("load session: {0}")]
    Load(#[from] LoadError),

    #[error("build tensor: {0}")]
    Tensor(#[from] ort::Error),
}

#[derive(Debug, Error)]
enum LoadError {
    #[error("read dict: {0}")]
    ReadDict(std::io::Error),

    #[error("build session: {0}")]
    Session(#[from] ort::Error),
}

struct LoadedSession {
    session: Box<dyn InferenceSession>,
    dict: Vec<String>,
}

struct EngineInner<F: Fetcher + Send + Sync + 'static> {
    registry: OcrModelRegistry<F>,
    logger: ArcMsgLogger,
    // One shared lock covers load-or-fetch for every family: a model is
    // loaded at most once, and concurrent first callers for the same (or a
    // different) family simply wait their turn.
    sessions: tokio::sync::Mutex<HashMap<ScriptFamily, Arc<LoadedSession>>>,
}

/// Thread-safe; cloning is cheap and shares the underlying session cache.
pub struct OcrEngine<F: Fetcher + Send + Sync + 'static = HyperFetcher> {
    inner: Arc<EngineInner<F>>,
}

impl<F: Fetcher + Send + Sync + 'static> Clone for OcrEngine<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Fetcher + Send + Sync + 'static> OcrEngine<F> {
    #[must_use]
    pub fn new(registry: OcrModelRegistry<F>, logger: ArcMsgLogger) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                logger,
                sessions: tokio::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    /// §4.F `recognize`. Never propagates inference errors: a failure is
    /// logged and degrades to an empty result.
    pub async fn recognize(&self, rgba: &[u8], w: u32, h: u32, family: ScriptFamily) -> RecognizeResult {
        match self.recognize_inner(rgba, w, h, family).await {
            Ok(r) => r,
            Err(e) => {
                self.inner
                    .logger
                    .log(LogLevel::Warning, &format!("ocr recognize: {e}"));
                RecognizeResult::empty()
            }
        }
    }

    /// §4.G batching: runs every element on its own task, so the CPU-bound
    /// inference calls can fan out across the blocking pool.
    pub async fn recognize_batch(
        &self,
        images: Vec<(Vec<u8>, u32, u32)>,
        family: ScriptFamily,
        cancel: &CancellationToken,
    ) -> Vec<RecognizeResult> {
        let mut handles = Vec::with_capacity(images.len());
        for (rgba, w, h) in images {
            let engine = self.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => RecognizeResult::empty(),
                    r = engine.recognize(&rgba, w, h, family) => r,
                }
            }));
        }
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.await.unwrap_or_else(|_| RecognizeResult::empty()));
        }
        out
    }

    async fn recognize_inner(
        &self,
        rgba: &[u8],
        w: u32,
        h: u32,
        family: ScriptFamily,
    ) -> Result<RecognizeResult, RecognizeError> {
        let session = self.session_for(family).await?;
        recognize_with_session(session.session.as_ref(), &session.dict, rgba, w, h)
    }

    async fn session_for(&self, family: ScriptFamily) -> Result<Arc<LoadedSession>, LoadError> {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(existing) = sessions.get(&family) {
            return Ok(Arc::clone(existing));
        }
        let paths = self.inner.registry.paths(family);
        let loaded = Arc::new(load_session(&paths).await?);
        sessions.insert(family, Arc::clone(&loaded));
        Ok(loaded)
    }
}

/// The synchronous recognition core (§4.F steps 2-4), independent of how the
/// session was obtained — exercised directly in tests against a fake
/// `InferenceSession`.
fn recognize_with_session(
    session: &dyn InferenceSession,
    dict: &[String],
    rgba: &[u8],
    w: u32,
    h: u32,
) -> Result<RecognizeResult, RecognizeError> {
    let rgb = composite_over_white(rgba, w, h);
    let line_regions = detect_line_regions(&rgb, w, h);

    let mut texts = Vec::with_capacity(line_regions.len());
    let mut confidences = Vec::with_capacity(line_regions.len());
    for region in &line_regions {
        let cropped = crop(&rgb, w, *region);
        let (resized, rw, rh) = resize_nearest_to_height(&cropped, region.w, region.h, RESIZE_HEIGHT_PX);
        let tensor = build_chw_tensor(&resized, rw, rh);
        let (logits, timesteps, classes) = session.run(tensor)?;
        let (text, confidence) = ctc_greedy_decode(&logits, timesteps, classes, dict);
        if !text.trim().is_empty() {
            texts.push(text);
            confidences.push(confidence);
        }
    }

    let regions = u32::try_from(texts.len()).unwrap_or(u32::MAX);
    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };
    Ok(RecognizeResult {
        text: texts.join("\n"),
        confidence,
        regions,
    })
}

async fn load_session(paths: &OcrModelPaths) -> Result<LoadedSession, LoadError> {
    let dict_raw = tokio::fs::read_to_string(&paths.dict)
        .await
        .map_err(LoadError::ReadDict)?;
    let dict = parse_dict(&dict_raw);

    let model_path = paths.recognition_model.clone();
    let session = tokio::task::spawn_blocking(move || build_session(&model_path))
        .await
        .expect("session build task panicked")?;

    Ok(LoadedSession {
        session: Box::new(OrtInferenceSession(session)),
        dict,
    })
}

fn build_session(path: &Path) -> Result<Session, ort::Error> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_inter_threads(1)?
        .with_intra_threads(4)?
        .commit_from_file(path)
}

fn parse_dict(raw: &str) -> Vec<String> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Region {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// Composites RGBA over a white background: `c' = c*a + 255*(1-a)`.
fn composite_over_white(rgba: &[u8], w: u32, h: u32) -> Vec<u8> {
    let n = (w * h) as usize;
    let mut out = Vec::with_capacity(n * 3);
    for px in 0..n {
        let i = px * 4;
        let (r, g, b, a) = (
            f32::from(rgba[i]),
            f32::from(rgba[i + 1]),
            f32::from(rgba[i + 2]),
            f32::from(rgba[i + 3]) / 255.0,
        );
        out.push(composite_channel(r, a));
        out.push(composite_channel(g, a));
        out.push(composite_channel(b, a));
    }
    out
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn composite_channel(c: f32, a: f32) -> u8 {
    (c * a + 255.0 * (1.0 - a)).round().clamp(0.0, 255.0) as u8
}

/// Row-scan line detection (§4.F step 2): finds maximal contiguous runs of
/// rows containing a dark-enough pixel, pads them, then trims each
/// horizontally by the same threshold.
fn detect_line_regions(rgb: &[u8], w: u32, h: u32) -> Vec<Region> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let row_has_text: Vec<bool> = (0..h).map(|y| row_has_dark_pixel(rgb, w, y)).collect();

    let mut regions = Vec::new();
    let mut run_start: Option<u32> = None;
    for y in 0..h {
        match (row_has_text[y as usize], run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(start)) => {
                push_padded_region(&mut regions, rgb, w, h, start, y);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        push_padded_region(&mut regions, rgb, w, h, start, h);
    }
    regions
}

fn push_padded_region(regions: &mut Vec<Region>, rgb: &[u8], w: u32, h: u32, start: u32, end: u32) {
    let top = start.saturating_sub(LINE_PADDING_PX);
    let bottom = (end + LINE_PADDING_PX).min(h);
    let Some((left, right)) = horizontal_bounds(rgb, w, top, bottom) else {
        return;
    };
    let left = left.saturating_sub(LINE_PADDING_PX);
    let right = (right + LINE_PADDING_PX).min(w);
    if right <= left || right - left < MIN_REGION_WIDTH_PX {
        return;
    }
    regions.push(Region {
        x: left,
        y: top,
        w: right - left,
        h: bottom - top,
    });
}

fn row_has_dark_pixel(rgb: &[u8], w: u32, y: u32) -> bool {
    (0..w).any(|x| pixel_gray(rgb, w, x, y) < LINE_DETECT_THRESHOLD)
}

fn horizontal_bounds(rgb: &[u8], w: u32, top: u32, bottom: u32) -> Option<(u32, u32)> {
    let mut left = None;
    let mut right = None;
    for y in top..bottom {
        for x in 0..w {
            if pixel_gray(rgb, w, x, y) < LINE_DETECT_THRESHOLD {
                left = Some(left.map_or(x, |l: u32| l.min(x)));
                right = Some(right.map_or(x + 1, |r: u32| r.max(x + 1)));
            }
        }
    }
    Some((left?, right?))
}

fn pixel_gray(rgb: &[u8], w: u32, x: u32, y: u32) -> u32 {
    let i = ((y * w + x) * 3) as usize;
    (u32::from(rgb[i]) + u32::from(rgb[i + 1]) + u32::from(rgb[i + 2])) / 3
}

fn crop(rgb: &[u8], src_w: u32, region: Region) -> Vec<u8> {
    let mut out = Vec::with_capacity((region.w * region.h * 3) as usize);
    for y in region.y..region.y + region.h {
        let row_start = ((y * src_w + region.x) * 3) as usize;
        let row_end = row_start + (region.w * 3) as usize;
        out.extend_from_slice(&rgb[row_start..row_end]);
    }
    out
}

/// Nearest-neighbour resize to a fixed height, preserving aspect ratio, with
/// the resulting width clamped to `[1, 1920]` (§4.F step 3).
fn resize_nearest_to_height(rgb: &[u8], w: u32, h: u32, target_h: u32) -> (Vec<u8>, u32, u32) {
    if w == 0 || h == 0 {
        return (vec![255; (target_h * 3) as usize], 1, target_h);
    }
    let target_w = ((w as u64 * u64::from(target_h)) / u64::from(h))
        .clamp(1, u64::from(MAX_RESIZE_WIDTH_PX)) as u32;

    let mut out = Vec::with_capacity((target_w * target_h * 3) as usize);
    for ty in 0..target_h {
        let sy = (ty * h / target_h).min(h - 1);
        for tx in 0..target_w {
            let sx = (tx * w / target_w).min(w - 1);
            let i = ((sy * w + sx) * 3) as usize;
            out.extend_from_slice(&rgb[i..i + 3]);
        }
    }
    (out, target_w, target_h)
}

/// Builds a normalised CHW tensor, `v' = v/127.5 - 1`.
fn build_chw_tensor(rgb: &[u8], w: u32, h: u32) -> Array3<f32> {
    let (w, h) = (w as usize, h as usize);
    Array3::from_shape_fn((3, h, w), |(c, y, x)| {
        let v = f32::from(rgb[(y * w + x) * 3 + c]);
        v / 127.5 - 1.0
    })
}

/// CTC greedy decode (§4.F step 4): index 0 is blank; repeats collapse.
fn ctc_greedy_decode(logits: &[f32], timesteps: usize, classes: usize, dict: &[String]) -> (String, f32) {
    if classes == 0 || timesteps == 0 {
        return (String::new(), 0.0);
    }
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut previous = 0usize;

    for t in 0..timesteps {
        let row = &logits[t * classes..(t + 1) * classes];
        let (argmax, confidence) = argmax_and_confidence(row);
        if argmax != 0 && argmax != previous {
            if argmax == dict.len() + 1 {
                text.push(' ');
            } else if let Some(glyph) = dict.get(argmax - 1) {
                text.push_str(glyph);
            }
            confidences.push(confidence);
        }
        previous = argmax;
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };
    (text, confidence)
}

fn argmax_and_confidence(row: &[f32]) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    let sum_exp: f32 = row.iter().map(|&v| (v - best_val).exp()).sum();
    let confidence = if sum_exp > 0.0 { 1.0 / sum_exp } else { 0.0 };
    (best_idx, confidence)
}
