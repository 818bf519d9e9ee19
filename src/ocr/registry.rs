//! §4.E OCR model registry: tracks and downloads the ONNX recognition model,
//! shared detection model, and glyph dictionary for each `ScriptFamily`.
//! Grounded on the originating codebase's `LabelCache` (atomic
//! download-then-rename install, one file per remote resource).

use async_trait::async_trait;
use common::{Cancelled, ScriptFamily};
use http_body_util::{BodyExt, Empty};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

const DET_MODEL_FILE: &str = "det.onnx";
const REC_MODEL_FILE: &str = "rec.onnx";
const DICT_FILE: &str = "dict.txt";

/// Resolved on-disk paths for one family's models (§4.E).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OcrModelPaths {
    /// Shared across all families.
    ///
    /// `OcrEngine::recognize` does not currently load this: it uses
    /// row-scan line detection instead. See the open question in DESIGN.md.
    // TODO: replace the row-scan with detection-model region proposals.
    pub detection_model: PathBuf,
    pub recognition_model: PathBuf,
    pub dict: PathBuf,
}

#[async_trait]
pub trait Fetcher {
    async fn fetch_to_file(&self, url: &Url, dest: &Path) -> Result<(), FetchError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("parse uri: {0}")]
    ParseUri(#[from] hyper::http::uri::InvalidUri),

    #[error("request: {0}")]
    Request(String),

    #[error("non-success status: {0}")]
    Status(hyper::StatusCode),

    #[error("write body: {0}")]
    Write(std::io::Error),
}

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Empty<bytes::Bytes>>;

/// Default `Fetcher`, downloading over HTTPS (falling back to HTTP).
pub struct HyperFetcher {
    client: HttpsClient,
}

impl HyperFetcher {
    #[must_use]
    pub fn new() -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        Self {
            client: Client::builder(TokioExecutor::new()).build(https),
        }
    }
}

impl Default for HyperFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HyperFetcher {
    async fn fetch_to_file(&self, url: &Url, dest: &Path) -> Result<(), FetchError> {
        use FetchError::*;
        let uri: hyper::Uri = url.as_str().parse()?;
        let res = self
            .client
            .get(uri)
            .await
            .map_err(|e| Request(e.to_string()))?;
        if !res.status().is_success() {
            return Err(Status(res.status()));
        }
        let mut body = res.into_body();
        let mut file = tokio::fs::File::create(dest).await.map_err(Write)?;
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| Request(e.to_string()))?;
            if let Some(chunk) = frame.data_ref() {
                file.write_all(chunk).await.map_err(Write)?;
            }
        }
        file.flush().await.map_err(Write)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EnsureError {
    #[error("{0}")]
    Cancelled(#[from] Cancelled),

    #[error("create dir for {0}: {1}")]
    CreateDir(&'static str, std::io::Error),

    #[error("build url for {0}: {1}")]
    Url(&'static str, url::ParseError),

    #[error("fetch {0}: {1}")]
    Fetch(&'static str, FetchError),

    #[error("rename {0}: {1}")]
    Rename(&'static str, std::io::Error),
}

/// Downloads and tracks OCR models under `<data_dir>/ocr-models`.
pub struct OcrModelRegistry<F: Fetcher + Send + Sync = HyperFetcher> {
    root: PathBuf,
    base_url: Url,
    fetcher: F,
    // Single process-wide lock serialising every download, regardless of
    // family (§4.E: "one global lock - download I/O is not the bottleneck").
    download_lock: tokio::sync::Mutex<()>,
}

impl<F: Fetcher + Send + Sync> OcrModelRegistry<F> {
    pub fn new(root: PathBuf, base_url: Url, fetcher: F) -> Self {
        Self {
            root,
            base_url,
            fetcher,
            download_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn paths(&self, family: ScriptFamily) -> OcrModelPaths {
        OcrModelPaths {
            detection_model: self.root.join(DET_MODEL_FILE),
            recognition_model: self.root.join(family.dir_name()).join(REC_MODEL_FILE),
            dict: self.root.join(family.dir_name()).join(DICT_FILE),
        }
    }

    #[must_use]
    pub fn has_models(&self, family: ScriptFamily) -> bool {
        let p = self.paths(family);
        p.detection_model.exists() && p.recognition_model.exists() && p.dict.exists()
    }

    /// §4.E `ensure` protocol: re-check existence under the download lock,
    /// since a concurrent caller may have just finished.
    pub async fn ensure(
        &self,
        family: ScriptFamily,
        cancel: &CancellationToken,
    ) -> Result<(), EnsureError> {
        if self.has_models(family) {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(EnsureError::Cancelled(Cancelled));
        }
        let _permit = tokio::select! {
            g = self.download_lock.lock() => g,
            () = cancel.cancelled() => return Err(EnsureError::Cancelled(Cancelled)),
        };
        if self.has_models(family) {
            return Ok(());
        }

        // rec.onnx is committed last: §8 requires that a failed ensure never
        // leaves rec.onnx behind, so every file it could be mistaken as
        // paired with (det.onnx, dict.txt) must already be in place first.
        let paths = self.paths(family);
        self.fetch_one("det.onnx", DET_MODEL_FILE, &paths.detection_model)
            .await?;
        self.fetch_one(
            "dict.txt",
            &format!("{}/{DICT_FILE}", family.dir_name()),
            &paths.dict,
        )
        .await?;
        self.fetch_one(
            "rec.onnx",
            &format!("{}/{REC_MODEL_FILE}", family.dir_name()),
            &paths.recognition_model,
        )
        .await?;
        Ok(())
    }

    pub async fn ensure_common(&self, cancel: &CancellationToken) -> Result<(), EnsureError> {
        self.ensure(ScriptFamily::Latin, cancel).await?;
        self.ensure(ScriptFamily::Cjk, cancel).await?;
        Ok(())
    }

    pub async fn ensure_all(&self, cancel: &CancellationToken) -> Result<(), EnsureError> {
        for family in ScriptFamily::all() {
            self.ensure(family, cancel).await?;
        }
        Ok(())
    }

    async fn fetch_one(
        &self,
        name: &'static str,
        rel: &str,
        dest: &Path,
    ) -> Result<(), EnsureError> {
        use EnsureError::*;
        if dest.exists() {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CreateDir(name, e))?;
        }
        let url = self.base_url.join(rel).map_err(|e| Url(name, e))?;
        let mut tmp = dest.to_path_buf();
        tmp.set_extension("tmp");

        match self.fetcher.fetch_to_file(&url, &tmp).await {
            Ok(()) => {
                tokio::fs::rename(&tmp, dest)
                    .await
                    .map_err(|e| Rename(name, e))?;
                Ok(())
            }
            Err(e) => {
                let _ignore = tokio::fs::remove_file(&tmp).await;
                Err(Fetch(name, e))
            }
        }
    }
}
