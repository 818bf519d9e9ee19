// SPDX-License-Identifier: GPL-2.0-or-later

use common::{
    ArcMsgLogger, ArtifactEnvConfig, DisallowedShape, LogLevel, MsgLogger, SpatialFormat, VideoId,
    VideoRef,
};
use coordinator::{refresh_video, PathManager, TrickplayLock};
use media_encoder::FfmpegMediaEncoder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trickplay::JpegImageEncoder;

const DEFAULT_CONFIG_PATH: &str = "./configs/coordinator.toml";

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("argument error: {e}");
            std::process::exit(2);
        }
    };

    let config = match env::EnvConf::new(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&args, &config).await {
        eprintln!("refresh failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: &Args, config: &dyn ArtifactEnvConfig) -> Result<(), String> {
    let video = VideoRef {
        id: VideoId::try_from(args.video_id.clone()).map_err(|e| e.to_string())?,
        path: args.video_path.clone(),
        spatial_format: SpatialFormat::None,
        width: args.width,
        height: args.height,
        duration_ms: args.duration_ms,
        shape: DisallowedShape::default(),
    };

    let path_manager = PathManager::new(config.data_dir().to_owned());
    let store = artifact_store::ArtifactStore::new(config.data_dir()).map_err(|e| e.to_string())?;
    let media_encoder = FfmpegMediaEncoder::new(config.data_dir().join("scratch"));
    let image_encoder = JpegImageEncoder;
    let lock: TrickplayLock = tokio::sync::Mutex::new(());
    let logger: ArcMsgLogger = Arc::new(StderrMsgLogger);
    let cancel = CancellationToken::new();

    refresh_video(
        &video,
        &args.library,
        args.replace,
        config,
        &path_manager,
        &store,
        &media_encoder,
        &image_encoder,
        &lock,
        &logger,
        &cancel,
    )
    .await
    .map_err(|e| e.to_string())
}

struct StderrMsgLogger;

impl MsgLogger for StderrMsgLogger {
    fn log(&self, level: LogLevel, msg: &str) {
        eprintln!("[{level:?}] {msg}");
    }
}

#[derive(Debug)]
struct Args {
    config: PathBuf,
    video_id: String,
    video_path: PathBuf,
    library: String,
    width: u32,
    height: u32,
    duration_ms: u64,
    replace: bool,
}

fn parse_args() -> Result<Args, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();
    let args = Args {
        config: pargs
            .opt_value_from_str("--config")?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        video_id: pargs.value_from_str("--video-id")?,
        video_path: pargs.value_from_str("--video-path")?,
        library: pargs
            .opt_value_from_str("--library")?
            .unwrap_or_else(|| "default".to_owned()),
        width: pargs.value_from_str("--width")?,
        height: pargs.value_from_str("--height")?,
        duration_ms: pargs.value_from_str("--duration-ms")?,
        replace: pargs.contains("--replace"),
    };
    pargs.finish();
    Ok(args)
}
