// SPDX-License-Identifier: GPL-2.0-or-later

use common::{ArtifactEnvConfig, TrickplayOptions};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use url::Url;

/// Main config. Generated from `default_config.tpl` on first run, then
/// re-read from disk on every subsequent startup.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvConf {
    data_dir: PathBuf,
    config_dir: PathBuf,
    model_base_url: Url,
    enable_trickplay_image_extraction: bool,
    disable_iframe_playlist_generation: bool,
    save_with_media: bool,
    save_with_media_overrides: HashMap<String, bool>,
    trickplay: TrickplayOptions,
    raw: String,
}

#[derive(Debug, Deserialize)]
struct RawEnvConf {
    data_dir: PathBuf,
    config_dir: PathBuf,
    model_base_url: Url,
    enable_trickplay_image_extraction: bool,
    disable_iframe_playlist_generation: bool,
    save_with_media: bool,
    #[serde(default)]
    save_with_media_overrides: HashMap<String, bool>,
    trickplay: TrickplayOptions,
}

impl EnvConf {
    pub fn new(config_path: &PathBuf) -> Result<EnvConf, EnvConfigNewError> {
        use EnvConfigNewError::*;
        if !config_path.exists() {
            print!(
                "\n\nGenerating '{}' and exiting..\n\n\n",
                config_path.to_string_lossy()
            );

            let cwd = std::env::current_dir().map_err(GetCwd)?;
            generate_config(config_path, &cwd)?;
            std::process::exit(0);
        }

        let env_toml = fs::read_to_string(config_path).map_err(ReadFile)?;
        let env = parse_config(env_toml)?;

        Ok(env)
    }
}

impl ArtifactEnvConfig for EnvConf {
    fn data_dir(&self) -> &Path {
        &self.data_dir
    }
    fn config_dir(&self) -> &Path {
        &self.config_dir
    }
    fn model_base_url(&self) -> &Url {
        &self.model_base_url
    }
    fn trickplay(&self) -> &TrickplayOptions {
        &self.trickplay
    }
    fn save_with_media(&self, library: &str) -> bool {
        self.save_with_media_overrides
            .get(library)
            .copied()
            .unwrap_or(self.save_with_media)
    }
    fn enable_trickplay_image_extraction(&self) -> bool {
        self.enable_trickplay_image_extraction
    }
    fn disable_iframe_playlist_generation(&self) -> bool {
        self.disable_iframe_playlist_generation
    }
    fn raw(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Error)]
pub enum EnvConfigNewError {
    #[error("read env config file: {0}")]
    ReadFile(std::io::Error),

    #[error("generate env config: {0}")]
    Generate(#[from] GenerateEnvConfigError),

    #[error("parse env config: {0}")]
    Parse(#[from] ParseEnvConfigError),

    #[error("get current working directory: {0}")]
    GetCwd(std::io::Error),
}

#[derive(Debug, Error)]
pub enum GenerateEnvConfigError {
    #[error("create file: {0}")]
    CreateFile(std::io::Error),

    #[error("templater error: {0}")]
    AddTemplate(upon::Error),

    #[error("render template: {0}")]
    RenderTemplate(upon::Error),

    #[error("get parent directory")]
    GetParentDir(),

    #[error("create directory: {0}")]
    CreateDir(std::io::Error),

    #[error("write file: {0}")]
    WriteFile(std::io::Error),
}

fn generate_config(path: &Path, cwd: &Path) -> Result<(), GenerateEnvConfigError> {
    use GenerateEnvConfigError::*;

    let data = HashMap::from([("cwd", cwd.to_string_lossy())]);

    let mut engine = upon::Engine::new();
    engine
        .add_template("config", CONFIG_TEMPLATE)
        .map_err(AddTemplate)?;

    let config = engine
        .get_template("config")
        .expect("template should just have been added")
        .render(data)
        .to_string()
        .map_err(RenderTemplate)?;

    let config_dir = path.parent().ok_or(GetParentDir())?;
    fs::create_dir_all(config_dir).map_err(CreateDir)?;

    let mut file = File::create(path).map_err(CreateFile)?;
    write!(file, "{config}").map_err(WriteFile)?;

    Ok(())
}

const CONFIG_TEMPLATE: &str = include_str!("./default_config.tpl");

#[derive(Debug, Error)]
pub enum ParseEnvConfigError {
    #[error("{0}")]
    DeserializeToml(#[from] toml::de::Error),

    #[error("{0} path is not absolute '{1}'")]
    PathNotAbsolute(String, PathBuf),

    #[error("create data dir: {0} {1}")]
    CreateDataDir(PathBuf, std::io::Error),

    #[error("canonicalize path: {0:?} {1}")]
    Canonicalize(PathBuf, std::io::Error),
}

fn parse_config(env_toml: String) -> Result<EnvConf, ParseEnvConfigError> {
    use ParseEnvConfigError::*;
    let raw: RawEnvConf = toml::from_str(&env_toml)?;

    if !raw.data_dir.is_absolute() {
        return Err(PathNotAbsolute("data_dir".to_owned(), raw.data_dir));
    }
    if !raw.config_dir.is_absolute() {
        return Err(PathNotAbsolute("config_dir".to_owned(), raw.config_dir));
    }

    std::fs::create_dir_all(&raw.data_dir).map_err(|e| CreateDataDir(raw.data_dir.clone(), e))?;
    let data_dir = raw
        .data_dir
        .canonicalize()
        .map_err(|e| Canonicalize(raw.data_dir, e))?;

    let config_dir = raw
        .config_dir
        .canonicalize()
        .map_err(|e| Canonicalize(raw.config_dir, e))?;

    Ok(EnvConf {
        data_dir,
        config_dir,
        model_base_url: raw.model_base_url,
        enable_trickplay_image_extraction: raw.enable_trickplay_image_extraction,
        disable_iframe_playlist_generation: raw.disable_iframe_playlist_generation,
        save_with_media: raw.save_with_media,
        save_with_media_overrides: raw.save_with_media_overrides,
        trickplay: raw.trickplay,
        raw: env_toml,
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn trickplay_toml() -> &'static str {
        "
            [trickplay]
            interval_ms = 10000
            widths = [320]
            tile_width = 10
            tile_height = 10
            jpeg_quality = 75
            hw_accel = false
            threads = 1
            priority = false
            iframes_only = false
        "
    }

    #[test]
    fn test_config_generate_then_parse() {
        let temp_dir = TempDir::new().unwrap();
        std::env::set_current_dir(temp_dir.path()).unwrap();
        let config_file = temp_dir.path().join("configs").join("env.toml");

        generate_config(&config_file, temp_dir.path()).unwrap();

        // generated data_dir/config_dir are relative to cwd and don't exist
        // yet; parse_config creates data_dir but not config_dir.
        std::fs::create_dir_all(temp_dir.path().join("configs")).unwrap();

        let env_toml = fs::read_to_string(&config_file).unwrap();
        parse_config(env_toml).unwrap();
    }

    #[test]
    fn test_parse_config_ok() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir(&config_dir).unwrap();

        let config = format!(
            "
            data_dir = \"{}\"
            config_dir = \"{}\"
            model_base_url = \"https://models.example.invalid/ocr/\"
            enable_trickplay_image_extraction = true
            disable_iframe_playlist_generation = false
            save_with_media = false
            {}
            ",
            data_dir.to_str().unwrap(),
            config_dir.to_str().unwrap(),
            trickplay_toml(),
        );

        let got = parse_config(config.clone()).unwrap();
        assert_eq!(data_dir.canonicalize().unwrap(), got.data_dir);
        assert_eq!(config_dir.canonicalize().unwrap(), got.config_dir);
        assert_eq!("models.example.invalid", got.model_base_url.host_str().unwrap());
        assert!(got.enable_trickplay_image_extraction());
        assert!(!got.disable_iframe_playlist_generation());
        assert!(!got.save_with_media("any_library"));
        assert_eq!(10000, got.trickplay().interval_ms);
        assert_eq!(config, got.raw);
    }

    #[test]
    fn test_save_with_media_override() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir(&config_dir).unwrap();

        let config = format!(
            "
            data_dir = \"{}\"
            config_dir = \"{}\"
            model_base_url = \"https://models.example.invalid/ocr/\"
            enable_trickplay_image_extraction = true
            disable_iframe_playlist_generation = false
            save_with_media = false
            [save_with_media_overrides]
            movies = true
            {}
            ",
            data_dir.to_str().unwrap(),
            config_dir.to_str().unwrap(),
            trickplay_toml(),
        );

        let got = parse_config(config).unwrap();
        assert!(got.save_with_media("movies"));
        assert!(!got.save_with_media("shows"));
    }

    #[test]
    fn test_parse_config_deserialize_error() {
        assert!(matches!(
            parse_config("&".to_owned()),
            Err(ParseEnvConfigError::DeserializeToml(_)),
        ));
    }

    #[test]
    fn test_parse_config_data_dir_abs_error() {
        let config = format!(
            "
            data_dir = \".\"
            config_dir = \"/ok\"
            model_base_url = \"https://models.example.invalid/ocr/\"
            enable_trickplay_image_extraction = true
            disable_iframe_playlist_generation = false
            save_with_media = false
            {}
            ",
            trickplay_toml(),
        );

        assert!(matches!(
            parse_config(config),
            Err(ParseEnvConfigError::PathNotAbsolute(..))
        ));
    }

    #[test]
    fn test_parse_config_config_dir_abs_error() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let config = format!(
            "
            data_dir = \"{}\"
            config_dir = \".\"
            model_base_url = \"https://models.example.invalid/ocr/\"
            enable_trickplay_image_extraction = true
            disable_iframe_playlist_generation = false
            save_with_media = false
            {}
            ",
            data_dir.to_str().unwrap(),
            trickplay_toml(),
        );

        assert!(matches!(
            parse_config(config),
            Err(ParseEnvConfigError::PathNotAbsolute(..))
        ));
    }
}
