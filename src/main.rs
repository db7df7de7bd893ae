//! # 图片对比组件：命令行入口
//!
//! 本文件仅负责参数解析与结果输出，业务逻辑详见 `lib.rs` 架构文档。
//!
//! ```text
//! image-slider config      <options.json>
//! image-slider preprocess  <options.json> <payload.json>
//! image-slider postprocess <options.json> <value>
//! ```
//!
//! `options.json` 为组件构造入参；`payload.json` 为前端载荷（data URL 字符串、
//! 上传文件引用或 `{image, mask}`）；`value` 为本地路径或 URL。

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use image_slider::error::AppError;
use image_slider::image_payload::{AppImage, ImageError, ImageSlider, OutputValue, Preprocessed, WirePayload};

#[derive(Parser, Debug)]
#[command(
    name = "image-slider",
    about = "Convert Image / ImageSlider payloads from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// print the validated component config snapshot
    Config {
        /// component options as JSON
        options: PathBuf,
    },
    /// run a frontend payload through the preprocess chain
    Preprocess {
        /// component options as JSON
        options: PathBuf,
        /// frontend payload as JSON
        payload: PathBuf,
        /// print object outputs as PNG data URLs instead of a summary
        #[arg(long)]
        data_url: bool,
    },
    /// store a local path or URL as a temp file reference
    Postprocess {
        /// component options as JSON
        options: PathBuf,
        /// local path or http(s) URL
        value: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(output) => println!("{}", output),
        Err(err) => {
            match &err {
                AppError::Image(image_err) => {
                    log::error!("❌ [{}/{}] {}", image_err.stage(), image_err.code(), image_err)
                }
                other => log::error!("❌ {}", other),
            }
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}

fn load_slider(options: &Path) -> Result<ImageSlider, AppError> {
    let options_json = std::fs::read_to_string(options)?;
    Ok(ImageSlider::from_json(&options_json)?)
}

fn run(command: Commands) -> Result<String, AppError> {
    match command {
        Commands::Config { options } => {
            let slider = load_slider(&options)?;
            Ok(serde_json::to_string_pretty(&slider.config())?)
        }
        Commands::Preprocess { options, payload, data_url } => {
            let slider = load_slider(&options)?;
            let payload: WirePayload = serde_json::from_str(&std::fs::read_to_string(payload)?)?;
            let output = slider.preprocess(Some(payload))?;
            Ok(describe(output.as_ref(), data_url)?)
        }
        Commands::Postprocess { options, value } => {
            let slider = load_slider(&options)?;
            let output = slider.postprocess(Some(OutputValue::from(value.as_str())))?;
            Ok(serde_json::to_string_pretty(&output)?)
        }
    }
}

/// 将预处理结果渲染为一行摘要；`data_url` 时图像对象输出为 PNG Data URL。
fn describe(output: Option<&Preprocessed>, data_url: bool) -> Result<String, ImageError> {
    let one = |image: &AppImage| -> Result<String, ImageError> {
        Ok(match image {
            AppImage::Array(array) => format!("array{:?}", array.shape()),
            AppImage::Image(image) if data_url => image.encode_to_base64_png()?,
            AppImage::Image(image) => format!("image {}x{} {}", image.width(), image.height(), image.mode()),
            AppImage::Filepath(path) => path.display().to_string(),
        })
    };

    Ok(match output {
        None => "null".to_string(),
        Some(Preprocessed::Image(image)) => one(image)?,
        Some(Preprocessed::Sketch { image, mask }) => format!("image={} mask={}", one(image)?, one(mask)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_parse_positionals() {
        let cli = Cli::try_parse_from(["image-slider", "postprocess", "opts.json", "https://example.com/a.png"])
            .expect("parse");
        match cli.command {
            Commands::Postprocess { options, value } => {
                assert_eq!(options, PathBuf::from("opts.json"));
                assert_eq!(value, "https://example.com/a.png");
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["image-slider", "preprocess", "opts.json"]).is_err());
    }

    #[test]
    fn object_output_can_be_printed_as_data_url() {
        let image = image_slider::image_payload::DecodedImage::from_u8(
            1,
            1,
            image_slider::image_payload::ImageMode::Rgb,
            vec![255, 0, 0],
        )
        .expect("image");
        let output = Preprocessed::Image(AppImage::Image(image));

        assert_eq!(describe(Some(&output), false).expect("summary"), "image 1x1 RGB");
        assert!(
            describe(Some(&output), true)
                .expect("data url")
                .starts_with("data:image/png;base64,")
        );
        assert_eq!(describe(None, true).expect("null"), "null");
    }

    #[test]
    fn config_command_prints_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = dir.path().join("options.json");
        let json = serde_json::json!({ "source": "webcam", "temp_dir": dir.path().join("store") });
        std::fs::write(&options, json.to_string()).expect("write options");

        let output = run(Commands::Config { options }).expect("config");
        let snapshot: serde_json::Value = serde_json::from_str(&output).expect("json output");

        assert_eq!(snapshot["source"], "webcam");
    }
}
