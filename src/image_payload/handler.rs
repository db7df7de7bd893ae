//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageSlider` 只负责流程编排与配置管理，不关心前端渲染与事件传输。
//! 预处理链路固定为：
//! 1. 拆分 sketch 结构（图片 + 蒙版）
//! 2. 按来源加载原始字节并解码
//! 3. 色彩模式转换 → 裁剪缩放 → 反相 → 镜像
//! 4. 蒙版白化
//! 5. 按输出类型格式化
//!
//! 后处理链路则把用户回调的返回值落盘为临时文件引用。
//!
//! ## 实现思路
//!
//! - 配置在构造时校验一次，之后只读；`update` 只生成稀疏覆盖指令。
//! - 临时文件由组件持有的 `TempStorage` 统一登记，调用方可显式清理。
//! - 记录 `load/transform/format/total` 阶段耗时，便于性能诊断。

use std::path::{Path, PathBuf};
use std::time::Instant;

use super::format::format_image;
use super::pipeline;
use super::source::{FileData, OutputValue, Preprocessed, RawImageData, WireImage, WirePayload};
use super::{ComponentConfig, DecodedImage, Event, ImageConfig, ImageError, ImageOptions, ImageUpdate};
use crate::storage::TempStorage;

const EXAMPLE_INPUT_URL: &str = "https://raw.githubusercontent.com/gradio-app/gradio/main/test/test_files/bus.png";

/// 图片对比组件的载荷转换器。
///
/// 持有校验后的配置、临时文件存储以及已后处理的初始值。
#[derive(Debug)]
pub struct ImageSlider {
    config: ImageConfig,
    storage: TempStorage,
    value: Option<FileData>,
}

impl ImageSlider {
    /// 组件对外暴露的事件。
    pub const EVENTS: [Event; 6] = [
        Event::Edit,
        Event::Clear,
        Event::Change,
        Event::Stream,
        Event::Select,
        Event::Upload,
    ];

    /// 校验构造入参，初始化临时存储，并对初始值做一次后处理。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_slider::image_payload::{ImageOptions, ImageSlider, ImageType};
    ///
    /// let slider = ImageSlider::new(ImageOptions {
    ///     image_type: ImageType::Filepath,
    ///     ..ImageOptions::default()
    /// })?;
    /// assert!(slider.config().value.is_none());
    /// # Ok::<(), image_slider::image_payload::ImageError>(())
    /// ```
    pub fn new(mut options: ImageOptions) -> Result<Self, ImageError> {
        let initial = options.value.take();
        let config = ImageConfig::new(options)?;
        let storage = TempStorage::from_config(config.temp_dir())?;

        let mut slider = Self {
            config,
            storage,
            value: None,
        };
        slider.value = slider.postprocess(initial)?;

        log::info!(
            "⚙️ 组件已创建 - type={} mode={} source={} tool={} temp_dir={}",
            slider.config.image_type(),
            slider.config.image_mode(),
            slider.config.source(),
            slider.config.tool(),
            slider.storage.root().display()
        );

        Ok(slider)
    }

    /// 从 JSON 构造入参创建组件。
    pub fn from_json(json: &str) -> Result<Self, ImageError> {
        Self::new(ImageOptions::from_json(json)?)
    }

    /// 前端使用的配置快照。
    pub fn config(&self) -> ComponentConfig {
        self.config.snapshot(self.value.clone())
    }

    pub fn image_config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn storage(&self) -> &TempStorage {
        &self.storage
    }

    /// 生成带 `"__type__": "update"` 标记的稀疏覆盖指令。
    pub fn update(update: ImageUpdate) -> serde_json::Value {
        update.into_directive()
    }

    /// 开启流式输入时来源必须为 webcam。
    pub fn check_streamable(&self) -> Result<(), ImageError> {
        if self.config.streaming() && self.config.source() != super::CaptureSource::Webcam {
            return Err(ImageError::Configuration(
                "仅当 source 为 'webcam' 时才支持图片流式输入".to_string(),
            ));
        }
        Ok(())
    }

    /// 示例展示用的路径文本。
    ///
    /// `None` 返回空串；配置了 `root_url` 时原样返回，否则转为绝对路径。
    pub fn as_example(&self, input: Option<&str>) -> String {
        let Some(input) = input else {
            return String::new();
        };

        if self.config.root_url().is_some() {
            return input.to_string();
        }

        std::path::absolute(input)
            .map(|path| path.to_string_lossy().to_string())
            .unwrap_or_else(|_| input.to_string())
    }

    /// 供示例与文档使用的默认输入。
    pub fn example_inputs() -> &'static str {
        EXAMPLE_INPUT_URL
    }

    /// 预处理：将前端载荷转换为用户回调需要的形态。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_slider::image_payload::{ImageOptions, ImageSlider};
    ///
    /// let slider = ImageSlider::new(ImageOptions::default())?;
    /// assert!(slider.preprocess(None)?.is_none());
    /// # Ok::<(), image_slider::image_payload::ImageError>(())
    /// ```
    pub fn preprocess(&self, payload: Option<WirePayload>) -> Result<Option<Preprocessed>, ImageError> {
        let Some(payload) = payload else {
            return Ok(None);
        };

        let (image_input, mask_input) = match (payload, self.config.expects_mask()) {
            (WirePayload::Sketch { image, mask }, true) => (image, mask),
            (WirePayload::Single(image), false) => (image, None),
            (WirePayload::Single(_), true) => {
                return Err(ImageError::InvalidPayload(
                    "sketch 工具需要 {image, mask} 结构的输入".to_string(),
                ));
            }
            (WirePayload::Sketch { .. }, false) => {
                return Err(ImageError::InvalidPayload(format!(
                    "tool={} source={} 时不接受 {{image, mask}} 结构",
                    self.config.tool(),
                    self.config.source()
                )));
            }
        };

        if image_input.is_empty() {
            return Ok(None);
        }

        let total_start = Instant::now();

        let load_start = Instant::now();
        let raw = self.load_wire_image(&image_input)?;
        log::debug!("📥 载荷来源：{}（{} bytes）", raw.source_hint, raw.bytes.len());
        let decoded = pipeline::decode_image(&raw.bytes, self.config.loader())?;
        let load_elapsed = load_start.elapsed();

        let transform_start = Instant::now();
        let image = self.transform(decoded)?;
        let mask = match mask_input {
            Some(mask) if !mask.is_empty() => {
                let raw_mask = self.load_wire_image(&mask)?;
                let decoded_mask = pipeline::decode_image(&raw_mask.bytes, self.config.loader())?;
                Some(pipeline::whiten_mask(&decoded_mask)?)
            }
            _ if self.config.expects_mask() => Some(pipeline::empty_mask(image.width(), image.height())?),
            _ => None,
        };
        let transform_elapsed = transform_start.elapsed();

        let format_start = Instant::now();
        let image_type = self.config.image_type();
        let output = match mask {
            Some(mask) => Preprocessed::Sketch {
                image: format_image(image, image_type, &self.storage)?,
                mask: format_image(mask, image_type, &self.storage)?,
            },
            None => Preprocessed::Image(format_image(image, image_type, &self.storage)?),
        };
        let format_elapsed = format_start.elapsed();

        log::info!(
            "✅ 预处理完成 - load={}ms transform={}ms format={}ms total={}ms",
            load_elapsed.as_millis(),
            transform_elapsed.as_millis(),
            format_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(Some(output))
    }

    /// 后处理：将用户回调的返回值落盘为临时文件引用。
    pub fn postprocess(&self, value: Option<OutputValue>) -> Result<Option<FileData>, ImageError> {
        let value = match value {
            None | Some(OutputValue::Json(serde_json::Value::Null)) => return Ok(None),
            Some(value) => value,
        };

        let start = Instant::now();
        let path = match value {
            OutputValue::Array(array) => {
                let png = array.to_image()?.encode_png()?;
                self.storage.materialize_bytes(&png, "file.png")?
            }
            OutputValue::Image(image) => self.materialize_png(&image)?,
            OutputValue::Text(text) => self.store_reference(&text)?,
            OutputValue::Path(path) => self.store_reference(&path.to_string_lossy())?,
            other => {
                log::debug!("🚫 无法后处理的值：{}", other.kind());
                return Err(ImageError::UnsupportedValue(format!(
                    "无法将该值作为图片处理：{}",
                    other.kind()
                )));
            }
        };

        log::info!("✅ 后处理完成 - {}ms -> {}", start.elapsed().as_millis(), path.display());
        Ok(Some(FileData::reference(&path)))
    }

    /// 色彩模式转换 → 裁剪缩放 → 反相 → 镜像。
    fn transform(&self, decoded: DecodedImage) -> Result<DecodedImage, ImageError> {
        let mut image = decoded.convert(self.config.image_mode());

        if let Some(shape) = self.config.shape() {
            image = pipeline::fit(&image, shape)?;
        }
        if self.config.invert_colors() {
            image = pipeline::invert(&image)?;
        }
        if self.config.should_mirror() {
            image = pipeline::mirror(&image);
        }

        Ok(image)
    }

    fn load_wire_image(&self, input: &WireImage) -> Result<RawImageData, ImageError> {
        let loader = self.config.loader();
        match input {
            WireImage::DataUrl(data) => Self::load_from_base64(data, loader),
            WireImage::Upload(file) => {
                let stored = match &file.data {
                    Some(data) => {
                        let file_name = Self::upload_file_name(file);
                        self.storage.materialize_base64(data, &file_name, loader.max_file_size)?
                    }
                    None => self.storage.copy_to_temp_if_absent(Path::new(&file.name))?,
                };
                Self::load_from_file(&stored, loader)
            }
        }
    }

    /// 内联上传落盘时使用的文件名：原始文件名优先，其次服务端路径的文件名。
    fn upload_file_name(file: &FileData) -> String {
        file.orig_name
            .as_deref()
            .into_iter()
            .chain(std::iter::once(file.name.as_str()))
            .filter_map(|name| Path::new(name).file_name())
            .map(|name| name.to_string_lossy().to_string())
            .next()
            .unwrap_or_else(|| "file".to_string())
    }

    fn materialize_png(&self, image: &DecodedImage) -> Result<PathBuf, ImageError> {
        let png = image.encode_png()?;
        self.storage.materialize_bytes(&png, "file.png")
    }

    /// 字符串 / 路径：URL 下载一次，本地文件复制一次。
    fn store_reference(&self, reference: &str) -> Result<PathBuf, ImageError> {
        if Self::is_http_url_like(reference) {
            let loader = self.config.loader();
            return self
                .storage
                .download_to_temp_copy(reference, |url| Self::download(url, loader));
        }

        self.storage.copy_to_temp_if_absent(Path::new(reference))
    }
}
