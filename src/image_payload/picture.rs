//! # 解码图像对象
//!
//! ## 设计思路
//!
//! `DecodedImage` 是转换链路中的"图像对象"表示：宽高 + 色彩模式 + 交错存储的采样数据，
//! 并记住解码时识别到的源格式（保存为文件时优先沿用）。
//!
//! `image::DynamicImage` 只覆盖 L / LA / RGB / RGBA 等布局，无法表达 CMYK、YCbCr、
//! LAB、HSV、调色板、32 位整型与浮点灰度，因此这里用 `Samples` 自行承载三种采样类型，
//! 只有在编码输出时才渲染回 `DynamicImage`。

use base64::{Engine as _, engine::general_purpose};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use std::io::Cursor;

use super::color::{self, ImageMode, SampleKind};
use super::ImageError;

/// 交错存储的采样数据（行优先，每像素 `mode.channels()` 个采样）。
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Samples {
    U8(Vec<u8>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl Samples {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    fn kind(&self) -> SampleKind {
        match self {
            Self::U8(_) => SampleKind::U8,
            Self::I32(_) => SampleKind::I32,
            Self::F32(_) => SampleKind::F32,
        }
    }
}

/// 已解码的图像对象。
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    mode: ImageMode,
    samples: Samples,
    format: Option<ImageFormat>,
}

impl DecodedImage {
    /// 由 8 位采样构造图像。
    ///
    /// # 示例
    /// ```rust
    /// use image_slider::image_payload::{DecodedImage, ImageMode};
    ///
    /// let red = DecodedImage::from_u8(1, 1, ImageMode::Rgb, vec![255, 0, 0])?;
    /// assert_eq!(red.dimensions(), (1, 1));
    /// # Ok::<(), image_slider::image_payload::ImageError>(())
    /// ```
    pub fn from_u8(width: u32, height: u32, mode: ImageMode, data: Vec<u8>) -> Result<Self, ImageError> {
        if mode.sample_kind() != SampleKind::U8 {
            return Err(ImageError::UnsupportedMode(format!(
                "模式 {} 不使用 8 位采样",
                mode.as_str()
            )));
        }
        Self::from_parts(width, height, mode, Samples::U8(data))
    }

    /// 由 32 位整型灰度采样构造 `I` 模式图像。
    pub fn from_i32(width: u32, height: u32, data: Vec<i32>) -> Result<Self, ImageError> {
        Self::from_parts(width, height, ImageMode::Int32, Samples::I32(data))
    }

    /// 由 32 位浮点灰度采样构造 `F` 模式图像。
    pub fn from_f32(width: u32, height: u32, data: Vec<f32>) -> Result<Self, ImageError> {
        Self::from_parts(width, height, ImageMode::Float32, Samples::F32(data))
    }

    pub(crate) fn from_parts(
        width: u32,
        height: u32,
        mode: ImageMode,
        samples: Samples,
    ) -> Result<Self, ImageError> {
        if samples.kind() != mode.sample_kind() {
            return Err(ImageError::UnsupportedMode(format!(
                "采样类型与模式 {} 不匹配",
                mode.as_str()
            )));
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(mode.channels()))
            .ok_or_else(|| ImageError::ResourceLimit("图片尺寸导致内存溢出风险".to_string()))?;

        if samples.len() != expected {
            return Err(ImageError::Decode(format!(
                "像素数据长度异常：{}（期望 {}）",
                samples.len(),
                expected
            )));
        }

        Ok(Self {
            width,
            height,
            mode,
            samples,
            format: None,
        })
    }

    /// 将 `image` crate 的解码结果映射为最接近的原生模式。
    ///
    /// 16 位灰度保留为 `I`，其余高位深布局降为 8 位。
    pub fn from_dynamic(image: DynamicImage, format: Option<ImageFormat>) -> Self {
        let (width, height) = (image.width(), image.height());
        let (mode, samples) = match image {
            DynamicImage::ImageLuma8(buf) => (ImageMode::Luma, Samples::U8(buf.into_raw())),
            DynamicImage::ImageLumaA8(buf) => (ImageMode::LumaAlpha, Samples::U8(buf.into_raw())),
            DynamicImage::ImageRgb8(buf) => (ImageMode::Rgb, Samples::U8(buf.into_raw())),
            DynamicImage::ImageRgba8(buf) => (ImageMode::Rgba, Samples::U8(buf.into_raw())),
            DynamicImage::ImageLuma16(buf) => (
                ImageMode::Int32,
                Samples::I32(buf.into_raw().into_iter().map(i32::from).collect()),
            ),
            DynamicImage::ImageLumaA16(_) => (
                ImageMode::LumaAlpha,
                Samples::U8(image.to_luma_alpha8().into_raw()),
            ),
            DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
                (ImageMode::Rgb, Samples::U8(image.to_rgb8().into_raw()))
            }
            _ => (ImageMode::Rgba, Samples::U8(image.to_rgba8().into_raw())),
        };

        Self {
            width,
            height,
            mode,
            samples,
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn mode(&self) -> ImageMode {
        self.mode
    }

    /// 解码时识别到的源格式；由本 crate 新建或变换得到的图像也会沿用该值。
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn with_format(mut self, format: Option<ImageFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match &self.samples {
            Samples::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.samples {
            Samples::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.samples {
            Samples::F32(v) => Some(v),
            _ => None,
        }
    }

    /// 读取单个 8 位像素的全部通道。
    pub fn pixel_u8(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.mode.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        self.as_u8().map(|data| &data[start..start + channels])
    }

    pub(crate) fn samples(&self) -> &Samples {
        &self.samples
    }

    /// 转换到指定色彩模式，转换过程不产生任何告警。
    pub fn convert(&self, mode: ImageMode) -> DecodedImage {
        color::convert(self, mode)
    }

    /// 渲染为可编码的 `DynamicImage`。
    ///
    /// PNG 无法直接表达的模式（P / CMYK / YCbCr / LAB / HSV）统一渲染为 RGB；
    /// `I` 截断到 16 位灰度，`F` 截断到 8 位灰度。
    pub fn to_dynamic(&self) -> Result<DynamicImage, ImageError> {
        let (w, h) = (self.width, self.height);
        let invalid = || ImageError::Encode("像素缓冲长度异常".to_string());

        let image = match (self.mode, &self.samples) {
            (ImageMode::Bilevel | ImageMode::Luma, Samples::U8(data)) => DynamicImage::ImageLuma8(
                ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(invalid)?,
            ),
            (ImageMode::LumaAlpha, Samples::U8(data)) => DynamicImage::ImageLumaA8(
                ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(invalid)?,
            ),
            (ImageMode::Rgb, Samples::U8(data)) => DynamicImage::ImageRgb8(
                ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(invalid)?,
            ),
            (ImageMode::Rgba, Samples::U8(data)) => DynamicImage::ImageRgba8(
                ImageBuffer::from_raw(w, h, data.clone()).ok_or_else(invalid)?,
            ),
            (ImageMode::Int32, Samples::I32(data)) => {
                let raw: Vec<u16> = data.iter().map(|v| (*v).clamp(0, u16::MAX as i32) as u16).collect();
                let buf: ImageBuffer<Luma<u16>, Vec<u16>> =
                    ImageBuffer::from_raw(w, h, raw).ok_or_else(invalid)?;
                DynamicImage::ImageLuma16(buf)
            }
            (ImageMode::Float32, Samples::F32(_)) => {
                return self.convert(ImageMode::Luma).to_dynamic();
            }
            _ => return self.convert(ImageMode::Rgb).to_dynamic(),
        };

        Ok(image)
    }

    /// 按指定格式编码为字节。
    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
        let image = self.to_dynamic()?;
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, format)
            .map_err(|e| ImageError::Encode(format!("图片编码失败（{:?}）：{}", format, e)))?;
        Ok(cursor.into_inner())
    }

    /// 编码为 PNG 字节。
    pub fn encode_png(&self) -> Result<Vec<u8>, ImageError> {
        self.encode(ImageFormat::Png)
    }

    /// 编码为 PNG 并包装成 `data:image/png;base64,` 形式的 Data URL。
    pub fn encode_to_base64_png(&self) -> Result<String, ImageError> {
        let png = self.encode_png()?;
        Ok(format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(png)))
    }
}
