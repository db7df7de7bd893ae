//! # 色彩模式与转换
//!
//! ## 设计思路
//!
//! 色彩模式是封闭枚举，字符串只在配置解析边界出现一次。
//! 转换公式与常见图像库保持一致，保证同一输入在不同宿主中得到相同像素：
//!
//! - 灰度：ITU-R 601-2 整数亮度 `(R*19595 + G*38470 + B*7471 + 0x8000) >> 16`
//! - `1`：灰度后做 Floyd–Steinberg 误差扩散
//! - `P`：6×6×6 Web 调色板最近色
//! - `YCbCr`：JPEG 全范围；`HSV`、`LAB`（D65，L 缩放到 0~255，a/b 偏移 128）
//!
//! ## 实现思路
//!
//! 灰度家族（`1` / `L` / `I` / `F`）之间直接按数值转换以保留精度；
//! 其余组合统一经过 RGBA8 中转。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::picture::{DecodedImage, Samples};
use super::ImageError;

/// 图像色彩模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageMode {
    /// `1`：二值（0 / 255）。
    Bilevel,
    /// `L`：8 位灰度。
    Luma,
    /// `LA`：8 位灰度 + alpha。
    LumaAlpha,
    /// `P`：Web 调色板索引。
    Palette,
    #[default]
    Rgb,
    Rgba,
    Cmyk,
    YCbCr,
    Lab,
    Hsv,
    /// `I`：32 位整型灰度。
    Int32,
    /// `F`：32 位浮点灰度。
    Float32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleKind {
    U8,
    I32,
    F32,
}

impl ImageMode {
    pub const ALL: [ImageMode; 12] = [
        ImageMode::Bilevel,
        ImageMode::Luma,
        ImageMode::LumaAlpha,
        ImageMode::Palette,
        ImageMode::Rgb,
        ImageMode::Rgba,
        ImageMode::Cmyk,
        ImageMode::YCbCr,
        ImageMode::Lab,
        ImageMode::Hsv,
        ImageMode::Int32,
        ImageMode::Float32,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bilevel => "1",
            Self::Luma => "L",
            Self::LumaAlpha => "LA",
            Self::Palette => "P",
            Self::Rgb => "RGB",
            Self::Rgba => "RGBA",
            Self::Cmyk => "CMYK",
            Self::YCbCr => "YCbCr",
            Self::Lab => "LAB",
            Self::Hsv => "HSV",
            Self::Int32 => "I",
            Self::Float32 => "F",
        }
    }

    /// 每像素采样数。
    pub fn channels(self) -> usize {
        match self {
            Self::Bilevel | Self::Luma | Self::Palette | Self::Int32 | Self::Float32 => 1,
            Self::LumaAlpha => 2,
            Self::Rgb | Self::YCbCr | Self::Lab | Self::Hsv => 3,
            Self::Rgba | Self::Cmyk => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Self::LumaAlpha | Self::Rgba)
    }

    pub(crate) fn sample_kind(self) -> SampleKind {
        match self {
            Self::Int32 => SampleKind::I32,
            Self::Float32 => SampleKind::F32,
            _ => SampleKind::U8,
        }
    }

    fn is_grayscale(self) -> bool {
        matches!(self, Self::Bilevel | Self::Luma | Self::Int32 | Self::Float32)
    }
}

impl FromStr for ImageMode {
    type Err = ImageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == value)
            .ok_or_else(|| {
                ImageError::Configuration(format!(
                    "无效的 image_mode：{}（可选：1 / L / LA / P / RGB / RGBA / CMYK / YCbCr / LAB / HSV / I / F）",
                    value
                ))
            })
    }
}

impl TryFrom<String> for ImageMode {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImageMode> for String {
    fn from(mode: ImageMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for ImageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const WEB_LEVELS: [u8; 6] = [0, 51, 102, 153, 204, 255];

/// 调色板索引对应的 RGB。
pub(crate) fn palette_rgb(index: u8) -> [u8; 3] {
    let i = index.min(215) as usize;
    [WEB_LEVELS[i / 36], WEB_LEVELS[(i / 6) % 6], WEB_LEVELS[i % 6]]
}

fn palette_index(rgb: [u8; 3]) -> u8 {
    let level = |v: u8| ((v as u16 + 25) / 51) as u8;
    level(rgb[0]) * 36 + level(rgb[1]) * 6 + level(rgb[2])
}

pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub(super) fn convert(image: &DecodedImage, target: ImageMode) -> DecodedImage {
    let source = image.mode();
    if source == target {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let samples = if source.is_grayscale() && target.is_grayscale() {
        from_gray(&gray_values(image), width, target)
    } else {
        from_rgba(&to_rgba(image), width, target)
    };

    // 采样长度由 width * height 推导，构造不会失败
    match DecodedImage::from_parts(width, height, target, samples) {
        Ok(converted) => converted.with_format(image.format()),
        Err(err) => {
            log::error!("色彩转换输出缓冲异常：{}", err);
            image.clone()
        }
    }
}

fn gray_values(image: &DecodedImage) -> Vec<f32> {
    match image.samples() {
        Samples::U8(data) => data.iter().map(|v| *v as f32).collect(),
        Samples::I32(data) => data.iter().map(|v| *v as f32).collect(),
        Samples::F32(data) => data.clone(),
    }
}

fn from_gray(values: &[f32], width: u32, target: ImageMode) -> Samples {
    match target {
        ImageMode::Int32 => Samples::I32(values.iter().map(|v| v.round() as i32).collect()),
        ImageMode::Float32 => Samples::F32(values.to_vec()),
        ImageMode::Bilevel => {
            let levels: Vec<u8> = values.iter().map(|v| clamp_u8(*v)).collect();
            Samples::U8(dither_bilevel(&levels, width))
        }
        _ => Samples::U8(values.iter().map(|v| clamp_u8(*v)).collect()),
    }
}

/// 任意模式渲染为 RGBA8 像素。
pub(crate) fn to_rgba(image: &DecodedImage) -> Vec<[u8; 4]> {
    let mode = image.mode();
    match image.samples() {
        Samples::I32(data) => data
            .iter()
            .map(|v| {
                let l = (*v).clamp(0, 255) as u8;
                [l, l, l, 255]
            })
            .collect(),
        Samples::F32(data) => data
            .iter()
            .map(|v| {
                let l = clamp_u8(*v);
                [l, l, l, 255]
            })
            .collect(),
        Samples::U8(data) => data
            .chunks_exact(mode.channels())
            .map(|px| match mode {
                ImageMode::LumaAlpha => [px[0], px[0], px[0], px[1]],
                ImageMode::Palette => {
                    let [r, g, b] = palette_rgb(px[0]);
                    [r, g, b, 255]
                }
                ImageMode::Rgb => [px[0], px[1], px[2], 255],
                ImageMode::Rgba => [px[0], px[1], px[2], px[3]],
                ImageMode::Cmyk => {
                    let k = px[3] as u16;
                    let channel = |c: u8| 255 - (c as u16 + k).min(255) as u8;
                    [channel(px[0]), channel(px[1]), channel(px[2]), 255]
                }
                ImageMode::YCbCr => {
                    let [r, g, b] = ycbcr_to_rgb(px[0], px[1], px[2]);
                    [r, g, b, 255]
                }
                ImageMode::Lab => {
                    let [r, g, b] = lab_to_rgb(px[0], px[1], px[2]);
                    [r, g, b, 255]
                }
                ImageMode::Hsv => {
                    let [r, g, b] = hsv_to_rgb(px[0], px[1], px[2]);
                    [r, g, b, 255]
                }
                _ => [px[0], px[0], px[0], 255],
            })
            .collect(),
    }
}

fn from_rgba(pixels: &[[u8; 4]], width: u32, target: ImageMode) -> Samples {
    match target {
        ImageMode::Int32 => Samples::I32(pixels.iter().map(|p| luma(p[0], p[1], p[2]) as i32).collect()),
        ImageMode::Float32 => Samples::F32(
            pixels
                .iter()
                .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
                .collect(),
        ),
        ImageMode::Bilevel => {
            let levels: Vec<u8> = pixels.iter().map(|p| luma(p[0], p[1], p[2])).collect();
            Samples::U8(dither_bilevel(&levels, width))
        }
        _ => {
            let mut out = Vec::with_capacity(pixels.len() * target.channels());
            for p in pixels {
                let [r, g, b, a] = *p;
                match target {
                    ImageMode::Luma => out.push(luma(r, g, b)),
                    ImageMode::LumaAlpha => out.extend_from_slice(&[luma(r, g, b), a]),
                    ImageMode::Palette => out.push(palette_index([r, g, b])),
                    ImageMode::Rgb => out.extend_from_slice(&[r, g, b]),
                    ImageMode::Rgba => out.extend_from_slice(&[r, g, b, a]),
                    ImageMode::Cmyk => out.extend_from_slice(&[255 - r, 255 - g, 255 - b, 0]),
                    ImageMode::YCbCr => out.extend_from_slice(&rgb_to_ycbcr(r, g, b)),
                    ImageMode::Lab => out.extend_from_slice(&rgb_to_lab(r, g, b)),
                    ImageMode::Hsv => out.extend_from_slice(&rgb_to_hsv(r, g, b)),
                    ImageMode::Bilevel | ImageMode::Int32 | ImageMode::Float32 => {}
                }
            }
            Samples::U8(out)
        }
    }
}

/// Floyd–Steinberg 误差扩散，输出 0 / 255。
fn dither_bilevel(levels: &[u8], width: u32) -> Vec<u8> {
    let width = width as usize;
    if width == 0 {
        return Vec::new();
    }

    let mut work: Vec<i32> = levels.iter().map(|v| *v as i32).collect();
    let mut out = vec![0u8; levels.len()];
    let height = levels.len() / width;

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let old = work[idx].clamp(0, 255);
            let new = if old < 128 { 0 } else { 255 };
            out[idx] = new as u8;
            let err = old - new;

            if x + 1 < width {
                work[idx + 1] += err * 7 / 16;
            }
            if y + 1 < height {
                if x > 0 {
                    work[idx + width - 1] += err * 3 / 16;
                }
                work[idx + width] += err * 5 / 16;
                if x + 1 < width {
                    work[idx + width + 1] += err / 16;
                }
            }
        }
    }

    out
}

fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    [
        clamp_u8(0.299 * r + 0.587 * g + 0.114 * b),
        clamp_u8(128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b),
        clamp_u8(128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b),
    ]
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let (y, cb, cr) = (y as f32, cb as f32 - 128.0, cr as f32 - 128.0);
    [
        clamp_u8(y + 1.402 * cr),
        clamp_u8(y - 0.344136 * cb - 0.714136 * cr),
        clamp_u8(y + 1.772 * cb),
    ]
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let v = max;

    if max == min {
        return [0, 0, clamp_u8(v * 255.0)];
    }

    let range = max - min;
    let s = range / max;
    let rc = (max - r) / range;
    let gc = (max - g) / range;
    let bc = (max - b) / range;

    let h = if r == max {
        bc - gc
    } else if g == max {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    let h = (h / 6.0).rem_euclid(1.0);

    [clamp_u8(h * 255.0), clamp_u8(s * 255.0), clamp_u8(v * 255.0)]
}

fn hsv_to_rgb(h: u8, s: u8, v: u8) -> [u8; 3] {
    let (h, s, v) = (h as f32 / 255.0, s as f32 / 255.0, v as f32 / 255.0);
    if s == 0.0 {
        let l = clamp_u8(v * 255.0);
        return [l, l, l];
    }

    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match (sector as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    [clamp_u8(r * 255.0), clamp_u8(g * 255.0), clamp_u8(b * 255.0)]
}

const D65: [f32; 3] = [0.95047, 1.0, 1.08883];
const LAB_EPSILON: f32 = 6.0 / 29.0;

fn srgb_to_linear(c: u8) -> f32 {
    let c = c as f32 / 255.0;
    if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.0031308 { 12.92 * c } else { 1.055 * c.powf(1.0 / 2.4) - 0.055 };
    clamp_u8(v * 255.0)
}

fn rgb_to_lab(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));
    let x = 0.4124564 * r + 0.3575761 * g + 0.1804375 * b;
    let y = 0.2126729 * r + 0.7151522 * g + 0.0721750 * b;
    let z = 0.0193339 * r + 0.1191920 * g + 0.9503041 * b;

    let f = |t: f32| {
        if t > LAB_EPSILON.powi(3) {
            t.cbrt()
        } else {
            t / (3.0 * LAB_EPSILON * LAB_EPSILON) + 4.0 / 29.0
        }
    };
    let (fx, fy, fz) = (f(x / D65[0]), f(y / D65[1]), f(z / D65[2]));

    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let b = 200.0 * (fy - fz);

    [clamp_u8(l * 255.0 / 100.0), clamp_u8(a + 128.0), clamp_u8(b + 128.0)]
}

fn lab_to_rgb(l: u8, a: u8, b: u8) -> [u8; 3] {
    let l = l as f32 * 100.0 / 255.0;
    let a = a as f32 - 128.0;
    let b = b as f32 - 128.0;

    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let finv = |t: f32| {
        if t > LAB_EPSILON {
            t * t * t
        } else {
            3.0 * LAB_EPSILON * LAB_EPSILON * (t - 4.0 / 29.0)
        }
    };
    let (x, y, z) = (D65[0] * finv(fx), D65[1] * finv(fy), D65[2] * finv(fz));

    let r = 3.2404542 * x - 1.5371385 * y - 0.4985314 * z;
    let g = -0.9692660 * x + 1.8760108 * y + 0.0415560 * z;
    let b = 0.0556434 * x - 0.2040259 * y + 1.0572252 * z;

    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b)]
}
