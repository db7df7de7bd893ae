//! # 解码与变换流水线模块
//!
//! ## 设计思路
//!
//! 将"字节 → 图像对象 → 变换"的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸，按像素上限快速拒绝
//! 2. 完整解码，映射为原生色彩模式
//! 3. `fit`：按目标宽高比居中裁剪后缩放（`1` / `P` 使用最近邻，其余双三次）
//! 4. `invert` / `mirror` / `whiten_mask` 为纯函数，输入不变、返回新图像

use fast_image_resize as fr;
use std::io::Cursor;

use super::color::{ImageMode, SampleKind};
use super::picture::{DecodedImage, Samples};
use super::{ImageError, LoaderConfig, Shape};

/// 将原始字节解码为图像对象。
pub fn decode_image(bytes: &[u8], config: &LoaderConfig) -> Result<DecodedImage, ImageError> {
    let format = image::guess_format(bytes)
        .map_err(|e| ImageError::InvalidFormat(format!("不支持的图片格式：{}", e)))?;

    let (header_width, header_height) = inspect_dimensions_from_memory(bytes)?;
    validate_pixel_limits(config, header_width, header_height)?;

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::Decode(format!("图片解码失败：{}", e)))?;

    let image = DecodedImage::from_dynamic(decoded, Some(format));
    log::debug!(
        "🖼️ 图片解码成功 - 格式: {:?} 模式: {} 尺寸: {}x{}",
        format,
        image.mode(),
        image.width(),
        image.height()
    );

    Ok(image)
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?;

    reader
        .into_dimensions()
        .map_err(|e| ImageError::InvalidFormat(format!("无法读取图片尺寸：{}", e)))
}

/// 校验像素数量是否超过配置上限。
fn validate_pixel_limits(config: &LoaderConfig, width: u32, height: u32) -> Result<(), ImageError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

/// 居中裁剪到目标宽高比，再缩放到目标尺寸。
///
/// `shape` 中缺省的一边沿用输入图像的对应尺寸。
pub fn fit(image: &DecodedImage, shape: Shape) -> Result<DecodedImage, ImageError> {
    let (width, height) = image.dimensions();
    let target_width = shape.width.unwrap_or(width);
    let target_height = shape.height.unwrap_or(height);

    if target_width == 0 || target_height == 0 || width == 0 || height == 0 {
        return Err(ImageError::ResourceLimit(format!(
            "无法缩放到 {}x{}（输入 {}x{}）",
            target_width, target_height, width, height
        )));
    }

    if (target_width, target_height) == (width, height) {
        return Ok(image.clone());
    }

    let live_ratio = width as f64 / height as f64;
    let output_ratio = target_width as f64 / target_height as f64;
    let (crop_width, crop_height) = if live_ratio == output_ratio {
        (width as f64, height as f64)
    } else if live_ratio > output_ratio {
        (output_ratio * height as f64, height as f64)
    } else {
        (width as f64, width as f64 / output_ratio)
    };
    let crop_left = (width as f64 - crop_width) * 0.5;
    let crop_top = (height as f64 - crop_height) * 0.5;

    log::debug!(
        "✂️ 裁剪缩放：{}x{} -> crop({:.1},{:.1},{:.1}x{:.1}) -> {}x{}",
        width,
        height,
        crop_left,
        crop_top,
        crop_width,
        crop_height,
        target_width,
        target_height
    );

    let pixel_type = pixel_type_for(image.mode())?;
    let src = fr::images::Image::from_vec_u8(width, height, samples_to_bytes(image.samples()), pixel_type)
        .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;
    let mut dst = fr::images::Image::new(target_width, target_height, pixel_type);

    let algorithm = match image.mode() {
        ImageMode::Bilevel | ImageMode::Palette => fr::ResizeAlg::Nearest,
        _ => fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom),
    };
    let options = fr::ResizeOptions::new()
        .resize_alg(algorithm)
        .crop(crop_left, crop_top, crop_width, crop_height)
        .use_alpha(image.mode().has_alpha());

    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    let samples = bytes_to_samples(image.mode().sample_kind(), dst.into_vec());
    let resized = DecodedImage::from_parts(target_width, target_height, image.mode(), samples)?;
    Ok(resized.with_format(image.format()))
}

fn pixel_type_for(mode: ImageMode) -> Result<fr::PixelType, ImageError> {
    let pixel_type = match (mode.sample_kind(), mode.channels()) {
        (SampleKind::I32, 1) => fr::PixelType::I32,
        (SampleKind::F32, 1) => fr::PixelType::F32,
        (SampleKind::U8, 1) => fr::PixelType::U8,
        (SampleKind::U8, 2) => fr::PixelType::U8x2,
        (SampleKind::U8, 3) => fr::PixelType::U8x3,
        (SampleKind::U8, 4) => fr::PixelType::U8x4,
        _ => {
            return Err(ImageError::UnsupportedMode(format!(
                "模式 {} 不支持缩放",
                mode.as_str()
            )));
        }
    };
    Ok(pixel_type)
}

fn samples_to_bytes(samples: &Samples) -> Vec<u8> {
    match samples {
        Samples::U8(data) => data.clone(),
        Samples::I32(data) => data.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        Samples::F32(data) => data.iter().flat_map(|v| v.to_ne_bytes()).collect(),
    }
}

fn bytes_to_samples(kind: SampleKind, bytes: Vec<u8>) -> Samples {
    match kind {
        SampleKind::U8 => Samples::U8(bytes),
        SampleKind::I32 => Samples::I32(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        SampleKind::F32 => Samples::F32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
    }
}

/// 反相像素值，仅支持 `1` / `L` / `RGB`。
pub fn invert(image: &DecodedImage) -> Result<DecodedImage, ImageError> {
    match (image.mode(), image.samples()) {
        (ImageMode::Bilevel | ImageMode::Luma | ImageMode::Rgb, Samples::U8(data)) => {
            let inverted = data.iter().map(|v| 255 - v).collect();
            let (width, height) = image.dimensions();
            Ok(DecodedImage::from_parts(width, height, image.mode(), Samples::U8(inverted))?
                .with_format(image.format()))
        }
        (mode, _) => Err(ImageError::UnsupportedMode(format!(
            "模式 {} 不支持反相",
            mode.as_str()
        ))),
    }
}

/// 水平镜像（左右翻转）。
pub fn mirror(image: &DecodedImage) -> DecodedImage {
    fn flip_rows<T: Copy>(data: &[T], width: usize, channels: usize) -> Vec<T> {
        let row_len = width * channels;
        let mut out = Vec::with_capacity(data.len());
        if row_len == 0 {
            return out;
        }
        for row in data.chunks_exact(row_len) {
            for px in row.chunks_exact(channels).rev() {
                out.extend_from_slice(px);
            }
        }
        out
    }

    let (width, height) = image.dimensions();
    let channels = image.mode().channels();
    let samples = match image.samples() {
        Samples::U8(data) => Samples::U8(flip_rows(data, width as usize, channels)),
        Samples::I32(data) => Samples::I32(flip_rows(data, width as usize, channels)),
        Samples::F32(data) => Samples::F32(flip_rows(data, width as usize, channels)),
    };

    match DecodedImage::from_parts(width, height, image.mode(), samples) {
        Ok(mirrored) => mirrored.with_format(image.format()),
        Err(err) => {
            log::error!("镜像输出缓冲异常：{}", err);
            image.clone()
        }
    }
}

/// 将带 alpha 的蒙版"白化"：只保留 alpha 通道，复制到 R/G/B 三个通道。
///
/// 不含 alpha 的蒙版原样返回。
pub fn whiten_mask(mask: &DecodedImage) -> Result<DecodedImage, ImageError> {
    if mask.mode() != ImageMode::Rgba {
        return Ok(mask.clone());
    }

    let data = mask
        .as_u8()
        .ok_or_else(|| ImageError::Decode("蒙版采样类型异常".to_string()))?;
    let rgb = data
        .chunks_exact(4)
        .flat_map(|px| [px[3], px[3], px[3]])
        .collect();

    let (width, height) = mask.dimensions();
    Ok(DecodedImage::from_parts(width, height, ImageMode::Rgb, Samples::U8(rgb))?.with_format(mask.format()))
}

/// 空蒙版：与图像同尺寸的全零 RGB。
pub fn empty_mask(width: u32, height: u32) -> Result<DecodedImage, ImageError> {
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(3))
        .ok_or_else(|| ImageError::ResourceLimit("蒙版尺寸溢出".to_string()))?;
    DecodedImage::from_u8(width, height, ImageMode::Rgb, vec![0; len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
    use proptest::prelude::*;

    fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x % 255) as u8;
            let g = (y % 255) as u8;
            let b = ((x + y) % 255) as u8;
            Rgba([r, g, b, 255])
        });

        let dyn_img = DynamicImage::ImageRgba8(img);
        let mut cursor = Cursor::new(Vec::new());
        dyn_img
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    fn gradient(width: u32, height: u32, mode: ImageMode) -> DecodedImage {
        let channels = mode.channels();
        let data = (0..width * height * channels as u32).map(|v| (v % 251) as u8).collect();
        DecodedImage::from_u8(width, height, mode, data).expect("build gradient")
    }

    #[test]
    fn decode_reports_format_and_mode() {
        let png = create_png_bytes(16, 9);
        let image = decode_image(&png, &LoaderConfig::default()).expect("decode should succeed");

        assert_eq!(image.format(), Some(ImageFormat::Png));
        assert_eq!(image.mode(), ImageMode::Rgba);
        assert_eq!(image.dimensions(), (16, 9));
    }

    #[test]
    fn decode_rejects_too_many_pixels() {
        let config = LoaderConfig {
            max_decoded_pixels: 1_000,
            ..LoaderConfig::default()
        };
        let png = create_png_bytes(100, 100);

        assert!(matches!(decode_image(&png, &config), Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn decode_rejects_non_image_bytes() {
        let result = decode_image(b"definitely not an image", &LoaderConfig::default());
        assert!(matches!(result, Err(ImageError::InvalidFormat(_))));
    }

    #[test]
    fn fit_center_crops_wide_input() {
        // 左半黑、右半白的 4x2 图，裁成 2x2 应保留中间两列
        let data = vec![0, 0, 255, 255, 0, 0, 255, 255];
        let image = DecodedImage::from_u8(4, 2, ImageMode::Luma, data).expect("build image");

        let fitted = fit(
            &image,
            Shape {
                width: Some(2),
                height: Some(2),
            },
        )
        .expect("fit should succeed");

        assert_eq!(fitted.dimensions(), (2, 2));
        assert_eq!(fitted.as_u8(), Some(&[0, 255, 0, 255][..]));
    }

    #[test]
    fn fit_keeps_missing_axis() {
        let image = gradient(10, 6, ImageMode::Rgb);
        let fitted = fit(
            &image,
            Shape {
                width: Some(5),
                height: None,
            },
        )
        .expect("fit should succeed");

        assert_eq!(fitted.dimensions(), (5, 6));
        assert_eq!(fitted.mode(), ImageMode::Rgb);
    }

    #[test]
    fn fit_supports_float_gray() {
        let image = DecodedImage::from_f32(4, 4, vec![0.5; 16]).expect("build float image");
        let fitted = fit(
            &image,
            Shape {
                width: Some(2),
                height: Some(2),
            },
        )
        .expect("fit should succeed");

        for v in fitted.as_f32().expect("f32") {
            assert!((v - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn fit_rejects_zero_target() {
        let image = gradient(4, 4, ImageMode::Luma);
        let result = fit(
            &image,
            Shape {
                width: Some(0),
                height: Some(4),
            },
        );
        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn invert_flips_rgb() {
        let image = DecodedImage::from_u8(1, 1, ImageMode::Rgb, vec![0, 100, 255]).expect("build image");
        assert_eq!(invert(&image).expect("invert").as_u8(), Some(&[255, 155, 0][..]));
    }

    #[test]
    fn invert_rejects_alpha_modes() {
        let image = gradient(2, 2, ImageMode::Rgba);
        assert!(matches!(invert(&image), Err(ImageError::UnsupportedMode(_))));
    }

    #[test]
    fn mirror_reverses_pixels_per_row() {
        let data = vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4];
        let image = DecodedImage::from_u8(2, 2, ImageMode::Rgb, data).expect("build image");

        assert_eq!(
            mirror(&image).as_u8(),
            Some(&[2, 2, 2, 1, 1, 1, 4, 4, 4, 3, 3, 3][..])
        );
    }

    #[test]
    fn whiten_mask_replicates_alpha() {
        let data = vec![
            10, 20, 30, 255, //
            40, 50, 60, 0, //
            70, 80, 90, 128, //
            1, 2, 3, 255,
        ];
        let mask = DecodedImage::from_u8(2, 2, ImageMode::Rgba, data).expect("build mask");
        let whitened = whiten_mask(&mask).expect("whiten");

        assert_eq!(whitened.mode(), ImageMode::Rgb);
        assert_eq!(
            whitened.as_u8(),
            Some(&[255, 255, 255, 0, 0, 0, 128, 128, 128, 255, 255, 255][..])
        );
    }

    #[test]
    fn whiten_mask_leaves_opaque_layouts_alone() {
        let mask = gradient(2, 2, ImageMode::Rgb);
        assert_eq!(whiten_mask(&mask).expect("whiten"), mask);
    }

    proptest! {
        #[test]
        fn mirror_twice_is_identity(width in 1u32..12, height in 1u32..12, seed in any::<u8>()) {
            let data = (0..width * height * 3).map(|v| (v as u8).wrapping_add(seed)).collect();
            let image = DecodedImage::from_u8(width, height, ImageMode::Rgb, data).expect("build image");

            prop_assert_eq!(mirror(&mirror(&image)), image);
        }

        #[test]
        fn invert_twice_is_identity(width in 1u32..12, height in 1u32..12) {
            let image = gradient(width, height, ImageMode::Luma);
            let twice = invert(&invert(&image).expect("invert")).expect("invert");

            prop_assert_eq!(twice, image);
        }

        #[test]
        fn fit_produces_requested_dimensions(
            width in 1u32..40,
            height in 1u32..40,
            target_w in 1u32..40,
            target_h in 1u32..40,
        ) {
            let image = gradient(width, height, ImageMode::Rgba);
            let fitted = fit(&image, Shape { width: Some(target_w), height: Some(target_h) }).expect("fit");

            prop_assert_eq!(fitted.dimensions(), (target_w, target_h));
            prop_assert_eq!(fitted.mode(), ImageMode::Rgba);
        }
    }
}
