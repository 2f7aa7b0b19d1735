//! Image decoding, scaling, rotation and re-encoding.

use std::io::Cursor;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, Frame, Rgba, RgbaImage};
use thiserror::Error;

use super::params::{PictureFormat, ProcessParams, ScaleMode};
use crate::config::ImageConfig;

/// Image processing failures.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("image size is too large")]
    TooLarge,

    #[error("failed to decode image")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image")]
    Encode(#[source] image::ImageError),
}

/// Decode, transform and re-encode an image per the given parameters.
///
/// CPU-bound; callers run this on a blocking thread.
pub fn process_image(
    data: &[u8],
    params: &ProcessParams,
    conf: &ImageConfig,
) -> Result<Vec<u8>, ProcessError> {
    let decoded = image::load_from_memory(data).map_err(ProcessError::Decode)?;

    if decoded.width() > conf.max_width || decoded.height() > conf.max_height {
        return Err(ProcessError::TooLarge);
    }

    let resized = resize(decoded, params.scale, params.width, params.height);
    let rotated = rotate(resized, params.angle);
    encode(&rotated, params.format, params.quality)
}

/// Scale the image per the requested mode; never upscales beyond the
/// source dimensions.
fn resize(img: DynamicImage, scale: ScaleMode, width: u32, height: u32) -> DynamicImage {
    let (img_w, img_h) = (img.width(), img.height());

    if width == 0 && height == 0 {
        return img;
    }
    if width > img_w || height > img_h {
        return img;
    }

    // A missing dimension follows the source aspect ratio.
    let mut width = if width == 0 {
        img_w * height / img_h.max(1)
    } else {
        width
    };
    let mut height = if height == 0 {
        img_h * width / img_w.max(1)
    } else {
        height
    };

    match scale {
        ScaleMode::Fit => {
            let width_ratio = width as f64 / img_w as f64;
            let height_ratio = height as f64 / img_h as f64;
            if width_ratio < height_ratio {
                height = (img_h as f64 * width_ratio) as u32;
            } else {
                width = (img_w as f64 * height_ratio) as u32;
            }
        }
        ScaleMode::Fill => {
            let width_ratio = width as f64 / img_w as f64;
            let height_ratio = height as f64 / img_h as f64;
            if width_ratio > height_ratio {
                height = (img_h as f64 * width_ratio) as u32;
            } else {
                width = (img_w as f64 * height_ratio) as u32;
            }
        }
        ScaleMode::FitWidth => {
            height = (img_h as f64 * width as f64 / img_w as f64) as u32;
        }
        ScaleMode::FitHeight => {
            width = (img_w as f64 * height as f64 / img_h as f64) as u32;
        }
        ScaleMode::Resize => {}
    }

    img.resize_exact(width.max(1), height.max(1), FilterType::Lanczos3)
}

/// Rotate counterclockwise by whole degrees with transparent fill.
fn rotate(img: DynamicImage, angle: u32) -> DynamicImage {
    match angle % 360 {
        0 => img,
        90 => img.rotate270(), // image's rotations are clockwise
        180 => img.rotate180(),
        270 => img.rotate90(),
        angle => rotate_arbitrary(&img, angle),
    }
}

/// Bilinear rotation into a transparent bounding box. The `image` crate
/// only ships quarter turns, so odd angles are sampled by hand.
fn rotate_arbitrary(img: &DynamicImage, angle: u32) -> DynamicImage {
    let src = img.to_rgba8();
    let theta = (angle as f64).to_radians();
    let (sin, cos) = theta.sin_cos();

    let (src_w, src_h) = (src.width() as f64, src.height() as f64);
    let dst_w = (src_w * cos.abs() + src_h * sin.abs()).ceil().max(1.0) as u32;
    let dst_h = (src_w * sin.abs() + src_h * cos.abs()).ceil().max(1.0) as u32;

    let (dst_cx, dst_cy) = (dst_w as f64 / 2.0, dst_h as f64 / 2.0);
    let (src_cx, src_cy) = (src_w / 2.0, src_h / 2.0);

    let mut dst = RgbaImage::new(dst_w, dst_h);
    for y in 0..dst_h {
        for x in 0..dst_w {
            let rel_x = x as f64 + 0.5 - dst_cx;
            let rel_y = y as f64 + 0.5 - dst_cy;
            // Inverse mapping: rotate the destination pixel back into the
            // source frame (screen coordinates, y pointing down).
            let src_x = rel_x * cos - rel_y * sin + src_cx - 0.5;
            let src_y = rel_x * sin + rel_y * cos + src_cy - 0.5;
            dst.put_pixel(x, y, sample_bilinear(&src, src_x, src_y));
        }
    }

    DynamicImage::ImageRgba8(dst)
}

/// Bilinear sample with transparent pixels outside the source bounds.
fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let pixel = |ix: f64, iy: f64| -> [f64; 4] {
        if ix < 0.0 || iy < 0.0 || ix >= src.width() as f64 || iy >= src.height() as f64 {
            return [0.0; 4];
        }
        let p = src.get_pixel(ix as u32, iy as u32).0;
        [p[0] as f64, p[1] as f64, p[2] as f64, p[3] as f64]
    };

    let p00 = pixel(x0, y0);
    let p10 = pixel(x0 + 1.0, y0);
    let p01 = pixel(x0, y0 + 1.0);
    let p11 = pixel(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().enumerate() {
        let top = p00[i] * (1.0 - fx) + p10[i] * fx;
        let bottom = p01[i] * (1.0 - fx) + p11[i] * fx;
        *channel = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Re-encode to the requested output format.
fn encode(
    img: &DynamicImage,
    format: PictureFormat,
    quality: u8,
) -> Result<Vec<u8>, ProcessError> {
    let mut buf = Cursor::new(Vec::new());

    match format {
        PictureFormat::Jpeg => {
            // JPEG carries no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            rgb.write_with_encoder(encoder)
                .map_err(ProcessError::Encode)?;
        }
        PictureFormat::Png => {
            let compression = if quality == 100 {
                CompressionType::Default
            } else {
                CompressionType::Best
            };
            let encoder = PngEncoder::new_with_quality(
                &mut buf,
                compression,
                image::codecs::png::FilterType::Adaptive,
            );
            img.write_with_encoder(encoder)
                .map_err(ProcessError::Encode)?;
        }
        PictureFormat::Gif => {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder
                .encode_frame(Frame::new(img.to_rgba8()))
                .map_err(ProcessError::Encode)?;
        }
    }

    Ok(buf.into_inner())
}
