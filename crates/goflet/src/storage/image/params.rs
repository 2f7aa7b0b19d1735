//! Image processing parameters.
//!
//! Query parameters normalize into a canonical `ProcessParams` whose
//! digest keys the on-disk derivative cache, so equivalent requests share
//! one cached artifact.

use std::collections::HashMap;

use crate::config::ImageConfig;

/// How the target rectangle relates to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Shrink so the whole image fits inside w×h, preserving aspect ratio.
    Fit,
    /// Shrink so w×h is covered, preserving aspect ratio.
    Fill,
    /// Stretch to exactly w×h.
    Resize,
    /// Scale so the width equals the target, preserving aspect ratio.
    FitWidth,
    /// Scale so the height equals the target, preserving aspect ratio.
    FitHeight,
}

impl ScaleMode {
    /// Stable numeric code used in the derivative digest.
    fn code(self) -> u8 {
        match self {
            ScaleMode::Fit => 0,
            ScaleMode::Fill => 1,
            ScaleMode::Resize => 2,
            ScaleMode::FitWidth => 3,
            ScaleMode::FitHeight => 4,
        }
    }
}

/// Output encoding of a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureFormat {
    Jpeg,
    Png,
    Gif,
}

impl PictureFormat {
    /// The format name as used in digests and `Content-Type` suffixes.
    pub fn as_str(self) -> &'static str {
        match self {
            PictureFormat::Jpeg => "jpeg",
            PictureFormat::Png => "png",
            PictureFormat::Gif => "gif",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "jpeg" => Some(PictureFormat::Jpeg),
            "png" => Some(PictureFormat::Png),
            "gif" => Some(PictureFormat::Gif),
            _ => None,
        }
    }
}

/// Normalized image processing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessParams {
    pub width: u32,
    pub height: u32,
    pub scale: ScaleMode,
    /// 0..=100, quantized to multiples of five.
    pub quality: u8,
    /// 0..360 degrees, counterclockwise.
    pub angle: u32,
    pub format: PictureFormat,
}

impl ProcessParams {
    /// Deterministic digest naming the cached derivative.
    pub fn digest(&self) -> String {
        format!(
            "w{}h{}s{}q{}a{}f{}",
            self.width,
            self.height,
            self.scale.code(),
            self.quality,
            self.angle,
            self.format.as_str()
        )
    }

    /// Fill parameters from the request query, clamping and quantizing per
    /// the configuration.
    pub fn from_query(query: &HashMap<String, String>, conf: &ImageConfig) -> Self {
        let mut width = query
            .get("w")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if conf.strict_mode && !conf.allowed_sizes.contains(&(width.max(0) as u32)) {
            width = 0;
        }
        let width = width.max(0) as u32;

        let mut height = query
            .get("h")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if conf.strict_mode && !conf.allowed_sizes.contains(&(height.max(0) as u32)) {
            height = 0;
        }
        let height = height.max(0) as u32;

        let scale = match query.get("s").map(String::as_str) {
            Some("fill") => ScaleMode::Fill,
            Some("resize") => ScaleMode::Resize,
            Some("fit_width") => ScaleMode::FitWidth,
            Some("fit_height") => ScaleMode::FitHeight,
            _ => ScaleMode::Fit,
        };

        let mut quality = match query.get("q").and_then(|v| v.parse::<i64>().ok()) {
            Some(q) if (0..=100).contains(&q) => (q / 5 * 5) as u8,
            Some(_) => 90,
            None => 90,
        };

        let angle = query
            .get("a")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            .rem_euclid(360) as u32;

        let format = query
            .get("f")
            .and_then(|v| PictureFormat::parse(v))
            .filter(|f| conf.allowed_formats.iter().any(|a| a.as_str() == f.as_str()))
            .or_else(|| PictureFormat::parse(&conf.default_format))
            .unwrap_or(PictureFormat::Jpeg);

        // PNG has only two effective qualities: 100 keeps the default
        // compression, anything lower selects best compression.
        if format == PictureFormat::Png && quality < 100 {
            quality = 85;
        }
        // GIF encoding ignores quality entirely.
        if format == PictureFormat::Gif {
            quality = 0;
        }

        Self {
            width,
            height,
            scale,
            quality,
            angle,
            format,
        }
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn conf() -> ImageConfig {
        ImageConfig {
            default_format: "jpeg".to_string(),
            allowed_formats: vec!["jpeg".into(), "png".into(), "gif".into()],
            strict_mode: false,
            allowed_sizes: vec![64, 128],
            max_width: 4096,
            max_height: 4096,
            max_file_size: 20 * 1024 * 1024,
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_query() {
        let p = ProcessParams::from_query(&HashMap::new(), &conf());
        assert_eq!(p.width, 0);
        assert_eq!(p.height, 0);
        assert_eq!(p.scale, ScaleMode::Fit);
        assert_eq!(p.quality, 90);
        assert_eq!(p.angle, 0);
        assert_eq!(p.format, PictureFormat::Jpeg);
        assert_eq!(p.digest(), "w0h0s0q90a0fjpeg");
    }

    #[test]
    fn quality_is_clamped_and_quantized() {
        let p = ProcessParams::from_query(&query(&[("q", "87")]), &conf());
        assert_eq!(p.quality, 85);

        let p = ProcessParams::from_query(&query(&[("q", "101")]), &conf());
        assert_eq!(p.quality, 90);

        let p = ProcessParams::from_query(&query(&[("q", "-3")]), &conf());
        assert_eq!(p.quality, 90);
    }

    #[test]
    fn angle_wraps_mod_360() {
        let p = ProcessParams::from_query(&query(&[("a", "450")]), &conf());
        assert_eq!(p.angle, 90);
        let p = ProcessParams::from_query(&query(&[("a", "-90")]), &conf());
        assert_eq!(p.angle, 270);
    }

    #[test]
    fn png_quality_collapses() {
        let p = ProcessParams::from_query(&query(&[("f", "png"), ("q", "90")]), &conf());
        assert_eq!(p.quality, 85);
        let p = ProcessParams::from_query(&query(&[("f", "png"), ("q", "100")]), &conf());
        assert_eq!(p.quality, 100);
    }

    #[test]
    fn gif_quality_is_zero() {
        let p = ProcessParams::from_query(&query(&[("f", "gif"), ("q", "90")]), &conf());
        assert_eq!(p.quality, 0);
    }

    #[test]
    fn unknown_format_falls_back_to_default() {
        let p = ProcessParams::from_query(&query(&[("f", "webp")]), &conf());
        assert_eq!(p.format, PictureFormat::Jpeg);
    }

    #[test]
    fn strict_mode_coerces_unlisted_sizes_to_zero() {
        let mut c = conf();
        c.strict_mode = true;

        let p = ProcessParams::from_query(&query(&[("w", "100"), ("h", "64")]), &c);
        assert_eq!(p.width, 0);
        assert_eq!(p.height, 64);
    }

    #[test]
    fn digest_is_order_stable() {
        let a = ProcessParams::from_query(
            &query(&[("w", "64"), ("h", "32"), ("s", "fill"), ("q", "80"), ("a", "90")]),
            &conf(),
        );
        assert_eq!(a.digest(), "w64h32s1q80a90fjpeg");
    }
}
