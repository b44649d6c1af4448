//! Image payload preparation for multimodal chat calls.
//!
//! The chat wire format accepts URLs or inline `data:` parts. Local files are
//! always inlined, and PNG files are re-encoded as JPEG first to keep
//! payloads small.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::errors::GatewayError;

/// Re-encodes a PNG file as a JPEG sibling (`page_1.png` -> `page_1.jpg`)
/// and returns the JPEG path. Non-PNG inputs are returned unchanged.
pub fn convert_png_to_jpg(path: &Path) -> Result<PathBuf, GatewayError> {
    let is_png = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    if !is_png {
        return Ok(path.to_path_buf());
    }

    let img = image::open(path)
        .map_err(|_| GatewayError::ImageEncode(path.display().to_string()))?;
    let out = path.with_extension("jpg");
    img.to_rgb8()
        .save_with_format(&out, image::ImageFormat::Jpeg)
        .map_err(|_| GatewayError::ImageEncode(path.display().to_string()))?;
    Ok(out)
}

/// Base64-encodes an image file.
pub fn image_base64(path: &Path) -> Result<String, GatewayError> {
    let bytes = std::fs::read(path).map_err(|source| GatewayError::Image {
        path: path.display().to_string(),
        source,
    })?;
    Ok(BASE64.encode(bytes))
}

/// Turns a local path or URL into a chat-ready image reference.
///
/// URLs (including existing `data:` URLs) pass through untouched; local
/// files become `data:image/jpeg;base64,...` parts.
pub fn inline_image(path_or_url: &str) -> Result<String, GatewayError> {
    if path_or_url.starts_with("http://")
        || path_or_url.starts_with("https://")
        || path_or_url.starts_with("data:")
    {
        return Ok(path_or_url.to_string());
    }

    let jpg_path = convert_png_to_jpg(Path::new(path_or_url))?;
    Ok(format!("data:image/jpeg;base64,{}", image_base64(&jpg_path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_pass_through() {
        let url = "https://example.com/page_1.jpg";
        assert_eq!(inline_image(url).unwrap(), url);
        let data = "data:image/jpeg;base64,abcd";
        assert_eq!(inline_image(data).unwrap(), data);
    }

    #[test]
    fn png_files_are_reencoded_and_inlined() {
        let dir = std::env::temp_dir().join("docflow-image-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let png_path = dir.join("sample.png");
        image::RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255]))
            .save_with_format(&png_path, image::ImageFormat::Png)
            .unwrap();

        let inlined = inline_image(png_path.to_str().unwrap()).unwrap();
        assert!(inlined.starts_with("data:image/jpeg;base64,"));
        assert!(png_path.with_extension("jpg").is_file());
    }
}
