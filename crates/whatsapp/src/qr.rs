//! QR challenge rendering.

use std::io::Cursor;

use {
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::QrCode,
};

use crate::error::{Error, Result};

/// Render `data` as a PNG QR code at least `min_size` pixels wide.
pub fn render_png(data: &str, min_size: u32) -> Result<Vec<u8>> {
    let code = QrCode::new(data.as_bytes()).map_err(Error::render)?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(min_size, min_size)
        .build();

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(Error::render)?;
    Ok(out.into_inner())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn renders_png_of_requested_size() {
        let png = render_png("1@2,ABC", 256).unwrap();
        assert!(png.starts_with(PNG_MAGIC));

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert!(decoded.width() >= 256);
        assert_eq!(decoded.width(), decoded.height());
    }

    #[test]
    fn oversized_payload_is_a_render_error() {
        let data = "x".repeat(8000);
        assert!(matches!(render_png(&data, 256), Err(Error::Render { .. })));
    }
}
