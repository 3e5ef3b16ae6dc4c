use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("encoder task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

/// Scale to exactly `width`×`height`, skipping the work when it already fits.
pub fn fit_exact(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image;
    }
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}

/// [`encode_jpeg`] on the blocking pool, keeping the async workers free.
pub async fn encode_jpeg_blocking(image: RgbImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    tokio::task::spawn_blocking(move || encode_jpeg(&image, quality)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn jpeg_roundtrips_dimensions() {
        let image = RgbImage::from_pixel(64, 48, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn fit_exact_resizes_only_when_needed() {
        let same = fit_exact(RgbImage::new(640, 480), 640, 480);
        assert_eq!(same.dimensions(), (640, 480));
        let scaled = fit_exact(RgbImage::new(1280, 720), 640, 480);
        assert_eq!(scaled.dimensions(), (640, 480));
    }

    #[tokio::test]
    async fn blocking_encode_matches_inline() {
        let image = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let inline = encode_jpeg(&image, 90).unwrap();
        let pooled = encode_jpeg_blocking(image, 90).await.unwrap();
        assert_eq!(inline, pooled);
    }
}
