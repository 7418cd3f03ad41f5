use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

/// If images of this format can be re-encoded after processing.
pub fn can_encode(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::Bmp
    )
}

#[inline]
pub fn encode_to(img: &DynamicImage, format: ImageFormat) -> anyhow::Result<Vec<u8>> {
    let mut buff = Cursor::new(Vec::new());
    img.write_to(&mut buff, format)?;
    Ok(buff.into_inner())
}
