use image::{imageops, GenericImageView, ImageBuffer, Pixel, Primitive};
use num_traits::AsPrimitive;

/// Top-left offset that centers a `width`x`height` image on a `pad_width`x`pad_height`
/// canvas. Odd remainders go to the bottom/right edge.
pub fn center_offset(width: u32, height: u32, pad_width: u32, pad_height: u32) -> Option<(i64, i64)> {
    if width > pad_width || height > pad_height {
        return None;
    }

    let x = (pad_width - width) / 2;
    let y = (pad_height - height) / 2;
    Some((x.as_(), y.as_()))
}

/// Places `image` in the center of a canvas filled with `color`.
///
/// Returns `None` when the image does not fit the canvas.
pub fn pad_centered<I, P, S>(
    image: &I,
    pad_width: u32,
    pad_height: u32,
    color: P,
) -> Option<ImageBuffer<P, Vec<S>>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    let (width, height) = image.dimensions();

    center_offset(width, height, pad_width, pad_height).map(|(x, y)| {
        let mut canvas = ImageBuffer::from_pixel(pad_width, pad_height, color);
        imageops::overlay(&mut canvas, image, x, y);
        canvas
    })
}
