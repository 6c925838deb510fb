use image::{GenericImageView, ImageBuffer, Luma, Pixel, Primitive, Rgb};
use num_traits::AsPrimitive;

/// Blends `highlight` into every pixel whose mask value is non-zero.
///
/// `weight` is the share of the highlight color; the blended value is truncated toward
/// zero. Pixels outside the mask are copied unchanged. Returns `None` when the image and
/// mask dimensions differ.
pub fn blend_masked<I, M, S, SM>(
    image: &I,
    mask: &M,
    highlight: Rgb<S>,
    weight: f32,
) -> Option<ImageBuffer<Rgb<S>, Vec<S>>>
where
    I: GenericImageView<Pixel = Rgb<S>>,
    M: GenericImageView<Pixel = Luma<SM>>,
    Rgb<S>: Pixel<Subpixel = S>,
    S: Primitive + AsPrimitive<f32> + 'static,
    SM: Primitive + 'static,
    f32: AsPrimitive<S>,
{
    if image.dimensions() != mask.dimensions() {
        return None;
    }

    let keep = 1.0 - weight;
    let blend = |value: S, color: S| -> S { (value.as_() * keep + color.as_() * weight).as_() };

    let processed_pixels = image
        .pixels()
        .zip(mask.pixels())
        .flat_map(|((_, _, image_pixel), (_, _, mask_pixel))| {
            let Rgb([red, green, blue]) = image_pixel;
            let Luma([selected]) = mask_pixel;
            if selected > SM::zero() {
                let Rgb([hr, hg, hb]) = highlight;
                [blend(red, hr), blend(green, hg), blend(blue, hb)]
            } else {
                [red, green, blue]
            }
        })
        .collect::<Vec<S>>();

    ImageBuffer::from_raw(image.width(), image.height(), processed_pixels)
}
