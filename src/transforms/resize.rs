use super::pipeline::Transform;
use burn::{
    prelude::Backend,
    tensor::{
        Tensor,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

impl<B: Backend> Transform<B> {
    /// Resizes a 3-channel image tensor to the specified width and height using bilinear
    /// interpolation.
    ///
    /// The aspect ratio is not preserved; the metadata records the two scales separately
    /// so keypoints still map back exactly.
    ///
    /// # Parameters
    ///
    /// * `new_w` – Target width of the output image.
    /// * `new_h` – Target height of the output image.
    ///
    /// # Notes
    ///
    /// - A zero target size or the current size leaves the image untouched.
    ///
    pub fn resize_bilinear(mut self, new_w: usize, new_h: usize) -> Self {
        let [_ch, image_h, image_w] = self.image.dims();

        if new_h == 0 || new_w == 0 || (new_h == image_h && new_w == image_w) {
            return self;
        }

        self.image = interpolate(
            self.image.unsqueeze::<4>(),
            [new_h, new_w],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        )
        .squeeze::<3>(0);

        self.metadata.rescale(
            new_w as f32 / image_w as f32,
            new_h as f32 / image_h as f32,
        );

        self
    }

    /// Rescales the longest side of the image to `size`, keeping the aspect ratio, then pads
    /// the bottom and right edges with `pad_value` up to a `size`×`size` square.
    ///
    /// Since the padding never shifts the image content, mapping a point back to the source
    /// image only requires the (uniform) scale.
    pub fn letterbox(mut self, size: usize, pad_value: u8) -> Self {
        let [ch, image_h, image_w] = self.image.dims();
        let longest = image_h.max(image_w);

        if size == 0 || longest == 0 {
            return self;
        }

        let scale = size as f32 / longest as f32;
        let new_h = ((image_h as f32 * scale).round() as usize).clamp(1, size);
        let new_w = ((image_w as f32 * scale).round() as usize).clamp(1, size);

        // the rounded size may not match the scale exactly, record the uniform one
        let mut metadata = self.metadata;
        metadata.rescale(scale, scale);
        self = self.resize_bilinear(new_w, new_h);
        self.metadata = metadata;

        let canvas = Tensor::<B, 3>::full([ch, size, size], pad_value as f32, &self.device);
        self.image = canvas.slice_assign([0..ch, 0..new_h, 0..new_w], self.image);

        self
    }
}
