use super::property::{PropertyBag, PropertyValue};
use std::rc::Rc;

/// A 2-D pixel buffer: BGRA order, 8 bits per channel, premultiplied alpha,
/// `stride` bytes per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Surface {
    /// Width of the `Surface` in pixels.
    pub width: u32,
    /// Height of the `Surface` in pixels.
    pub height: u32,
    /// Bytes per row; at least `width * 4`.
    pub stride: u32,
    /// `stride * height` bytes, row-major.
    pub data: Vec<u8>,
}

impl Surface {
    /// Iterates over packed rows of `width * 4` bytes, dropping whatever
    /// padding the stride carries.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let stride = self.stride as usize;
        let width_bytes = self.width as usize * 4;

        (0..self.height as usize).map(move |y| &self.data[y * stride..y * stride + width_bytes])
    }
}

/// A single bitmap plane of a [`Document`].
///
/// [`Document`]: super::Document
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    /// Width of the `Layer`; in practice always the canvas width.
    pub width: u32,
    /// Height of the `Layer`; in practice always the canvas height.
    pub height: u32,
    pub surface: Surface,
    /// The serialized layer-properties object; carries at least `name`.
    pub layer_properties: Rc<PropertyBag>,
    /// Free-form string-keyed metadata attached to the layer.
    pub properties: Rc<PropertyBag>,
}

impl Layer {
    /// The layer name, when the property bag carries one.
    pub fn name(&self) -> Option<&str> {
        self.layer_properties
            .get("name")
            .and_then(PropertyValue::as_str)
    }

    /// Whether the layer is marked visible; absent means visible.
    pub fn visible(&self) -> bool {
        self.layer_properties
            .get("visible")
            .and_then(PropertyValue::as_bool)
            .unwrap_or(true)
    }

    /// Layer opacity in `0..=255`, when present.
    pub fn opacity(&self) -> Option<u8> {
        self.layer_properties
            .get("opacity")
            .and_then(PropertyValue::as_int)
            .and_then(|value| u8::try_from(value).ok())
    }

    #[cfg(feature = "png")]
    /// Writes the layer as a straight-alpha RGBA png image.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pdnre::{Document, Result};
    ///
    /// fn main() -> Result<()> {
    ///     let doc = Document::from_path("my_image.pdn")?;
    ///
    ///     for (index, layer) in doc.layers.iter().enumerate() {
    ///         layer.to_png(format!("layer-{index}.png"))?;
    ///     }
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn to_png<P>(&self, path: P) -> crate::Result<()>
    where
        P: AsRef<std::path::Path>,
    {
        use crate::utils::{image, pixel_ops::premultiplied_bgra_to_rgba};

        let mut packed = Vec::with_capacity(
            self.surface.width as usize * self.surface.height as usize * 4,
        );
        for row in self.surface.rows() {
            packed.extend_from_slice(row);
        }

        Ok(image::save_rgba(
            self.surface.width,
            self.surface.height,
            &premultiplied_bgra_to_rgba(&packed),
            path,
        )?)
    }
}
