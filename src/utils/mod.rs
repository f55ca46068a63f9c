pub mod pixel_ops;

#[cfg(feature = "png")]
pub(crate) mod image {
    use png::{BitDepth, ColorType, Encoder};
    use std::{fs, io, path::Path};

    /// Writes straight-alpha RGBA bytes as an 8bpc png file; layer exports
    /// never need any other color type.
    pub(crate) fn save_rgba<P>(width: u32, height: u32, bytes: &[u8], path: P) -> io::Result<()>
    where
        P: AsRef<Path>,
    {
        let file = fs::File::create(path)?;

        let mut encoder = Encoder::new(file, width, height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);

        Ok(encoder.write_header()?.write_image_data(bytes)?)
    }
}

#[cfg(test)]
pub(crate) mod pdn {
    //! Byte-level builders for synthesized PDN fixtures.
    //!
    //! No real `.pdn` sample lives in the repository; tests assemble the
    //! wire format themselves, which doubles as a cross-check of the
    //! reader against an independent writer.

    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    /// Little-endian record writer with the 7-bit length prefix for
    /// strings; `be_u32` covers the chunk framing.
    #[derive(Default)]
    pub(crate) struct Writer(Vec<u8>);

    impl Writer {
        pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
            self.0.push(value);
            self
        }

        pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
            self.bytes(&value.to_le_bytes())
        }

        pub(crate) fn i32(&mut self, value: i32) -> &mut Self {
            self.bytes(&value.to_le_bytes())
        }

        pub(crate) fn i64(&mut self, value: i64) -> &mut Self {
            self.bytes(&value.to_le_bytes())
        }

        pub(crate) fn be_u32(&mut self, value: u32) -> &mut Self {
            self.bytes(&value.to_be_bytes())
        }

        pub(crate) fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
            self.0.extend_from_slice(bytes);
            self
        }

        pub(crate) fn str(&mut self, value: &str) -> &mut Self {
            let mut len = value.len();
            loop {
                let byte = (len & 0x7F) as u8;
                len >>= 7;

                if len == 0 {
                    self.0.push(byte);
                    break;
                }
                self.0.push(byte | 0x80);
            }

            self.bytes(value.as_bytes())
        }

        pub(crate) fn into_bytes(self) -> Vec<u8> {
            self.0
        }
    }

    pub(crate) struct SampleLayer {
        pub(crate) name: &'static str,
        pub(crate) width: u32,
        pub(crate) height: u32,
        pub(crate) stride: u32,
        pub(crate) pixels: Vec<u8>,
    }

    impl SampleLayer {
        pub(crate) fn solid(name: &'static str, width: u32, height: u32, bgra: [u8; 4]) -> Self {
            Self::padded(name, width, height, width * 4, bgra)
        }

        pub(crate) fn padded(
            name: &'static str,
            width: u32,
            height: u32,
            stride: u32,
            bgra: [u8; 4],
        ) -> Self {
            let mut pixels = Vec::with_capacity((stride * height) as usize);
            for _ in 0..height {
                for _ in 0..width {
                    pixels.extend_from_slice(&bgra);
                }
                pixels.resize(pixels.len() + (stride - width * 4) as usize, 0);
            }

            Self {
                name,
                width,
                height,
                stride,
                pixels,
            }
        }
    }

    /// An NRBF payload holding a document with the given layers. The
    /// `_size` of the layer list defaults to the layer count.
    pub(crate) fn nrbf(
        width: u32,
        height: u32,
        layers: &[SampleLayer],
        size: Option<i32>,
    ) -> Vec<u8> {
        let mut w = Writer::default();
        w.u8(0).u32(1).u32(2).u32(1).u32(0);
        w.u8(12)
            .u32(2)
            .str("PaintDotNet, Version=3.36.0.0, Culture=neutral, PublicKeyToken=null");

        // Root document.
        w.u8(5).i32(1).str("PaintDotNet.Document").u32(3);
        w.str("width").str("height").str("layers");
        w.u8(0).u8(0).u8(1);
        w.u8(8).u8(8);
        w.i32(2);
        w.i32(width as i32).i32(height as i32);

        // layers -> LayerList wrapping an ArrayList.
        w.u8(5).i32(3).str("PaintDotNet.LayerList").u32(2);
        w.str("ArrayList+_items").str("ArrayList+_size");
        w.u8(1).u8(0);
        w.u8(8);
        w.i32(2);
        w.u8(16).i32(4).i32(layers.len() as i32);
        for (index, layer) in layers.iter().enumerate() {
            write_layer(&mut w, index, layer);
        }
        w.i32(size.unwrap_or(layers.len() as i32));

        w.u8(11);

        for layer in layers {
            write_chunks(&mut w, &layer.pixels);
        }

        w.into_bytes()
    }

    fn write_layer(w: &mut Writer, index: usize, layer: &SampleLayer) {
        let base = (10 + index * 10) as i32;

        if index == 0 {
            w.u8(5).i32(base).str("PaintDotNet.BitmapLayer").u32(5);
            w.str("Layer+width")
                .str("Layer+height")
                .str("Layer+properties")
                .str("surface")
                .str("properties");
            w.u8(0).u8(0).u8(1).u8(1).u8(1);
            w.u8(8).u8(8);
            w.i32(2);
        } else {
            // Later layers reuse the first layer's member layout.
            w.u8(1).i32(base).i32(10);
        }

        w.i32(layer.width as i32).i32(layer.height as i32);

        // Layer+properties: a class the reader has no mapping for.
        w.u8(5)
            .i32(base + 1)
            .str("PaintDotNet.Layer+LayerProperties")
            .u32(3);
        w.str("name").str("visible").str("opacity");
        w.u8(1).u8(0).u8(0);
        w.u8(1).u8(2);
        w.i32(2);
        w.u8(6).i32(base + 2).str(layer.name);
        w.u8(1); // visible
        w.u8(255); // opacity

        // surface, with its pixels carried out-of-band by a MemoryBlock.
        w.u8(5).i32(base + 8).str("PaintDotNet.Surface").u32(4);
        w.str("width").str("height").str("stride").str("scan0");
        w.u8(0).u8(0).u8(0).u8(1);
        w.u8(8).u8(8).u8(8);
        w.i32(2);
        w.i32(layer.width as i32)
            .i32(layer.height as i32)
            .i32(layer.stride as i32);
        w.u8(5).i32(base + 9).str("PaintDotNet.MemoryBlock").u32(2);
        w.str("length64").str("deferred");
        w.u8(0).u8(0);
        w.u8(9).u8(1);
        w.i32(2);
        w.i64(layer.pixels.len() as i64);
        w.u8(1); // deferred

        // properties: NameValueCollection with one entry.
        w.u8(4)
            .i32(base + 3)
            .str("System.Collections.Specialized.NameValueCollection")
            .u32(3);
        w.str("ReadOnly").str("Keys").str("Values");
        w.u8(0).u8(1).u8(1);
        w.u8(1);
        w.u8(0); // ReadOnly
        w.u8(17).i32(base + 4).i32(1);
        w.u8(6).i32(base + 6).str("tag");
        w.u8(16).i32(base + 5).i32(1);
        w.u8(6).i32(base + 7).str("v1");
    }

    fn write_chunks(w: &mut Writer, pixels: &[u8]) {
        const CHUNK_SIZE: u32 = 8;

        w.u8(1); // plain chunks
        w.be_u32(CHUNK_SIZE);
        for (number, chunk) in pixels.chunks(CHUNK_SIZE as usize).enumerate() {
            w.be_u32(number as u32)
                .be_u32(chunk.len() as u32)
                .bytes(chunk);
        }
    }

    /// Wraps an NRBF payload in the outer file format: the `PDN3` envelope
    /// when a header is given, the bare inner flag otherwise.
    pub(crate) fn envelope(header_xml: Option<&str>, nrbf: &[u8], compress: bool) -> Vec<u8> {
        let mut bytes = Vec::new();

        if let Some(xml) = header_xml {
            bytes.extend_from_slice(b"PDN3");
            bytes.extend_from_slice(&(xml.len() as u32).to_le_bytes()[..3]);
            bytes.extend_from_slice(xml.as_bytes());
        }

        if compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(nrbf).unwrap();
            bytes.extend_from_slice(&encoder.finish().unwrap());
        } else {
            bytes.extend_from_slice(&[0x00, 0x01]);
            bytes.extend_from_slice(nrbf);
        }

        bytes
    }

    pub(crate) fn document_bytes(width: u32, height: u32, layers: &[SampleLayer]) -> Vec<u8> {
        let xml = format!("<pdnImage width=\"{width}\" height=\"{height}\" />");
        envelope(Some(&xml), &nrbf(width, height, layers, None), false)
    }
}
