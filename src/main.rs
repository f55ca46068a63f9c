use pdnre::{Document, Result};
use std::path::PathBuf;

// TODO: clap

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1).take(2);

    let input = args.next().expect("expected an input pdn file.");
    let out_dir = args.next().map_or_else(|| PathBuf::from("."), PathBuf::from);

    let document = Document::from_path(&input)?;
    print!("{document}");

    std::fs::create_dir_all(&out_dir)?;

    let stem = PathBuf::from(&input)
        .file_stem()
        .expect("from_path would have failed on a directory")
        .to_string_lossy()
        .into_owned();

    for (index, layer) in document.layers.iter().enumerate() {
        let name = layer.name().unwrap_or("layer").replace(['/', '\\'], "_");
        let path = out_dir.join(format!("{stem}-{index:02}-{name}.png"));

        layer.to_png(&path)?;
        println!("wrote {}", path.display());
    }

    Ok(())
}
