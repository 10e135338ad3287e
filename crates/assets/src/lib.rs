//! Loading textures and meshes from disk into the shapes the graphics crate
//! uploads.

mod image;
mod mesh;

use std::path::PathBuf;

pub use image::{decode_png, generate_mips, load_png};
pub use mesh::{load_obj, parse_mtl, parse_obj, MaterialTemplate, Mesh, ModelVertex};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid PNG: {0}")]
    Png(#[from] png::DecodingError),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn open(path: &std::path::Path) -> Result<std::io::BufReader<std::fs::File>> {
    std::fs::File::open(path)
        .map(std::io::BufReader::new)
        .map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })
}
