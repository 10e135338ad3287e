//! Wavefront OBJ meshes and their MTL material templates.
//!
//! Only what the renderer draws is understood: `v`, `vt`, `vn` and
//! triangular `f` records with all three indices, plus `mtllib` and the
//! `map_Kd` diffuse texture. Everything else is skipped.
//!
//! OBJ files are right-handed with a bottom-left texture origin. Loading
//! converts to the renderer's left-handed, top-left convention: x is negated
//! for positions and normals, v becomes `1 - v`, and each triangle's winding
//! is reversed to keep it front-facing.

use std::{
    io::BufRead,
    path::{Path, PathBuf},
    str::SplitWhitespace,
};

use bytemuck::{Pod, Zeroable};

use crate::{Error, Result};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 4],
    pub texcoord: [f32; 2],
    pub normal: [f32; 3],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialTemplate {
    /// Resolved against the directory of the file that named it.
    pub texture: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<ModelVertex>,
    pub material: MaterialTemplate,
}

/// Loads an OBJ file and the material library it references.
pub fn load_obj(path: &Path) -> Result<Mesh> {
    let directory = path.parent().unwrap_or_else(|| Path::new(""));
    let (mut mesh, library) = parse_obj(crate::open(path)?)?;

    if let Some(library) = library {
        let library = directory.join(library);
        mesh.material = parse_mtl(crate::open(&library)?, directory)?;
    }

    log::debug!(
        "loaded {} ({} vertices, texture {:?})",
        path.display(),
        mesh.vertices.len(),
        mesh.material.texture
    );

    Ok(mesh)
}

/// Parses OBJ records. Returns the mesh with an empty material and the name
/// of the material library, if any, for the caller to resolve.
pub fn parse_obj(reader: impl BufRead) -> Result<(Mesh, Option<String>)> {
    let mut positions: Vec<[f32; 4]> = Vec::new();
    let mut texcoords: Vec<[f32; 2]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut mesh = Mesh::default();
    let mut library = None;

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(|source| Error::Io {
            path: PathBuf::from("<obj>"),
            source,
        })?;

        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("v") => {
                let [x, y, z] = floats(&mut fields, line_number)?;
                positions.push([-x, y, z, 1.0]);
            }
            Some("vt") => {
                let [u, v] = floats(&mut fields, line_number)?;
                texcoords.push([u, 1.0 - v]);
            }
            Some("vn") => {
                let [x, y, z] = floats(&mut fields, line_number)?;
                normals.push([-x, y, z]);
            }
            Some("f") => {
                let mut triangle = [ModelVertex::default(); 3];
                for vertex in &mut triangle {
                    let definition = fields.next().ok_or_else(|| Error::Parse {
                        line: line_number,
                        message: "faces must be triangles".to_owned(),
                    })?;
                    let [p, t, n] = face_indices(definition, line_number)?;

                    *vertex = ModelVertex {
                        position: lookup(&positions, p, line_number)?,
                        texcoord: lookup(&texcoords, t, line_number)?,
                        normal: lookup(&normals, n, line_number)?,
                    };
                }

                if fields.next().is_some() {
                    return Err(Error::Parse {
                        line: line_number,
                        message: "faces must be triangles".to_owned(),
                    });
                }

                mesh.vertices.extend(triangle.iter().rev());
            }
            Some("mtllib") => library = fields.next().map(str::to_owned),
            _ => {}
        }
    }

    Ok((mesh, library))
}

/// Parses MTL records, resolving texture paths against `directory`.
pub fn parse_mtl(reader: impl BufRead, directory: &Path) -> Result<MaterialTemplate> {
    let mut material = MaterialTemplate::default();

    for line in reader.lines() {
        let line = line.map_err(|source| Error::Io {
            path: PathBuf::from("<mtl>"),
            source,
        })?;

        let mut fields = line.split_whitespace();
        if fields.next() == Some("map_Kd") {
            material.texture = fields.next().map(|name| directory.join(name));
        }
    }

    Ok(material)
}

fn floats<const N: usize>(fields: &mut SplitWhitespace, line: usize) -> Result<[f32; N]> {
    let mut out = [0.0; N];
    for value in &mut out {
        let field = fields.next().ok_or_else(|| Error::Parse {
            line,
            message: format!("expected {N} numbers"),
        })?;
        *value = field.parse().map_err(|_| Error::Parse {
            line,
            message: format!("{field:?} is not a number"),
        })?;
    }
    Ok(out)
}

fn face_indices(definition: &str, line: usize) -> Result<[usize; 3]> {
    let mut out = [0; 3];
    let mut parts = definition.split('/');
    for index in &mut out {
        *index = parts
            .next()
            .and_then(|part| part.parse().ok())
            .ok_or_else(|| Error::Parse {
                line,
                message: format!("{definition:?} is not a position/texcoord/normal triple"),
            })?;
    }
    Ok(out)
}

/// OBJ indices are 1-based.
fn lookup<T: Copy>(elements: &[T], index: usize, line: usize) -> Result<T> {
    index
        .checked_sub(1)
        .and_then(|i| elements.get(i))
        .copied()
        .ok_or_else(|| Error::Parse {
            line,
            message: format!("index {index} is out of range ({} defined)", elements.len()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = "\
# one triangle
mtllib plane.mtl
v 1.0 2.0 3.0
v 0.0 1.0 0.0
v -1.0 0.0 0.0
vt 0.25 0.0
vt 1.0 1.0
vn 0.0 0.0 1.0
vn 1.0 0.0 0.0
f 1/1/1 2/2/1 3/2/2
";

    #[test]
    fn obj_is_converted_to_left_handed() {
        let (mesh, library) = parse_obj(TRIANGLE.as_bytes()).unwrap();

        assert_eq!(library.as_deref(), Some("plane.mtl"));
        assert_eq!(mesh.vertices.len(), 3);

        // Winding is reversed, so the last face vertex comes first.
        assert_eq!(mesh.vertices[0].position, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[0].normal, [-1.0, 0.0, 0.0]);
        assert_eq!(mesh.vertices[2].position, [-1.0, 2.0, 3.0, 1.0]);
        assert_eq!(mesh.vertices[2].texcoord, [0.25, 1.0]);
        assert_eq!(mesh.vertices[1].texcoord, [1.0, 0.0]);
        assert_eq!(mesh.vertices[2].normal, [-0.0, 0.0, 1.0]);
    }

    #[test]
    fn quads_are_rejected() {
        let obj = "v 0 0 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 1/1/1 1/1/1 1/1/1\n";
        assert!(matches!(
            parse_obj(obj.as_bytes()),
            Err(Error::Parse { line: 4, .. })
        ));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let obj = "v 0 0 0\nvt 0 0\nvn 0 0 1\nf 1/1/1 2/1/1 1/1/1\n";
        let err = parse_obj(obj.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("index 2 is out of range"));
    }

    #[test]
    fn bad_numbers_report_the_line() {
        let obj = "v 0 0 0\nv 1 x 0\n";
        assert!(matches!(
            parse_obj(obj.as_bytes()),
            Err(Error::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn mtl_texture_is_relative_to_the_obj() {
        let mtl = "newmtl Material\nKd 1 1 1\nmap_Kd uvChecker.png\n";
        let material = parse_mtl(mtl.as_bytes(), Path::new("resources")).unwrap();
        assert_eq!(
            material.texture,
            Some(Path::new("resources").join("uvChecker.png"))
        );
    }

    #[test]
    fn mtl_without_texture() {
        let material = parse_mtl("newmtl Material\n".as_bytes(), Path::new("")).unwrap();
        assert_eq!(material.texture, None);
    }
}
