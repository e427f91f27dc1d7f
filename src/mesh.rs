//! Point and mesh files: landmark positions as OBJ or PLY, and scaling of existing PLY meshes.
extern crate ply_rs;

use cgmath::Point3;
use ply_rs::parser::Parser;
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Ply, Property, PropertyDef, PropertyType, ScalarType,
};
use ply_rs::writer::Writer;
use tracing::info;

use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::{extension, Error};

/// Write points as OBJ vertices.
pub fn write_obj(path: &Path, points: &[Point3<f64>]) -> Result<(), Error> {
    let mut file = BufWriter::new(File::create(path)?);
    for p in points {
        writeln!(&mut file, "v {} {} {}", p.x, p.y, p.z)?;
    }
    Ok(())
}

/// Write points as yellow PLY vertices.
pub fn write_ply(path: &Path, points: &[Point3<f64>]) -> Result<(), Error> {
    let mut ply = Ply::<DefaultElement>::new();
    let mut vertex = ElementDef::new("vertex".to_string());
    for name in &["x", "y", "z"] {
        let p = PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::Float));
        vertex.properties.add(p);
    }
    for name in &["red", "green", "blue"] {
        let p = PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::UChar));
        vertex.properties.add(p);
    }
    ply.header.elements.add(vertex);

    let vertices = points
        .iter()
        .map(|point| {
            let mut p = DefaultElement::new();
            p.insert("x".to_string(), Property::Float(point.x as f32));
            p.insert("y".to_string(), Property::Float(point.y as f32));
            p.insert("z".to_string(), Property::Float(point.z as f32));
            p.insert("red".to_string(), Property::UChar(255));
            p.insert("green".to_string(), Property::UChar(255));
            p.insert("blue".to_string(), Property::UChar(0));
            p
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let mut file = BufWriter::new(File::create(path)?);
    let writer = Writer::new();
    writer.write_ply(&mut file, &mut ply)?;
    Ok(())
}

/// Write landmark positions. `.obj` and `.ply` are supported.
pub fn write_landmarks(path: &Path, points: &[Point3<f64>]) -> Result<(), Error> {
    match extension(path)? {
        "obj" => write_obj(path, points),
        "ply" => write_ply(path, points),
        ext => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

fn scale_property(property: &mut Property, scale: f64) -> Result<(), Error> {
    match property {
        Property::Float(x) => *x = (*x as f64 * scale) as f32,
        Property::Double(x) => *x *= scale,
        p => {
            return Err(Error::ParseError(format!(
                "unsupported vertex coordinate {:?}",
                p
            )))
        }
    }
    Ok(())
}

/// Multiply the `x`, `y`, `z` coordinates of every vertex of a PLY mesh by `scale`. All other
/// elements and properties, and the encoding, are kept. Returns the number of vertices.
pub fn scale_ply_mesh(input: &Path, output: &Path, scale: f64) -> Result<usize, Error> {
    let mut reader = BufReader::new(File::open(input)?);
    let parser = Parser::<DefaultElement>::new();
    let mut ply = parser.read_ply(&mut reader)?;

    let mut count = 0;
    if let Some(vertices) = ply.payload.get_mut("vertex") {
        for vertex in vertices.iter_mut() {
            for name in &["x", "y", "z"] {
                if let Some(p) = vertex.get_mut(*name) {
                    scale_property(p, scale)?;
                }
            }
        }
        count = vertices.len();
    }
    info!(
        "scaled {} vertices of {} by {}",
        count,
        input.display(),
        scale
    );

    let mut file = BufWriter::new(File::create(output)?);
    let writer = Writer::new();
    writer.write_ply(&mut file, &mut ply)?;
    Ok(count)
}

#[cfg(test)]
fn read_vertices(path: &Path) -> Vec<DefaultElement> {
    let mut reader = BufReader::new(File::open(path).unwrap());
    let ply = Parser::<DefaultElement>::new()
        .read_ply(&mut reader)
        .unwrap();
    ply.payload["vertex"].clone()
}

#[test]
fn test_write_landmarks() {
    let dir = tempfile::tempdir().unwrap();
    let points = vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-0.5, 0.0, 4.25)];

    let obj = dir.path().join("landmarks.obj");
    write_landmarks(&obj, &points).unwrap();
    let contents = std::fs::read_to_string(&obj).unwrap();
    assert_eq!(contents, "v 1 2 3\nv -0.5 0 4.25\n");

    let ply = dir.path().join("landmarks.ply");
    write_landmarks(&ply, &points).unwrap();
    let vertices = read_vertices(&ply);
    assert_eq!(vertices.len(), 2);
    assert_eq!(vertices[1]["z"], Property::Float(4.25));
    assert_eq!(vertices[0]["red"], Property::UChar(255));
    assert_eq!(vertices[0]["blue"], Property::UChar(0));

    assert!(matches!(
        write_landmarks(&dir.path().join("landmarks.xyz"), &points),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_scale_ply_mesh() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mesh.ply");
    std::fs::write(
        &input,
        "ply
format ascii 1.0
element vertex 3
property double x
property double y
property double z
element face 1
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
0 2 0.5
3 0 1 2
",
    )
    .unwrap();
    let output = dir.path().join("scaled.ply");
    assert_eq!(scale_ply_mesh(&input, &output, 2.0).unwrap(), 3);

    let vertices = read_vertices(&output);
    assert_eq!(vertices[1]["x"], Property::Double(2.0));
    assert_eq!(vertices[2]["y"], Property::Double(4.0));
    assert_eq!(vertices[2]["z"], Property::Double(1.0));
    let contents = std::fs::read_to_string(&output).unwrap();
    assert!(contents.contains("format ascii 1.0"));
    assert!(contents.contains("element face 1"));
}
