//! Marker detections read from a text file.
//!
//! One detected marker per line:
//! ```text
//! <view_id> <marker_id> <u_0> <v_0> <u_1> <v_1> <u_2> <v_2> <u_3> <v_3>
//! ```
//! Corners are ordered top-left, top-right, bottom-right, bottom-left. Everything after a `#` is a
//! comment and blank lines are skipped.
use cgmath::Point2;
use itertools::Itertools;
use nom::character::complete::*;
use nom::error::VerboseError;
use nom::multi::count;
use nom::number::complete::double;
use nom::sequence::*;
use nom::IResult;

use std::fs::File;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use crate::scene::ViewId;
use crate::Error;

pub type MarkerId = u32;

/// The four corners of a square marker found in one view.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDetection {
    pub view_id: ViewId,
    pub marker_id: MarkerId,
    pub corners: [Point2<f64>; 4],
}

fn detection_line(input: &str) -> IResult<&str, MarkerDetection, VerboseError<&str>> {
    fn unsigned(input: &str) -> IResult<&str, u32, VerboseError<&str>> {
        nom::combinator::map_res(digit1, u32::from_str)(input)
    }

    let corner = nom::combinator::map(
        pair(preceded(space1, double), preceded(space1, double)),
        |(u, v)| Point2::new(u, v),
    );
    let (input, (view_id, marker_id, corners)) = tuple((
        preceded(space0, unsigned),
        preceded(space1, unsigned),
        count(corner, 4),
    ))(input)?;
    let (input, _) = space0(input)?;
    Ok((
        input,
        MarkerDetection {
            view_id,
            marker_id,
            corners: [corners[0], corners[1], corners[2], corners[3]],
        },
    ))
}

/// Parse the contents of a detections file.
pub fn parse_detections(contents: &str) -> Result<Vec<MarkerDetection>, Error> {
    let mut detections = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let line = match line.find('#') {
            Some(j) => &line[..j],
            None => line,
        };
        if line.trim().is_empty() {
            continue;
        }
        match nom::combinator::all_consuming(detection_line)(line) {
            Ok((_, d)) => detections.push(d),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(Error::ParseError(format!(
                    "line {}:\n{}",
                    i + 1,
                    nom::error::convert_error(line, e)
                )))
            }
            Err(nom::Err::Incomplete(x)) => {
                return Err(Error::ParseError(format!("line {}: {:?}", i + 1, x)))
            }
        }
    }
    Ok(detections)
}

pub fn read_detections(path: &Path) -> Result<Vec<MarkerDetection>, Error> {
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    parse_detections(&contents)
}

pub fn write_detections(path: &Path, detections: &[MarkerDetection]) -> Result<(), Error> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(&mut file, "# view_id marker_id u0 v0 u1 v1 u2 v2 u3 v3")?;
    for d in detections {
        writeln!(
            &mut file,
            "{} {} {}",
            d.view_id,
            d.marker_id,
            d.corners.iter().map(|c| format!("{} {}", c.x, c.y)).join(" ")
        )?;
    }
    Ok(())
}

#[test]
fn test_parse_detections() {
    let contents = "# detections
3 17 10 20 30.5 20 30.5 40 10 40.25

  4 2 -1 -2 1 -2 1 2 -1 2 # trailing comment
";
    let detections = parse_detections(contents).unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].view_id, 3);
    assert_eq!(detections[0].marker_id, 17);
    assert_eq!(detections[0].corners[1], Point2::new(30.5, 20.0));
    assert_eq!(detections[0].corners[3], Point2::new(10.0, 40.25));
    assert_eq!(detections[1].corners[0], Point2::new(-1.0, -2.0));
}

#[test]
fn test_parse_detections_errors() {
    // missing a coordinate
    assert!(matches!(
        parse_detections("1 2 0 0 1 0 1 1 0\n"),
        Err(Error::ParseError(_))
    ));
    // extra value
    assert!(matches!(
        parse_detections("1 2 0 0 1 0 1 1 0 1 5\n"),
        Err(Error::ParseError(_))
    ));
    // negative ids
    assert!(parse_detections("-1 2 0 0 1 0 1 1 0 1\n").is_err());
}

#[test]
fn test_write_detections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("markers.txt");
    let detections = vec![MarkerDetection {
        view_id: 9,
        marker_id: 1,
        corners: [
            Point2::new(0.5, 1.0),
            Point2::new(2.0, 1.0),
            Point2::new(2.0, 3.125),
            Point2::new(0.5, 3.125),
        ],
    }];
    write_detections(&path, &detections).unwrap();
    assert_eq!(read_detections(&path).unwrap(), detections);
}
