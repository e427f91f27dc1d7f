//! Posed views and the camera models they use.
//!
//! A scene can be read from and written to a text format (`.scene`):
//! ```text
//! <num_intrinsics> <num_views>
//! <focal> <cx> <cy> <k1> <k2> <k3>
//! ...
//! <view_id> <intrinsic> <r_1> <r_2> <r_3> <c_1> <c_2> <c_3> <image name>
//! ...
//! ```
//! where `r` is a Rodrigues rotation vector and `c` the camera center, or a big-endian binary
//! version of the same (`.bscene`).
extern crate byteorder;
extern crate itertools;
extern crate nom;

use byteorder::*;
use cgmath::{Point3, Vector3};
use itertools::Itertools;
use nom::character::complete::*;
use nom::error::VerboseError;
use nom::multi::count;
use nom::number::complete::*;
use nom::sequence::*;
use nom::IResult;
use tracing::{debug, info};

use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryFrom;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;

use crate::camera::{Intrinsics, PinholeCamera, Pose};
use crate::{extension, Error};

pub type ViewId = u32;

/// A posed image.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub id: ViewId,
    /// Index into [Scene::intrinsics].
    pub intrinsic: usize,
    pub pose: Pose,
    pub image: String,
}

/// Views keyed by id plus the shared intrinsics they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene<C> {
    pub intrinsics: Vec<C>,
    pub views: BTreeMap<ViewId, View>,
}

/// A predicate deciding whether a view is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewFilter {
    /// Keep views that reference an existing camera model.
    Defined,
    /// Keep only views whose image is in the set.
    Include(BTreeSet<String>),
    /// Drop views whose image is in the set.
    Exclude(BTreeSet<String>),
}

impl ViewFilter {
    /// Include filter from a file listing one image name per line.
    pub fn include_from(path: &Path) -> Result<Self, Error> {
        Ok(ViewFilter::Include(read_image_list(path)?))
    }

    /// Exclude filter from a file listing one image name per line.
    pub fn exclude_from(path: &Path) -> Result<Self, Error> {
        Ok(ViewFilter::Exclude(read_image_list(path)?))
    }

    pub fn accepts<C>(&self, scene: &Scene<C>, view: &View) -> bool {
        match self {
            ViewFilter::Defined => view.intrinsic < scene.intrinsics.len(),
            ViewFilter::Include(names) => names.contains(&view.image),
            ViewFilter::Exclude(names) => !names.contains(&view.image),
        }
    }
}

/// Read a list of image names, one per line. Surrounding whitespace and empty lines are ignored.
pub fn read_image_list(path: &Path) -> Result<BTreeSet<String>, Error> {
    let file = BufReader::new(File::open(path)?);
    let mut names = BTreeSet::new();
    for line in file.lines() {
        let line = line?;
        let name = line.trim();
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

impl<C> Scene<C> {
    pub fn new(intrinsics: Vec<C>, views: Vec<View>) -> Self {
        Scene {
            intrinsics,
            views: views.into_iter().map(|v| (v.id, v)).collect(),
        }
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(&id)
    }

    /// Camera model and pose of a view. `None` if the view is unknown or references a missing
    /// camera model.
    pub fn camera(&self, id: ViewId) -> Option<(&C, &Pose)> {
        let view = self.views.get(&id)?;
        let camera = self.intrinsics.get(view.intrinsic)?;
        Some((camera, &view.pose))
    }

    /// Drop every view rejected by one of `filters`. Returns the number of views removed.
    pub fn filter_views(&mut self, filters: &[ViewFilter]) -> usize {
        let before = self.views.len();
        let rejected = self
            .views
            .values()
            .filter(|v| !filters.iter().all(|f| f.accepts(self, v)))
            .map(|v| v.id)
            .collect::<Vec<_>>();
        for id in rejected {
            debug!("dropping view {}", id);
            self.views.remove(&id);
        }
        before - self.views.len()
    }

    /// Apply the scale part of a similarity transform to every camera.
    pub fn apply_scale(&mut self, scale: f64) {
        for view in self.views.values_mut() {
            view.pose = view.pose.scaled(scale);
        }
    }
}

impl<C: Intrinsics> Scene<C> {
    /// Filter the views and log how many are left. Fails if none are.
    pub fn select_views(&mut self, filters: &[ViewFilter]) -> Result<(), Error> {
        let removed = self.filter_views(filters);
        info!(
            "{} views selected, {} filtered out",
            self.views.len(),
            removed
        );
        if self.views.is_empty() {
            Err(Error::NoViews)
        } else {
            Ok(())
        }
    }
}

impl Scene<PinholeCamera> {
    /// Parse a scene in the text format.
    pub fn parse_text(contents: &str) -> Result<Self, Error> {
        fn unsigned<T: FromStr>(input: &str) -> IResult<&str, T, VerboseError<&str>> {
            nom::combinator::map_res(digit1, T::from_str)(input)
        }

        fn parse_internal(input: &str) -> IResult<&str, Scene<PinholeCamera>, VerboseError<&str>> {
            let (input, num_intrinsics) = preceded(multispace0, unsigned::<usize>)(input)?;
            let (input, num_views) = preceded(multispace0, unsigned::<usize>)(input)?;

            let camera = nom::combinator::map(count(preceded(multispace0, double), 6), |x| {
                PinholeCamera::from_vec(x)
            });
            let (input, intrinsics) = count(camera, num_intrinsics)(input)?;

            let image = nom::combinator::map(
                nom::combinator::verify(not_line_ending, |s: &str| !s.trim().is_empty()),
                |s: &str| s.trim().to_string(),
            );
            let view = nom::combinator::map(
                tuple((
                    preceded(multispace0, unsigned::<ViewId>),
                    preceded(multispace0, unsigned::<usize>),
                    count(preceded(multispace0, double), 6),
                    preceded(space1, image),
                )),
                |(id, intrinsic, p, image)| View {
                    id,
                    intrinsic,
                    pose: Pose::from_rodrigues(
                        Vector3::new(p[0], p[1], p[2]),
                        Point3::new(p[3], p[4], p[5]),
                    ),
                    image,
                },
            );
            let (input, views) = count(view, num_views)(input)?;
            let (input, _) = multispace0(input)?;

            Ok((input, Scene::new(intrinsics, views)))
        }

        match nom::combinator::all_consuming(parse_internal)(contents) {
            Ok((_, scene)) => Ok(scene),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(Error::ParseError(nom::error::convert_error(contents, e)))
            }
            Err(nom::Err::Incomplete(x)) => Err(Error::ParseError(format!("{:?}", x))),
        }
    }

    pub fn from_file_text(path: &Path) -> Result<Self, Error> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Self::parse_text(&contents)
    }

    /// Parse a scene in the binary format.
    pub fn parse_binary(contents: &[u8]) -> Result<Self, Error> {
        fn parse_internal(
            input: &[u8],
        ) -> IResult<&[u8], Scene<PinholeCamera>, VerboseError<&[u8]>> {
            let (input, num_intrinsics) = be_u64(input)?;
            let (input, num_views) = be_u64(input)?;

            let (input, intrinsics) = count(
                nom::combinator::map(count(be_f64, 6), PinholeCamera::from_vec),
                num_intrinsics as usize,
            )(input)?;

            let (input, views) = count(
                |input| {
                    let (input, id) = nom::combinator::map_res(be_u64, ViewId::try_from)(input)?;
                    let (input, intrinsic) = be_u64(input)?;
                    let (input, p) = count(be_f64, 6)(input)?;
                    let (input, len) = be_u64(input)?;
                    let (input, image) = nom::combinator::map_res(
                        nom::bytes::complete::take(len as usize),
                        |x: &[u8]| String::from_utf8(x.to_vec()),
                    )(input)?;
                    Ok((
                        input,
                        View {
                            id,
                            intrinsic: intrinsic as usize,
                            pose: Pose::from_rodrigues(
                                Vector3::new(p[0], p[1], p[2]),
                                Point3::new(p[3], p[4], p[5]),
                            ),
                            image,
                        },
                    ))
                },
                num_views as usize,
            )(input)?;

            Ok((input, Scene::new(intrinsics, views)))
        }

        parse_internal(contents)
            .map(|x| x.1)
            .map_err(|x| match x {
                nom::Err::Error(_) | nom::Err::Failure(_) => {
                    Error::ParseError("Binary parse error".to_string())
                }
                nom::Err::Incomplete(x) => Error::ParseError(format!("{:?}", x)),
            })
    }

    pub fn from_file_binary(path: &Path) -> Result<Self, Error> {
        let mut contents = Vec::new();
        File::open(path)?.read_to_end(&mut contents)?;
        Self::parse_binary(&contents)
    }

    /// Read a scene. `.scene` files are text, `.bscene` binary.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        match extension(path)? {
            "scene" => Self::from_file_text(path),
            "bscene" => Self::from_file_binary(path),
            ext => Err(Error::UnsupportedFormat(ext.to_string())),
        }
    }

    pub fn write_text(&self, path: &Path) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(&mut file, "{} {}", self.intrinsics.len(), self.views.len())?;
        for camera in &self.intrinsics {
            writeln!(&mut file, "{}", camera.to_vec().iter().join(" "))?;
        }
        for view in self.views.values() {
            let r = view.pose.rodrigues();
            let c = view.pose.center;
            writeln!(
                &mut file,
                "{} {} {} {} {} {} {} {} {}",
                view.id, view.intrinsic, r.x, r.y, r.z, c.x, c.y, c.z, view.image
            )?;
        }
        Ok(())
    }

    pub fn write_binary(&self, path: &Path) -> Result<(), Error> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_u64::<BigEndian>(self.intrinsics.len() as u64)?;
        file.write_u64::<BigEndian>(self.views.len() as u64)?;
        for camera in &self.intrinsics {
            for x in camera.to_vec() {
                file.write_f64::<BigEndian>(x)?;
            }
        }
        for view in self.views.values() {
            file.write_u64::<BigEndian>(u64::from(view.id))?;
            file.write_u64::<BigEndian>(view.intrinsic as u64)?;
            let r = view.pose.rodrigues();
            let c = view.pose.center;
            for x in &[r.x, r.y, r.z, c.x, c.y, c.z] {
                file.write_f64::<BigEndian>(*x)?;
            }
            file.write_u64::<BigEndian>(view.image.len() as u64)?;
            file.write_all(view.image.as_bytes())?;
        }
        Ok(())
    }

    /// Write the scene, choosing the format from the extension like [Scene::from_file].
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        match extension(path)? {
            "scene" => self.write_text(path),
            "bscene" => self.write_binary(path),
            ext => Err(Error::UnsupportedFormat(ext.to_string())),
        }
    }
}

impl<C> std::fmt::Display for Scene<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scene with {} views and {} camera models",
            self.views.len(),
            self.intrinsics.len()
        )
    }
}

#[cfg(test)]
use cgmath::InnerSpace;

#[cfg(test)]
const SMALL_SCENE: &str = "2 3
800 320 240 0 0 0
1000.5 512 384 -0.1 0.01 0
0 0 0 0 0 0 0 -5 img_000.jpg
4 1 0.1 0.2 0.3 1 2 3 img 004.jpg
7 5 0 0 0 0 0 0 img_007.jpg
";

#[test]
fn test_parse_text() {
    let scene = Scene::parse_text(SMALL_SCENE).unwrap();
    assert_eq!(scene.intrinsics.len(), 2);
    assert_eq!(scene.intrinsics[1].focal, 1000.5);
    assert_eq!(scene.intrinsics[1].distortion, Vector3::new(-0.1, 0.01, 0.0));
    assert_eq!(scene.num_views(), 3);
    let view = scene.view(4).unwrap();
    assert_eq!(view.image, "img 004.jpg");
    assert_eq!(view.intrinsic, 1);
    assert_eq!(view.pose.center, Point3::new(1.0, 2.0, 3.0));
    assert!(scene.camera(4).is_some());
    // references a camera model that does not exist
    assert!(scene.camera(7).is_none());
    assert!(scene.camera(1).is_none());
}

#[test]
fn test_parse_text_errors() {
    assert!(matches!(
        Scene::parse_text("1 1\n800 320 240 0 0\n"),
        Err(Error::ParseError(_))
    ));
    assert!(matches!(
        Scene::parse_text("0 1\n3 0 0 0 0 0 0 0\n"),
        Err(Error::ParseError(_))
    ));
}

#[test]
fn test_write_read() {
    let scene = Scene::parse_text(SMALL_SCENE).unwrap();
    let dir = tempfile::tempdir().unwrap();
    for name in &["a.scene", "a.bscene"] {
        let path = dir.path().join(name);
        scene.write(&path).unwrap();
        let read = Scene::from_file(&path).unwrap();
        assert_eq!(read.intrinsics, scene.intrinsics);
        for (a, b) in read.views.values().zip(scene.views.values()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.image, b.image);
            assert!((a.pose.rodrigues() - b.pose.rodrigues()).magnitude() < 1e-12);
        }
    }
    assert!(matches!(
        scene.write(&dir.path().join("a.txt")),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_binary_view_id_out_of_range() {
    let mut contents = Vec::new();
    contents.write_u64::<BigEndian>(1).unwrap();
    contents.write_u64::<BigEndian>(1).unwrap();
    for x in &[1000.0, 640.0, 360.0, 0.0, 0.0, 0.0] {
        contents.write_f64::<BigEndian>(*x).unwrap();
    }
    contents
        .write_u64::<BigEndian>(u64::from(ViewId::MAX) + 1)
        .unwrap();
    contents.write_u64::<BigEndian>(0).unwrap();
    for _ in 0..6 {
        contents.write_f64::<BigEndian>(0.0).unwrap();
    }
    contents.write_u64::<BigEndian>(5).unwrap();
    contents.extend_from_slice(b"a.jpg");
    assert!(matches!(
        Scene::parse_binary(&contents),
        Err(Error::ParseError(_))
    ));

    // the same file with the largest valid id reads back
    let start = 16 + 6 * 8;
    contents[start..start + 8].copy_from_slice(&u64::from(ViewId::MAX).to_be_bytes());
    let scene = Scene::parse_binary(&contents).unwrap();
    assert!(scene.view(ViewId::MAX).is_some());
}

#[test]
fn test_filters() {
    let mut scene = Scene::parse_text(SMALL_SCENE).unwrap();
    let exclude = ViewFilter::Exclude(vec!["img_000.jpg".to_string()].into_iter().collect());
    assert_eq!(scene.filter_views(&[ViewFilter::Defined, exclude]), 2);
    assert_eq!(scene.views.keys().cloned().collect::<Vec<_>>(), vec![4]);

    let mut scene = Scene::parse_text(SMALL_SCENE).unwrap();
    let include = ViewFilter::Include(vec!["img_007.jpg".to_string()].into_iter().collect());
    assert!(matches!(
        scene.select_views(&[ViewFilter::Defined, include]),
        Err(Error::NoViews)
    ));
}

#[test]
fn test_image_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("list.txt");
    std::fs::write(&path, "a.jpg\n\n  b.jpg \na.jpg\n").unwrap();
    let names = read_image_list(&path).unwrap();
    assert_eq!(names.len(), 2);
    assert!(names.contains("b.jpg"));
}

#[test]
fn test_apply_scale() {
    let mut scene = Scene::parse_text(SMALL_SCENE).unwrap();
    let before = scene.view(4).unwrap().pose;
    scene.apply_scale(2.0);
    let after = scene.view(4).unwrap().pose;
    assert_eq!(after.center, Point3::new(2.0, 4.0, 6.0));
    assert_eq!(after.rotation, before.rotation);
}
