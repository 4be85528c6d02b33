//! Path resolution, natural ordering, and label/image pairing checks.

use crate::manifest::ManifestRow;
use crate::options::{DatasetOptions, SortOrder};
use crate::types::{DatasetResult, PoseDatasetError};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

pub const IMAGE_DIR: &str = "crop_Img";
pub const MASKED_IMAGE_DIR: &str = "crop_Mask_Img";
const JPG_SUFFIX: &str = ".jpg";
const POSE_MASK_SUFFIX: &str = "_mask.jpg";
const MASKED_IMAGE_SUFFIX: &str = "_mask_img.jpg";

/// Where a manifest filename lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    root: PathBuf,
    prefix: &'static str,
    rm_bg: bool,
}

impl PathLayout {
    pub fn new(root: impl Into<PathBuf>, rm_bg: bool) -> Self {
        Self {
            root: root.into(),
            prefix: if rm_bg { MASKED_IMAGE_DIR } else { IMAGE_DIR },
            rm_bg,
        }
    }

    pub fn from_options(opts: &DatasetOptions) -> Self {
        Self::new(opts.dataroot.clone(), opts.rm_bg)
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Pose, appearance, and target images.
    pub fn image_path(&self, name: &str) -> PathBuf {
        let name = if self.rm_bg {
            name.replace(JPG_SUFFIX, MASKED_IMAGE_SUFFIX)
        } else {
            name.to_string()
        };
        self.root.join(self.prefix).join(name)
    }

    pub fn pose_mask_path(&self, pose_name: &str) -> PathBuf {
        self.root
            .join(self.prefix)
            .join(pose_name.replace(JPG_SUFFIX, POSE_MASK_SUFFIX))
    }

    /// Instance maps always come from the unmasked directory.
    pub fn instance_path(&self, name: &str) -> PathBuf {
        self.root.join(IMAGE_DIR).join(name)
    }
}

/// Five index-aligned path sequences; entry `i` of each describes sample `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub pose: Vec<PathBuf>,
    pub pose_mask: Vec<PathBuf>,
    pub app: Vec<PathBuf>,
    pub image: Vec<PathBuf>,
    /// Empty when instance maps are disabled.
    pub instance: Vec<PathBuf>,
}

impl ResolvedPaths {
    pub fn resolve(
        rows: &[ManifestRow],
        layout: &PathLayout,
        with_instance: bool,
        manifest: &Path,
    ) -> DatasetResult<Self> {
        let instance = if with_instance {
            rows.iter()
                .enumerate()
                .map(|(row, r)| match r.flow.as_deref() {
                    Some(flow) => Ok(layout.instance_path(flow)),
                    None => Err(PoseDatasetError::MissingColumn {
                        path: manifest.to_path_buf(),
                        row,
                        column: "flow",
                    }),
                })
                .collect::<DatasetResult<Vec<_>>>()?
        } else {
            Vec::new()
        };
        Ok(Self {
            pose: rows.iter().map(|r| layout.image_path(&r.pose_image)).collect(),
            pose_mask: rows
                .iter()
                .map(|r| layout.pose_mask_path(&r.pose_image))
                .collect(),
            app: rows.iter().map(|r| layout.image_path(&r.app_image)).collect(),
            image: rows
                .iter()
                .map(|r| layout.image_path(&r.target_image))
                .collect(),
            instance,
        })
    }

    pub fn sort_natural(&mut self, order: SortOrder) {
        match order {
            SortOrder::PerSequence => {
                for seq in self.sequences_mut() {
                    natural_sort(seq);
                }
            }
            SortOrder::ByPose => {
                let mut perm: Vec<usize> = (0..self.pose.len()).collect();
                perm.sort_by(|&a, &b| natural_cmp_paths(&self.pose[a], &self.pose[b]));
                for seq in self.sequences_mut() {
                    if seq.len() == perm.len() {
                        *seq = perm.iter().map(|&i| seq[i].clone()).collect();
                    }
                }
            }
        }
    }

    pub fn truncate(&mut self, max: usize) {
        for seq in self.sequences_mut() {
            seq.truncate(max);
        }
    }

    /// Fail on the first index whose pose and image stems differ.
    pub fn check_pairing(&self) -> DatasetResult<()> {
        for (pose, image) in self.pose.iter().zip(&self.image) {
            if !paths_match(pose, image) {
                return Err(PoseDatasetError::PairingMismatch {
                    pose: pose.clone(),
                    image: image.clone(),
                });
            }
        }
        Ok(())
    }

    /// Common length of all populated sequences.
    pub fn len(&self) -> DatasetResult<usize> {
        let lengths = self.lengths();
        let expected = self.pose.len();
        let consistent = lengths
            .iter()
            .all(|&(name, len)| len == expected || (name == "instance" && len == 0));
        if consistent {
            Ok(expected)
        } else {
            Err(PoseDatasetError::InconsistentLengths { lengths })
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pose.is_empty()
    }

    pub fn has_instance(&self) -> bool {
        !self.instance.is_empty()
    }

    pub fn lengths(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("pose", self.pose.len()),
            ("pose_mask", self.pose_mask.len()),
            ("app", self.app.len()),
            ("image", self.image.len()),
            ("instance", self.instance.len()),
        ]
    }

    fn sequences_mut(&mut self) -> [&mut Vec<PathBuf>; 5] {
        [
            &mut self.pose,
            &mut self.pose_mask,
            &mut self.app,
            &mut self.image,
            &mut self.instance,
        ]
    }
}

/// True iff both paths have the same file name once the extension is dropped.
pub fn paths_match(a: impl AsRef<Path>, b: impl AsRef<Path>) -> bool {
    a.as_ref().file_stem() == b.as_ref().file_stem()
}

pub fn natural_sort(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| natural_cmp_paths(a, b));
}

fn natural_cmp_paths(a: &Path, b: &Path) -> Ordering {
    natural_cmp(&a.to_string_lossy(), &b.to_string_lossy())
}

/// Numeric-aware comparison: digit runs compare by value, everything else as text.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x, y) {
                    (Chunk::Digits(x), Chunk::Digits(y)) => cmp_digits(x, y),
                    (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
                    (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
                    (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Chunk<'a> {
    Text(&'a str),
    Digits(&'a str),
}

/// Alternating text/digit runs, always starting with a (possibly empty) text run.
fn chunks(s: &str) -> impl Iterator<Item = Chunk<'_>> {
    let mut rest = s;
    let mut want_digits = false;
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let end = rest
            .find(|c: char| c.is_ascii_digit() != want_digits)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(end);
        let chunk = if want_digits {
            Chunk::Digits(head)
        } else {
            Chunk::Text(head)
        };
        if tail.is_empty() {
            done = true;
        }
        rest = tail;
        want_digits = !want_digits;
        Some(chunk)
    })
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
