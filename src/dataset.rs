use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use rayon::prelude::*;
use tracing::debug;
use walkdir::WalkDir;

use crate::clip::ClipTensor;
use crate::errors::{ReasonSegError, Result};
use crate::geometry::{GeometryRecord, ResizeLongestSide};
use crate::normalize::{SamNormalizer, SamTensor};
use crate::traits::EncoderPreprocessor;

/// Lists the image files directly inside `input_dir`, sorted by file name.
pub fn collect_image_files(input_dir: &Path) -> Result<Vec<PathBuf>> {
    if !input_dir.is_dir() {
        return Err(ReasonSegError::FileSystem {
            path: input_dir.to_path_buf(),
            operation: "list input directory".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "input directory does not exist",
            ),
        });
    }

    let image_files = WalkDir::new(input_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| ImageFormat::from_path(e.path()).is_ok())
        .map(|e| e.into_path())
        .collect();

    Ok(image_files)
}

/// Decodes an image file into RGB.
///
/// This is the only place where the on-disk channel layout is converted; everything
/// downstream assumes RGB.
pub fn read_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path)
        .map_err(|e| ReasonSegError::invalid_image(path.display().to_string(), e.to_string()))?
        .into_rgb8();

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ReasonSegError::invalid_image(
            path.display().to_string(),
            format!("zero-sized dimensions {}x{}", width, height),
        ));
    }
    Ok(image)
}

/// File name without its last extension, used to name the output artifacts.
pub fn image_name(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ReasonSegError::invalid_image(path.display().to_string(), "file name is not valid UTF-8")
        })
}

/// Both encoder inputs for one image plus the geometry needed to undo the resize.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub sam: SamTensor,
    pub clip: ClipTensor,
    pub geometry: GeometryRecord,
}

/// Runs the two independent preprocessing paths on one image.
#[derive(Debug, Clone)]
pub struct Preprocessor<E: EncoderPreprocessor> {
    transform: ResizeLongestSide,
    normalizer: SamNormalizer,
    encoder: E,
}

impl<E: EncoderPreprocessor> Preprocessor<E> {
    pub const fn new(image_size: u32, encoder: E) -> Self {
        Self {
            transform: ResizeLongestSide::new(image_size),
            normalizer: SamNormalizer::new(image_size),
            encoder,
        }
    }

    pub const fn image_size(&self) -> u32 {
        self.transform.target_length()
    }

    pub const fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn encode(&self, image: &RgbImage) -> Result<EncodedImage> {
        let clip = self.encoder.preprocess(image)?;
        let (resized, geometry) = self.transform.apply_image(image)?;
        let sam = self.normalizer.encode(&resized)?;
        Ok(EncodedImage {
            sam,
            clip,
            geometry,
        })
    }
}

/// A decoded and encoded image, ready for the model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub path: PathBuf,
    pub name: String,
    pub image: RgbImage,
    pub encoded: EncodedImage,
}

/// Image files of one directory in file-name order.
///
/// The listing is taken once at [`LocalDataset::open`]; reopen the directory to pick up
/// changes.
pub struct LocalDataset<'a, E: EncoderPreprocessor> {
    image_paths: Vec<PathBuf>,
    preprocessor: &'a Preprocessor<E>,
}

impl<'a, E: EncoderPreprocessor> LocalDataset<'a, E> {
    pub fn open(input_dir: &Path, preprocessor: &'a Preprocessor<E>) -> Result<Self> {
        let image_paths = collect_image_files(input_dir)?;
        debug!(
            "Found {} images in {}",
            image_paths.len(),
            input_dir.display()
        );
        Ok(Self {
            image_paths,
            preprocessor,
        })
    }

    pub fn len(&self) -> usize {
        self.image_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_paths.is_empty()
    }

    pub fn image_paths(&self) -> &[PathBuf] {
        &self.image_paths
    }

    /// Reads and encodes the image at `index`.
    pub fn get(&self, index: usize) -> Result<PreparedImage> {
        let path = self.image_paths.get(index).ok_or_else(|| {
            ReasonSegError::validation(
                "dataset index",
                format!("{} out of range for {} images", index, self.len()),
            )
        })?;
        self.prepare(path)
    }

    fn prepare(&self, path: &Path) -> Result<PreparedImage> {
        let name = image_name(path)?;
        let image = read_image(path)?;
        let encoded = self
            .preprocessor
            .encode(&image)
            .map_err(|e| match e {
                ReasonSegError::InvalidImage { reason, .. } => {
                    ReasonSegError::invalid_image(path.display().to_string(), reason)
                }
                other => other,
            })?;
        Ok(PreparedImage {
            path: path.to_path_buf(),
            name,
            image,
            encoded,
        })
    }

    /// Lazy sequence of batches of at most `batch_size` prepared images.
    ///
    /// Items of one batch are prepared in parallel and independently of each other; each
    /// batch keeps file-name order and a failing item does not affect its neighbors.
    pub fn batches(&self, batch_size: usize) -> Batches<'_, 'a, E> {
        Batches {
            dataset: self,
            batch_size: batch_size.max(1),
            next: 0,
        }
    }
}

pub struct Batches<'d, 'a, E: EncoderPreprocessor> {
    dataset: &'d LocalDataset<'a, E>,
    batch_size: usize,
    next: usize,
}

impl<E: EncoderPreprocessor> Iterator for Batches<'_, '_, E> {
    type Item = Vec<(PathBuf, Result<PreparedImage>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let paths = &self.dataset.image_paths;
        if self.next >= paths.len() {
            return None;
        }

        let end = (self.next + self.batch_size).min(paths.len());
        let batch = paths[self.next..end]
            .par_iter()
            .map(|path| (path.clone(), self.dataset.prepare(path)))
            .collect();
        self.next = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dataset.len().saturating_sub(self.next);
        let batches = remaining.div_ceil(self.batch_size);
        (batches, Some(batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{ClipImageProcessor, ClipPreprocessorConfig, SizeSpec};
    use image::Rgb;
    use tempfile::TempDir;

    fn preprocessor() -> Preprocessor<ClipImageProcessor> {
        let config = ClipPreprocessorConfig {
            size: SizeSpec::ShortestEdge { shortest_edge: 8 },
            crop_size: SizeSpec::Square(8),
            ..Default::default()
        };
        Preprocessor::new(32, ClipImageProcessor::new(config).unwrap())
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> Result<()> {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30])).save(dir.join(name))?;
        Ok(())
    }

    #[test]
    fn test_listing_is_sorted_and_filtered() -> Result<()> {
        let temp_dir = TempDir::new()?;
        write_png(temp_dir.path(), "c.png", 4, 4)?;
        write_png(temp_dir.path(), "a.png", 4, 4)?;
        write_png(temp_dir.path(), "b.png", 4, 4)?;
        std::fs::write(temp_dir.path().join("notes.txt"), b"not an image")?;
        std::fs::create_dir(temp_dir.path().join("nested.png"))?;

        let files = collect_image_files(temp_dir.path())?;
        let names: Vec<_> = files.iter().map(|p| image_name(p).unwrap()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        Ok(())
    }

    #[test]
    fn test_missing_directory() {
        let result = collect_image_files(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(ReasonSegError::FileSystem { .. })));
    }

    #[test]
    fn test_image_name_strips_last_extension() -> Result<()> {
        assert_eq!(image_name(Path::new("/in/photo.final.jpg"))?, "photo.final");
        Ok(())
    }

    #[test]
    fn test_unreadable_image_is_invalid() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("broken.png");
        std::fs::write(&path, b"garbage")?;
        assert!(matches!(
            read_image(&path),
            Err(ReasonSegError::InvalidImage { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_encode_keeps_paths_independent() -> Result<()> {
        let encoded = preprocessor().encode(&RgbImage::new(40, 30))?;
        assert_eq!(encoded.geometry.resized_size(), (24, 32));
        assert_eq!(encoded.sam.canvas_size(), 32);
        assert_eq!(encoded.clip.resolution(), (8, 8));
        Ok(())
    }

    #[test]
    fn test_batches_preserve_order_and_isolate_failures() -> Result<()> {
        let temp_dir = TempDir::new()?;
        write_png(temp_dir.path(), "d.png", 6, 3)?;
        write_png(temp_dir.path(), "a.png", 4, 8)?;
        std::fs::write(temp_dir.path().join("b.png"), b"garbage")?;
        write_png(temp_dir.path(), "c.png", 5, 5)?;

        let preprocessor = preprocessor();
        let dataset = LocalDataset::open(temp_dir.path(), &preprocessor)?;
        assert_eq!(dataset.len(), 4);

        let batches: Vec<_> = dataset.batches(3).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1].len(), 1);

        let items: Vec<_> = batches.into_iter().flatten().collect();
        let names: Vec<_> = items
            .iter()
            .map(|(path, _)| image_name(path).unwrap())
            .collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert!(items[0].1.is_ok());
        assert!(matches!(items[1].1, Err(ReasonSegError::InvalidImage { .. })));
        assert!(items[2].1.is_ok());
        assert_eq!(
            items[3].1.as_ref().map(|p| p.encoded.geometry.original_size()).ok(),
            Some((3, 6))
        );
        Ok(())
    }

    #[test]
    fn test_batches_restart_from_reopened_dataset() -> Result<()> {
        let temp_dir = TempDir::new()?;
        write_png(temp_dir.path(), "a.png", 4, 4)?;

        let preprocessor = preprocessor();
        let dataset = LocalDataset::open(temp_dir.path(), &preprocessor)?;
        let mut batches = dataset.batches(8);
        assert_eq!(batches.size_hint(), (1, Some(1)));
        assert!(batches.next().is_some());
        assert!(batches.next().is_none());

        assert_eq!(dataset.batches(8).count(), 1);
        assert!(dataset.get(0).is_ok());
        assert!(dataset.get(1).is_err());
        Ok(())
    }
}
