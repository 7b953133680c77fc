use std::{
    fmt,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use _model::{Coordinate, CoordinateRecord, CoordinateStore, Repository};
use anyhow::{Context, Result};
use fastrand::Rng;
use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    imageops::FilterType,
    DynamicImage,
};
use tracing::{debug, info, warn};

use crate::{
    fetcher::{FetchError, ImageFormat, ImageParams, ImageSource, Size},
    utils::progress_bar,
    variants,
};

#[derive(Clone, Debug)]
pub struct CaptureParams {
    /// Root directory; images land in `<output>/<label>/`.
    pub output: PathBuf,
    pub image: ImageParams,
    /// Jittered images per record, on top of the base image.
    pub variants: usize,
    /// Maximum jitter in degrees, per axis.
    pub max_offset: f64,
    pub quality: u8,
    /// Pause between consecutive requests.
    pub delay: Duration,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            output: PathBuf::from("data"),
            image: ImageParams::default(),
            variants: 15,
            max_offset: 0.0002,
            quality: 95,
            delay: Duration::from_millis(200),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    FetchingBase,
    FetchingVariants,
    Completed,
    Failed,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::FetchingBase => "fetching-base",
            Self::FetchingVariants => "fetching-variants",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub images: usize,
    pub skipped: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records captured, {} failed, {} images written, {} variants skipped",
            self.completed, self.failed, self.images, self.skipped
        )
    }
}

/// Sequential batch over the store's pending records.
///
/// A record is marked processed once its base image is on disk, whatever
/// happens to its variants, and the store is saved after every such record.
/// Records whose base image fails stay pending for the next run.
pub struct Capture<'a, S> {
    source: &'a S,
    params: CaptureParams,
    rng: Rng,
    requests: usize,
}

impl<'a, S: ImageSource> Capture<'a, S> {
    pub fn new(source: &'a S, params: CaptureParams, rng: Rng) -> Self {
        Self {
            source,
            params,
            rng,
            requests: 0,
        }
    }

    pub fn run<R: Repository>(&mut self, store: &mut CoordinateStore<R>) -> Result<Summary> {
        let pending: Vec<CoordinateRecord> = store.pending().cloned().collect();
        let mut summary = Summary::default();
        if pending.is_empty() {
            info!("every record is already processed");
            return Ok(summary);
        }

        info!(
            records = pending.len(),
            variants = self.params.variants,
            output = %self.params.output.display(),
            "starting capture"
        );
        let progress = progress_bar(pending.len() as u64);
        for record in &pending {
            progress.set_message(record.name().to_string());
            debug!(record = record.name(), state = %RecordState::Pending);

            let state = self.record(record, &mut summary)?;
            debug!(record = record.name(), %state);
            match state {
                RecordState::Completed => {
                    store.mark_processed(record.name())?;
                    store
                        .save()
                        .context("failed to save coordinate store, stopping")?;
                    summary.completed += 1;
                }
                _ => summary.failed += 1,
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(summary)
    }

    fn record(&mut self, record: &CoordinateRecord, summary: &mut Summary) -> Result<RecordState> {
        let dir = self.params.output.join(record.label().slug());
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        debug!(record = record.name(), state = %RecordState::FetchingBase);
        match self.fetch(record.coordinate()) {
            Ok(image) => {
                self.write(image, &dir.join(self.file_name(record.name(), None)))?;
                summary.images += 1;
            }
            Err(e @ FetchError::Auth(_)) => {
                return Err(anyhow::Error::new(e)
                    .context("mapping service rejected the API key, stopping"));
            }
            Err(e) => {
                warn!(record = record.name(), "base image failed, leaving pending: {e}");
                return Ok(RecordState::Failed);
            }
        }

        debug!(record = record.name(), state = %RecordState::FetchingVariants);
        let variants = variants::generate(
            record.coordinate(),
            self.params.variants,
            self.params.max_offset,
            Rng::with_seed(self.rng.u64(..)),
        );
        for (i, coordinate) in variants.enumerate() {
            let index = i + 1;
            match self.fetch(coordinate) {
                Ok(image) => {
                    let path = dir.join(self.file_name(record.name(), Some(index)));
                    self.write(image, &path)?;
                    summary.images += 1;
                }
                Err(e @ FetchError::Auth(_)) => {
                    return Err(anyhow::Error::new(e)
                        .context("mapping service rejected the API key, stopping"));
                }
                Err(e) => {
                    warn!(record = record.name(), variant = index, "skipping variant: {e}");
                    summary.skipped += 1;
                }
            }
        }

        Ok(RecordState::Completed)
    }

    fn fetch(&mut self, coordinate: Coordinate) -> Result<DynamicImage, FetchError> {
        if self.requests > 0 && !self.params.delay.is_zero() {
            thread::sleep(self.params.delay);
        }
        self.requests += 1;

        let bytes = self.source.fetch(coordinate, &self.params.image)?;
        image::load_from_memory(&bytes).map_err(|e| FetchError::ImageDecode(e.to_string()))
    }

    fn file_name(&self, name: &str, variant: Option<usize>) -> String {
        let extension = self.params.image.format.extension();
        match variant {
            Some(i) => format!("{name}_{i}.{extension}"),
            None => format!("{name}.{extension}"),
        }
    }

    fn write(&self, image: DynamicImage, path: &Path) -> Result<()> {
        let Size { width, height } = self.params.image.size;
        let image = if image.width() != width || image.height() != height {
            image.resize_exact(width, height, FilterType::Triangle)
        } else {
            image
        };

        let mut file = BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        );
        match self.params.image.format {
            ImageFormat::Jpg => DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(
                JpegEncoder::new_with_quality(&mut file, self.params.quality),
            )?,
            ImageFormat::Png => image.write_with_encoder(PngEncoder::new(&mut file))?,
        }
        file.flush()
            .with_context(|| format!("failed to write {}", path.display()))?;

        debug!(path = %path.display(), "wrote image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::BTreeSet, io::Cursor};

    use _model::{Label, Memory};
    use image::{Rgb, RgbImage};

    use super::*;

    struct Fake<F> {
        calls: Cell<usize>,
        respond: F,
    }

    impl<F: Fn(usize) -> Result<Vec<u8>, FetchError>> Fake<F> {
        fn new(respond: F) -> Self {
            Self {
                calls: Cell::new(0),
                respond,
            }
        }
    }

    impl<F: Fn(usize) -> Result<Vec<u8>, FetchError>> ImageSource for Fake<F> {
        fn fetch(&self, _: Coordinate, _: &ImageParams) -> Result<Vec<u8>, FetchError> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            (self.respond)(call)
        }
    }

    // deliberately not 50x50 so every write goes through the resize
    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([20, 120, 200])))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn record(label: Label, name: &str) -> CoordinateRecord {
        CoordinateRecord::new(label, name, Coordinate::new(19.1738, -96.1342).unwrap()).unwrap()
    }

    fn store(records: Vec<CoordinateRecord>) -> CoordinateStore<Memory> {
        CoordinateStore::open(Memory::new(records)).unwrap()
    }

    fn params(output: &Path, variants: usize) -> CaptureParams {
        CaptureParams {
            output: output.to_path_buf(),
            variants,
            delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn files(dir: &Path) -> BTreeSet<String> {
        match fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|x| x.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => BTreeSet::new(),
        }
    }

    #[test]
    fn base_and_variants() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|_| Ok(png.clone()));
        let mut store = store(vec![record(Label::Positive, "SiteA")]);

        let summary = Capture::new(&source, params(dir.path(), 15), Rng::with_seed(1))
            .run(&mut store)
            .unwrap();

        let written = files(&dir.path().join("positive"));
        assert_eq!(written.len(), 16);
        assert!(written.contains("SiteA.jpg"));
        for i in 1..=15 {
            assert!(written.contains(&format!("SiteA_{i}.jpg")));
        }
        assert!(files(&dir.path().join("negative")).is_empty());

        let image = image::open(dir.path().join("positive/SiteA_7.jpg")).unwrap();
        assert_eq!((image.width(), image.height()), (50, 50));

        assert!(store.get("SiteA").unwrap().processed());
        assert!(store.repository().records()[0].processed());
        assert_eq!(source.calls.get(), 16);
        assert_eq!(
            summary,
            Summary {
                completed: 1,
                failed: 0,
                images: 16,
                skipped: 0,
            }
        );
    }

    #[test]
    fn failed_variants_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        // call 0 is the base image, calls 1..=15 the variants
        let source = Fake::new(|call| match call {
            3 | 11 => Err(FetchError::Network("simulated".to_string())),
            7 => Err(FetchError::RateLimited),
            _ => Ok(png.clone()),
        });
        let mut store = store(vec![record(Label::Positive, "SiteA")]);

        let summary = Capture::new(&source, params(dir.path(), 15), Rng::new())
            .run(&mut store)
            .unwrap();

        let written = files(&dir.path().join("positive"));
        assert_eq!(written.len(), 13);
        assert!(written.contains("SiteA.jpg"));
        for missing in ["SiteA_3.jpg", "SiteA_7.jpg", "SiteA_11.jpg"] {
            assert!(!written.contains(missing));
        }
        assert!(store.get("SiteA").unwrap().processed());
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.images, 13);
    }

    #[test]
    fn undecodable_variant_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|call| match call {
            2 => Ok(b"<html>quota exceeded</html>".to_vec()),
            _ => Ok(png.clone()),
        });
        let mut store = store(vec![record(Label::Negative, "Field")]);

        let summary = Capture::new(&source, params(dir.path(), 3), Rng::new())
            .run(&mut store)
            .unwrap();

        let written = files(&dir.path().join("negative"));
        assert_eq!(
            written,
            BTreeSet::from([
                "Field.jpg".to_string(),
                "Field_1.jpg".to_string(),
                "Field_3.jpg".to_string(),
            ])
        );
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn base_failure_leaves_record_pending() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|call| match call {
            0 => Err(FetchError::RateLimited),
            _ => Ok(png.clone()),
        });
        let mut store = store(vec![
            record(Label::Positive, "SiteA"),
            record(Label::Negative, "Field"),
        ]);

        let summary = Capture::new(&source, params(dir.path(), 2), Rng::new())
            .run(&mut store)
            .unwrap();

        assert!(!store.get("SiteA").unwrap().processed());
        assert!(store.get("Field").unwrap().processed());
        assert!(files(&dir.path().join("positive")).is_empty());
        assert_eq!(files(&dir.path().join("negative")).len(), 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        // base failure means no variant requests for that record
        assert_eq!(source.calls.get(), 4);
    }

    #[test]
    fn second_run_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|_| Ok(png.clone()));
        let mut store = store(vec![
            record(Label::Positive, "SiteA"),
            record(Label::Negative, "Field"),
        ]);

        Capture::new(&source, params(dir.path(), 4), Rng::new())
            .run(&mut store)
            .unwrap();
        assert_eq!(source.calls.get(), 10);
        assert_eq!(store.repository().saves(), 2);

        let summary = Capture::new(&source, params(dir.path(), 4), Rng::new())
            .run(&mut store)
            .unwrap();
        assert_eq!(source.calls.get(), 10);
        assert_eq!(summary, Summary::default());
    }

    #[test]
    fn auth_error_stops_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|call| match call {
            0 => Ok(png.clone()),
            _ => Err(FetchError::Auth(403)),
        });
        let mut store = store(vec![
            record(Label::Positive, "SiteA"),
            record(Label::Positive, "SiteB"),
            record(Label::Positive, "SiteC"),
        ]);

        let err = Capture::new(&source, params(dir.path(), 0), Rng::new())
            .run(&mut store)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FetchError>(),
            Some(FetchError::Auth(403))
        ));

        // the completed record was persisted before the abort
        let saved = store.repository().records();
        assert!(saved[0].processed());
        assert!(!saved[1].processed());
        assert!(!saved[2].processed());
        assert_eq!(source.calls.get(), 2);
    }

    #[test]
    fn failed_save_stops_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|_| Ok(png.clone()));
        let mut store = store(vec![
            record(Label::Positive, "SiteA"),
            record(Label::Positive, "SiteB"),
        ]);
        store.repository().fail_saves(true);

        assert!(Capture::new(&source, params(dir.path(), 0), Rng::new())
            .run(&mut store)
            .is_err());
        assert_eq!(source.calls.get(), 1);
    }

    #[test]
    fn png_output() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|_| Ok(png.clone()));
        let mut store = store(vec![record(Label::Positive, "SiteA")]);
        let mut params = params(dir.path(), 1);
        params.image.format = ImageFormat::Png;

        Capture::new(&source, params, Rng::new())
            .run(&mut store)
            .unwrap();

        let written = files(&dir.path().join("positive"));
        assert_eq!(
            written,
            BTreeSet::from(["SiteA.png".to_string(), "SiteA_1.png".to_string()])
        );
        let bytes = fs::read(dir.path().join("positive/SiteA.png")).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
    }

    #[test]
    fn delay_between_requests() {
        let dir = tempfile::tempdir().unwrap();
        let png = png();
        let source = Fake::new(|_| Ok(png.clone()));
        let mut store = store(vec![record(Label::Positive, "SiteA")]);
        let mut params = params(dir.path(), 2);
        params.delay = Duration::from_millis(20);

        let start = std::time::Instant::now();
        Capture::new(&source, params, Rng::new())
            .run(&mut store)
            .unwrap();
        // three requests, two pauses
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
