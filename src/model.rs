use std::{io, path::Path};

use image::{imageops::FilterType, io::Reader as ImageReader, ImageError};
use thiserror::Error;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("image file is unreadable: {0}")]
    Unreadable(#[from] io::Error),
    #[error("unsupported or corrupt image: {0}")]
    UnsupportedImage(#[source] ImageError),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model produced no scores")]
    EmptyOutput,
    #[error("class index {index} is outside the label vocabulary of {len} entries")]
    LabelOutOfRange { index: usize, len: usize },
}

impl From<ImageError> for ClassifierError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::IoError(io) => ClassifierError::Unreadable(io),
            other => ClassifierError::UnsupportedImage(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

pub trait Classifier: Send + Sync {
    /// Classifies the image stored at `image_path`, returning the single most
    /// likely label.
    fn predict(&self, image_path: &Path) -> Result<Prediction, ClassifierError>;
}

/// Class names in model output order.
#[derive(Debug, Clone)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn load(path: &Path) -> io::Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(contents: &str) -> io::Result<Self> {
        let labels: Vec<String> = contents.lines().map(|l| l.trim().to_string()).collect();
        if labels.iter().all(String::is_empty) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "label vocabulary is empty",
            ));
        }
        Ok(Labels(labels))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, index: usize) -> Result<&str, ClassifierError> {
        self.0
            .get(index)
            .map(String::as_str)
            .ok_or(ClassifierError::LabelOutOfRange {
                index,
                len: self.0.len(),
            })
    }
}

/// Loads the image at `path` and turns it into a `1 x 224 x 224 x 3` input in
/// row-major RGB order, scaled to `[-1, 1]`.
pub fn preprocess_image(path: &Path) -> Result<Vec<f32>, ClassifierError> {
    // Format is sniffed from the content since stored files always end in .jpg.
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;

    let resized = img
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Nearest)
        .to_rgb8();

    let mut flat_img = Vec::with_capacity((INPUT_SIZE * INPUT_SIZE * 3) as usize);
    for pixel in resized.pixels() {
        flat_img.push(pixel[0] as f32 / 127.5 - 1.0);
        flat_img.push(pixel[1] as f32 / 127.5 - 1.0);
        flat_img.push(pixel[2] as f32 / 127.5 - 1.0);
    }

    Ok(flat_img)
}

pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((i, score)),
        })
}

/// Picks the highest scoring class and resolves it against `labels`.
pub fn select_label(labels: &Labels, scores: &[f32]) -> Result<Prediction, ClassifierError> {
    let (index, probability) = argmax(scores).ok_or(ClassifierError::EmptyOutput)?;
    let label = labels.get(index)?.to_string();
    Ok(Prediction { label, probability })
}

#[cfg(feature = "tensorflow")]
pub use self::tf::Model;

#[cfg(feature = "tensorflow")]
mod tf {
    use std::{fs, path::Path};

    use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor};
    use tracing::{debug, info};

    use super::{
        preprocess_image, select_label, Classifier, ClassifierError, Labels, Prediction, INPUT_SIZE,
    };

    /// A frozen TensorFlow graph paired with its label vocabulary.
    pub struct Model {
        session: Session,
        graph: Graph,
        input_op: String,
        output_op: String,
        labels: Labels,
    }

    impl Model {
        pub fn new(
            model_path: &Path,
            labels_path: &Path,
            input_op: &str,
            output_op: &str,
        ) -> Result<Self, Box<dyn std::error::Error>> {
            let mut graph = Graph::new();
            let model_bytes = fs::read(model_path)?;
            graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;

            let session = Session::new(&SessionOptions::new(), &graph)?;

            for op in [input_op, output_op] {
                if graph.operation_by_name(op)?.is_none() {
                    return Err(format!("operation '{op}' not found in graph").into());
                }
            }

            let labels = Labels::load(labels_path)?;
            info!(
                model = %model_path.display(),
                classes = labels.len(),
                "model loaded"
            );

            Ok(Model {
                session,
                graph,
                input_op: input_op.to_string(),
                output_op: output_op.to_string(),
                labels,
            })
        }

        fn run(&self, flat_img: &[f32]) -> Result<Tensor<f32>, tensorflow::Status> {
            let mut input_tensor =
                Tensor::<f32>::new(&[1, INPUT_SIZE as u64, INPUT_SIZE as u64, 3]);
            input_tensor.copy_from_slice(flat_img);

            // Both operations were verified at load time.
            let input = self.graph.operation_by_name_required(&self.input_op)?;
            let output = self.graph.operation_by_name_required(&self.output_op)?;

            let mut args = SessionRunArgs::new();
            args.add_feed(&input, 0, &input_tensor);
            let output_token = args.request_fetch(&output, 0);
            self.session.run(&mut args)?;
            args.fetch(output_token)
        }
    }

    impl Classifier for Model {
        fn predict(&self, image_path: &Path) -> Result<Prediction, ClassifierError> {
            let flat_img = preprocess_image(image_path)?;
            let scores = self
                .run(&flat_img)
                .map_err(|status| ClassifierError::Inference(status.to_string()))?;

            let prediction = select_label(&self.labels, &scores)?;
            debug!(
                label = %prediction.label,
                probability = prediction.probability,
                "inference complete"
            );

            Ok(prediction)
        }
    }
}
