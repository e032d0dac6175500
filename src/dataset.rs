use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the well-known binding consulted when no dataset is supplied.
pub const AMBIENT_DATASET_NAME: &str = "PORTAL_DATASET";

/// Caller-owned collection of raw item records.
///
/// Records stay as loose JSON so that legacy field names and malformed
/// variant entries can be tolerated during normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Sequence(Vec<Value>),
    Mapping(Map<String, Value>),
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dataset must be a JSON array or object, found {0}")]
    Shape(&'static str),
    #[error("dataset producer failed: {0}")]
    Producer(String),
}

impl Dataset {
    pub fn from_value(value: Value) -> Result<Self, DatasetError> {
        match value {
            Value::Array(items) => Ok(Dataset::Sequence(items)),
            Value::Object(map) => Ok(Dataset::Mapping(map)),
            other => Err(DatasetError::Shape(json_kind(&other))),
        }
    }

    pub fn from_json_str(input: &str) -> Result<Self, DatasetError> {
        Self::from_value(serde_json::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::from_json_str(&text)?;
        debug!(path = %path.display(), records = dataset.len(), "Loaded dataset");
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        match self {
            Dataset::Sequence(items) => items.len(),
            Dataset::Mapping(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct key lookup; sequences have no keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Dataset::Sequence(_) => None,
            Dataset::Mapping(map) => map.get(key),
        }
    }

    /// All records in dataset order.
    pub fn records(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Dataset::Sequence(items) => Box::new(items.iter()),
            Dataset::Mapping(map) => Box::new(map.values()),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub type Producer = Arc<dyn Fn() -> Result<Option<Dataset>, DatasetError> + Send + Sync>;

/// Where a portal gets its dataset from.
#[derive(Clone, Default)]
pub enum DatasetSource {
    #[default]
    None,
    Value(Arc<Dataset>),
    Producer(Producer),
}

impl DatasetSource {
    pub fn value(dataset: Dataset) -> Self {
        DatasetSource::Value(Arc::new(dataset))
    }

    pub fn producer<F>(producer: F) -> Self
    where
        F: Fn() -> Result<Option<Dataset>, DatasetError> + Send + Sync + 'static,
    {
        DatasetSource::Producer(Arc::new(producer))
    }
}

impl fmt::Debug for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::None => write!(f, "DatasetSource::None"),
            DatasetSource::Value(dataset) => {
                write!(f, "DatasetSource::Value({} records)", dataset.len())
            }
            DatasetSource::Producer(_) => write!(f, "DatasetSource::Producer(..)"),
        }
    }
}

impl From<Dataset> for DatasetSource {
    fn from(value: Dataset) -> Self {
        DatasetSource::value(value)
    }
}

/// Resolves the explicit source, then the ambient bindings.
pub fn resolve_dataset(source: &DatasetSource) -> Option<Arc<Dataset>> {
    resolve_explicit(source).or_else(ambient::lookup)
}

/// Resolves only the explicitly supplied source.
///
/// Producer errors and panics are swallowed and reported as "no dataset".
/// Empty collections count as absent.
pub fn resolve_explicit(source: &DatasetSource) -> Option<Arc<Dataset>> {
    let dataset = match source {
        DatasetSource::None => None,
        DatasetSource::Value(dataset) => Some(Arc::clone(dataset)),
        DatasetSource::Producer(producer) => {
            match panic::catch_unwind(AssertUnwindSafe(|| producer())) {
                Ok(Ok(dataset)) => dataset.map(Arc::new),
                Ok(Err(err)) => {
                    warn!(error = %err, "Dataset producer failed; continuing without data");
                    None
                }
                Err(_) => {
                    warn!("Dataset producer panicked; continuing without data");
                    None
                }
            }
        }
    };
    dataset.filter(|dataset| !dataset.is_empty())
}

/// Compatibility bindings for embeddings that predate explicit injection.
///
/// The scoped binding is thread-local and takes precedence over the
/// process-wide one.
pub mod ambient {
    use super::{AMBIENT_DATASET_NAME, Dataset};
    use once_cell::sync::Lazy;
    use parking_lot::RwLock;
    use std::cell::RefCell;
    use std::sync::Arc;
    use tracing::debug;

    static GLOBAL: Lazy<RwLock<Option<Arc<Dataset>>>> = Lazy::new(|| RwLock::new(None));

    thread_local! {
        static SCOPED: RefCell<Option<Arc<Dataset>>> = const { RefCell::new(None) };
    }

    pub fn install_global(dataset: Dataset) {
        debug!(binding = AMBIENT_DATASET_NAME, records = dataset.len(), "Installing global dataset");
        *GLOBAL.write() = Some(Arc::new(dataset));
    }

    pub fn clear_global() {
        *GLOBAL.write() = None;
    }

    /// Runs `f` with `dataset` bound as the scoped fallback, restoring the
    /// previous binding afterwards (also on unwind).
    pub fn with_scoped<R>(dataset: Dataset, f: impl FnOnce() -> R) -> R {
        struct Restore(Option<Arc<Dataset>>);

        impl Drop for Restore {
            fn drop(&mut self) {
                let previous = self.0.take();
                SCOPED.with(|slot| *slot.borrow_mut() = previous);
            }
        }

        let previous = SCOPED.with(|slot| slot.borrow_mut().replace(Arc::new(dataset)));
        let _restore = Restore(previous);
        f()
    }

    pub fn lookup() -> Option<Arc<Dataset>> {
        let scoped = SCOPED.with(|slot| slot.borrow().clone());
        let found = scoped
            .filter(|dataset| !dataset.is_empty())
            .or_else(|| GLOBAL.read().clone().filter(|dataset| !dataset.is_empty()));
        if found.is_some() {
            debug!(binding = AMBIENT_DATASET_NAME, "Using ambient dataset");
        }
        found
    }
}
