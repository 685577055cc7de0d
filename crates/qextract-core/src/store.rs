use crate::domain::QextractError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const PATH_SEPARATOR: char = '/';

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read store '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse store '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write store '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize store '{}': {source}", path.display())]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("dataset '{path}' already exists")]
    DatasetExists { path: String },
    #[error("'{path}' is a dataset and cannot hold children")]
    NodeConflict { path: String },
    #[error("invalid store path '{path}'")]
    InvalidPath { path: String },
}

impl From<StoreError> for QextractError {
    fn from(error: StoreError) -> Self {
        let message = error.to_string();
        match error {
            StoreError::Read { .. } | StoreError::Write { .. } => {
                QextractError::io_system("IO.STORE", message)
            }
            StoreError::Parse { .. } => QextractError::input_validation("INPUT.STORE_FORMAT", message),
            StoreError::Serialize { .. } => QextractError::internal("SYS.STORE_SERIALIZE", message),
            StoreError::DatasetExists { .. }
            | StoreError::NodeConflict { .. }
            | StoreError::InvalidPath { .. } => {
                QextractError::input_validation("INPUT.STORE_PATH", message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Dataset(#[serde(with = "nan_as_null")] Vec<f64>),
    Group(BTreeMap<String, Node>),
}

impl Node {
    pub fn as_dataset(&self) -> Option<&[f64]> {
        match self {
            Self::Dataset(values) => Some(values),
            Self::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Self::Group(children) => Some(children),
            Self::Dataset(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HierarchicalStore {
    root: BTreeMap<String, Node>,
}

impl HierarchicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the store at `path`, or starts an empty one if nothing exists there yet.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string(self).map_err(|source| StoreError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Creates a dataset and any missing parent groups. Existing datasets are never replaced.
    pub fn create_dataset(&mut self, path: &str, values: &[f64]) -> Result<(), StoreError> {
        let segments = split_path(path)?;
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
            });
        };

        let mut group = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let node = group
                .entry((*segment).to_string())
                .or_insert_with(|| Node::Group(BTreeMap::new()));
            group = match node {
                Node::Group(children) => children,
                Node::Dataset(_) => {
                    return Err(StoreError::NodeConflict {
                        path: segments[..=depth].join("/"),
                    });
                }
            };
        }

        if group.contains_key(*leaf) {
            return Err(StoreError::DatasetExists {
                path: segments.join("/"),
            });
        }
        group.insert((*leaf).to_string(), Node::Dataset(values.to_vec()));
        Ok(())
    }

    /// Fails exactly when `create_dataset(path, ..)` would, without touching the store.
    pub fn check_new_dataset(&self, path: &str) -> Result<(), StoreError> {
        let segments = split_path(path)?;
        let last = segments.len() - 1;
        let mut group = &self.root;
        for (depth, segment) in segments.iter().enumerate() {
            match group.get(*segment) {
                None => return Ok(()),
                Some(Node::Group(children)) if depth < last => group = children,
                Some(Node::Dataset(_)) if depth < last => {
                    return Err(StoreError::NodeConflict {
                        path: segments[..=depth].join("/"),
                    });
                }
                Some(_) => {
                    return Err(StoreError::DatasetExists {
                        path: segments.join("/"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        let segments = split_path(path).ok()?;
        let (first, rest) = segments.split_first()?;
        let mut node = self.root.get(*first)?;
        for segment in rest {
            node = node.as_group()?.get(*segment)?;
        }
        Some(node)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    pub fn is_group(&self, path: &str) -> bool {
        self.node(path).is_some_and(|node| node.as_group().is_some())
    }

    pub fn dataset(&self, path: &str) -> Option<&[f64]> {
        self.node(path)?.as_dataset()
    }

    /// Child names of the group at `path`; an empty path lists the top level.
    pub fn keys(&self, path: &str) -> Option<Vec<&str>> {
        let children = if path.trim_matches(PATH_SEPARATOR).is_empty() {
            &self.root
        } else {
            self.node(path)?.as_group()?
        };
        Some(children.keys().map(String::as_str).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

pub fn join_path(segments: &[&str]) -> String {
    segments.join("/")
}

fn split_path(path: &str) -> Result<Vec<&str>, StoreError> {
    let trimmed = path.trim_matches(PATH_SEPARATOR);
    let segments: Vec<&str> = trimmed.split(PATH_SEPARATOR).collect();
    if trimmed.is_empty() || segments.iter().any(|segment| segment.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(segments)
}

mod nan_as_null {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut sequence = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            let element = (!value.is_nan()).then_some(*value);
            sequence.serialize_element(&element)?;
        }
        sequence.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(values
            .into_iter()
            .map(|value| value.unwrap_or(f64::NAN))
            .collect())
    }
}
