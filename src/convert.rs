use crate::constants::FILENAME_HASH_LEN;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("duplicate key {key:?} in {path} after converting keys to strings")]
    KeyCollision { path: PathBuf, key: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// failure to turn a yaml stream into a json value
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// two mapping keys that are distinct in yaml render to the same json key
    #[error("duplicate key {0:?} after converting keys to strings")]
    KeyCollision(String),
}

/// a yaml file converted to a json artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub source_path: String,
    pub json_path: PathBuf,
}

/// converts yaml sources into json files inside an output directory
#[derive(Debug)]
pub struct Converter {
    out_dir: PathBuf,
}

impl Converter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// convert `source_path` (relative to `root`) into a json file
    pub fn convert(&self, root: &Path, source_path: &str) -> Result<Conversion, ConvertError> {
        let source_file = root.join(source_path);
        let text = fs::read_to_string(&source_file).map_err(|source| ConvertError::Io {
            path: source_file.clone(),
            source,
        })?;

        let payload = load_documents(&text).map_err(|e| match e {
            LoadError::Yaml(source) => ConvertError::Parse {
                path: source_file.clone(),
                source,
            },
            LoadError::KeyCollision(key) => ConvertError::KeyCollision {
                path: source_file.clone(),
                key,
            },
        })?;

        let json_path = self.out_dir.join(output_filename(source_path));
        let bytes = serde_json::to_vec_pretty(&payload).map_err(|source| {
            ConvertError::Serialize {
                path: json_path.clone(),
                source,
            }
        })?;
        fs::write(&json_path, bytes).map_err(|source| ConvertError::Io {
            path: json_path.clone(),
            source,
        })?;

        Ok(Conversion {
            source_path: source_path.to_string(),
            json_path,
        })
    }
}

/// output filename for a source path: `<stem>__<hash>.json`
///
/// the hash covers the full path so equal base names in different
/// directories don't collide
pub fn output_filename(source_path: &str) -> String {
    let digest = hex::encode(Sha256::digest(source_path.as_bytes()));
    let stem = Path::new(source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}__{}.json", &digest[..FILENAME_HASH_LEN])
}

/// load every document in a yaml stream
///
/// no documents gives null, one gives that document, more give an array
pub fn load_documents(text: &str) -> Result<JsonValue, LoadError> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let mut value = YamlValue::deserialize(document)?;
        value.apply_merge()?;
        documents.push(to_json(value)?);
    }

    Ok(match documents.len() {
        0 => JsonValue::Null,
        1 => documents.remove(0),
        _ => JsonValue::Array(documents),
    })
}

fn to_json(value: YamlValue) -> Result<JsonValue, LoadError> {
    Ok(match value {
        YamlValue::Null => JsonValue::Null,
        YamlValue::Bool(b) => JsonValue::Bool(b),
        YamlValue::Number(n) => number_to_json(&n),
        YamlValue::String(s) => JsonValue::String(s),
        YamlValue::Sequence(seq) => JsonValue::Array(
            seq.into_iter()
                .map(to_json)
                .collect::<Result<_, _>>()?,
        ),
        YamlValue::Mapping(map) => {
            let mut object = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key = key_to_string(k)?;
                if object.contains_key(&key) {
                    return Err(LoadError::KeyCollision(key));
                }
                object.insert(key, to_json(v)?);
            }
            JsonValue::Object(object)
        }
        YamlValue::Tagged(tagged) => to_json(tagged.value)?,
    })
}

fn number_to_json(n: &serde_yaml::Number) -> JsonValue {
    if let Some(i) = n.as_i64() {
        JsonValue::from(i)
    } else if let Some(u) = n.as_u64() {
        JsonValue::from(u)
    } else {
        // json has no nan/inf, keep the yaml spelling
        n.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| JsonValue::String(n.to_string()), JsonValue::Number)
    }
}

/// json object keys must be strings
fn key_to_string(key: YamlValue) -> Result<String, LoadError> {
    Ok(match key {
        YamlValue::String(s) => s,
        YamlValue::Null => "null".to_string(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Tagged(tagged) => key_to_string(tagged.value)?,
        composite => to_json(composite)?.to_string(),
    })
}
