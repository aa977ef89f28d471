//! Serialization helpers shared by the installer assets.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::asset::{AssetError, File, FileFetcher};

pub(crate) fn yaml_file<T: Serialize>(filename: &str, value: &T) -> Result<File, AssetError> {
  let text = serde_yaml::to_string(value).map_err(|e| AssetError::encode(filename, e))?;
  Ok(File::new(filename, text))
}

pub(crate) fn json_file<T: Serialize>(filename: &str, value: &T) -> Result<File, AssetError> {
  let data = serde_json::to_vec(value).map_err(|e| AssetError::encode(filename, e))?;
  Ok(File::new(filename, data))
}

pub(crate) fn pretty_json_file<T: Serialize>(filename: &str, value: &T) -> Result<File, AssetError> {
  let mut data = serde_json::to_vec_pretty(value).map_err(|e| AssetError::encode(filename, e))?;
  data.push(b'\n');
  Ok(File::new(filename, data))
}

pub(crate) fn parse_yaml<T: DeserializeOwned>(file: &File) -> Result<T, AssetError> {
  serde_yaml::from_slice(&file.data).map_err(|e| AssetError::decode(&file.filename, e))
}

pub(crate) fn parse_json<T: DeserializeOwned>(file: &File) -> Result<T, AssetError> {
  serde_json::from_slice(&file.data).map_err(|e| AssetError::decode(&file.filename, e))
}

/// Fetch `filename` and decode it as YAML, keeping the bytes as read.
pub(crate) fn load_yaml<T: DeserializeOwned>(
  fetcher: &dyn FileFetcher,
  filename: &str,
) -> Result<Option<(T, File)>, AssetError> {
  let Some(file) = fetcher.fetch_by_name(filename)? else {
    return Ok(None);
  };
  Ok(Some((parse_yaml(&file)?, file)))
}

/// Fetch `filename` and decode it as JSON, keeping the bytes as read.
pub(crate) fn load_json<T: DeserializeOwned>(
  fetcher: &dyn FileFetcher,
  filename: &str,
) -> Result<Option<(T, File)>, AssetError> {
  let Some(file) = fetcher.fetch_by_name(filename)? else {
    return Ok(None);
  };
  Ok(Some((parse_json(&file)?, file)))
}
