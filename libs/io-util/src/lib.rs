// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! JSON file helpers for configuration, range lists and lease exports.

use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};

/// Reads a JSON file and deserializes its content into the specified type.
///
/// Errors name the offending path.
pub async fn read_file<P, T>(path: P) -> std::io::Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let mut buf = Vec::new();
    File::open(path)
        .await
        .map_err(|e| with_path(path, e))?
        .read_to_end(&mut buf)
        .await
        .map_err(|e| with_path(path, e))?;
    serde_json::from_slice(&buf).map_err(|e| with_path(path, std::io::Error::other(e)))
}

/// Serializes the given value to pretty printed JSON and writes it to the
/// specified file path, replacing any previous content.
pub async fn write_file(path: impl AsRef<Path>, content: &impl Serialize) -> std::io::Result<()> {
    let path = path.as_ref();
    let mut buf = serde_json::to_vec_pretty(content).map_err(std::io::Error::other)?;
    buf.push(b'\n');
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| with_path(path, e))?
        .write_all(&buf)
        .await
        .map_err(|e| with_path(path, e))?;
    Ok(())
}

fn with_path(path: &Path, err: std::io::Error) -> std::io::Error {
    std::io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}
