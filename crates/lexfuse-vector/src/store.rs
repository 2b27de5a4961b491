//! LanceDB persistence for `DenseIndex`.
//!
//! One database directory per corpus version holding a `vectors` table and a
//! single-row `manifest` table. Loading checks the manifest and the arrow
//! schema of `vectors` before any row is trusted.
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMillisecondArray, UInt32Array,
};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::ExecutableQuery;
use lancedb::{connect, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use lexfuse_core::error::{Error, Result};

use crate::index_build::DenseIndex;
use crate::schema::{
    build_manifest_schema, build_vectors_schema, schema_mismatch, FORMAT_TAG, MANIFEST_TABLE, SCHEMA_VERSION,
    VECTORS_TABLE,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DenseManifest {
    pub format: String,
    pub schema_version: i32,
    pub corpus_version: String,
    pub model_id: String,
    pub dim: i32,
    pub normalized: bool,
}

impl DenseManifest {
    fn describe(index: &DenseIndex) -> Self {
        Self {
            format: FORMAT_TAG.to_string(),
            schema_version: SCHEMA_VERSION,
            corpus_version: index.corpus_version.clone(),
            model_id: index.model_id.clone(),
            dim: index.dim as i32,
            normalized: index.normalized,
        }
    }
}

fn io_error(e: impl std::fmt::Display) -> Error {
    Error::Io(std::io::Error::other(e.to_string()))
}

fn schema_error(e: impl std::fmt::Display) -> Error {
    Error::IndexSchema(e.to_string())
}

async fn open_db(dir: &Path) -> lancedb::Result<Connection> {
    connect(dir.to_string_lossy().as_ref()).execute().await
}

/// Write `index` to `dir`, replacing whatever was there.
pub async fn save_dense_index(dir: &Path, index: &DenseIndex) -> Result<()> {
    if dir.exists() {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    let conn = open_db(dir).await.map_err(io_error)?;
    write_vectors(&conn, index).await?;
    write_manifest(&conn, &DenseManifest::describe(index)).await?;
    info!(dir = %dir.display(), corpus_version = %index.corpus_version, rows = index.len(), "saved dense index");
    Ok(())
}

async fn write_vectors(conn: &Connection, index: &DenseIndex) -> Result<()> {
    let schema = build_vectors_schema(index.dim as i32);
    let mut batches = Vec::new();
    if !index.is_empty() {
        let rows: Vec<Option<Vec<Option<f32>>>> =
            (0..index.len()).map(|i| Some(index.row(i).iter().map(|&x| Some(x)).collect())).collect();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(UInt32Array::from_iter_values(0..index.len() as u32)),
                Arc::new(StringArray::from(index.chunk_ids.clone())),
                Arc::new(StringArray::from(index.content_hashes.clone())),
                Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(rows.into_iter(), index.dim as i32)),
            ],
        )
        .map_err(io_error)?;
        batches.push(Ok(batch));
    }
    let reader = Box::new(RecordBatchIterator::new(batches.into_iter(), schema));
    conn.create_table(VECTORS_TABLE, reader).execute().await.map_err(io_error)?;
    Ok(())
}

async fn write_manifest(conn: &Connection, manifest: &DenseManifest) -> Result<()> {
    let schema = build_manifest_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec![manifest.format.clone()])),
            Arc::new(Int32Array::from(vec![manifest.schema_version])),
            Arc::new(StringArray::from(vec![manifest.corpus_version.clone()])),
            Arc::new(StringArray::from(vec![manifest.model_id.clone()])),
            Arc::new(Int32Array::from(vec![manifest.dim])),
            Arc::new(BooleanArray::from(vec![manifest.normalized])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(io_error)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    conn.create_table(MANIFEST_TABLE, reader).execute().await.map_err(io_error)?;
    Ok(())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::IndexSchema(format!("column {name} is missing or has the wrong type")))
}

async fn read_manifest(conn: &Connection) -> Result<DenseManifest> {
    let table = conn.open_table(MANIFEST_TABLE).execute().await.map_err(schema_error)?;
    if let Some(msg) = schema_mismatch(table.schema().await.map_err(schema_error)?.as_ref(), &build_manifest_schema()) {
        return Err(Error::IndexSchema(format!("manifest: {msg}")));
    }
    let mut stream = table.query().execute().await.map_err(schema_error)?;
    let mut manifests = Vec::new();
    while let Some(batch) = stream.try_next().await.map_err(schema_error)? {
        let format = column::<StringArray>(&batch, "format")?;
        let schema_version = column::<Int32Array>(&batch, "schema_version")?;
        let corpus_version = column::<StringArray>(&batch, "corpus_version")?;
        let model_id = column::<StringArray>(&batch, "model_id")?;
        let dim = column::<Int32Array>(&batch, "dim")?;
        let normalized = column::<BooleanArray>(&batch, "normalized")?;
        for i in 0..batch.num_rows() {
            manifests.push(DenseManifest {
                format: format.value(i).to_string(),
                schema_version: schema_version.value(i),
                corpus_version: corpus_version.value(i).to_string(),
                model_id: model_id.value(i).to_string(),
                dim: dim.value(i),
                normalized: normalized.value(i),
            });
        }
    }
    match manifests.len() {
        1 => Ok(manifests.remove(0)),
        n => Err(Error::IndexSchema(format!("manifest must hold exactly one row, found {n}"))),
    }
}

/// Open the index in `dir`, refusing it unless it was written by this format
/// for `corpus_version` with embedding model `model_id`.
pub async fn load_dense_index(dir: &Path, corpus_version: &str, model_id: &str) -> Result<DenseIndex> {
    if !dir.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("dense index directory {} does not exist", dir.display()),
        )));
    }
    let conn = open_db(dir).await.map_err(schema_error)?;
    let names = conn.table_names().execute().await.map_err(schema_error)?;
    for required in [MANIFEST_TABLE, VECTORS_TABLE] {
        if !names.iter().any(|n| n == required) {
            return Err(Error::IndexSchema(format!("{} has no {required} table", dir.display())));
        }
    }

    let manifest = read_manifest(&conn).await?;
    if manifest.format != FORMAT_TAG {
        return Err(Error::IndexSchema(format!("unexpected format tag {:?}", manifest.format)));
    }
    if manifest.schema_version != SCHEMA_VERSION {
        return Err(Error::IndexSchema(format!(
            "schema version {} is not supported (expected {SCHEMA_VERSION})",
            manifest.schema_version
        )));
    }
    if manifest.corpus_version != corpus_version {
        return Err(Error::IndexSchema(format!(
            "index was built for corpus version {}, expected {corpus_version}",
            manifest.corpus_version
        )));
    }
    if manifest.model_id != model_id {
        return Err(Error::IndexSchema(format!(
            "index was embedded with {}, configured model is {model_id}",
            manifest.model_id
        )));
    }
    if manifest.dim <= 0 {
        return Err(Error::IndexSchema(format!("invalid dimension {}", manifest.dim)));
    }

    let table = conn.open_table(VECTORS_TABLE).execute().await.map_err(schema_error)?;
    let actual = table.schema().await.map_err(schema_error)?;
    if let Some(msg) = schema_mismatch(&actual, &build_vectors_schema(manifest.dim)) {
        return Err(Error::IndexSchema(format!("vectors: {msg}")));
    }

    let mut rows: Vec<(u32, String, String, Vec<f32>)> = Vec::new();
    let mut stream = table.query().execute().await.map_err(schema_error)?;
    while let Some(batch) = stream.try_next().await.map_err(schema_error)? {
        let ordinals = column::<UInt32Array>(&batch, "ordinal")?;
        let ids = column::<StringArray>(&batch, "id")?;
        let hashes = column::<StringArray>(&batch, "content_hash")?;
        let vectors = column::<FixedSizeListArray>(&batch, "vector")?;
        for i in 0..batch.num_rows() {
            if vectors.is_null(i) {
                return Err(Error::IndexSchema(format!("row {} has no vector", ids.value(i))));
            }
            let list = vectors.value(i);
            let values: Vec<f32> = list.as_primitive::<Float32Type>().values().iter().copied().collect();
            rows.push((ordinals.value(i), ids.value(i).to_string(), hashes.value(i).to_string(), values));
        }
    }
    rows.sort_by_key(|r| r.0);

    let dim = manifest.dim as usize;
    let mut seen = HashSet::new();
    let mut chunk_ids = Vec::with_capacity(rows.len());
    let mut content_hashes = Vec::with_capacity(rows.len());
    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (expected, (ordinal, id, hash, values)) in rows.into_iter().enumerate() {
        if ordinal as usize != expected {
            return Err(Error::IndexSchema(format!("ordinals are not contiguous at {expected}")));
        }
        if values.len() != dim || values.iter().any(|x| !x.is_finite()) {
            return Err(Error::IndexSchema(format!("vector for {id} is malformed")));
        }
        if !seen.insert(id.clone()) {
            return Err(Error::IndexSchema(format!("duplicate chunk id {id}")));
        }
        chunk_ids.push(id);
        content_hashes.push(hash);
        flat.extend(values);
    }

    let index = DenseIndex::from_rows(
        manifest.corpus_version,
        manifest.model_id,
        dim,
        manifest.normalized,
        chunk_ids,
        content_hashes,
        flat,
    );
    info!(dir = %dir.display(), rows = index.len(), "loaded dense index");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexfuse_core::ErrorKind;
    use tempfile::TempDir;

    fn index(dim: usize) -> DenseIndex {
        let ids = vec!["d:0".to_string(), "d:1".to_string()];
        let hashes = vec!["h0".to_string(), "h1".to_string()];
        let vectors = (0..2 * dim).map(|i| i as f32 + 1.0).collect();
        DenseIndex::from_rows("v1".into(), "m".into(), dim, false, ids, hashes, vectors)
    }

    async fn write_raw(dir: &Path, vectors_of: &DenseIndex, manifest: &DenseManifest) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let conn = open_db(dir).await.unwrap();
        write_vectors(&conn, vectors_of).await.unwrap();
        write_manifest(&conn, manifest).await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_schema_version_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let idx = index(3);
        let manifest = DenseManifest { schema_version: 99, ..DenseManifest::describe(&idx) };
        write_raw(tmp.path(), &idx, &manifest).await;
        let err = load_dense_index(tmp.path(), "v1", "m").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexSchema);
    }

    #[tokio::test]
    async fn foreign_format_tag_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let idx = index(3);
        let manifest = DenseManifest { format: "other.tool".into(), ..DenseManifest::describe(&idx) };
        write_raw(tmp.path(), &idx, &manifest).await;
        assert_eq!(load_dense_index(tmp.path(), "v1", "m").await.unwrap_err().kind(), ErrorKind::IndexSchema);
    }

    #[tokio::test]
    async fn vector_width_disagreeing_with_manifest_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let manifest = DenseManifest::describe(&index(3));
        write_raw(tmp.path(), &index(2), &manifest).await;
        assert_eq!(load_dense_index(tmp.path(), "v1", "m").await.unwrap_err().kind(), ErrorKind::IndexSchema);
    }

    #[tokio::test]
    async fn missing_manifest_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let conn = open_db(tmp.path()).await.unwrap();
        write_vectors(&conn, &index(3)).await.unwrap();
        assert_eq!(load_dense_index(tmp.path(), "v1", "m").await.unwrap_err().kind(), ErrorKind::IndexSchema);
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_dense_index(&tmp.path().join("nope"), "v1", "m").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
