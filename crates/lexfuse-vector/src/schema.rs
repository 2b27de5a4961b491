//! Arrow schemas of the persisted dense index.
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const VECTORS_TABLE: &str = "vectors";
pub const MANIFEST_TABLE: &str = "manifest";
pub const FORMAT_TAG: &str = "lexfuse.dense-index";
pub const SCHEMA_VERSION: i32 = 1;

pub fn vector_field(dim: i32) -> Field {
	Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true)
}

pub fn build_vectors_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("ordinal", DataType::UInt32, false),
		Field::new("id", DataType::Utf8, false),
		Field::new("content_hash", DataType::Utf8, false),
		vector_field(dim),
	]))
}

pub fn build_manifest_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("format", DataType::Utf8, false),
		Field::new("schema_version", DataType::Int32, false),
		Field::new("corpus_version", DataType::Utf8, false),
		Field::new("model_id", DataType::Utf8, false),
		Field::new("dim", DataType::Int32, false),
		Field::new("normalized", DataType::Boolean, false),
		Field::new("created_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
	]))
}

/// Column-by-column comparison on name and type. The list child of
/// `vector` only has to be Float32; lance may rename or re-flag it.
pub fn schema_mismatch(actual: &Schema, expected: &Schema) -> Option<String> {
	if actual.fields().len() != expected.fields().len() {
		return Some(format!("expected {} columns, found {}", expected.fields().len(), actual.fields().len()));
	}
	for (a, e) in actual.fields().iter().zip(expected.fields().iter()) {
		if a.name() != e.name() {
			return Some(format!("expected column {:?}, found {:?}", e.name(), a.name()));
		}
		let same = match (a.data_type(), e.data_type()) {
			(DataType::FixedSizeList(ai, an), DataType::FixedSizeList(ei, en)) => an == en && ai.data_type() == ei.data_type(),
			(at, et) => at == et,
		};
		if !same {
			return Some(format!("column {:?} has type {:?}, expected {:?}", a.name(), a.data_type(), e.data_type()));
		}
	}
	None
}
