//! Taxonomy index: a hierarchical label space for taxonomy facets.
//!
//! Each facet path component (`dim`, `dim/a`, `dim/a/b`, ...) is assigned a stable ordinal
//! the first time a document uses it. Ordinal 0 is the implicit root; a parent always has a
//! smaller ordinal than its children. The taxonomy lives in its own small Tantivy index next
//! to the data index, one document per ordinal, and is committed before the data index so a
//! committed data generation never references an ordinal the taxonomy does not know.

mod reader;
mod writer;

use tantivy::schema::{Field, NumericOptions, STORED, STRING, Schema};

pub use reader::TaxonomyReader;
pub use writer::TaxonomyWriter;

/// Ordinal of the root of every taxonomy.
pub const ROOT_ORDINAL: u32 = 0;

/// Parent recorded for the root.
pub const NO_PARENT: u32 = u32::MAX;

/// Field handles of the taxonomy index.
#[derive(Debug, Clone, Copy)]
struct TaxonomyFields {
    /// Ordinal of the entry.
    ordinal: Field,
    /// Ordinal of the parent entry.
    parent: Field,
    /// Encoded path of the entry.
    path: Field,
}

impl TaxonomyFields {
    /// Builds the taxonomy schema.
    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_u64_field("ordinal", NumericOptions::default().set_stored().set_indexed());
        builder.add_u64_field("parent", NumericOptions::default().set_stored());
        builder.add_text_field("path", STRING | STORED);
        builder.build()
    }

    /// Resolves the handles from a taxonomy schema.
    fn from_schema(schema: &Schema) -> tantivy::Result<Self> {
        Ok(Self {
            ordinal: schema.get_field("ordinal")?,
            parent: schema.get_field("parent")?,
            path: schema.get_field("path")?,
        })
    }
}
