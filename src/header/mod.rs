//! HeaderModel: parses VCF meta-lines into a frozen, typed field dictionary
//! (spec §4.1).
//!
//! Deliberately hand-rolled rather than built on `noodles_vcf`'s header
//! object model: the per-ALT cardinality rules downstream (spec §4.3) are
//! exactly the class of thing the spec calls out surrounding ecosystems as
//! getting wrong, so this crate keeps one single, auditable parse path from
//! raw header text all the way to `Cardinality`.

mod parse;

use indexmap::IndexMap;
use std::io::BufRead;

use crate::error::IngestError;
use crate::sanitize::ColumnNamer;

/// `INFO` or `FORMAT` — the two namespaces header field ids live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Info,
    Format,
}

impl Namespace {
    fn label(self) -> &'static str {
        match self {
            Namespace::Info => "INFO",
            Namespace::Format => "FORMAT",
        }
    }

    fn column_prefix(self) -> &'static str {
        match self {
            Namespace::Info => "info_",
            Namespace::Format => "fmt_",
        }
    }
}

/// The VCF `Type` of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcfType {
    Integer,
    Float,
    Flag,
    Character,
    String,
}

impl VcfType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Integer" => VcfType::Integer,
            "Float" => VcfType::Float,
            "Flag" => VcfType::Flag,
            "Character" => VcfType::Character,
            "String" => VcfType::String,
            _ => return None,
        })
    }
}

/// The VCF `Number` of a declared field, mapped to its cardinality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// A fixed count, known ahead of time. `Fixed(0)` is reserved for Flag.
    Fixed(u32),
    /// `Number=A`: one value per ALT allele.
    PerAlt,
    /// `Number=R`: one value per allele including REF.
    PerAllele,
    /// `Number=G`: one value per (diploid) genotype.
    PerGenotype,
    /// `Number=.`: unbounded, never split per-ALT.
    Unbounded,
}

impl Cardinality {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "A" => Cardinality::PerAlt,
            "R" => Cardinality::PerAllele,
            "G" => Cardinality::PerGenotype,
            "." => Cardinality::Unbounded,
            n => Cardinality::Fixed(n.parse().ok()?),
        })
    }
}

/// Whether a column is stored as a scalar, a flag (boolean), or an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Scalar,
    Flag,
    Array,
}

fn derive_storage_kind(vcf_type: VcfType, cardinality: Cardinality) -> StorageKind {
    if matches!(vcf_type, VcfType::Flag) {
        return StorageKind::Flag;
    }
    match cardinality {
        Cardinality::Fixed(1) => StorageKind::Scalar,
        Cardinality::Fixed(_) => StorageKind::Array,
        Cardinality::PerAlt
        | Cardinality::PerAllele
        | Cardinality::PerGenotype
        | Cardinality::Unbounded => StorageKind::Array,
    }
}

/// One declared INFO or FORMAT field.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderField {
    pub id: String,
    pub namespace: Namespace,
    pub vcf_type: VcfType,
    pub cardinality: Cardinality,
    pub description: String,
    pub column_name: String,
    pub storage_kind: StorageKind,
}

/// The frozen, typed field dictionary built once at load start and shared
/// read-only by every downstream stage.
#[derive(Debug, Clone, Default)]
pub struct HeaderModel {
    pub info_fields: IndexMap<String, HeaderField>,
    pub format_fields: IndexMap<String, HeaderField>,
    /// FILTER id -> description.
    pub filters: IndexMap<String, String>,
    /// contig id -> declared length, if any.
    pub contigs: IndexMap<String, Option<u64>>,
    /// Opaque meta-lines not otherwise recognized, preserved verbatim.
    pub other_meta: Vec<(String, String)>,
    pub sample_names: Vec<String>,
    pub fileformat: Option<String>,
}

impl HeaderModel {
    /// Look up a declared INFO field; unknown ids (e.g. an undeclared
    /// `ANN`/`CSQ`) are treated as opaque `String`/`Unbounded` per the
    /// invariant in spec §3, not as an error.
    pub fn info(&self, id: &str) -> Option<&HeaderField> {
        self.info_fields.get(id)
    }

    pub fn format(&self, id: &str) -> Option<&HeaderField> {
        self.format_fields.get(id)
    }

    /// Parse meta-lines from `reader` up to and including the `#CHROM` column
    /// header line. The header is frozen (by value) on return; there is no
    /// mutation path afterwards.
    pub fn parse<R: BufRead>(reader: &mut R) -> Result<Self, IngestError> {
        parse::parse_header(reader)
    }

    /// Async counterpart, used by [`crate::reader::RecordReader`] so header
    /// parsing and record streaming share one underlying connection/file
    /// handle instead of requiring a seek back to the start.
    pub async fn parse_async<R>(reader: &mut R) -> Result<Self, IngestError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        parse::parse_header_async(reader).await
    }
}
