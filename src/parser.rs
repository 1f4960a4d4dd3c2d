//! Annotation line parsing.
//!
//! The store consumes parsers through the [`RecordParser`] trait. Each raw
//! line becomes a flat [`ParsedRecord`]: an id, a half-open span, zero or more
//! parent ids and an opaque payload. Nesting is resolved later by the
//! assembler.
//!
//! [`GtfParser`] handles both attribute dialects found in the wild:
//! GFF3 (`ID=..;Parent=..`) and GTF (`gene_id ".."; transcript_id "..";`).
//! For GTF the hierarchy is implicit: transcripts hang off `gene_id`, every
//! other feature hangs off `transcript_id`.

use crate::interval::{Span, Strand};
use memchr::memchr_iter;
use std::fmt;
use thiserror::Error;

/// Errors for a single annotation line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("comment or blank line")]
    Comment,

    #[error("expected {expected} tab-separated fields, got {found}")]
    MissingField { expected: usize, found: usize },

    #[error("invalid {field} coordinate: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("start ({start}) > end ({end})")]
    InvalidSpan { start: u64, end: u64 },

    #[error("no identifier attribute on '{0}' record")]
    MissingId(String),

    #[error("line is not valid UTF-8")]
    Utf8,
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// A flat record as produced by a parser, before nesting.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord<D> {
    pub id: String,
    pub span: Span,
    pub parent_ids: Vec<String>,
    pub data: D,
}

impl<D> ParsedRecord<D> {
    pub fn new(id: impl Into<String>, start: u64, stop: u64, data: D) -> Self {
        Self {
            id: id.into(),
            span: Span::new(start, stop),
            parent_ids: Vec::new(),
            data,
        }
    }

    /// Add a parent id.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_ids.push(parent.into());
        self
    }
}

/// Turns one raw annotation line into a flat record.
pub trait RecordParser {
    type Data;

    fn parse(&self, line: &[u8]) -> Result<ParsedRecord<Self::Data>>;
}

/// Feature type column, as a closed set plus an escape hatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Gene,
    Transcript,
    Exon,
    Cds,
    Utr,
    StartCodon,
    StopCodon,
    Other(String),
}

impl FeatureKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "gene" => FeatureKind::Gene,
            "transcript" | "mRNA" => FeatureKind::Transcript,
            "exon" => FeatureKind::Exon,
            "CDS" => FeatureKind::Cds,
            "UTR" | "five_prime_UTR" | "three_prime_UTR" | "5UTR" | "3UTR" => FeatureKind::Utr,
            "start_codon" => FeatureKind::StartCodon,
            "stop_codon" => FeatureKind::StopCodon,
            other => FeatureKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FeatureKind::Gene => "gene",
            FeatureKind::Transcript => "transcript",
            FeatureKind::Exon => "exon",
            FeatureKind::Cds => "CDS",
            FeatureKind::Utr => "UTR",
            FeatureKind::StartCodon => "start_codon",
            FeatureKind::StopCodon => "stop_codon",
            FeatureKind::Other(name) => name.as_str(),
        }
    }

    /// Kinds that GFF3 allows to be split over several lines sharing one `ID`.
    pub fn is_segmented(&self) -> bool {
        matches!(
            self,
            FeatureKind::Cds | FeatureKind::Utr | FeatureKind::StartCodon | FeatureKind::StopCodon
        )
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload attached to each GTF/GFF feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureData {
    pub contig: String,
    pub source: String,
    pub kind: FeatureKind,
    pub score: Option<f64>,
    pub strand: Strand,
    pub frame: Option<u8>,
    /// Attributes in file order.
    pub attributes: Vec<(String, String)>,
}

impl FeatureData {
    /// Look up an attribute value by key (first occurrence).
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Fast u64 parsing - no allocation, no error formatting.
///
/// Returns None if the input is empty or contains non-digit characters.
#[inline(always)]
pub fn parse_u64_fast(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 20 {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        let d = b.wrapping_sub(b'0');
        if d > 9 {
            return None;
        }
        n = n.checked_mul(10)?.checked_add(d as u64)?;
    }
    Some(n)
}

/// Check if a line carries no feature (empty, comment, or header).
#[inline(always)]
pub fn should_skip_line(line: &[u8]) -> bool {
    line.is_empty() || line[0] == b'#' || line.starts_with(b"track") || line.starts_with(b"browser")
}

/// Strip a trailing `\n` / `\r\n`.
#[inline]
pub(crate) fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\n' || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Split a line into at most `N` tab-separated fields.
///
/// The last field keeps any remaining tabs. Returns the number of fields found.
#[inline]
pub(crate) fn split_tabs<const N: usize>(line: &[u8]) -> ([&[u8]; N], usize) {
    let mut fields: [&[u8]; N] = [&[]; N];
    let mut count = 0;
    let mut begin = 0;
    for pos in memchr_iter(b'\t', line) {
        if count == N - 1 {
            break;
        }
        fields[count] = &line[begin..pos];
        count += 1;
        begin = pos + 1;
    }
    fields[count] = &line[begin..];
    (fields, count + 1)
}

/// Convert 1-based inclusive GTF/GFF coordinates to a 0-based half-open span.
///
/// `start == end + 1` denotes a zero-length feature between two bases.
#[inline]
pub(crate) fn gff_span(start: &[u8], end: &[u8]) -> Result<Span> {
    let start_1 = parse_u64_fast(start).ok_or_else(|| ParseError::InvalidNumber {
        field: "start",
        value: String::from_utf8_lossy(start).into_owned(),
    })?;
    let end_1 = parse_u64_fast(end).ok_or_else(|| ParseError::InvalidNumber {
        field: "end",
        value: String::from_utf8_lossy(end).into_owned(),
    })?;
    if start_1 > end_1.saturating_add(1) {
        return Err(ParseError::InvalidSpan {
            start: start_1,
            end: end_1,
        });
    }
    Ok(Span::new(start_1.saturating_sub(1), end_1))
}

#[inline]
fn text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| ParseError::Utf8)
}

/// Tolerant GTF / GFF3 record parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct GtfParser;

impl GtfParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse the attribute column, accepting both `key=value` and `key "value"`.
    fn parse_attributes(column: &str) -> Vec<(String, String)> {
        let mut attributes = Vec::new();
        for part in column.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let gff_pair = part
                .split_once('=')
                .filter(|(key, _)| !key.contains(char::is_whitespace));
            let (key, value) = match gff_pair {
                Some((key, value)) => (key, value),
                None => match part.split_once(char::is_whitespace) {
                    Some((key, value)) => (key, value.trim().trim_matches('"')),
                    None => (part, ""),
                },
            };
            attributes.push((key.to_string(), value.to_string()));
        }
        attributes
    }
}

impl RecordParser for GtfParser {
    type Data = FeatureData;

    fn parse(&self, line: &[u8]) -> Result<ParsedRecord<FeatureData>> {
        let line = trim_line_end(line);
        if should_skip_line(line) {
            return Err(ParseError::Comment);
        }

        let (fields, found) = split_tabs::<9>(line);
        if found < 9 {
            return Err(ParseError::MissingField {
                expected: 9,
                found,
            });
        }

        let span = gff_span(fields[3], fields[4])?;

        let contig = text(fields[0])?.to_string();
        let source = text(fields[1])?.to_string();
        let feature = text(fields[2])?;
        let kind = FeatureKind::from_name(feature);
        let score = match fields[5] {
            b"." => None,
            s => text(s)?.parse().ok(),
        };
        let strand = fields[6]
            .first()
            .map(|&b| Strand::from_char(b as char))
            .unwrap_or_default();
        let frame = match fields[7] {
            b"." => None,
            s => text(s)?.parse().ok(),
        };
        let attributes = Self::parse_attributes(text(fields[8])?);

        let data = FeatureData {
            contig,
            source,
            kind,
            score,
            strand,
            frame,
            attributes,
        };
        let (id, parent_ids) = identify(feature, span, &data)?;

        Ok(ParsedRecord {
            id,
            span,
            parent_ids,
            data,
        })
    }
}

/// Work out `(id, parent_ids)` for a feature.
fn identify(feature: &str, span: Span, data: &FeatureData) -> Result<(String, Vec<String>)> {
    // GFF3 explicit hierarchy wins.
    let parents: Vec<String> = data
        .attribute("Parent")
        .map(|p| {
            p.split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(id) = data.attribute("ID").filter(|s| !s.is_empty()) {
        // One CDS (or UTR, codon) may span several lines with the same ID;
        // each line becomes its own node keyed by its start.
        if data.kind.is_segmented() {
            return Ok((format!("{}:{}", id, span.start), parents));
        }
        return Ok((id.to_string(), parents));
    }
    if let Some(first) = parents.first() {
        let id = format!("{}:{}:{}", first, feature, span.start);
        return Ok((id, parents));
    }

    let gene_id = data
        .attribute("gene_id")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::MissingId(feature.to_string()))?;
    let transcript_id = data.attribute("transcript_id").filter(|s| !s.is_empty());

    match (&data.kind, transcript_id) {
        (FeatureKind::Gene, _) => Ok((gene_id.to_string(), Vec::new())),
        (FeatureKind::Transcript, Some(tx)) => Ok((tx.to_string(), vec![gene_id.to_string()])),
        (FeatureKind::Transcript, None) => Err(ParseError::MissingId(feature.to_string())),
        (_, Some(tx)) => {
            let id = match data.attribute("exon_id") {
                // Exon ids are shared between transcripts of a gene.
                Some(exon_id) if data.kind == FeatureKind::Exon && !exon_id.is_empty() => {
                    format!("{}:{}", tx, exon_id)
                }
                _ => format!("{}:{}:{}", tx, feature, span.start),
            };
            Ok((id, vec![tx.to_string()]))
        }
        (_, None) => Ok((
            format!("{}:{}:{}", gene_id, feature, span.start),
            vec![gene_id.to_string()],
        )),
    }
}
