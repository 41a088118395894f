//! CSV manifest of compressed revisions, one row per revision in delivery order.

use crate::compress::CompressedRevision;
use crate::listener::CompressionListener;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const WRITE_BUFFER: usize = 128 * 1024;

#[derive(Serialize)]
struct ManifestRow<'a> {
    page_id: u64,
    title: &'a str,
    rev_id: u64,
    parent_id: u64,
    timestamp: String,
    contributor: String,
    codec: String,
    raw_bytes: u64,
    compressed_bytes: Option<usize>,
    sha1: &'a str,
    status: &'a str,
}

pub struct ManifestWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl ManifestWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create manifest: {}", path.display()))?;
        Ok(Self::new(BufWriter::with_capacity(WRITE_BUFFER, file)))
    }
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write(&mut self, done: &CompressedRevision) -> Result<()> {
        let revision = &done.revision;
        let (codec, status) = match &done.result {
            Ok(payload) => (payload.tag.to_string(), "ok".to_string()),
            Err(err) => (String::new(), format!("failed: {err}")),
        };
        self.writer.serialize(ManifestRow {
            page_id: done.page.id,
            title: &done.page.title,
            rev_id: revision.id,
            parent_id: revision.parent_id,
            timestamp: revision.timestamp.to_rfc3339(),
            contributor: revision.contributor.to_string(),
            codec,
            raw_bytes: revision.byte_length,
            compressed_bytes: done.compressed_len(),
            sha1: revision.sha1.as_deref().unwrap_or(""),
            status: &status,
        })?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes buffered rows and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("Failed to flush manifest: {}", err.error()))
    }
}

impl<W: Write> CompressionListener for ManifestWriter<W> {
    fn on_revision_compressed(&mut self, revision: &CompressedRevision) -> Result<()> {
        self.write(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecTag, CompressedPayload, Method};
    use crate::error::CodecError;
    use crate::models::{Identity, PageRecord, RevisionRecord};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn done(result: std::result::Result<CompressedPayload, CodecError>) -> CompressedRevision {
        CompressedRevision {
            page: Arc::new(PageRecord {
                title: "April, month".into(),
                namespace: 0,
                id: 100,
            }),
            revision: RevisionRecord {
                id: 11,
                parent_id: 10,
                timestamp: Utc.with_ymd_and_hms(2002, 2, 25, 15, 43, 11).unwrap(),
                contributor: Identity::Registered {
                    name: "Bob".into(),
                    id: 7,
                },
                comment: None,
                minor: false,
                model: None,
                format: None,
                sha1: Some("abc123".into()),
                text: "hello".into(),
                byte_length: 5,
            },
            result,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let mut manifest = ManifestWriter::new(Vec::new());
        manifest
            .write(&done(Ok(CompressedPayload {
                bytes: vec![1, 2, 3],
                tag: CodecTag::plain(Method::Gzip),
            })))
            .unwrap();
        manifest
            .write(&done(Err(CodecError::Panicked("boom".into()))))
            .unwrap();
        assert_eq!(manifest.rows(), 2);

        let out = String::from_utf8(manifest.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "page_id,title,rev_id,parent_id,timestamp,contributor,codec,raw_bytes,compressed_bytes,sha1,status"
        );
        assert_eq!(
            lines[1],
            "100,\"April, month\",11,10,2002-02-25T15:43:11+00:00,Bob#7,GZIP,5,3,abc123,ok"
        );
        assert_eq!(
            lines[2],
            "100,\"April, month\",11,10,2002-02-25T15:43:11+00:00,Bob#7,,5,,abc123,failed: codec panicked: boom"
        );
    }
}
