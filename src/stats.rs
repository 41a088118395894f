use crate::compress::CompressedRevision;
use crate::listener::{CompressionListener, ImportListener};
use crate::models::{Namespace, PageRecord, RevisionRecord, SiteMetadata};
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals of a compression pool.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompressionStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    /// Highest number of revisions compressing at the same time.
    pub peak_in_flight: usize,
}

impl CompressionStats {
    pub(crate) fn record(&mut self, done: &CompressedRevision) {
        self.completed += 1;
        match &done.result {
            Ok(payload) => {
                self.uncompressed_bytes += done.revision.text.len() as u64;
                self.compressed_bytes += payload.bytes.len() as u64;
            }
            Err(_) => self.failed += 1,
        }
    }

    /// Compressed size over raw size of successful revisions, 0 when nothing
    /// was compressed yet.
    pub fn ratio(&self) -> f64 {
        if self.uncompressed_bytes == 0 {
            0.0
        } else {
            self.compressed_bytes as f64 / self.uncompressed_bytes as f64
        }
    }
}

/// Event counters shared across threads. Implemented for `&EventCounters` so
/// one instance can observe both the parser and a pool.
#[derive(Default)]
pub struct EventCounters {
    pub sites: AtomicU64,
    pub namespaces: AtomicU64,
    pub pages: AtomicU64,
    pub registered_revisions: AtomicU64,
    pub anonymous_revisions: AtomicU64,
    pub compressed: AtomicU64,
    pub failed: AtomicU64,
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(&self) -> u64 {
        self.pages.load(Ordering::Relaxed)
    }

    pub fn namespaces(&self) -> u64 {
        self.namespaces.load(Ordering::Relaxed)
    }

    pub fn revisions(&self) -> u64 {
        self.registered_revisions.load(Ordering::Relaxed)
            + self.anonymous_revisions.load(Ordering::Relaxed)
    }

    pub fn registered(&self) -> u64 {
        self.registered_revisions.load(Ordering::Relaxed)
    }

    pub fn anonymous(&self) -> u64 {
        self.anonymous_revisions.load(Ordering::Relaxed)
    }

    pub fn compressed(&self) -> u64 {
        self.compressed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn count_revision(&self, revision: &RevisionRecord) {
        let counter = if revision.contributor.is_registered() {
            &self.registered_revisions
        } else {
            &self.anonymous_revisions
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl ImportListener for &EventCounters {
    fn on_site(&mut self, _site: &SiteMetadata) -> anyhow::Result<()> {
        self.sites.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_namespace(&mut self, _namespace: &Namespace) -> anyhow::Result<()> {
        self.namespaces.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_page(&mut self, _page: &PageRecord) -> anyhow::Result<()> {
        self.pages.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_revision(&mut self, _page: &PageRecord, revision: RevisionRecord) -> anyhow::Result<()> {
        self.count_revision(&revision);
        Ok(())
    }
}

impl CompressionListener for &EventCounters {
    fn on_revision_compressed(&mut self, done: &CompressedRevision) -> anyhow::Result<()> {
        if done.is_ok() {
            self.compressed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.count_revision(&done.revision);
        Ok(())
    }
}
