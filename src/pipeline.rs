use crate::codec::Codec;
use crate::compress::CompressionPool;
use crate::error::Result;
use crate::listener::{CompressionListener, ImportListener};
use crate::models::{Namespace, PageRecord, RevisionRecord, SiteMetadata};
use crate::stats::CompressionStats;
use std::sync::Arc;

/// Bridges a parse into a compression pool.
///
/// Site, namespace and page events go to `inner` unchanged. Revisions are
/// submitted to the pool instead and reach storage through the pool's
/// [`CompressionListener`] once compressed.
pub struct CompressingImporter<C, L: CompressionListener, I> {
    inner: I,
    pool: CompressionPool<C, L>,
    current_page: Option<Arc<PageRecord>>,
}

impl<C: Codec, L: CompressionListener, I: ImportListener> CompressingImporter<C, L, I> {
    pub fn new(inner: I, pool: CompressionPool<C, L>) -> Self {
        Self {
            inner,
            pool,
            current_page: None,
        }
    }

    pub fn pool(&self) -> &CompressionPool<C, L> {
        &self.pool
    }

    /// Closes the pool and hands back the inner listener.
    pub fn finish(mut self) -> Result<(CompressionStats, I)> {
        let stats = self.pool.close()?;
        Ok((stats, self.inner))
    }

    fn shared_page(&mut self, page: &PageRecord) -> Arc<PageRecord> {
        match &self.current_page {
            Some(current) if current.as_ref() == page => Arc::clone(current),
            _ => {
                let shared = Arc::new(page.clone());
                self.current_page = Some(Arc::clone(&shared));
                shared
            }
        }
    }
}

impl<C: Codec, L: CompressionListener, I: ImportListener> ImportListener
    for CompressingImporter<C, L, I>
{
    fn on_site(&mut self, site: &SiteMetadata) -> anyhow::Result<()> {
        self.inner.on_site(site)
    }

    fn on_namespace(&mut self, namespace: &Namespace) -> anyhow::Result<()> {
        self.inner.on_namespace(namespace)
    }

    fn on_page(&mut self, page: &PageRecord) -> anyhow::Result<()> {
        self.inner.on_page(page)
    }

    fn on_revision(&mut self, page: &PageRecord, revision: RevisionRecord) -> anyhow::Result<()> {
        let page = self.shared_page(page);
        self.pool.submit(&page, revision)?;
        Ok(())
    }
}
