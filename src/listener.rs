//! Downstream contracts: the only coupling between the pipeline and storage.
//!
//! [`ImportListener`] receives structural events from the dump parser in
//! document order. [`CompressionListener`] receives revisions once a pool
//! worker has compressed them, in completion order.
//!
//! Every callback returns `anyhow::Result<()>`; an error aborts the parse or
//! pool call that delivered the event.

use crate::compress::CompressedRevision;
use crate::models::{Namespace, PageRecord, RevisionRecord, SiteMetadata};
use anyhow::Result;

pub trait ImportListener {
    fn on_site(&mut self, _site: &SiteMetadata) -> Result<()> {
        Ok(())
    }

    fn on_namespace(&mut self, _namespace: &Namespace) -> Result<()> {
        Ok(())
    }

    /// Fired exactly once per `<page>` occurrence, before any of its revisions.
    fn on_page(&mut self, _page: &PageRecord) -> Result<()> {
        Ok(())
    }

    /// The revision is handed over by value so it can move into a compression
    /// pool without copying its text. `revision.contributor` tells registered
    /// and anonymous edits apart.
    fn on_revision(&mut self, _page: &PageRecord, _revision: RevisionRecord) -> Result<()> {
        Ok(())
    }
}

pub trait CompressionListener {
    fn on_revision_compressed(&mut self, revision: &CompressedRevision) -> Result<()>;
}

impl<T: ImportListener + ?Sized> ImportListener for &mut T {
    fn on_site(&mut self, site: &SiteMetadata) -> Result<()> {
        (**self).on_site(site)
    }

    fn on_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        (**self).on_namespace(namespace)
    }

    fn on_page(&mut self, page: &PageRecord) -> Result<()> {
        (**self).on_page(page)
    }

    fn on_revision(&mut self, page: &PageRecord, revision: RevisionRecord) -> Result<()> {
        (**self).on_revision(page, revision)
    }
}

impl<T: ImportListener + ?Sized> ImportListener for Box<T> {
    fn on_site(&mut self, site: &SiteMetadata) -> Result<()> {
        (**self).on_site(site)
    }

    fn on_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        (**self).on_namespace(namespace)
    }

    fn on_page(&mut self, page: &PageRecord) -> Result<()> {
        (**self).on_page(page)
    }

    fn on_revision(&mut self, page: &PageRecord, revision: RevisionRecord) -> Result<()> {
        (**self).on_revision(page, revision)
    }
}

impl<T: CompressionListener + ?Sized> CompressionListener for &mut T {
    fn on_revision_compressed(&mut self, revision: &CompressedRevision) -> Result<()> {
        (**self).on_revision_compressed(revision)
    }
}

impl<T: CompressionListener + ?Sized> CompressionListener for Box<T> {
    fn on_revision_compressed(&mut self, revision: &CompressedRevision) -> Result<()> {
        (**self).on_revision_compressed(revision)
    }
}

/// A fixed list of import listeners, each receiving every event in list order.
///
/// The list is set at construction and cannot change while a parse runs.
pub struct ImportFanOut<'a> {
    listeners: Vec<Box<dyn ImportListener + 'a>>,
}

impl<'a> ImportFanOut<'a> {
    pub fn new(listeners: Vec<Box<dyn ImportListener + 'a>>) -> Self {
        Self { listeners }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl ImportListener for ImportFanOut<'_> {
    fn on_site(&mut self, site: &SiteMetadata) -> Result<()> {
        self.listeners.iter_mut().try_for_each(|l| l.on_site(site))
    }

    fn on_namespace(&mut self, namespace: &Namespace) -> Result<()> {
        self.listeners
            .iter_mut()
            .try_for_each(|l| l.on_namespace(namespace))
    }

    fn on_page(&mut self, page: &PageRecord) -> Result<()> {
        self.listeners.iter_mut().try_for_each(|l| l.on_page(page))
    }

    fn on_revision(&mut self, page: &PageRecord, revision: RevisionRecord) -> Result<()> {
        // Clone for all but the last listener, which takes ownership.
        let Some((last, rest)) = self.listeners.split_last_mut() else {
            return Ok(());
        };
        for listener in rest {
            listener.on_revision(page, revision.clone())?;
        }
        last.on_revision(page, revision)
    }
}
