//! Wikistream: streaming MediaWiki dump import with parallel revision compression
//!
//! The crate turns a MediaWiki XML export into a stream of typed events and,
//! optionally, pushes every revision through a bounded pool of compression
//! workers:
//!
//! 1. **Parse** -- [`parser::DumpParser`] reads the dump once, front to back,
//!    and reports site metadata, namespaces, pages and revisions to an
//!    [`listener::ImportListener`] in document order
//! 2. **Resolve** -- after `<siteinfo>`, a [`namespace::NamespaceResolver`]
//!    supplies the full namespace table (action API, dump-embedded, or fixed)
//! 3. **Compress** -- [`compress::CompressionPool`] runs a [`codec::Codec`] on
//!    at most `capacity` revisions at once and hands results to a
//!    [`listener::CompressionListener`] on the submitting thread
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML parser with BZ2 decompression
//! - [`namespace`] -- Namespace table resolution
//! - [`compress`] -- Bounded worker pool and completion delivery
//! - [`codec`] -- NONE/GZIP/BZIP2/LZMA2 and parent-relative delta codecs
//! - [`pipeline`] -- Adapter feeding parsed revisions into a pool
//! - [`listener`] -- Downstream contracts and listener fan-out
//! - [`manifest`] -- CSV manifest of compressed revisions
//! - [`models`] -- Site, namespace, page and revision records
//! - [`stats`] -- Atomic event counters and pool totals
//! - [`config`] -- Constants for parsing, metadata requests and the pool
//!
//! # Example Usage
//!
//! ```bash
//! # Count events without touching the network
//! wikistream scan -i enwiki-latest-pages-meta-history1.xml.bz2 --offline
//!
//! # Compress every revision against its parent, writing a manifest
//! wikistream compress -i enwiki-latest-pages-meta-history1.xml.bz2 \
//!     --codec delta-lzma2 --workers 8 --manifest revisions.csv
//! ```

pub mod codec;
pub mod compress;
pub mod config;
pub mod error;
pub mod listener;
pub mod manifest;
pub mod models;
pub mod namespace;
pub mod parser;
pub mod pipeline;
pub mod stats;

pub use error::{CodecError, ImportError, Result};
