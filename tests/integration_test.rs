//! End-to-end tests: dump text in, listener events and compressed revisions out.
//!
//! All tests share `sample_xml()`, a small history dump containing:
//! - "April" (ns 0, id 100): revision 10 by an anonymous IP, revision 11 by
//!   Bob (id 7) with parent 10
//! - "Talk:April" (ns 1, id 101): no revisions at all
//! - "Module:Date" (ns 828, id 102): split over two `<page>` blocks, one
//!   revision each, as history dumps do for long pages
//!
//! Namespaces come from a fixed resolver so nothing touches the network.

use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;
use wikistream::codec::{decompress, CodecTag, DeltaCodec, Method};
use wikistream::compress::{CompressedRevision, PoolBuilder};
use wikistream::listener::{CompressionListener, ImportFanOut, ImportListener};
use wikistream::manifest::ManifestWriter;
use wikistream::models::{
    CasePolicy, ContentModel, Identity, Namespace, PageRecord, RevisionRecord, SiteMetadata,
};
use wikistream::namespace::{EmbeddedNamespaceResolver, StaticNamespaceResolver};
use wikistream::parser::{open_dump, DumpParser};
use wikistream::pipeline::CompressingImporter;
use wikistream::stats::EventCounters;
use wikistream::ImportError;

fn sample_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/" version="0.11" xml:lang="en">
  <siteinfo>
    <sitename>Wikipedia</sitename>
    <dbname>enwiki</dbname>
    <base>https://en.wikipedia.org/wiki/Main_Page</base>
    <generator>MediaWiki 1.42.0-wmf.5</generator>
    <case>first-letter</case>
    <namespaces>
      <namespace key="0" case="first-letter" />
      <namespace key="1" case="first-letter">Talk</namespace>
      <namespace key="828" case="first-letter">Module</namespace>
    </namespaces>
  </siteinfo>
  <page>
    <title>April</title>
    <ns>0</ns>
    <id>100</id>
    <revision>
      <id>10</id>
      <timestamp>2001-10-30T11:12:00Z</timestamp>
      <contributor>
        <ip>203.0.113.9</ip>
      </contributor>
      <comment>new page</comment>
      <model>wikitext</model>
      <format>text/x-wiki</format>
      <text bytes="35" xml:space="preserve">April is the fourth month of the year</text>
      <sha1>q1w2e3</sha1>
    </revision>
    <revision>
      <id>11</id>
      <parentid>10</parentid>
      <timestamp>2002-02-25T15:43:11Z</timestamp>
      <contributor>
        <username>Bob</username>
        <id>7</id>
      </contributor>
      <minor />
      <model>wikitext</model>
      <format>text/x-wiki</format>
      <text xml:space="preserve">April is the fourth month of the year, with 30 days</text>
      <sha1>r4t5y6</sha1>
    </revision>
  </page>
  <page>
    <title>Talk:April</title>
    <ns>1</ns>
    <id>101</id>
  </page>
  <page>
    <title>Module:Date</title>
    <ns>828</ns>
    <id>102</id>
    <revision>
      <id>20</id>
      <timestamp>2013-03-01T00:00:00Z</timestamp>
      <contributor><username>Alice</username><id>8</id></contributor>
      <model>Scribunto</model>
      <text>return {}</text>
    </revision>
  </page>
  <page>
    <title>Module:Date</title>
    <ns>828</ns>
    <id>102</id>
    <revision>
      <id>21</id>
      <parentid>20</parentid>
      <timestamp>2013-03-02T00:00:00Z</timestamp>
      <contributor><username>Alice</username><id>8</id></contributor>
      <model>Scribunto</model>
      <text>return { year = 2013 }</text>
    </revision>
  </page>
</mediawiki>
"#
}

fn namespaces() -> Vec<Namespace> {
    vec![
        Namespace {
            id: 0,
            case: CasePolicy::FirstLetter,
            name: String::new(),
            canonical_name: String::new(),
            aliases: Vec::new(),
            subpages: false,
            default_model: ContentModel::Wikitext,
        },
        Namespace {
            id: 1,
            case: CasePolicy::FirstLetter,
            name: "Talk".into(),
            canonical_name: "Talk".into(),
            aliases: Vec::new(),
            subpages: true,
            default_model: ContentModel::Wikitext,
        },
    ]
}

fn parser() -> DumpParser<StaticNamespaceResolver> {
    DumpParser::new(StaticNamespaceResolver::new(namespaces()))
}

fn create_bz2_xml(xml: &str) -> NamedTempFile {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut tmp = tempfile::Builder::new()
        .suffix(".xml.bz2")
        .tempfile()
        .unwrap();
    tmp.write_all(&compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

#[derive(Default)]
struct Recorder {
    sites: Vec<SiteMetadata>,
    namespaces: Vec<Namespace>,
    pages: Vec<PageRecord>,
    revisions: Vec<(u64, RevisionRecord)>,
    order: Vec<String>,
}

impl ImportListener for Recorder {
    fn on_site(&mut self, site: &SiteMetadata) -> anyhow::Result<()> {
        self.order.push("site".into());
        self.sites.push(site.clone());
        Ok(())
    }

    fn on_namespace(&mut self, namespace: &Namespace) -> anyhow::Result<()> {
        self.order.push(format!("ns {}", namespace.id));
        self.namespaces.push(namespace.clone());
        Ok(())
    }

    fn on_page(&mut self, page: &PageRecord) -> anyhow::Result<()> {
        self.order.push(format!("page {}", page.id));
        self.pages.push(page.clone());
        Ok(())
    }

    fn on_revision(&mut self, page: &PageRecord, revision: RevisionRecord) -> anyhow::Result<()> {
        self.order.push(format!("rev {}", revision.id));
        self.revisions.push((page.id, revision));
        Ok(())
    }
}

#[derive(Default)]
struct Stored(Vec<CompressedRevision>);

impl CompressionListener for Stored {
    fn on_revision_compressed(&mut self, revision: &CompressedRevision) -> anyhow::Result<()> {
        self.0.push(CompressedRevision {
            page: revision.page.clone(),
            revision: revision.revision.clone(),
            result: match &revision.result {
                Ok(payload) => Ok(payload.clone()),
                Err(err) => Err(wikistream::CodecError::Panicked(err.to_string())),
            },
        });
        Ok(())
    }
}

fn parse_sample() -> Recorder {
    let mut recorder = Recorder::default();
    parser()
        .parse(Cursor::new(sample_xml()), &mut recorder)
        .unwrap();
    recorder
}

#[test]
fn test_events_arrive_in_document_order() {
    let rec = parse_sample();
    assert_eq!(
        rec.order,
        vec![
            "site", "ns 0", "ns 1", "page 100", "rev 10", "rev 11", "page 101", "page 102",
            "rev 20", "page 102", "rev 21"
        ]
    );
}

#[test]
fn test_site_metadata() {
    let rec = parse_sample();
    assert_eq!(rec.sites.len(), 1);
    let site = &rec.sites[0];
    assert_eq!(site.site_name, "Wikipedia");
    assert_eq!(site.db_name, "enwiki");
    assert_eq!(site.case, CasePolicy::FirstLetter);
    assert_eq!(site.api_url, "https://en.wikipedia.org/w/api.php");
    assert!(site
        .root_attributes
        .contains(&("xml:lang".to_string(), "en".to_string())));
}

#[test]
fn test_page_events_match_page_elements() {
    // One event per <page> occurrence, with or without revisions, split pages included.
    let rec = parse_sample();
    let ids: Vec<u64> = rec.pages.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![100, 101, 102, 102]);
    assert_eq!(rec.pages[1].title, "Talk:April");
    assert_eq!(rec.pages[1].namespace, 1);
}

#[test]
fn test_april_revisions() {
    let rec = parse_sample();
    let (page_id, first) = &rec.revisions[0];
    assert_eq!(*page_id, 100);
    assert_eq!(first.id, 10);
    assert!(!first.has_parent());
    assert_eq!(
        first.contributor,
        Identity::Anonymous {
            ip: "203.0.113.9".into()
        }
    );
    assert_eq!(first.comment.as_deref(), Some("new page"));
    assert_eq!(first.byte_length, 35);
    assert_eq!(first.sha1.as_deref(), Some("q1w2e3"));
    assert!(!first.minor);

    let (_, second) = &rec.revisions[1];
    assert_eq!(second.id, 11);
    assert_eq!(second.parent_id, 10);
    assert_eq!(
        second.contributor,
        Identity::Registered {
            name: "Bob".into(),
            id: 7
        }
    );
    assert!(second.minor);
    assert_eq!(second.byte_length, second.text.len() as u64);
    assert_eq!(second.model.as_deref(), Some("wikitext"));
    assert_eq!(second.format.as_deref(), Some("text/x-wiki"));
    assert_eq!(second.timestamp.to_rfc3339(), "2002-02-25T15:43:11+00:00");
}

#[test]
fn test_bz2_dump_parses_like_plain() {
    let tmp = create_bz2_xml(sample_xml());
    let mut recorder = Recorder::default();
    let summary = parser()
        .parse(open_dump(tmp.path()).unwrap(), &mut recorder)
        .unwrap();
    assert_eq!(summary.pages, 4);
    assert_eq!(summary.revisions, 4);
    assert_eq!(summary.namespaces, 2);
    assert_eq!(recorder.order, parse_sample().order);
}

#[test]
fn test_plain_file_dump() {
    let mut tmp = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
    tmp.write_all(sample_xml().as_bytes()).unwrap();
    tmp.flush().unwrap();
    let counters = EventCounters::new();
    parser()
        .parse(open_dump(tmp.path()).unwrap(), &mut &counters)
        .unwrap();
    assert_eq!(counters.pages(), 4);
    assert_eq!(counters.registered(), 3);
    assert_eq!(counters.anonymous(), 1);
}

#[test]
fn test_embedded_resolver_offline() {
    let mut recorder = Recorder::default();
    DumpParser::new(EmbeddedNamespaceResolver)
        .parse(Cursor::new(sample_xml()), &mut recorder)
        .unwrap();
    let ids: Vec<i32> = recorder.namespaces.iter().map(|ns| ns.id).collect();
    assert_eq!(ids, vec![0, 1, 828]);
    assert_eq!(recorder.namespaces[2].default_model, ContentModel::Scribunto);
}

#[test]
fn test_fan_out_feeds_every_listener() {
    let first = EventCounters::new();
    let second = EventCounters::new();
    let mut fan = ImportFanOut::new(vec![Box::new(&first), Box::new(&second)]);
    parser().parse(Cursor::new(sample_xml()), &mut fan).unwrap();
    drop(fan);
    assert_eq!(first.revisions(), 4);
    assert_eq!(second.revisions(), 4);
    assert_eq!(second.namespaces(), 2);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = open_dump("/nonexistent/dump.xml.bz2").err().unwrap();
    assert!(matches!(err, ImportError::Io(_)));
}

#[test]
fn test_bad_case_aborts_before_pages() {
    let xml = sample_xml().replace("<case>first-letter</case>", "<case>weird</case>");
    let mut recorder = Recorder::default();
    let err = parser()
        .parse(Cursor::new(xml), &mut recorder)
        .unwrap_err();
    assert!(matches!(err, ImportError::UnknownCase(ref c) if c == "weird"));
    assert!(recorder.pages.is_empty());
}

#[test]
fn test_bad_revision_id_aborts_mid_stream() {
    let xml = sample_xml().replace("<id>20</id>", "<id>twenty</id>");
    let mut recorder = Recorder::default();
    let err = parser()
        .parse(Cursor::new(xml), &mut recorder)
        .unwrap_err();
    assert!(matches!(
        err,
        ImportError::InvalidNumber {
            field: "revision id",
            ..
        }
    ));
    // Everything before the failure was delivered.
    assert_eq!(recorder.revisions.len(), 2);
}

#[test]
fn test_none_pool_delivers_raw_text() {
    let mut stored = Stored::default();
    let pool = PoolBuilder::new(Method::None)
        .capacity(1)
        .build(&mut stored)
        .unwrap();
    let mut importer = CompressingImporter::new(Recorder::default(), pool);
    parser()
        .parse(Cursor::new(sample_xml()), &mut importer)
        .unwrap();
    let (stats, recorder) = importer.finish().unwrap();

    // Revisions go to the pool, not the inner listener.
    assert!(recorder.revisions.is_empty());
    assert_eq!(recorder.pages.len(), 4);
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.peak_in_flight, 1);

    let mut done = stored.0;
    done.sort_by_key(|d| d.revision.id);
    let ids: Vec<u64> = done.iter().map(|d| d.revision.id).collect();
    assert_eq!(ids, vec![10, 11, 20, 21]);
    for d in &done {
        let payload = d.payload().unwrap();
        assert_eq!(payload.tag, CodecTag::NONE);
        assert_eq!(payload.bytes, d.revision.text.as_bytes());
    }
    assert_eq!(done[0].page.title, "April");
}

#[test]
fn test_delta_pool_restores_history() {
    let mut stored = Stored::default();
    let pool = PoolBuilder::new(DeltaCodec::new(Method::Lzma2))
        .capacity(2)
        .build(&mut stored)
        .unwrap();
    let mut importer = CompressingImporter::new(Recorder::default(), pool);
    parser()
        .parse(Cursor::new(sample_xml()), &mut importer)
        .unwrap();
    importer.finish().unwrap();

    let mut done = stored.0;
    done.sort_by_key(|d| d.revision.id);
    let april_10 = &done[0];
    let april_11 = &done[1];
    assert!(!april_10.tag().unwrap().delta);
    assert!(april_11.tag().unwrap().delta);
    let restored = decompress(
        april_11.payload().unwrap(),
        Some(april_10.revision.text.as_bytes()),
    )
    .unwrap();
    assert_eq!(restored, april_11.revision.text.as_bytes());

    // Revision 21's parent sits in a separate <page> block of the same page id.
    assert!(done[3].tag().unwrap().delta);
}

#[test]
fn test_manifest_rows_for_every_revision() {
    let mut manifest = ManifestWriter::new(Vec::new());
    let pool = PoolBuilder::new(Method::Gzip)
        .capacity(2)
        .build(&mut manifest)
        .unwrap();
    let mut importer = CompressingImporter::new(Recorder::default(), pool);
    parser()
        .parse(Cursor::new(sample_xml()), &mut importer)
        .unwrap();
    importer.finish().unwrap();

    assert_eq!(manifest.rows(), 4);
    let csv = String::from_utf8(manifest.into_inner().unwrap()).unwrap();
    assert_eq!(csv.lines().count(), 5);
    assert!(csv.lines().any(|l| l.starts_with("100,April,11,10,") && l.contains(",Bob#7,GZIP,")));
}
