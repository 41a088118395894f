//! Single-pass streaming parser for MediaWiki XML dumps.
//!
//! The parser walks the document once with a `quick_xml` pull reader and
//! pushes structural events into an [`ImportListener`] as elements close.
//! Only the stack of open elements and the character data of each open
//! element are held in memory, so dumps of any size stream through.
//!
//! Dispatch is keyed on the element together with its innermost open
//! ancestor: `<id>` means a page id under `<page>`, a revision id under
//! `<revision>` and a user id under `<contributor>`.
//!
//! Once `<siteinfo>` closes the parser asks its [`NamespaceResolver`] for the
//! authoritative namespace table. That is the only point where a parse may
//! block on something other than its input.

use crate::config::{DUMP_READ_BUFFER, MAX_ELEMENT_DEPTH};
use crate::error::{ImportError, Result};
use crate::listener::ImportListener;
use crate::models::{
    api_url_from_base, CasePolicy, DumpNamespace, Identity, PageRecord, RevisionRecord,
    SiteMetadata,
};
use crate::namespace::NamespaceResolver;
use bzip2::read::MultiBzDecoder;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Opens a dump file, decompressing `.bz2` input on the fly.
pub fn open_dump(path: impl AsRef<Path>) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "bz2") {
        Ok(Box::new(BufReader::with_capacity(
            DUMP_READ_BUFFER,
            MultiBzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(DUMP_READ_BUFFER, file)))
    }
}

/// Event counts of one completed parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub namespaces: u64,
    pub pages: u64,
    pub revisions: u64,
}

pub struct DumpParser<R> {
    resolver: R,
}

impl<R: NamespaceResolver> DumpParser<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Parses a UTF-8 dump, delivering events to `listener` in document order.
    pub fn parse<B: BufRead, L: ImportListener>(
        &self,
        input: B,
        listener: &mut L,
    ) -> Result<ParseSummary> {
        self.parse_with_encoding(input, None, listener)
    }

    /// Like [`DumpParser::parse`] with a caller-declared character encoding.
    /// Only UTF-8 is accepted.
    pub fn parse_with_encoding<B: BufRead, L: ImportListener>(
        &self,
        input: B,
        encoding: Option<&str>,
        listener: &mut L,
    ) -> Result<ParseSummary> {
        if let Some(label) = encoding {
            ensure_utf8(label)?;
        }

        let mut reader = Reader::from_reader(input);
        reader.expand_empty_elements(true);
        let mut session = Session::new(&self.resolver, listener);
        let mut buf = Vec::with_capacity(64 * 1024);

        loop {
            let position = reader.buffer_position();
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => session.open(&e, position)?,
                Ok(Event::End(_)) => session.close(position)?,
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|source| ImportError::Xml {
                        position,
                        source,
                    })?;
                    session.append(&text);
                }
                Ok(Event::CData(e)) => {
                    let text = std::str::from_utf8(&e).map_err(|err| ImportError::Xml {
                        position,
                        source: quick_xml::Error::NonDecodable(Some(err)),
                    })?;
                    session.append(text);
                }
                Ok(Event::Decl(decl)) => {
                    if let Some(declared) = decl.encoding() {
                        let declared =
                            declared.map_err(|source| ImportError::Xml { position, source })?;
                        ensure_utf8(&String::from_utf8_lossy(&declared))?;
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(source) => {
                    return Err(ImportError::Xml {
                        position: reader.buffer_position(),
                        source,
                    })
                }
            }
            buf.clear();
        }

        session.finish(reader.buffer_position())
    }
}

fn ensure_utf8(label: &str) -> Result<()> {
    if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
        Ok(())
    } else {
        Err(ImportError::UnsupportedEncoding(label.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Mediawiki,
    Siteinfo,
    Sitename,
    Dbname,
    Base,
    Generator,
    Case,
    Namespaces,
    Namespace,
    Page,
    Title,
    Ns,
    Id,
    ParentId,
    Revision,
    Timestamp,
    Contributor,
    Username,
    Ip,
    Comment,
    Minor,
    Model,
    Format,
    Text,
    Sha1,
    Other,
}

impl Element {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"mediawiki" => Element::Mediawiki,
            b"siteinfo" => Element::Siteinfo,
            b"sitename" => Element::Sitename,
            b"dbname" => Element::Dbname,
            b"base" => Element::Base,
            b"generator" => Element::Generator,
            b"case" => Element::Case,
            b"namespaces" => Element::Namespaces,
            b"namespace" => Element::Namespace,
            b"page" => Element::Page,
            b"title" => Element::Title,
            b"ns" => Element::Ns,
            b"id" => Element::Id,
            b"parentid" => Element::ParentId,
            b"revision" => Element::Revision,
            b"timestamp" => Element::Timestamp,
            b"contributor" => Element::Contributor,
            b"username" => Element::Username,
            b"ip" => Element::Ip,
            b"comment" => Element::Comment,
            b"minor" => Element::Minor,
            b"model" => Element::Model,
            b"format" => Element::Format,
            b"text" => Element::Text,
            b"sha1" => Element::Sha1,
            _ => Element::Other,
        }
    }

    /// Containers only ever hold whitespace between their children.
    fn keeps_text(self) -> bool {
        !matches!(
            self,
            Element::Mediawiki
                | Element::Siteinfo
                | Element::Namespaces
                | Element::Page
                | Element::Revision
                | Element::Contributor
                | Element::Other
        )
    }
}

struct Frame {
    element: Element,
    text: String,
}

#[derive(Default)]
struct SiteScratch {
    root_attributes: Vec<(String, String)>,
    site_name: Option<String>,
    db_name: Option<String>,
    base: Option<String>,
    generator: Option<String>,
    case: Option<CasePolicy>,
    namespaces: Vec<DumpNamespace>,
    pending_namespace: Option<(i32, CasePolicy)>,
}

#[derive(Default)]
struct PageScratch {
    title: Option<String>,
    namespace: Option<i32>,
    id: Option<u64>,
    /// Set once the page has been announced for this occurrence.
    reported: Option<PageRecord>,
}

#[derive(Default)]
struct RevisionScratch {
    id: Option<u64>,
    parent_id: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
    username: Option<String>,
    user_id: Option<u64>,
    ip: Option<String>,
    comment: Option<String>,
    minor: bool,
    model: Option<String>,
    format: Option<String>,
    sha1: Option<String>,
    text: Option<String>,
    declared_bytes: Option<u64>,
}

/// State of one parse call. Owned by that call alone.
struct Session<'a, R, L> {
    resolver: &'a R,
    listener: &'a mut L,
    stack: Vec<Frame>,
    site: SiteScratch,
    page: PageScratch,
    revision: RevisionScratch,
    summary: ParseSummary,
}

impl<'a, R: NamespaceResolver, L: ImportListener> Session<'a, R, L> {
    fn new(resolver: &'a R, listener: &'a mut L) -> Self {
        Self {
            resolver,
            listener,
            stack: Vec::with_capacity(16),
            site: SiteScratch::default(),
            page: PageScratch::default(),
            revision: RevisionScratch::default(),
            summary: ParseSummary::default(),
        }
    }

    fn parent(&self) -> Option<Element> {
        self.stack.last().map(|frame| frame.element)
    }

    fn open(&mut self, e: &BytesStart<'_>, position: usize) -> Result<()> {
        let element = Element::from_name(e.local_name().as_ref());
        if self.stack.len() >= MAX_ELEMENT_DEPTH {
            return Err(ImportError::structure(
                position,
                format!("elements nested deeper than {MAX_ELEMENT_DEPTH}"),
            ));
        }

        match (element, self.parent()) {
            (Element::Mediawiki, None) => {
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| ImportError::Xml {
                        position,
                        source: err.into(),
                    })?;
                    let value = attr
                        .unescape_value()
                        .map_err(|source| ImportError::Xml { position, source })?;
                    self.site.root_attributes.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        value.into_owned(),
                    ));
                }
            }
            (_, None) => {
                return Err(ImportError::structure(
                    position,
                    "document root is not <mediawiki>",
                ))
            }
            (Element::Namespace, Some(Element::Namespaces)) => {
                let key = attribute(e, "key", position)?
                    .ok_or(ImportError::MissingField {
                        field: "namespace key",
                        position,
                    })?;
                let key = parse_number("namespace key", &key, position)?;
                let case = match attribute(e, "case", position)? {
                    Some(case) => case.parse()?,
                    None => self.site.case.unwrap_or(CasePolicy::FirstLetter),
                };
                self.site.pending_namespace = Some((key, case));
            }
            (Element::Page, Some(Element::Mediawiki)) => {
                self.page = PageScratch::default();
            }
            (Element::Revision, Some(Element::Page)) => {
                self.report_page(position)?;
                self.revision = RevisionScratch::default();
            }
            (Element::Text, Some(Element::Revision)) => {
                if let Some(bytes) = attribute(e, "bytes", position)? {
                    self.revision.declared_bytes =
                        Some(parse_number("text bytes", &bytes, position)?);
                }
            }
            _ => {}
        }

        self.stack.push(Frame {
            element,
            text: String::new(),
        });
        Ok(())
    }

    fn append(&mut self, text: &str) {
        if let Some(frame) = self.stack.last_mut() {
            if frame.element.keeps_text() {
                frame.text.push_str(text);
            }
        }
    }

    fn close(&mut self, position: usize) -> Result<()> {
        let Frame { element, text } = self
            .stack
            .pop()
            .ok_or_else(|| ImportError::structure(position, "closing tag without opening tag"))?;

        match (element, self.parent()) {
            (Element::Sitename, Some(Element::Siteinfo)) => self.site.site_name = Some(text),
            (Element::Dbname, Some(Element::Siteinfo)) => self.site.db_name = Some(text),
            (Element::Base, Some(Element::Siteinfo)) => self.site.base = Some(text),
            (Element::Generator, Some(Element::Siteinfo)) => self.site.generator = Some(text),
            (Element::Case, Some(Element::Siteinfo)) => {
                self.site.case = Some(text.trim().parse()?);
            }
            (Element::Namespace, Some(Element::Namespaces)) => {
                if let Some((key, case)) = self.site.pending_namespace.take() {
                    self.site.namespaces.push(DumpNamespace {
                        key,
                        case,
                        name: text,
                    });
                }
            }
            (Element::Siteinfo, Some(Element::Mediawiki)) => self.finish_siteinfo(position)?,

            (Element::Title, Some(Element::Page)) => self.page.title = Some(text),
            (Element::Ns, Some(Element::Page)) => {
                self.page.namespace = Some(parse_number("ns", &text, position)?);
            }
            (Element::Id, Some(Element::Page)) => {
                self.page.id = Some(parse_number("page id", &text, position)?);
            }
            (Element::Page, Some(Element::Mediawiki)) => {
                self.report_page(position)?;
                self.page = PageScratch::default();
            }

            (Element::Id, Some(Element::Revision)) => {
                self.revision.id = Some(parse_number("revision id", &text, position)?);
            }
            (Element::ParentId, Some(Element::Revision)) => {
                self.revision.parent_id = Some(parse_number("parentid", &text, position)?);
            }
            (Element::Timestamp, Some(Element::Revision)) => {
                self.revision.timestamp = Some(parse_timestamp(&text, position)?);
            }
            (Element::Comment, Some(Element::Revision)) => self.revision.comment = Some(text),
            (Element::Minor, Some(Element::Revision)) => self.revision.minor = true,
            (Element::Model, Some(Element::Revision)) => self.revision.model = Some(text),
            (Element::Format, Some(Element::Revision)) => self.revision.format = Some(text),
            (Element::Sha1, Some(Element::Revision)) => self.revision.sha1 = Some(text),
            (Element::Text, Some(Element::Revision)) => self.revision.text = Some(text),
            (Element::Username, Some(Element::Contributor)) => {
                self.revision.username = Some(text);
            }
            (Element::Id, Some(Element::Contributor)) => {
                self.revision.user_id = Some(parse_number("contributor id", &text, position)?);
            }
            (Element::Ip, Some(Element::Contributor)) => self.revision.ip = Some(text),
            (Element::Revision, Some(Element::Page)) => self.emit_revision(position)?,
            _ => {}
        }
        Ok(())
    }

    fn finish_siteinfo(&mut self, position: usize) -> Result<()> {
        let base = self.site.base.take().ok_or(ImportError::MissingField {
            field: "base",
            position,
        })?;
        let api_url = api_url_from_base(&base)?;
        let site = SiteMetadata {
            root_attributes: std::mem::take(&mut self.site.root_attributes),
            site_name: self.site.site_name.take().unwrap_or_default(),
            db_name: self.site.db_name.take().unwrap_or_default(),
            base,
            generator: self.site.generator.take().unwrap_or_default(),
            case: self.site.case.unwrap_or(CasePolicy::FirstLetter),
            api_url,
        };
        self.listener.on_site(&site)?;

        let namespaces = self.resolver.resolve(&site, &self.site.namespaces)?;
        for namespace in &namespaces {
            self.listener.on_namespace(namespace)?;
        }
        self.summary.namespaces += namespaces.len() as u64;

        info!(
            site = %site.site_name,
            db = %site.db_name,
            namespaces = namespaces.len(),
            "Site metadata resolved"
        );
        Ok(())
    }

    fn report_page(&mut self, position: usize) -> Result<()> {
        if self.page.reported.is_some() {
            return Ok(());
        }
        let record = PageRecord {
            title: self.page.title.take().ok_or(ImportError::MissingField {
                field: "title",
                position,
            })?,
            namespace: self.page.namespace.unwrap_or(0),
            id: self.page.id.ok_or(ImportError::MissingField {
                field: "page id",
                position,
            })?,
        };
        debug!(id = record.id, title = %record.title, "Page");
        self.listener.on_page(&record)?;
        self.summary.pages += 1;
        self.page.reported = Some(record);
        Ok(())
    }

    fn emit_revision(&mut self, position: usize) -> Result<()> {
        let scratch = std::mem::take(&mut self.revision);
        let page = self
            .page
            .reported
            .as_ref()
            .ok_or_else(|| ImportError::structure(position, "revision outside of a page"))?;

        let contributor = match scratch.user_id {
            Some(id) => Identity::Registered {
                name: scratch.username.unwrap_or_default(),
                id,
            },
            None => Identity::Anonymous {
                ip: scratch.ip.unwrap_or_default(),
            },
        };
        let text = scratch.text.unwrap_or_default();
        let revision = RevisionRecord {
            id: scratch.id.ok_or(ImportError::MissingField {
                field: "revision id",
                position,
            })?,
            parent_id: scratch.parent_id.unwrap_or(0),
            timestamp: scratch.timestamp.ok_or(ImportError::MissingField {
                field: "timestamp",
                position,
            })?,
            contributor,
            comment: scratch.comment,
            minor: scratch.minor,
            model: scratch.model,
            format: scratch.format,
            sha1: scratch.sha1,
            byte_length: scratch.declared_bytes.unwrap_or(text.len() as u64),
            text,
        };

        self.listener.on_revision(page, revision)?;
        self.summary.revisions += 1;
        Ok(())
    }

    fn finish(self, position: usize) -> Result<ParseSummary> {
        if let Some(frame) = self.stack.last() {
            return Err(ImportError::structure(
                position,
                format!("input ended inside <{:?}>", frame.element),
            ));
        }
        info!(
            pages = self.summary.pages,
            revisions = self.summary.revisions,
            "Dump parsed"
        );
        Ok(self.summary)
    }
}

/// Reads and unescapes one attribute by name.
pub(crate) fn attribute(e: &BytesStart<'_>, name: &str, position: usize) -> Result<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|source| ImportError::Xml { position, source })?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|source| ImportError::Xml { position, source })?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn parse_number<T: FromStr>(field: &'static str, value: &str, position: usize) -> Result<T> {
    value.trim().parse().map_err(|_| ImportError::InvalidNumber {
        field,
        value: value.to_string(),
        position,
    })
}

fn parse_timestamp(value: &str, position: usize) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| ImportError::InvalidTimestamp {
            value: value.to_string(),
            position,
            source,
        })
}
