//! Namespace resolution.
//!
//! A dump only carries each namespace's key, case policy and local name. The
//! full table (canonical names, aliases, subpage support, default content
//! model) comes from the site's action API. The parser asks a
//! [`NamespaceResolver`] for it once `<siteinfo>` has been read; tests and
//! offline runs substitute a resolver that never touches the network.

use crate::config::{METADATA_CONNECT_TIMEOUT, METADATA_TIMEOUT, USER_AGENT};
use crate::error::{ImportError, Result};
use crate::models::{CasePolicy, ContentModel, DumpNamespace, Namespace, SiteMetadata};
use crate::parser::attribute;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use rustc_hash::FxHashMap;
use std::time::Duration;
use tracing::info;

pub trait NamespaceResolver {
    /// Produces the namespaces to emit for `site`. `embedded` holds the
    /// `<namespace>` entries of the dump in document order.
    fn resolve(&self, site: &SiteMetadata, embedded: &[DumpNamespace]) -> Result<Vec<Namespace>>;
}

impl<F> NamespaceResolver for F
where
    F: Fn(&SiteMetadata, &[DumpNamespace]) -> Result<Vec<Namespace>>,
{
    fn resolve(&self, site: &SiteMetadata, embedded: &[DumpNamespace]) -> Result<Vec<Namespace>> {
        self(site, embedded)
    }
}

/// Fetches the namespace table from the site's action API over HTTP.
pub struct ApiNamespaceResolver {
    client: reqwest::blocking::Client,
}

impl ApiNamespaceResolver {
    pub fn new() -> Result<Self> {
        Self::with_timeout(METADATA_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(METADATA_CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl NamespaceResolver for ApiNamespaceResolver {
    fn resolve(&self, site: &SiteMetadata, _embedded: &[DumpNamespace]) -> Result<Vec<Namespace>> {
        let url = site.siteinfo_query_url();
        info!(url = %url, "Fetching namespace metadata");
        let body = self
            .client
            .get(&url)
            .send()?
            .error_for_status()?
            .text()?;
        parse_api_namespaces(&body)
    }
}

/// Builds namespaces from the dump's own declarations, without network access.
/// Canonical names equal local names and no aliases are known.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedNamespaceResolver;

impl NamespaceResolver for EmbeddedNamespaceResolver {
    fn resolve(&self, _site: &SiteMetadata, embedded: &[DumpNamespace]) -> Result<Vec<Namespace>> {
        Ok(embedded
            .iter()
            .map(|ns| Namespace {
                id: ns.key,
                case: ns.case,
                name: ns.name.clone(),
                canonical_name: ns.name.clone(),
                aliases: Vec::new(),
                subpages: false,
                default_model: well_known_model(ns.key),
            })
            .collect())
    }
}

fn well_known_model(key: i32) -> ContentModel {
    match key {
        828 => ContentModel::Scribunto,
        2300 => ContentModel::GadgetDefinition,
        2600 => ContentModel::FlowBoard,
        _ => ContentModel::Wikitext,
    }
}

/// Returns a fixed table regardless of the dump.
#[derive(Debug, Clone, Default)]
pub struct StaticNamespaceResolver {
    namespaces: Vec<Namespace>,
}

impl StaticNamespaceResolver {
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        Self { namespaces }
    }
}

impl NamespaceResolver for StaticNamespaceResolver {
    fn resolve(&self, _site: &SiteMetadata, _embedded: &[DumpNamespace]) -> Result<Vec<Namespace>> {
        Ok(self.namespaces.clone())
    }
}

#[derive(Default)]
struct RawNamespace {
    id: i32,
    case: Option<String>,
    canonical: Option<String>,
    subpages: bool,
    model: Option<String>,
    name: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Outside,
    Namespaces,
    Aliases,
}

/// Parses a `meta=siteinfo&siprop=general|namespaces|namespacealiases`
/// response in XML format. Aliases are attached to the namespace sharing
/// their id; namespaces keep response order.
pub fn parse_api_namespaces(xml: &str) -> Result<Vec<Namespace>> {
    let mut reader = Reader::from_str(xml);
    reader.expand_empty_elements(true);

    let mut section = Section::Outside;
    let mut seen_namespaces = false;
    let mut raw: Vec<RawNamespace> = Vec::new();
    let mut aliases: FxHashMap<i32, Vec<String>> = FxHashMap::default();
    let mut current: Option<RawNamespace> = None;

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(e)) => match (e.local_name().as_ref(), section) {
                (b"error", _) => {
                    let info = attribute(&e, "info", position)?
                        .unwrap_or_else(|| "unspecified API error".to_string());
                    return Err(ImportError::Metadata(info));
                }
                (b"namespaces", _) => {
                    section = Section::Namespaces;
                    seen_namespaces = true;
                }
                (b"namespacealiases", _) => section = Section::Aliases,
                (b"ns", Section::Namespaces | Section::Aliases) => {
                    let id = attribute(&e, "id", position)?
                        .and_then(|id| id.trim().parse().ok())
                        .ok_or_else(|| {
                            ImportError::Metadata(format!("<ns> without numeric id at byte {position}"))
                        })?;
                    current = Some(RawNamespace {
                        id,
                        case: attribute(&e, "case", position)?,
                        canonical: attribute(&e, "canonical", position)?,
                        subpages: attribute(&e, "subpages", position)?.is_some(),
                        model: attribute(&e, "defaultcontentmodel", position)?,
                        name: String::new(),
                    });
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(ns) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|source| ImportError::Xml { position, source })?;
                    ns.name.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"ns" => {
                    if let Some(ns) = current.take() {
                        if section == Section::Aliases {
                            aliases.entry(ns.id).or_default().push(ns.name);
                        } else {
                            raw.push(ns);
                        }
                    }
                }
                b"namespaces" | b"namespacealiases" => section = Section::Outside,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(source) => {
                return Err(ImportError::Xml {
                    position: reader.buffer_position(),
                    source,
                })
            }
        }
    }

    if !seen_namespaces {
        return Err(ImportError::Metadata(
            "response has no <namespaces> section".to_string(),
        ));
    }

    raw.into_iter()
        .map(|ns| {
            let case: CasePolicy = ns
                .case
                .ok_or_else(|| ImportError::Metadata(format!("namespace {} has no case", ns.id)))?
                .parse()?;
            let default_model = match ns.model {
                Some(model) => model.parse()?,
                None => ContentModel::default(),
            };
            Ok(Namespace {
                id: ns.id,
                case,
                canonical_name: ns.canonical.unwrap_or_else(|| ns.name.clone()),
                name: ns.name,
                aliases: aliases.remove(&ns.id).unwrap_or_default(),
                subpages: ns.subpages,
                default_model,
            })
        })
        .collect()
}
