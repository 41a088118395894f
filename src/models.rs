use crate::config::{API_PATH, ARTICLE_PATH_SEGMENT};
use crate::error::{ImportError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Title capitalisation rule of a site or namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasePolicy {
    FirstLetter,
    CaseSensitive,
}

impl FromStr for CasePolicy {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first-letter" => Ok(CasePolicy::FirstLetter),
            "case-sensitive" => Ok(CasePolicy::CaseSensitive),
            other => Err(ImportError::UnknownCase(other.to_string())),
        }
    }
}

impl fmt::Display for CasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CasePolicy::FirstLetter => "first-letter",
            CasePolicy::CaseSensitive => "case-sensitive",
        })
    }
}

/// Default content model of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentModel {
    #[default]
    Wikitext,
    Css,
    Javascript,
    Json,
    Scribunto,
    GadgetDefinition,
    FlowBoard,
}

impl ContentModel {
    pub fn token(&self) -> &'static str {
        match self {
            ContentModel::Wikitext => "wikitext",
            ContentModel::Css => "css",
            ContentModel::Javascript => "javascript",
            ContentModel::Json => "json",
            ContentModel::Scribunto => "Scribunto",
            ContentModel::GadgetDefinition => "GadgetDefinition",
            ContentModel::FlowBoard => "flow-board",
        }
    }
}

impl FromStr for ContentModel {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wikitext" => Ok(ContentModel::Wikitext),
            "css" => Ok(ContentModel::Css),
            "javascript" => Ok(ContentModel::Javascript),
            "json" => Ok(ContentModel::Json),
            "Scribunto" => Ok(ContentModel::Scribunto),
            "GadgetDefinition" => Ok(ContentModel::GadgetDefinition),
            "flow-board" => Ok(ContentModel::FlowBoard),
            other => Err(ImportError::UnknownContentModel(other.to_string())),
        }
    }
}

/// The `<siteinfo>` block of a dump, plus the API endpoint derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteMetadata {
    /// Attributes of the `<mediawiki>` root element, in document order.
    pub root_attributes: Vec<(String, String)>,
    pub site_name: String,
    pub db_name: String,
    pub base: String,
    pub generator: String,
    pub case: CasePolicy,
    pub api_url: String,
}

impl SiteMetadata {
    /// Full URL of the namespace metadata query for this site.
    pub fn siteinfo_query_url(&self) -> String {
        format!("{}?{}", self.api_url, crate::config::SITEINFO_QUERY)
    }
}

/// Derives the action API endpoint from a base URL such as
/// `https://en.wikipedia.org/wiki/Main_Page` by cutting at the `/wiki/` segment.
pub fn api_url_from_base(base: &str) -> Result<String> {
    let cut = memchr::memmem::find(base.as_bytes(), ARTICLE_PATH_SEGMENT.as_bytes())
        .ok_or_else(|| ImportError::ApiUrl(base.to_string()))?;
    Ok(format!("{}{}", &base[..cut], API_PATH))
}

/// A namespace as declared inside the dump's own `<namespaces>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpNamespace {
    pub key: i32,
    pub case: CasePolicy,
    pub name: String,
}

/// A fully resolved namespace, emitted once per import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: i32,
    pub case: CasePolicy,
    pub name: String,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub subpages: bool,
    pub default_model: ContentModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRecord {
    pub title: String,
    pub namespace: i32,
    pub id: u64,
}

/// Who made a revision. Registered users carry an id; anonymous edits an IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Registered { name: String, id: u64 },
    Anonymous { ip: String },
}

impl Identity {
    pub fn is_registered(&self) -> bool {
        matches!(self, Identity::Registered { .. })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Registered { name, id } => write!(f, "{name}#{id}"),
            Identity::Anonymous { ip } => f.write_str(ip),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub id: u64,
    /// Parent revision id, 0 when the revision starts the page history.
    pub parent_id: u64,
    pub timestamp: DateTime<Utc>,
    pub contributor: Identity,
    pub comment: Option<String>,
    pub minor: bool,
    pub model: Option<String>,
    pub format: Option<String>,
    pub sha1: Option<String>,
    pub text: String,
    /// From the `bytes` attribute of `<text>` when present, else the UTF-8 length of `text`.
    pub byte_length: u64,
}

impl RevisionRecord {
    pub fn has_parent(&self) -> bool {
        self.parent_id != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_cuts_at_wiki_segment() {
        assert_eq!(
            api_url_from_base("https://en.wikipedia.org/wiki/Main_Page").unwrap(),
            "https://en.wikipedia.org/w/api.php"
        );
    }

    #[test]
    fn api_url_without_wiki_segment_fails() {
        let err = api_url_from_base("https://example.org/index.php").unwrap_err();
        assert!(matches!(err, ImportError::ApiUrl(_)));
    }

    #[test]
    fn case_policy_parses_known_values() {
        assert_eq!("first-letter".parse::<CasePolicy>().unwrap(), CasePolicy::FirstLetter);
        assert_eq!(
            "case-sensitive".parse::<CasePolicy>().unwrap(),
            CasePolicy::CaseSensitive
        );
        assert!("case-insensitive".parse::<CasePolicy>().is_err());
    }

    #[test]
    fn content_model_tokens_roundtrip() {
        for model in [
            ContentModel::Wikitext,
            ContentModel::Css,
            ContentModel::Javascript,
            ContentModel::Json,
            ContentModel::Scribunto,
            ContentModel::GadgetDefinition,
            ContentModel::FlowBoard,
        ] {
            assert_eq!(model.token().parse::<ContentModel>().unwrap(), model);
        }
        assert!(matches!(
            "sanitized-css".parse::<ContentModel>(),
            Err(ImportError::UnknownContentModel(_))
        ));
    }

    #[test]
    fn siteinfo_query_url_appends_query() {
        let site = SiteMetadata {
            root_attributes: vec![],
            site_name: "Wikipedia".into(),
            db_name: "enwiki".into(),
            base: "https://en.wikipedia.org/wiki/Main_Page".into(),
            generator: "MediaWiki 1.42".into(),
            case: CasePolicy::FirstLetter,
            api_url: "https://en.wikipedia.org/w/api.php".into(),
        };
        assert_eq!(
            site.siteinfo_query_url(),
            "https://en.wikipedia.org/w/api.php?action=query&meta=siteinfo\
             &siprop=general|namespaces|namespacealiases&format=xml"
        );
    }

    #[test]
    fn identity_display() {
        let bob = Identity::Registered {
            name: "Bob".into(),
            id: 7,
        };
        assert!(bob.is_registered());
        assert_eq!(bob.to_string(), "Bob#7");
        let anon = Identity::Anonymous {
            ip: "10.0.0.1".into(),
        };
        assert!(!anon.is_registered());
        assert_eq!(anon.to_string(), "10.0.0.1");
    }
}
