use std::time::Duration;

/// Deepest element nesting the dump parser accepts before failing
pub const MAX_ELEMENT_DEPTH: usize = 64;

/// Read buffer for dump input (plain or bzip2)
pub const DUMP_READ_BUFFER: usize = 1024 * 1024;

/// Path segment in a site's base URL that precedes article titles
pub const ARTICLE_PATH_SEGMENT: &str = "/wiki/";

/// Path of the MediaWiki action API relative to the site root
pub const API_PATH: &str = "/w/api.php";

/// Query requesting namespaces and aliases from the action API
pub const SITEINFO_QUERY: &str =
    "action=query&meta=siteinfo&siprop=general|namespaces|namespacealiases&format=xml";

/// Deadline for the namespace metadata request
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for establishing the metadata connection
pub const METADATA_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent with metadata requests
pub const USER_AGENT: &str = concat!("wikistream/", env!("CARGO_PKG_VERSION"));

/// Log pool statistics after this many non-empty flushes
pub const STATS_LOG_EVERY_FLUSHES: u64 = 1000;

/// Raw texts retained per page for parent-relative (delta) compression
pub const DELTA_HISTORY_WINDOW: usize = 64;

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Default worker count: half the available cores, at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}
