//! Image reference short-names.
//!
//! Database detection compares a normalised repository short-name
//! against a closed set, so `postgres:14`, `library/postgres:14`, and
//! `docker.io/library/postgres:14` all resolve to `library/postgres`.

use thiserror::Error;

/// Repositories treated as databases by `--skip-databases`.
pub const DATABASE_IMAGE_REPOSITORIES: &[&str] = &[
    "clickhouse/clickhouse-server",
    "library/couchdb",
    "library/elasticsearch",
    "dokku/docker-grafana-graphite",
    "library/mariadb",
    "getmeili/meilisearch",
    "library/memcached",
    "library/mongo",
    "library/mysql",
    "library/nats",
    "omnisci/core-os-cpu",
    "library/postgres",
    "fanout/pushpin",
    "library/rabbitmq",
    "library/redis",
    "library/rethinkdb",
    "library/solr",
    "typesense/typesense",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("empty image reference")]
    Empty,

    #[error("invalid image reference {0:?}")]
    Invalid(String),
}

/// Normalise an image reference to its repository short-name: registry
/// host and tag/digest stripped, `library/` prepended for single-segment
/// official images.
pub fn short_name(image: &str) -> Result<String, ImageError> {
    if image.is_empty() {
        return Err(ImageError::Empty);
    }

    // Digest first, then tag (the last colon after the last slash).
    let without_digest = image.split('@').next().unwrap_or(image);
    let repo = match without_digest.rfind(':') {
        Some(colon) if colon > without_digest.rfind('/').map_or(0, |s| s) => {
            &without_digest[..colon]
        }
        _ => without_digest,
    };

    if repo.is_empty() {
        return Err(ImageError::Invalid(image.to_string()));
    }

    let mut segments: Vec<&str> = repo.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ImageError::Invalid(image.to_string()));
    }

    // A first segment with a dot, a port, or "localhost" is a registry.
    if segments.len() > 1 {
        let first = segments[0];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            segments.remove(0);
        }
    }

    // Colons are only valid in a tag or a registry port, both gone now.
    if segments.iter().any(|s| s.contains(':')) {
        return Err(ImageError::Invalid(image.to_string()));
    }

    if segments.len() == 1 {
        return Ok(format!("library/{}", segments[0]));
    }

    Ok(segments.join("/"))
}

/// Whether the short-name belongs to the known database set.
pub fn is_known_database(short: &str) -> bool {
    DATABASE_IMAGE_REPOSITORIES.contains(&short)
}
