//! Subdomain allocation and custom-domain bookkeeping (spec §4.6
//! "DomainManager"). Subdomains are 8-12 char lowercase alphanumeric labels;
//! a handful of labels are reserved outright, and generation retries on
//! collision before falling back to a counter suffix.

use rand::Rng;

use crate::registry::TunnelRegistry;

const MIN_LEN: usize = 8;
const MAX_LEN: usize = 12;
const MAX_GENERATION_ATTEMPTS: usize = 5;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub const RESERVED_LABELS: &[&str] = &["www", "api", "app", "admin", "tunnel"];

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("subdomain '{0}' is reserved")]
    Reserved(String),
    #[error("subdomain '{0}' is already in use")]
    Taken(String),
    #[error("subdomain must be {MIN_LEN}-{MAX_LEN} lowercase alphanumeric characters")]
    InvalidFormat,
    #[error("exhausted candidate subdomains")]
    Exhausted,
}

pub struct DomainManager {
    base_domain: String,
}

impl DomainManager {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self { base_domain: base_domain.into() }
    }

    pub fn public_url(&self, subdomain: &str) -> String {
        format!("https://{subdomain}.{}", self.base_domain)
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Validates a client-requested subdomain, reporting which constraint it
    /// violates rather than silently falling back to a generated one.
    pub fn validate_requested(&self, subdomain: &str, registry: &TunnelRegistry) -> Result<(), DomainError> {
        if RESERVED_LABELS.contains(&subdomain) {
            return Err(DomainError::Reserved(subdomain.to_string()));
        }
        if !is_well_formed(subdomain) {
            return Err(DomainError::InvalidFormat);
        }
        if registry.subdomain_taken(subdomain) {
            return Err(DomainError::Taken(subdomain.to_string()));
        }
        Ok(())
    }

    /// Generates a fresh, unused, non-reserved subdomain, retrying on
    /// collision up to `MAX_GENERATION_ATTEMPTS` times before appending a
    /// numeric suffix to guarantee termination.
    pub fn generate(&self, registry: &TunnelRegistry) -> Result<String, DomainError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = random_label();
            if !RESERVED_LABELS.contains(&candidate.as_str()) && !registry.subdomain_taken(&candidate) {
                return Ok(candidate);
            }
        }

        for suffix in 0..1000u32 {
            let candidate = format!("{}{suffix}", random_label_of_len(MIN_LEN - 3));
            if !RESERVED_LABELS.contains(&candidate.as_str()) && !registry.subdomain_taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(DomainError::Exhausted)
    }
}

fn is_well_formed(subdomain: &str) -> bool {
    let len = subdomain.len();
    (MIN_LEN..=MAX_LEN).contains(&len)
        && subdomain.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn random_label() -> String {
    let len = rand::rng().random_range(MIN_LEN..=MAX_LEN);
    random_label_of_len(len)
}

fn random_label_of_len(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect()
}

/// Generates the TXT-record challenge nonce a user must publish to prove
/// ownership before a custom domain is activated (spec §4.6).
pub fn generate_challenge_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_subdomains_are_well_formed_and_unreserved() {
        let manager = DomainManager::new("example.com");
        let registry = TunnelRegistry::new();
        for _ in 0..50 {
            let label = manager.generate(&registry).unwrap();
            assert!(is_well_formed(&label), "{label} is not well formed");
            assert!(!RESERVED_LABELS.contains(&label.as_str()));
        }
    }

    #[test]
    fn validate_requested_rejects_reserved_labels() {
        let manager = DomainManager::new("example.com");
        let registry = TunnelRegistry::new();
        assert!(matches!(
            manager.validate_requested("api", &registry),
            Err(DomainError::Reserved(_))
        ));
    }

    #[test]
    fn validate_requested_rejects_bad_format() {
        let manager = DomainManager::new("example.com");
        let registry = TunnelRegistry::new();
        assert!(matches!(manager.validate_requested("short", &registry), Err(DomainError::InvalidFormat)));
        assert!(matches!(
            manager.validate_requested("Has-Upper1", &registry),
            Err(DomainError::InvalidFormat)
        ));
    }

    #[test]
    fn public_url_formats_with_base_domain() {
        let manager = DomainManager::new("uniroute.dev");
        assert_eq!(manager.public_url("mytunnel1"), "https://mytunnel1.uniroute.dev");
    }
}
