//! DNS name helpers for the SRP registry.
//!
//! Registry names are stored as strings with exactly one trailing dot and
//! compared case-insensitively. Sub-type service names follow the DNS-SD
//! convention `<sub-label>._sub.<service-type>.<domain.>`.

use crate::error::Error;

/// The domain served when none is configured.
pub const DEFAULT_DOMAIN: &str = "default.service.arpa.";

/// The label separating a sub-type from its base service type.
const SUB_TYPE_MARKER: &str = "._sub.";

/// Normalize a name to its fully-qualified form with one trailing dot.
///
/// # Errors
///
/// Returns [`Error::InvalidName`] for an empty name.
pub fn to_fqdn(name: &str) -> Result<String, Error> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(format!("{trimmed}."))
}

/// Case-insensitive DNS name equality. Both sides may carry or omit the
/// trailing dot.
#[must_use]
pub fn names_equal(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

/// Whether `name` equals `domain` or is a subdomain of it, comparing on
/// label boundaries.
#[must_use]
pub fn is_sub_domain_of(name: &str, domain: &str) -> bool {
    let name = name.trim_end_matches('.');
    let domain = domain.trim_end_matches('.');
    if name.eq_ignore_ascii_case(domain) {
        return true;
    }
    name.len() > domain.len()
        && name.as_bytes()[name.len() - domain.len() - 1] == b'.'
        && name[name.len() - domain.len()..].eq_ignore_ascii_case(domain)
}

/// Whether a full service name is a sub-type registration.
#[must_use]
pub fn is_sub_type(service_name: &str) -> bool {
    let lower = service_name.to_ascii_lowercase();
    lower.contains(SUB_TYPE_MARKER)
}

/// Extract the `<sub-label>` from a sub-type service name.
///
/// # Errors
///
/// Returns [`Error::InvalidName`] if `service_name` is not a sub-type.
pub fn sub_type_label(service_name: &str) -> Result<&str, Error> {
    let lower = service_name.to_ascii_lowercase();
    match lower.find(SUB_TYPE_MARKER) {
        Some(idx) if idx > 0 => Ok(&service_name[..idx]),
        _ => Err(Error::InvalidName(service_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_fqdn_appends_single_trailing_dot() {
        assert_eq!(to_fqdn("host.example").unwrap(), "host.example.");
        assert_eq!(to_fqdn("host.example.").unwrap(), "host.example.");
        assert_eq!(to_fqdn("host.example...").unwrap(), "host.example.");
        assert!(to_fqdn("").is_err());
        assert!(to_fqdn(".").is_err());
    }

    #[test]
    fn names_compare_case_insensitively() {
        assert!(names_equal("Thermo.Default.Service.Arpa.", "thermo.default.service.arpa."));
        assert!(names_equal("thermo.default.service.arpa", "thermo.default.service.arpa."));
        assert!(!names_equal("thermo.default.service.arpa.", "hygro.default.service.arpa."));
    }

    #[test]
    fn sub_domain_matches_on_label_boundaries() {
        assert!(is_sub_domain_of("thermo.default.service.arpa.", "default.service.arpa."));
        assert!(is_sub_domain_of("default.service.arpa.", "default.service.arpa."));
        assert!(!is_sub_domain_of("xdefault.service.arpa.", "default.service.arpa."));
        assert!(!is_sub_domain_of("default.service.arpa.", "thermo.default.service.arpa."));
    }

    #[test]
    fn sub_type_label_extraction() {
        assert!(is_sub_type("_hot._sub._thermo._udp.default.service.arpa."));
        assert!(!is_sub_type("_thermo._udp.default.service.arpa."));
        assert_eq!(
            sub_type_label("_hot._sub._thermo._udp.default.service.arpa.").unwrap(),
            "_hot"
        );
        assert!(sub_type_label("_thermo._udp.default.service.arpa.").is_err());
    }
}
