//! Order Request Builder.
//!
//! Maps a [`MailSpec`] into the provider's order-creation payload and checks
//! it structurally before any provider call is made.
//!
//! # Invariants
//! - [`build`] is total: it never fails and never drops a spec field.
//! - [`validate`] is pure and reports EVERY violated field, not only the
//!   first one. Callers must not assume single-error semantics.
//! - A payload that fails validation never reaches `FulfillmentGateway`.

use std::collections::BTreeSet;

use mailk_schemas::{Address, MailSpec};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayloadAddress {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub address1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
}

/// Provider order-creation request. Field names follow the provider's wire
/// vocabulary (snake_case).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderPayload {
    pub service: String,
    /// Local document to upload. Mutually exclusive with `url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub simplex: bool,
    pub color: bool,
    pub flat: bool,
    pub stamp: bool,
    pub to: PayloadAddress,
    pub from: PayloadAddress,
}

impl OrderPayload {
    /// Flatten into `(name, value)` pairs for a multipart form, using the
    /// provider's dotted address keys (`to.name`, `from.postcode`, ...).
    /// The document itself is not included; `file_path` is attached as a
    /// file part by the transport.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        out.push(("service".to_string(), self.service.clone()));

        let optional = [
            ("url", &self.url),
            ("customer_reference", &self.customer_reference),
            ("webhook", &self.webhook),
            ("company", &self.company),
            ("message", &self.message),
        ];
        for (k, v) in optional {
            if let Some(v) = v {
                out.push((k.to_string(), v.clone()));
            }
        }

        for (k, v) in [
            ("simplex", self.simplex),
            ("color", self.color),
            ("flat", self.flat),
            ("stamp", self.stamp),
        ] {
            out.push((k.to_string(), v.to_string()));
        }

        push_address(&mut out, "to", &self.to);
        push_address(&mut out, "from", &self.from);
        out
    }
}

fn push_address(out: &mut Vec<(String, String)>, prefix: &str, a: &PayloadAddress) {
    let mut push = |k: &str, v: &str| out.push((format!("{prefix}.{k}"), v.to_string()));
    push("name", &a.name);
    if let Some(org) = &a.organization {
        push("organization", org);
    }
    push("address1", &a.address1);
    if let Some(l2) = &a.address2 {
        push("address2", l2);
    }
    push("city", &a.city);
    push("state", &a.state);
    push("postcode", &a.postcode);
    push("country", &a.country);
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

/// Map desired state into a provider payload. Strings are trimmed and blank
/// optionals collapse to `None`.
pub fn build(spec: &MailSpec) -> OrderPayload {
    OrderPayload {
        service: spec.service.trim().to_string(),
        file_path: non_blank(&spec.file_path),
        url: non_blank(&spec.url),
        customer_reference: non_blank(&spec.customer_reference),
        webhook: non_blank(&spec.webhook),
        company: non_blank(&spec.company),
        message: non_blank(&spec.message),
        simplex: spec.simplex,
        color: spec.color,
        flat: spec.flat,
        stamp: spec.stamp,
        to: build_address(&spec.to),
        from: build_address(&spec.from),
    }
}

fn build_address(a: &Address) -> PayloadAddress {
    PayloadAddress {
        name: a.name.trim().to_string(),
        organization: non_blank(&a.organization),
        address1: a.address1.trim().to_string(),
        address2: non_blank(&a.address2),
        city: a.city.trim().to_string(),
        state: a.state.trim().to_string(),
        postcode: a.postcode.trim().to_string(),
        country: a.country.trim().to_string(),
    }
}

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// ServiceCatalog
// ---------------------------------------------------------------------------

/// Service identifiers the provider recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCatalog {
    services: BTreeSet<String>,
}

impl ServiceCatalog {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// One violated rule. `field` is a JSON path into the record (`spec.to.city`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Every rule a payload broke, in field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub violations: Vec<FieldViolation>,
}

impl ValidationFailure {
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VALIDATION_FAILED: ")?;
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", v.field, v.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Check required fields and provider business rules.
pub fn validate(payload: &OrderPayload, catalog: &ServiceCatalog) -> Result<(), ValidationFailure> {
    let mut violations = Vec::new();

    if payload.service.is_empty() {
        violations.push(FieldViolation::new("spec.service", "required"));
    } else if !catalog.contains(&payload.service) {
        violations.push(FieldViolation::new(
            "spec.service",
            format!("unrecognized service '{}'", payload.service),
        ));
    }

    match (&payload.file_path, &payload.url) {
        (Some(_), Some(_)) => violations.push(FieldViolation::new(
            "spec.documentSource",
            "set exactly one of filePath or url, not both",
        )),
        (None, None) => violations.push(FieldViolation::new(
            "spec.documentSource",
            "one of filePath or url is required",
        )),
        _ => {}
    }

    check_address("spec.to", &payload.to, &mut violations);
    check_address("spec.from", &payload.from, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { violations })
    }
}

fn check_address(prefix: &str, a: &PayloadAddress, out: &mut Vec<FieldViolation>) {
    let required = [
        ("name", &a.name),
        ("address1", &a.address1),
        ("city", &a.city),
        ("state", &a.state),
        ("postcode", &a.postcode),
        ("country", &a.country),
    ];
    for (field, value) in required {
        if value.is_empty() {
            out.push(FieldViolation::new(format!("{prefix}.{field}"), "required"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str) -> Address {
        Address {
            name: name.to_string(),
            organization: None,
            address1: "1 Main St".to_string(),
            address2: Some("  ".to_string()),
            city: "Austin".to_string(),
            state: "TX".to_string(),
            postcode: "78701".to_string(),
            country: "US".to_string(),
        }
    }

    fn spec() -> MailSpec {
        MailSpec {
            service: " USPS_FIRST_CLASS ".to_string(),
            url: Some("https://example.com/letter.pdf".to_string()),
            to: addr("Ada"),
            from: addr("Bob"),
            color: true,
            ..MailSpec::default()
        }
    }

    fn catalog() -> ServiceCatalog {
        ServiceCatalog::new(["USPS_FIRST_CLASS", "USPS_STANDARD"])
    }

    #[test]
    fn build_trims_and_drops_blank_optionals() {
        let p = build(&spec());
        assert_eq!(p.service, "USPS_FIRST_CLASS");
        assert_eq!(p.to.address2, None);
        assert!(p.color);
        assert!(validate(&p, &catalog()).is_ok());
    }

    #[test]
    fn validate_reports_every_violation() {
        let mut s = spec();
        s.service = String::new();
        s.url = None;
        s.to.name = String::new();
        s.from.city = String::new();
        s.from.country = " ".to_string();

        let err = validate(&build(&s), &catalog()).unwrap_err();
        assert_eq!(
            err.fields(),
            vec![
                "spec.service",
                "spec.documentSource",
                "spec.to.name",
                "spec.from.city",
                "spec.from.country",
            ]
        );
        let text = err.to_string();
        assert!(text.starts_with("VALIDATION_FAILED"));
        assert!(text.contains("spec.to.name: required"));
    }

    #[test]
    fn unknown_service_is_rejected() {
        let mut s = spec();
        s.service = "PIGEON".to_string();
        let err = validate(&build(&s), &catalog()).unwrap_err();
        assert_eq!(err.fields(), vec!["spec.service"]);
        assert!(err.violations[0].reason.contains("PIGEON"));
    }

    #[test]
    fn both_document_sources_is_a_violation() {
        let mut s = spec();
        s.file_path = Some("/srv/letters/a.pdf".to_string());
        let err = validate(&build(&s), &catalog()).unwrap_err();
        assert_eq!(err.fields(), vec!["spec.documentSource"]);
    }

    #[test]
    fn form_fields_use_dotted_address_keys() {
        let mut s = spec();
        s.to.organization = Some("Analytical Engines".to_string());
        let fields = build(&s).form_fields();
        let get = |k: &str| {
            fields
                .iter()
                .find(|(name, _)| name == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("service"), Some("USPS_FIRST_CLASS"));
        assert_eq!(get("to.organization"), Some("Analytical Engines"));
        assert_eq!(get("from.postcode"), Some("78701"));
        assert_eq!(get("color"), Some("true"));
        assert_eq!(get("from.organization"), None);
        assert_eq!(get("file_path"), None);
    }
}
