//! Scenario: a manifest-shaped MailSpec becomes a provider payload, and an
//! incomplete one is rejected with every violated field listed.

use mailk_execution::{build, validate, ServiceCatalog};
use mailk_schemas::MailSpec;

const MANIFEST: &str = r#"{
    "service": "USPS_FIRST_CLASS",
    "filePath": "/srv/letters/invoice-42.pdf",
    "customerReference": "inv-42",
    "simplex": true,
    "to":   {"name": "Ada Lovelace", "address1": "12 St James's Sq", "city": "London",
             "state": "LDN", "postcode": "SW1Y 4JH", "country": "GB"},
    "from": {"name": "Charles Babbage", "organization": "Difference Co",
             "address1": "1 Dorset St", "city": "London", "state": "LDN",
             "postcode": "W1U 4EG", "country": "GB"}
}"#;

fn catalog() -> ServiceCatalog {
    ServiceCatalog::new(["USPS_FIRST_CLASS", "USPS_STANDARD", "USPS_PRIORITY"])
}

#[test]
fn complete_manifest_validates_and_serializes_in_provider_vocabulary() {
    let spec: MailSpec = serde_json::from_str(MANIFEST).unwrap();
    let payload = build(&spec);
    validate(&payload, &catalog()).expect("manifest is complete");

    let wire = serde_json::to_value(&payload).unwrap();
    assert_eq!(wire["service"], "USPS_FIRST_CLASS");
    assert_eq!(wire["file_path"], "/srv/letters/invoice-42.pdf");
    assert_eq!(wire["customer_reference"], "inv-42");
    assert_eq!(wire["simplex"], true);
    assert_eq!(wire["from"]["organization"], "Difference Co");
    assert!(wire.get("url").is_none());
    assert!(wire["to"].get("organization").is_none());
}

#[test]
fn empty_spec_lists_all_required_fields() {
    let err = validate(&build(&MailSpec::default()), &catalog()).unwrap_err();

    // service + documentSource + 6 required fields on each address
    assert_eq!(err.violations.len(), 14);
    let fields = err.fields();
    for f in [
        "spec.service",
        "spec.documentSource",
        "spec.to.name",
        "spec.to.country",
        "spec.from.address1",
        "spec.from.postcode",
    ] {
        assert!(fields.contains(&f), "missing {f} in {fields:?}");
    }
}
