//! Per-kind field metadata.
//!
//! This module provides the schema side-table that parameterizes the
//! canonicalizer, differ and planner, the YAML definition format it is
//! loaded from, schema-driven JSON conversion and validation of desired
//! resources.

mod convert;
mod definition;
mod types;
mod validate;

pub use convert::{ConvertMode, masked_json, resource_from_json, value_from_json};
pub use definition::{
    EquivalenceDefinition, FieldDefinition, GroupDefinition, KindDefinition, OperationDefinition,
    load_schema, parse_schema,
};
pub use types::{
    DEFAULT_IDENTITY, ExclusiveGroup, FieldMeta, FieldType, KindSchema, ObjectSchema,
    OperationName, OperationSelector, StringEquivalence,
};
pub use validate::{ResourceValidator, ValidationReport};

#[cfg(test)]
pub(crate) mod fixtures {
    //! reCAPTCHA-style `Key` schema shared by the unit tests.

    use super::*;

    pub(crate) const KEY_SCHEMA_YAML: &str = r"
kind: Key
identity: name
fields:
  - name: name
    type: string
    equivalence: self_link
    output_only: true
  - name: displayName
    type: string
    required: true
    operation: Update
  - name: webSettings
    type: object
    operation: recreate
    fields:
      - name: allowAllDomains
        type: bool
        operation: Update
      - name: allowedDomains
        type: list
        element: { type: string }
        unordered: true
        operation: Update
      - name: allowAmpTraffic
        type: bool
        operation: Update
      - name: integrationType
        type: enum
      - name: challengeSecurityPreference
        type: enum
        server_default: true
        operation: Update
  - name: androidSettings
    type: object
    operation: recreate
    fields:
      - name: allowAllPackageNames
        type: bool
        operation: Update
      - name: allowedPackageNames
        type: list
        element: { type: string }
        unordered: true
        operation: Update
  - name: iosSettings
    type: object
    operation: recreate
    fields:
      - name: allowAllBundleIds
        type: bool
        operation: Update
      - name: allowedBundleIds
        type: list
        element: { type: string }
        unordered: true
        operation: Update
  - name: labels
    type: map
    element: { type: string }
    operation: Update
  - name: testingOptions
    type: object
    fields:
      - name: testingScore
        type: float
      - name: testingChallenge
        type: enum
        server_default: true
  - name: createTime
    type: string
    output_only: true
exclusive_groups:
  - members: [webSettings, androidSettings, iosSettings]
";

    fn string_list() -> FieldType {
        FieldType::List {
            element: Box::new(FieldType::String(StringEquivalence::Exact)),
            unordered: true,
        }
    }

    pub(crate) fn key_schema() -> KindSchema {
        let web = ObjectSchema::new()
            .with_field(FieldMeta::new("allowAllDomains", FieldType::Bool).triggers("Update"))
            .with_field(FieldMeta::new("allowedDomains", string_list()).triggers("Update"))
            .with_field(FieldMeta::new("allowAmpTraffic", FieldType::Bool).triggers("Update"))
            .with_field(FieldMeta::new("integrationType", FieldType::Enum))
            .with_field(
                FieldMeta::new("challengeSecurityPreference", FieldType::Enum)
                    .server_default()
                    .triggers("Update"),
            );
        let android = ObjectSchema::new()
            .with_field(FieldMeta::new("allowAllPackageNames", FieldType::Bool).triggers("Update"))
            .with_field(FieldMeta::new("allowedPackageNames", string_list()).triggers("Update"));
        let ios = ObjectSchema::new()
            .with_field(FieldMeta::new("allowAllBundleIds", FieldType::Bool).triggers("Update"))
            .with_field(FieldMeta::new("allowedBundleIds", string_list()).triggers("Update"));
        let testing = ObjectSchema::new()
            .with_field(FieldMeta::new("testingScore", FieldType::Float))
            .with_field(FieldMeta::new("testingChallenge", FieldType::Enum).server_default());

        KindSchema::new(
            "Key",
            ObjectSchema::new()
                .with_field(
                    FieldMeta::new("name", FieldType::String(StringEquivalence::SelfLink))
                        .output_only(),
                )
                .with_field(
                    FieldMeta::new("displayName", FieldType::String(StringEquivalence::Exact))
                        .required()
                        .triggers("Update"),
                )
                .with_field(FieldMeta::new("webSettings", FieldType::Object(web)).recreate())
                .with_field(FieldMeta::new("androidSettings", FieldType::Object(android)).recreate())
                .with_field(FieldMeta::new("iosSettings", FieldType::Object(ios)).recreate())
                .with_field(
                    FieldMeta::new(
                        "labels",
                        FieldType::Map(Box::new(FieldType::String(StringEquivalence::Exact))),
                    )
                    .triggers("Update"),
                )
                .with_field(FieldMeta::new("testingOptions", FieldType::Object(testing)))
                .with_field(
                    FieldMeta::new("createTime", FieldType::String(StringEquivalence::Exact))
                        .output_only(),
                )
                .with_exclusive_group(ExclusiveGroup::new([
                    "webSettings",
                    "androidSettings",
                    "iosSettings",
                ])),
        )
    }
}
