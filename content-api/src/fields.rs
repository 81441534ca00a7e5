//! Output field specifications.
//!
//! Configured fields are resolved once at startup into a [`FieldSpecSet`]:
//! every index field name becomes a [`Tag`] and every custom field becomes a
//! typed [`Derivation`], so no per-request name matching is left to do.

use crate::config::{IiifConfig, PdfEndpoints, ValidationError};
use crate::document::Tag;
use serde::Deserialize;
use std::collections::HashSet;

/// Key the record identifier is emitted under.
pub const RECORD_ID_KEY: &str = "id";

/// One configured output field, as written in the configuration file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FieldConfig {
    /// Name of the field in the response
    pub name: String,
    /// Index field the value is read from
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub required: bool,
    /// One value per part rather than one per record
    #[serde(default)]
    pub array: bool,
    /// Value is derived rather than copied; handled by `name`
    #[serde(default)]
    pub custom: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FieldsConfig {
    #[serde(default)]
    pub group_key: GroupKey,
    /// Output name of the per-part field holding the part identifier
    #[serde(default = "default_identifier")]
    pub identifier: String,
    /// Fields emitted once, next to the record identifier
    #[serde(default)]
    pub item: Vec<FieldConfig>,
    /// Fields emitted once per part
    pub parts: Vec<FieldConfig>,
}

fn default_identifier() -> String {
    "pid".into()
}

/// Key the repeated sub-records are emitted under.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    #[default]
    Parts,
    Items,
}

impl GroupKey {
    pub const fn as_str(&self) -> &'static str {
        match self {
            GroupKey::Parts => "parts",
            GroupKey::Items => "items",
        }
    }
}

/// How a custom field computes its value.
#[derive(Clone, Debug, PartialEq)]
pub enum Derivation {
    /// `prefix` followed by the part identifier.
    ManifestUrl { prefix: String },
    /// `{"status": ...}` from the PDF service.
    PdfStatus { endpoints: PdfEndpoints },
    /// PDF status plus the generate/status/download URLs for the part.
    Pdf { endpoints: PdfEndpoints },
}

impl Derivation {
    pub fn needs_pdf_status(&self) -> bool {
        matches!(self, Derivation::PdfStatus { .. } | Derivation::Pdf { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    /// Copied from the index document.
    Indexed,
    Custom(Derivation),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// Always present for indexed fields. Custom fields read their raw input
    /// (e.g. a PDF service base URL) from here when they need one.
    pub source: Option<Tag>,
    pub required: bool,
    pub array: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn is_custom(&self) -> bool {
        matches!(self.kind, FieldKind::Custom(_))
    }
}

/// The resolved, immutable set of output fields, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpecSet {
    group_key: GroupKey,
    identifier: String,
    item: Vec<FieldSpec>,
    parts: Vec<FieldSpec>,
}

impl FieldSpecSet {
    pub fn resolve(
        config: &FieldsConfig,
        iiif: &IiifConfig,
        pdf_endpoints: &PdfEndpoints,
    ) -> Result<Self, ValidationError> {
        let mut item_names = HashSet::new();
        let mut item = Vec::with_capacity(config.item.len());
        for field in &config.item {
            if field.array || field.custom {
                return Err(ValidationError::InvalidItemField(field.name.clone()));
            }
            if field.name == RECORD_ID_KEY || field.name == config.group_key.as_str() {
                return Err(ValidationError::ReservedFieldName(field.name.clone()));
            }
            check_unique(&mut item_names, &field.name)?;
            item.push(resolve_field(field, iiif, pdf_endpoints)?);
        }

        let mut part_names = HashSet::new();
        let mut parts = Vec::with_capacity(config.parts.len());
        for field in &config.parts {
            check_unique(&mut part_names, &field.name)?;
            parts.push(resolve_field(field, iiif, pdf_endpoints)?);
        }

        let identifies_part = parts
            .iter()
            .any(|spec| spec.name == config.identifier && spec.kind == FieldKind::Indexed);
        if !identifies_part {
            return Err(ValidationError::UnknownIdentifier(config.identifier.clone()));
        }

        Ok(FieldSpecSet {
            group_key: config.group_key,
            identifier: config.identifier.clone(),
            item,
            parts,
        })
    }

    pub fn group_key(&self) -> GroupKey {
        self.group_key
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Item-level fields, emitted once per record.
    pub fn item(&self) -> &[FieldSpec] {
        &self.item
    }

    /// Part-level fields, emitted once per repetition.
    pub fn parts(&self) -> &[FieldSpec] {
        &self.parts
    }
}

fn check_unique<'a>(seen: &mut HashSet<&'a str>, name: &'a str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyFieldName);
    }
    if !seen.insert(name) {
        return Err(ValidationError::DuplicateField(name.to_string()));
    }
    Ok(())
}

fn resolve_field(
    field: &FieldConfig,
    iiif: &IiifConfig,
    pdf_endpoints: &PdfEndpoints,
) -> Result<FieldSpec, ValidationError> {
    let source = match field.field.as_str() {
        "" => None,
        name => Some(name.parse::<Tag>().map_err(|_| {
            ValidationError::UnknownIndexField {
                name: field.name.clone(),
                field: field.field.clone(),
            }
        })?),
    };

    let kind = if field.custom {
        FieldKind::Custom(resolve_derivation(field, source, iiif, pdf_endpoints)?)
    } else {
        if source.is_none() {
            return Err(ValidationError::MissingIndexField(field.name.clone()));
        }
        FieldKind::Indexed
    };

    Ok(FieldSpec {
        name: field.name.clone(),
        source,
        required: field.required,
        array: field.array,
        kind,
    })
}

fn resolve_derivation(
    field: &FieldConfig,
    source: Option<Tag>,
    iiif: &IiifConfig,
    pdf_endpoints: &PdfEndpoints,
) -> Result<Derivation, ValidationError> {
    match field.name.as_str() {
        "iiif_manifest_url" => {
            if iiif.manifest_prefix.is_empty() {
                return Err(ValidationError::MissingManifestPrefix(field.name.clone()));
            }
            Ok(Derivation::ManifestUrl {
                prefix: iiif.manifest_prefix.clone(),
            })
        }
        "pdf_status" | "pdf" => {
            // the PDF service base URL is read from the document
            if source.is_none() {
                return Err(ValidationError::MissingIndexField(field.name.clone()));
            }
            let endpoints = pdf_endpoints.clone();
            Ok(if field.name == "pdf" {
                Derivation::Pdf { endpoints }
            } else {
                Derivation::PdfStatus { endpoints }
            })
        }
        _ => Err(ValidationError::UnknownCustomField(field.name.clone())),
    }
}
