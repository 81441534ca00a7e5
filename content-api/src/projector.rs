//! Field projection: validates a raw document against the field
//! specifications and slices it into one row per repeated part.

use crate::document::{RawDocument, Tag};
use crate::fields::{FieldKind, FieldSpec, FieldSpecSet};
use indexmap::IndexMap;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

/// One output object, keyed by field name in declaration order.
pub type ProjectedItem = IndexMap<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum Violation {
    MissingRequired {
        field: String,
        tag: Tag,
    },
    LengthMismatch {
        field: String,
        tag: Tag,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingRequired { field, tag } => {
                write!(f, "missing required field {field} ({tag})")
            }
            Violation::LengthMismatch {
                field,
                tag,
                expected,
                actual,
            } => write!(
                f,
                "array field {field} ({tag}) has {actual} values, expected {expected}"
            ),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ProjectionError {
    #[error("invalid digital content fields: {}", join_violations(.0))]
    StructuralInvalid(Vec<Violation>),

    #[error("no digital parts found in this item")]
    EmptyRecord,
}

pub(crate) fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A validated document, ready to be sliced into rows.
#[derive(Debug)]
pub struct Projection<'a> {
    fields: &'a FieldSpecSet,
    cardinality: usize,
    item: Vec<Cow<'a, [String]>>,
    parts: Vec<Cow<'a, [String]>>,
}

/// Validates `doc` against `fields` and determines the number of parts.
///
/// Every indexed field is checked before failing, so a structurally invalid
/// document reports all of its violations at once. All array fields must
/// have the same length; that length is the cardinality and must not be zero.
/// When no part field is an array the record has exactly one part.
pub fn project<'a>(
    fields: &'a FieldSpecSet,
    doc: &'a RawDocument,
) -> Result<Projection<'a>, ProjectionError> {
    let item: Vec<_> = fields.item().iter().map(|spec| fetch(spec, doc)).collect();
    let parts: Vec<_> = fields.parts().iter().map(|spec| fetch(spec, doc)).collect();

    let mut violations = Vec::new();
    let mut cardinality: Option<usize> = None;

    for (spec, values) in fields.item().iter().zip(&item) {
        check_required(spec, values, &mut violations);
    }

    for (spec, values) in fields.parts().iter().zip(&parts) {
        let (FieldKind::Indexed, Some(tag)) = (&spec.kind, spec.source) else {
            continue;
        };

        check_required(spec, values, &mut violations);

        if !spec.array {
            continue;
        }

        tracing::debug!(field = %spec.name, %tag, len = values.len(), "array field length");

        match cardinality {
            None => cardinality = Some(values.len()),
            Some(expected) if expected != values.len() => {
                violations.push(Violation::LengthMismatch {
                    field: spec.name.clone(),
                    tag,
                    expected,
                    actual: values.len(),
                });
            }
            Some(_) => {}
        }
    }

    if !violations.is_empty() {
        return Err(ProjectionError::StructuralInvalid(violations));
    }

    let cardinality = match cardinality {
        Some(0) => return Err(ProjectionError::EmptyRecord),
        Some(n) => n,
        // scalar-only parts still form one part rather than none
        None => 1,
    };

    Ok(Projection {
        fields,
        cardinality,
        item,
        parts,
    })
}

fn fetch<'a>(spec: &FieldSpec, doc: &'a RawDocument) -> Cow<'a, [String]> {
    match spec.source {
        Some(tag) => doc.values(tag),
        None => Cow::Owned(Vec::new()),
    }
}

fn check_required(spec: &FieldSpec, values: &[String], violations: &mut Vec<Violation>) {
    if let Some(tag) = spec.source
        && spec.required
        && values.is_empty()
    {
        violations.push(Violation::MissingRequired {
            field: spec.name.clone(),
            tag,
        });
    }
}

/// The i-th value of an array field, or the first value of anything else.
fn value_at<'v>(spec: &FieldSpec, values: &'v [String], index: usize) -> &'v str {
    let value = if spec.array {
        values.get(index)
    } else {
        values.first()
    };
    value.map(String::as_str).unwrap_or_default()
}

impl<'a> Projection<'a> {
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Item-level fields. Empty values are left out.
    pub fn item(&self) -> ProjectedItem {
        collect_present(self.fields.item().iter().zip(&self.item).map(
            |(spec, values)| (spec, value_at(spec, values, 0)),
        ))
    }

    /// The indexed part fields of row `index`. Custom fields are not
    /// included; empty values are left out.
    pub fn row(&self, index: usize) -> ProjectedItem {
        collect_present(
            self.fields
                .parts()
                .iter()
                .zip(&self.parts)
                .filter(|(spec, _)| !spec.is_custom())
                .map(|(spec, values)| (spec, value_at(spec, values, index))),
        )
    }

    pub fn rows(&self) -> Vec<ProjectedItem> {
        (0..self.cardinality).map(|index| self.row(index)).collect()
    }

    /// The raw document value behind the part field at `position` for row
    /// `index`, or an empty string.
    pub fn raw_part_value(&self, position: usize, index: usize) -> &str {
        match (self.fields.parts().get(position), self.parts.get(position)) {
            (Some(spec), Some(values)) => value_at(spec, values, index),
            _ => "",
        }
    }
}

fn collect_present<'s>(values: impl Iterator<Item = (&'s FieldSpec, &'s str)>) -> ProjectedItem {
    values
        .filter(|(_, value)| !value.is_empty())
        .map(|(spec, value)| (spec.name.clone(), Value::String(value.to_string())))
        .collect()
}
