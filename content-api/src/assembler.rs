//! Record assembly: turns a projected document into the response tree,
//! deriving custom fields for every part.

use crate::document::RawDocument;
use crate::fields::{Derivation, FieldKind, FieldSpecSet, GroupKey, RECORD_ID_KEY};
use crate::pdf::{PdfStatusSource, pdf_url};
use crate::projector::{ProjectedItem, Projection, ProjectionError, project};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The assembled response for one record.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledRecord {
    pub id: String,
    /// Item-level fields
    pub fields: ProjectedItem,
    pub group_key: GroupKey,
    pub rows: Vec<ProjectedItem>,
}

impl Serialize for AssembledRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry(RECORD_ID_KEY, &self.id)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry(self.group_key.as_str(), &self.rows)?;
        map.end()
    }
}

/// (row index, part field position)
type LookupKey = (usize, usize);

pub struct Assembler {
    fields: Arc<FieldSpecSet>,
    pdf: Arc<dyn PdfStatusSource>,
    max_concurrency: usize,
}

impl Assembler {
    /// `max_concurrency` bounds the PDF status lookups in flight for one
    /// record. It is clamped to at least 1.
    pub fn new(
        fields: Arc<FieldSpecSet>,
        pdf: Arc<dyn PdfStatusSource>,
        max_concurrency: usize,
    ) -> Self {
        Assembler {
            fields,
            pdf,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Builds the response tree for `doc`.
    ///
    /// Indexed part fields are projected first so that custom fields can
    /// read them (the part identifier in particular). PDF status lookups for
    /// all parts run concurrently, at most `max_concurrency` at a time; a
    /// failed lookup only blanks the status of that one part.
    pub async fn assemble(
        &self,
        doc: &RawDocument,
        id: &str,
    ) -> Result<AssembledRecord, ProjectionError> {
        let projection = project(&self.fields, doc)?;
        let indexed = projection.rows();
        let statuses = self.lookup_pdf_statuses(&projection, &indexed).await;

        let rows = indexed
            .into_iter()
            .enumerate()
            .map(|(index, row)| self.derive_row(&projection, index, row, &statuses))
            .collect();

        Ok(AssembledRecord {
            id: id.to_string(),
            fields: projection.item(),
            group_key: self.fields.group_key(),
            rows,
        })
    }

    fn row_identifier<'r>(&self, row: &'r ProjectedItem) -> &'r str {
        row.get(self.fields.identifier())
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Every (row, field) that needs a PDF status, with its base URL and
    /// part identifier. Rows missing either are skipped.
    fn pdf_lookups<'p>(
        &self,
        projection: &'p Projection<'_>,
        rows: &'p [ProjectedItem],
    ) -> Vec<(LookupKey, &'p str, &'p str)> {
        let mut lookups = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let pid = self.row_identifier(row);
            for (position, spec) in self.fields.parts().iter().enumerate() {
                let FieldKind::Custom(derivation) = &spec.kind else {
                    continue;
                };
                if !derivation.needs_pdf_status() {
                    continue;
                }
                let base_url = projection.raw_part_value(position, index);
                if !base_url.is_empty() && !pid.is_empty() {
                    lookups.push(((index, position), base_url, pid));
                }
            }
        }
        lookups
    }

    async fn lookup_pdf_statuses(
        &self,
        projection: &Projection<'_>,
        rows: &[ProjectedItem],
    ) -> HashMap<LookupKey, String> {
        let mut join_set = JoinSet::new();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));

        for (key, base_url, pid) in self.pdf_lookups(projection, rows) {
            let pdf = self.pdf.clone();
            let permits = permits.clone();
            let base_url = base_url.to_string();
            let pid = pid.to_string();
            join_set.spawn(async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let result = pdf.status(&base_url, &pid).await;
                (key, result)
            });
        }

        let mut statuses = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, Ok(status))) => {
                    statuses.insert(key, status);
                }
                Ok((key, Err(e))) => {
                    tracing::warn!(row = key.0, error = %e, "PDF status unavailable");
                }
                Err(e) => tracing::error!("Task panicked: {}", e),
            }
        }
        statuses
    }

    /// Builds the final row in declaration order from the indexed values
    /// and the derived ones.
    fn derive_row(
        &self,
        projection: &Projection<'_>,
        index: usize,
        indexed: ProjectedItem,
        statuses: &HashMap<LookupKey, String>,
    ) -> ProjectedItem {
        let pid = self.row_identifier(&indexed);
        let mut row = IndexMap::with_capacity(self.fields.parts().len());

        for (position, spec) in self.fields.parts().iter().enumerate() {
            let value = match &spec.kind {
                FieldKind::Indexed => indexed.get(&spec.name).cloned(),
                FieldKind::Custom(derivation) => {
                    let base_url = projection.raw_part_value(position, index);
                    let status = statuses.get(&(index, position)).map(String::as_str);
                    derive(derivation, pid, base_url, status)
                }
            };

            if let Some(value) = value {
                row.insert(spec.name.clone(), value);
            }
        }

        row
    }
}

/// Computes one custom field. `None` leaves the field out of the row.
fn derive(
    derivation: &Derivation,
    pid: &str,
    base_url: &str,
    status: Option<&str>,
) -> Option<Value> {
    if pid.is_empty() {
        return None;
    }

    match derivation {
        Derivation::ManifestUrl { prefix } => Some(Value::String(format!("{prefix}{pid}"))),
        Derivation::PdfStatus { .. } | Derivation::Pdf { .. } if base_url.is_empty() => None,
        Derivation::PdfStatus { .. } => Some(json!({ "status": status.unwrap_or_default() })),
        Derivation::Pdf { endpoints } => Some(json!({
            "status": status.unwrap_or_default(),
            "urls": {
                "generate": pdf_url(base_url, pid, &endpoints.generate),
                "status": pdf_url(base_url, pid, &endpoints.status),
                "download": pdf_url(base_url, pid, &endpoints.download),
            }
        })),
    }
}
