//! Raw documents returned by the index and the fixed set of index fields
//! (tags) a field specification may read from.

use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// An index field exposed by [`RawDocument`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Id,
    AlternateId,
    IndividualCallNumber,
    PdfUrl,
    ThumbnailUrl,
    IiifManifestUrl,
    RightsWrapperUrl,
    Title,
    Score,
}

impl Tag {
    pub const ALL: &'static [Tag] = &[
        Tag::Id,
        Tag::AlternateId,
        Tag::IndividualCallNumber,
        Tag::PdfUrl,
        Tag::ThumbnailUrl,
        Tag::IiifManifestUrl,
        Tag::RightsWrapperUrl,
        Tag::Title,
        Tag::Score,
    ];

    /// The field name as it appears in the index.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Tag::Id => "id",
            Tag::AlternateId => "alternate_id_a",
            Tag::IndividualCallNumber => "individual_call_number_a",
            Tag::PdfUrl => "pdf_url_a",
            Tag::ThumbnailUrl => "thumbnail_url_a",
            Tag::IiifManifestUrl => "url_iiif_manifest_stored",
            Tag::RightsWrapperUrl => "rights_wrapper_url_a",
            Tag::Title => "title_a",
            Tag::Score => "score",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown index field: {0}")]
pub struct UnknownTag(pub String);

impl FromStr for Tag {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

/// One document as decoded from the index response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RawDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "alternate_id_a")]
    pub alternate_id: Vec<String>,
    #[serde(default, rename = "individual_call_number_a")]
    pub individual_call_number: Vec<String>,
    #[serde(default, rename = "pdf_url_a")]
    pub pdf_url: Vec<String>,
    #[serde(default, rename = "thumbnail_url_a")]
    pub thumbnail_url: Vec<String>,
    #[serde(default, rename = "url_iiif_manifest_stored")]
    pub iiif_manifest_url: Option<String>,
    #[serde(default, rename = "rights_wrapper_url_a")]
    pub rights_wrapper_url: Vec<String>,
    #[serde(default, rename = "title_a")]
    pub title: Vec<String>,
    #[serde(default)]
    pub score: Option<f32>,
}

impl RawDocument {
    /// Returns the values stored under `tag`.
    ///
    /// Scalar fields yield zero or one element; an absent or empty scalar
    /// yields nothing.
    pub fn values(&self, tag: Tag) -> Cow<'_, [String]> {
        match tag {
            Tag::Id => scalar(self.id.as_deref()),
            Tag::AlternateId => Cow::Borrowed(&self.alternate_id),
            Tag::IndividualCallNumber => Cow::Borrowed(&self.individual_call_number),
            Tag::PdfUrl => Cow::Borrowed(&self.pdf_url),
            Tag::ThumbnailUrl => Cow::Borrowed(&self.thumbnail_url),
            Tag::IiifManifestUrl => scalar(self.iiif_manifest_url.as_deref()),
            Tag::RightsWrapperUrl => Cow::Borrowed(&self.rights_wrapper_url),
            Tag::Title => Cow::Borrowed(&self.title),
            Tag::Score => Cow::Owned(
                self.score
                    .map(|score| format!("{score:.8}"))
                    .into_iter()
                    .collect(),
            ),
        }
    }
}

fn scalar(value: Option<&str>) -> Cow<'_, [String]> {
    match value {
        Some(v) if !v.is_empty() => Cow::Owned(vec![v.to_string()]),
        _ => Cow::Owned(Vec::new()),
    }
}
