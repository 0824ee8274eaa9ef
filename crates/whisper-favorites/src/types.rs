use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use whisper_auth::types::timestamp;

/// Record as returned by `favorites/list` and `favorites/add`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFavorite {
    pub id: i64,
    pub city_name: String,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `favorites/add`.
#[derive(Debug, Serialize)]
pub struct AddFavoriteRequest<'a> {
    pub city_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<&'a str>,
}

/// A cached favorite location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoriteLocation {
    /// Remote-assigned identifier
    pub id: String,
    pub name: String,
    pub province: Option<String>,
    pub country: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl FavoriteLocation {
    /// Same place: equal name and province.
    pub fn same_place(&self, name: &str, province: Option<&str>) -> bool {
        self.name == name && self.province.as_deref() == province
    }

    /// Label for lists, e.g. `"Hangzhou, Zhejiang"`.
    pub fn display_name(&self) -> String {
        match &self.province {
            Some(province) if province != &self.name => format!("{}, {}", self.name, province),
            _ => self.name.clone(),
        }
    }
}

impl From<RemoteFavorite> for FavoriteLocation {
    fn from(remote: RemoteFavorite) -> Self {
        Self {
            id: remote.id.to_string(),
            name: remote.city_name,
            province: remote.province.filter(|p| !p.is_empty()),
            country: remote.country.filter(|c| !c.is_empty()),
            created_at: remote.created_at,
        }
    }
}

/// A location the caller wants to add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoriteCandidate {
    /// Locally proposed identifier; the remote one replaces it on success.
    pub id: Option<String>,
    pub name: String,
    pub province: Option<String>,
    pub country: Option<String>,
}

impl FavoriteCandidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            province: None,
            country: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_province(mut self, province: impl Into<String>) -> Self {
        self.province = Some(province.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Whether `existing` already covers this candidate.
    pub fn duplicates(&self, existing: &FavoriteLocation) -> bool {
        self.id.as_deref() == Some(existing.id.as_str())
            || existing.same_place(&self.name, self.province.as_deref())
    }

    pub(crate) fn request(&self) -> AddFavoriteRequest<'_> {
        AddFavoriteRequest {
            city_name: &self.name,
            province: self.province.as_deref(),
            country: self.country.as_deref(),
        }
    }
}
