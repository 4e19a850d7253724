use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Treat an explicit `null` like a missing field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    #[serde(default, deserialize_with = "null_default")]
    pub allowed_downloads: i64,
    #[serde(default)]
    pub remaining_downloads: Option<i64>,
    #[serde(default)]
    pub reset_time_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncapsulatedUserInfo {
    #[serde(default)]
    pub data: Option<UserInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default, deserialize_with = "null_default")]
    pub total_pages: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub page: u32,
    #[serde(default, deserialize_with = "null_default")]
    pub data: Vec<ResponseData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    #[serde(deserialize_with = "null_default")]
    pub download_count: i64,
    #[serde(deserialize_with = "null_default")]
    pub ratings: f32,
    pub from_trusted: Option<bool>,
    pub upload_date: Option<DateTime<Utc>>,
    pub release: Option<String>,
    pub comments: Option<String>,
    pub uploader: Option<Uploader>,
    pub feature_details: Option<FeatureDetails>,
    #[serde(deserialize_with = "null_default")]
    pub files: Vec<SubFile>,
    pub moviehash_match: Option<bool>,
    pub hearing_impaired: Option<bool>,
    pub machine_translated: Option<bool>,
    pub ai_translated: Option<bool>,
    pub fps: Option<f32>,
    pub foreign_parts_only: Option<bool>,
}

impl Attributes {
    pub fn first_file_id(&self) -> Option<u64> {
        self.files.first().and_then(|f| f.file_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureDetails {
    pub feature_type: Option<String>,
    pub imdb_id: Option<u64>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubFile {
    #[serde(default)]
    pub file_id: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Uploader {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleDownloadInfo {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub remaining: i64,
    #[serde(default)]
    pub reset_time_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageInfo {
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub language_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncapsulatedLanguageList {
    #[serde(default)]
    pub data: Option<Vec<LanguageInfo>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
}
