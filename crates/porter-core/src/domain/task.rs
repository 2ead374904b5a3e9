use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus};

/// Quality hint used when the caller does not pass one.
pub const DEFAULT_QUALITY: i32 = 100;

/// Fields supplied by the caller on `submit`.
///
/// `quality` and `payload` are opaque to the queue and handed to the uploader as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUpload {
    pub key: String,
    pub image_uri: String,
    pub file_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub quality: i32,
    pub payload: String,
}

impl NewUpload {
    pub fn new(
        key: impl Into<String>,
        image_uri: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            image_uri: image_uri.into(),
            file_name: file_name.into(),
            latitude: None,
            longitude: None,
            quality: DEFAULT_QUALITY,
            payload: String::new(),
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A persisted upload task (one row of `uploads`).
///
/// Serialized field names follow the stored column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub key: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
    #[serde(rename = "fname")]
    pub file_name: String,
    #[serde(rename = "lat")]
    pub latitude: Option<f64>,
    #[serde(rename = "lon")]
    pub longitude: Option<f64>,
    pub quality: i32,
    pub payload: String,
    #[serde(rename = "state")]
    pub status: TaskStatus,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl UploadTask {
    /// Build the row a store writes on insert: QUEUED, stamped `now`.
    pub fn queued(id: TaskId, fields: NewUpload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            key: fields.key,
            image_uri: fields.image_uri,
            file_name: fields.file_name,
            latitude: fields.latitude,
            longitude: fields.longitude,
            quality: fields.quality,
            payload: fields.payload,
            status: TaskStatus::Queued,
            updated_at: now,
        }
    }

    /// What the uploader receives for this task.
    pub fn request(&self) -> UploadRequest {
        UploadRequest {
            image_uri: self.image_uri.clone(),
            file_name: self.file_name.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            quality: self.quality,
            payload: self.payload.clone(),
        }
    }
}

/// Arguments of one uploader call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub image_uri: String,
    pub file_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub quality: i32,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn new_upload_defaults() {
        let fields = NewUpload::new("k1", "file:///tmp/a.jpg", "a.jpg");
        assert_eq!(fields.latitude, None);
        assert_eq!(fields.longitude, None);
        assert_eq!(fields.quality, DEFAULT_QUALITY);
        assert!(fields.payload.is_empty());
    }

    #[test]
    fn queued_row_copies_fields() {
        let fields = NewUpload::new("k1", "file:///tmp/a.jpg", "a.jpg")
            .with_location(32.32, -120.12)
            .with_quality(40)
            .with_payload(r#"{"device":666}"#);

        let task = UploadTask::queued(TaskId::new(1), fields, sample_time());

        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.updated_at, sample_time());
        assert_eq!(task.latitude, Some(32.32));
        assert_eq!(task.longitude, Some(-120.12));

        let request = task.request();
        assert_eq!(request.file_name, "a.jpg");
        assert_eq!(request.quality, 40);
        assert_eq!(request.payload, r#"{"device":666}"#);
    }

    #[test]
    fn serializes_with_column_names() {
        let task = UploadTask::queued(
            TaskId::new(3),
            NewUpload::new("k1", "file:///tmp/a.jpg", "a.jpg"),
            sample_time(),
        );

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["imageUri"], "file:///tmp/a.jpg");
        assert_eq!(value["fname"], "a.jpg");
        assert_eq!(value["state"], "QUEUED");
        assert!(value["lat"].is_null());
        assert!(value.get("updatedAt").is_some());
    }
}
