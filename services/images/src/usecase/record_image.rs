use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use imagehub_core::serde::format_rfc3339_ms;

use crate::domain::repository::ImageRepository;
use crate::domain::types::{IMAGE_UPLOADED_EVENT, IMAGE_UPLOADED_VERSION, Image, NewOutboxEvent};
use crate::error::ImagesServiceError;

/// Metadata of a file that has already been written to storage.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub external_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub image_type: String,
    pub original_name: String,
    pub mime_type: String,
    pub extension: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub storage: String,
    pub path: String,
    pub checksum: String,
}

/// Records an image and its `image.uploaded` event in one transaction.
pub struct RecordImageUseCase<R: ImageRepository> {
    pub images: R,
    /// Destination of `image.uploaded` (`KAFKA_TOPIC_IMAGE_UPLOADED`).
    pub topic: String,
}

impl<R: ImageRepository> RecordImageUseCase<R> {
    pub async fn execute(&self, input: NewImage) -> Result<Image, ImagesServiceError> {
        if input.external_id.trim().is_empty() {
            return Err(ImagesServiceError::InvalidImage("external id is empty"));
        }
        if input.size <= 0 {
            return Err(ImagesServiceError::InvalidImage("size must be positive"));
        }

        let now = Utc::now();
        let image = Image {
            id: Uuid::new_v4(),
            external_id: input.external_id,
            entity_type: input.entity_type,
            entity_id: input.entity_id,
            image_type: input.image_type,
            original_name: input.original_name,
            mime_type: input.mime_type,
            extension: input.extension,
            size: input.size,
            width: input.width,
            height: input.height,
            storage: input.storage,
            path: input.path,
            checksum: input.checksum,
            created_at: now,
        };

        let event_id = Uuid::new_v4();
        let event = NewOutboxEvent {
            id: event_id,
            topic: self.topic.clone(),
            key: Some(image.external_id.clone()),
            event_type: IMAGE_UPLOADED_EVENT.to_owned(),
            event_version: IMAGE_UPLOADED_VERSION,
            payload: json!({
                "eventId": event_id,
                "eventType": IMAGE_UPLOADED_EVENT,
                "eventVersion": IMAGE_UPLOADED_VERSION,
                "occurredAt": format_rfc3339_ms(&now),
                "data": &image,
            }),
        };

        self.images.create_with_outbox(&image, &event).await?;
        Ok(image)
    }
}
