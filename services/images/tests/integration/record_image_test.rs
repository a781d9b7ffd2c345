use imagehub_images::error::ImagesServiceError;
use imagehub_images::usecase::record_image::{NewImage, RecordImageUseCase};

use crate::helpers::MockImageRepo;

fn new_image() -> NewImage {
    NewImage {
        external_id: "img_01HZX".to_owned(),
        entity_type: "product".to_owned(),
        entity_id: "42".to_owned(),
        image_type: "thumbnail".to_owned(),
        original_name: "cat.png".to_owned(),
        mime_type: "image/png".to_owned(),
        extension: "png".to_owned(),
        size: 2048,
        width: Some(640),
        height: Some(480),
        storage: "local".to_owned(),
        path: "product/42/img_01HZX.png".to_owned(),
        checksum: "9f86d081884c7d65".to_owned(),
    }
}

fn usecase(repo: MockImageRepo) -> RecordImageUseCase<MockImageRepo> {
    RecordImageUseCase {
        images: repo,
        topic: "media.image-uploaded".to_owned(),
    }
}

#[tokio::test]
async fn should_write_image_and_uploaded_event_together() {
    let repo = MockImageRepo::default();
    let image = usecase(repo.clone()).execute(new_image()).await.unwrap();

    let written = repo.written.lock().unwrap();
    assert_eq!(written.len(), 1);
    let (stored, event) = &written[0];
    assert_eq!(stored.id, image.id);
    assert_eq!(event.topic, "media.image-uploaded");
    assert_eq!(event.key.as_deref(), Some("img_01HZX"));
    assert_eq!(event.event_type, "image.uploaded");
    assert_eq!(event.event_version, 1);
}

#[tokio::test]
async fn should_build_versioned_event_envelope() {
    let repo = MockImageRepo::default();
    usecase(repo.clone()).execute(new_image()).await.unwrap();

    let written = repo.written.lock().unwrap();
    let (_, event) = &written[0];
    let payload = &event.payload;
    assert_eq!(payload["eventId"], event.id.to_string());
    assert_eq!(payload["eventType"], "image.uploaded");
    assert_eq!(payload["eventVersion"], 1);

    let occurred_at = payload["occurredAt"].as_str().unwrap();
    assert!(occurred_at.ends_with('Z'));
    assert_eq!(occurred_at.len(), "2026-04-01T00:00:00.000Z".len());

    let data = &payload["data"];
    assert_eq!(data["externalId"], "img_01HZX");
    assert_eq!(data["mimeType"], "image/png");
    assert_eq!(data["size"], 2048);
    assert_eq!(data["width"], 640);
    assert!(data.get("id").is_none());
}

#[tokio::test]
async fn should_reject_empty_external_id() {
    let repo = MockImageRepo::default();
    let result = usecase(repo.clone())
        .execute(NewImage {
            external_id: "  ".to_owned(),
            ..new_image()
        })
        .await;

    assert!(
        matches!(result, Err(ImagesServiceError::InvalidImage(_))),
        "expected InvalidImage, got {result:?}"
    );
    assert!(repo.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn should_reject_non_positive_size() {
    let result = usecase(MockImageRepo::default())
        .execute(NewImage {
            size: 0,
            ..new_image()
        })
        .await;

    assert!(
        matches!(result, Err(ImagesServiceError::InvalidImage(_))),
        "expected InvalidImage, got {result:?}"
    );
}

#[tokio::test]
async fn should_surface_duplicate_image() {
    let repo = MockImageRepo {
        duplicate: true,
        ..MockImageRepo::default()
    };
    let result = usecase(repo).execute(new_image()).await;

    assert!(
        matches!(result, Err(ImagesServiceError::ImageAlreadyExists)),
        "expected ImageAlreadyExists, got {result:?}"
    );
}
