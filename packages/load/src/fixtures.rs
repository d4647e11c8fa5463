//! Shared test data.

use std::io::{Cursor, Seek, Write};

use dataset_loader_load_models::{ExtractLoadRequest, FeatureCollection};
use dataset_loader_queue::QueueMessage;
use serde_json::json;
use zip::write::SimpleFileOptions;

/// Collection JSON with `count` features whose ids are `0..count`.
pub fn collection_json(count: usize) -> Vec<u8> {
    let features: Vec<_> = (0..count)
        .map(|i| json!({"type": "Feature", "id": i, "properties": {}}))
        .collect();

    serde_json::to_vec(&json!({
        "type": "FeatureCollection",
        "dataSource": null,
        "features": features,
    }))
    .unwrap()
}

pub fn collection(count: usize) -> FeatureCollection {
    FeatureCollection::from_slice(&collection_json(count)).unwrap()
}

fn write_entries<W: Write + Seek>(
    writer: &mut zip::ZipWriter<W>,
    entries: &[(&str, Option<Vec<u8>>)],
) {
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        match content {
            Some(bytes) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(bytes).unwrap();
            }
            None => writer.add_directory(*name, options).unwrap(),
        }
    }
}

/// Builds a zip; `None` content adds a directory entry.
pub fn build_zip(entries: &[(&str, Option<Vec<u8>>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    write_entries(&mut writer, entries);
    writer.finish().unwrap().into_inner()
}

/// Like [`build_zip`], but written without seeking, so every file's sizes
/// and CRC follow its data in a data descriptor.
pub fn build_streamed_zip(entries: &[(&str, Option<Vec<u8>>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new_stream(Vec::new());
    write_entries(&mut writer, entries);
    writer.finish().unwrap().into_inner()
}

pub fn request(
    data_type: &str,
    dataset_id: &str,
    file_upload_path: &str,
    user_id: &str,
) -> QueueMessage<ExtractLoadRequest> {
    QueueMessage {
        message_id: "msg-1".to_string(),
        message_type: "workflow".to_string(),
        published_date: None,
        data: ExtractLoadRequest {
            data_type: data_type.to_string(),
            tdei_dataset_id: dataset_id.to_string(),
            tdei_project_group_id: "pg-1".to_string(),
            file_upload_path: file_upload_path.to_string(),
            user_id: user_id.to_string(),
        },
    }
}
