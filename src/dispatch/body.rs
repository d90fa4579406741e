use crate::error::{Result, SwitchyardError};
use crate::inject::{Entity, FormData, FormField, FormValue};
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::convert::Infallible;

/// Buffer the request body, at most `limit` bytes.
pub(crate) async fn read_entity(
    body: Body,
    content_type: Option<String>,
    limit: usize,
) -> Result<Entity> {
    let data = read_bytes(body, limit).await?;

    let boundary = content_type
        .as_deref()
        .filter(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .map(multer::parse_boundary)
        .transpose()
        .map_err(|e| SwitchyardError::MalformedEntity(e.to_string()))?;

    match boundary {
        Some(boundary) => Ok(Entity::multipart(read_multipart(data, boundary).await?)),
        None => Ok(Entity::new(data, content_type)),
    }
}

async fn read_bytes(body: Body, limit: usize) -> Result<Bytes> {
    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SwitchyardError::MalformedEntity(e.to_string()))?;
        if buffer.len() + chunk.len() > limit {
            return Err(SwitchyardError::PayloadTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

async fn read_multipart(data: Bytes, boundary: String) -> Result<FormData> {
    let malformed = |e: multer::Error| SwitchyardError::MalformedEntity(e.to_string());
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(data) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(|m| m.to_string());
        let data = field.bytes().await.map_err(malformed)?;
        let value = match file_name {
            Some(file_name) => FormValue::File {
                file_name: Some(file_name),
                content_type,
                data,
            },
            None => FormValue::Text(String::from_utf8_lossy(&data).into_owned()),
        };
        fields.push(FormField { name, value });
    }
    Ok(FormData::new(fields))
}
