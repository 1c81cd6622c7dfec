//! S3 XML request bodies and response helpers.
//!
//! Requests are deserialized with serde; responses are streamed through a
//! `quick_xml::Writer`, which escapes every text node.

use crate::errors::AppError;
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesText, Event},
};
use serde::{Deserialize, de::DeserializeOwned};

pub const S3_NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

pub type XmlWriter = Writer<Vec<u8>>;

/// Request body for `PUT /{bucket}` (create bucket).
#[derive(Debug, Default, Deserialize)]
pub struct CreateBucketConfiguration {
    #[serde(rename = "LocationConstraint")]
    pub location_constraint: Option<String>,
}

/// Request body for `PUT /{bucket}?versioning`.
#[derive(Debug, Deserialize)]
pub struct VersioningConfiguration {
    #[serde(rename = "Status")]
    pub status: Option<String>,
}

/// Request body for `POST /{bucket}?delete`.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "Object", default)]
    pub objects: Vec<ObjectIdentifier>,
    #[serde(rename = "Quiet", default)]
    pub quiet: bool,
}

#[derive(Debug, Deserialize)]
pub struct ObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    pub version_id: Option<String>,
}

/// Request body for `POST /{bucket}/{*key}?uploadId=`.
#[derive(Debug, Deserialize)]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletedPartXml>,
}

#[derive(Debug, Deserialize)]
pub struct CompletedPartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: i32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Request body for `PUT /{bucket}/{*key}?tagging`.
#[derive(Debug, Deserialize)]
pub struct Tagging {
    #[serde(rename = "TagSet", default)]
    pub tag_set: TagSetXml,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagSetXml {
    #[serde(rename = "Tag", default)]
    pub tags: Vec<TagXml>,
}

#[derive(Debug, Deserialize)]
pub struct TagXml {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

/// Parse an XML request body, mapping failures to `MalformedXML`.
pub fn parse_xml<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| AppError::malformed_xml("request body is not valid UTF-8"))?;
    quick_xml::de::from_str(text).map_err(|err| AppError::malformed_xml(err.to_string()))
}

/// Render a document: the XML declaration, then `root` in the S3
/// namespace with whatever `body` writes inside it.
pub fn to_xml<F>(root: &str, body: F) -> quick_xml::Result<Vec<u8>>
where
    F: FnOnce(&mut XmlWriter) -> quick_xml::Result<()>,
{
    let mut writer = Writer::new(Vec::with_capacity(512));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer
        .create_element(root)
        .with_attribute(("xmlns", S3_NS))
        .write_inner_content(body)?;
    Ok(writer.into_inner())
}

/// `<tag>...</tag>` around whatever `body` writes.
pub fn element<F>(writer: &mut XmlWriter, tag: &str, body: F) -> quick_xml::Result<()>
where
    F: FnOnce(&mut XmlWriter) -> quick_xml::Result<()>,
{
    writer.create_element(tag).write_inner_content(body)?;
    Ok(())
}

/// `<tag>text</tag>`, escaped.
pub fn text_element(writer: &mut XmlWriter, tag: &str, text: &str) -> quick_xml::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

pub fn optional_text(
    writer: &mut XmlWriter,
    tag: &str,
    text: Option<&str>,
) -> quick_xml::Result<()> {
    match text {
        Some(text) => text_element(writer, tag, text),
        None => Ok(()),
    }
}

/// `<Owner>` block. Owners have no display name of their own.
pub fn owner(writer: &mut XmlWriter, id: &str) -> quick_xml::Result<()> {
    element(writer, "Owner", |w| {
        text_element(w, "ID", id)?;
        text_element(w, "DisplayName", id)
    })
}

/// 200 response with an XML document body.
pub fn xml_response(xml: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    *response.status_mut() = StatusCode::OK;
    response
}

/// Timestamp as used inside XML documents.
pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Timestamp as used in `Last-Modified` headers.
pub fn http_date(ts: &DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
