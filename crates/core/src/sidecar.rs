//! XMP sidecar export. Tags land in the Lightroom `hierarchicalSubject` bag of
//! `<image>.xmp`, optionally merged with what a previous export left there.

use crate::error::{Result, TaggerError};
use crate::models::ConsolidatedImage;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SIDECAR_EXTENSION: &str = "xmp";
pub const NSFW_DETECTED_TAG: &str = "NSFW/Detected";

const NS_X: &str = "adobe:ns:meta/";
const NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const NS_LR: &str = "http://ns.adobe.com/lightroom/1.0/";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SidecarReport {
    pub written: usize,
    pub failed: Vec<PathBuf>,
}

/// `photo.jpg` -> `photo.jpg.xmp`. The image's own extension is kept.
pub fn sidecar_path(image: &Path) -> PathBuf {
    let mut name = OsString::from(image.as_os_str());
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

pub fn batch_count_tag(rounds_processed: i64) -> String {
    format!("Processing/Batch Count {}", rounds_processed)
}

/// Exported tag set for one image, without any merge.
pub fn build_tags(image: &ConsolidatedImage, include_nsfw: bool) -> BTreeSet<String> {
    let mut tags: BTreeSet<String> = image.tags.iter().map(|t| t.hierarchical()).collect();
    if image.rounds_processed > 1 {
        tags.insert(batch_count_tag(image.rounds_processed));
    }
    if include_nsfw && image.nsfw_detected {
        tags.insert(NSFW_DETECTED_TAG.to_string());
    }
    tags
}

pub fn render_xmp(path: &Path, tags: &BTreeSet<String>) -> Result<Vec<u8>> {
    let err = xml_error(path);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(&err)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("x:xmpmeta").with_attributes([("xmlns:x", NS_X)]),
        ))
        .map_err(&err)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("rdf:RDF").with_attributes([("xmlns:rdf", NS_RDF)]),
        ))
        .map_err(&err)?;
    writer
        .write_event(Event::Start(
            BytesStart::new("rdf:Description")
                .with_attributes([("rdf:about", ""), ("xmlns:lr", NS_LR)]),
        ))
        .map_err(&err)?;
    writer
        .write_event(Event::Start(BytesStart::new("lr:hierarchicalSubject")))
        .map_err(&err)?;
    writer
        .write_event(Event::Start(BytesStart::new("rdf:Bag")))
        .map_err(&err)?;
    for tag in tags {
        writer
            .write_event(Event::Start(BytesStart::new("rdf:li")))
            .map_err(&err)?;
        writer
            .write_event(Event::Text(BytesText::new(tag)))
            .map_err(&err)?;
        writer
            .write_event(Event::End(BytesEnd::new("rdf:li")))
            .map_err(&err)?;
    }
    for name in [
        "rdf:Bag",
        "lr:hierarchicalSubject",
        "rdf:Description",
        "rdf:RDF",
        "x:xmpmeta",
    ] {
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(&err)?;
    }
    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn xml_error<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> TaggerError + '_ {
    move |e| TaggerError::Sidecar {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Tags found in the `hierarchicalSubject` bag of an XMP document. Parsing
/// stops at the first error and keeps what was read up to that point.
pub fn parse_hierarchical_subjects(xml: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_subject = false;
    let mut in_item = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"hierarchicalSubject" => in_subject = true,
                b"li" if in_subject => in_item = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"hierarchicalSubject" => in_subject = false,
                b"li" => in_item = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_item => match t.unescape() {
                Ok(text) if !text.is_empty() => {
                    tags.insert(text.into_owned());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("bad text in sidecar: {}", e);
                    break;
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "malformed sidecar at byte {}: {}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
        }
    }
    tags
}

/// Existing tags of the sidecar at `path`; a missing file yields none.
/// Invalid UTF-8 is replaced rather than rejected.
pub async fn read_sidecar_tags(path: &Path) -> Result<BTreeSet<String>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(parse_hierarchical_subjects(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(TaggerError::io(path, e)),
    }
}

pub async fn write_sidecar(
    image: &ConsolidatedImage,
    include_nsfw: bool,
    merge: bool,
) -> Result<PathBuf> {
    let target = sidecar_path(Path::new(&image.path));
    let mut tags = build_tags(image, include_nsfw);
    if merge {
        tags.extend(read_sidecar_tags(&target).await?);
    }
    let body = render_xmp(&target, &tags)?;
    tokio::fs::write(&target, body)
        .await
        .map_err(|e| TaggerError::io(&target, e))?;
    debug!(path = %target.display(), tags = tags.len(), "sidecar written");
    Ok(target)
}

/// Writes one sidecar per image. Failures are logged and counted.
pub async fn export_sidecars(
    images: &[ConsolidatedImage],
    include_nsfw: bool,
    merge: bool,
) -> SidecarReport {
    let mut report = SidecarReport::default();
    for image in images {
        match write_sidecar(image, include_nsfw, merge).await {
            Ok(_) => report.written += 1,
            Err(e) => {
                warn!("sidecar export failed for {}: {}", image.path, e);
                report.failed.push(PathBuf::from(&image.path));
            }
        }
    }
    info!(
        "Wrote {} sidecar(s), {} failed.",
        report.written,
        report.failed.len()
    );
    report
}
