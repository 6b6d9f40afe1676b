//! Streaming Decoder (§4.2): pull-parses a (possibly gzipped) dump file and
//! emits one [`XmlNode`] per matching top-level element.
//!
//! `quick_xml::Reader` and `flate2::GzDecoder` are both synchronous, so the
//! parse loop runs on a blocking thread (`spawn_blocking`) and feeds the
//! async pipeline through `Sender::blocking_send`. This keeps memory bounded
//! to one subtree plus the reader's reused buffer regardless of file size.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::DumpKind;

use super::raw::XmlNode;

enum DumpReader {
    Plain(Reader<BufReader<File>>),
    Gzipped(Reader<BufReader<flate2::read::GzDecoder<File>>>),
}

impl DumpReader {
    fn open(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)
            .map_err(|e| AppError::DecodeFatal(format!("failed to open {}: {e}", path.display())))?;
        if path.extension().and_then(|e| e.to_str()) == Some("gz") {
            let decoder = flate2::read::GzDecoder::new(file);
            let mut reader = Reader::from_reader(BufReader::new(decoder));
            reader.config_mut().trim_text(true);
            Ok(DumpReader::Gzipped(reader))
        } else {
            let mut reader = Reader::from_reader(BufReader::new(file));
            reader.config_mut().trim_text(true);
            Ok(DumpReader::Plain(reader))
        }
    }

    fn read_event<'b>(&mut self, buf: &'b mut Vec<u8>) -> quick_xml::Result<Event<'b>> {
        match self {
            DumpReader::Plain(r) => r.read_event_into(buf),
            DumpReader::Gzipped(r) => r.read_event_into(buf),
        }
    }
}

/// Decodes `path`, sending one [`XmlNode`] per `<kind.element_name()>`
/// element found at any depth onto `out`. Runs to completion or until
/// `token` is cancelled; closes `out` on return either way.
pub async fn decode_dump_file(
    path: PathBuf,
    kind: DumpKind,
    out: mpsc::Sender<XmlNode>,
    token: CancellationToken,
) -> Result<(), AppError> {
    let element_name = kind.element_name().to_string();
    tokio::task::spawn_blocking(move || run_decode_loop(&path, &element_name, out, token))
        .await
        .map_err(|e| AppError::DecodeFatal(format!("decoder task panicked: {e}")))?
}

fn run_decode_loop(
    path: &Path,
    element_name: &str,
    out: mpsc::Sender<XmlNode>,
    token: CancellationToken,
) -> Result<(), AppError> {
    let mut reader = DumpReader::open(path)?;
    let mut buf = Vec::new();
    let mut parse_errors = 0u64;

    loop {
        if token.is_cancelled() {
            break;
        }
        buf.clear();
        match reader.read_event(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) if start.name().as_ref() == element_name.as_bytes() => {
                let attrs = collect_attrs(&start)?;
                match read_subtree(&mut reader, element_name, attrs) {
                    Ok(node) => {
                        if out.blocking_send(node).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        parse_errors += 1;
                        tracing::warn!(element = element_name, "skipped unparsable element");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                return Err(AppError::DecodeFatal(format!(
                    "fatal XML decode error in {}: {e}",
                    path.display()
                )));
            }
        }
    }

    if parse_errors > 0 {
        tracing::warn!(element = element_name, parse_errors, "decoder skipped malformed elements");
    }
    Ok(())
}

fn collect_attrs(start: &quick_xml::events::BytesStart<'_>) -> Result<HashMap<String, String>, AppError> {
    let mut attrs = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| AppError::DecodeFatal(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .decode_and_unescape_value(quick_xml::encoding::Decoder::utf8())
            .map_err(|e| AppError::DecodeFatal(format!("bad attribute value: {e}")))?
            .to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

/// Recursively consumes events until the matching close tag for `tag`,
/// building a structural tree. Nested elements sharing `tag`'s name (e.g.
/// Discogs' nested `<label>` under `<sublabels>`) are handled correctly
/// because recursion tracks structural depth, not a flat tag scan.
fn read_subtree(
    reader: &mut DumpReader,
    tag: &str,
    attrs: HashMap<String, String>,
) -> Result<XmlNode, AppError> {
    let mut node = XmlNode {
        name: tag.to_string(),
        attrs,
        text: String::new(),
        children: Vec::new(),
    };
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_event(&mut buf) {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let child_attrs = collect_attrs(&start)?;
                let child = read_subtree(reader, &name, child_attrs)?;
                node.children.push(child);
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let child_attrs = collect_attrs(&start)?;
                node.children.push(XmlNode {
                    name,
                    attrs: child_attrs,
                    text: String::new(),
                    children: Vec::new(),
                });
            }
            Ok(Event::Text(text)) => {
                let decoded = text
                    .unescape()
                    .map_err(|e| AppError::DecodeFatal(format!("bad text node: {e}")))?;
                node.text.push_str(&decoded);
            }
            Ok(Event::CData(cdata)) => {
                node.text.push_str(&String::from_utf8_lossy(cdata.as_ref()));
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => {
                return Err(AppError::DecodeFatal(format!("unexpected EOF inside <{tag}>")));
            }
            Ok(_) => {}
            Err(e) => return Err(AppError::DecodeFatal(format!("decode error inside <{tag}>: {e}"))),
        }
    }

    Ok(node)
}
