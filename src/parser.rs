use crate::models::{PageType, WikiPage};
use anyhow::{bail, Context, Result};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Where a dump is read from. Paths ending in `.bz2` are decompressed on the fly.
pub enum WikiSource {
    Path(PathBuf),
    Reader(Box<dyn Read + Send>),
}

impl WikiSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        WikiSource::Path(path.into())
    }

    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        WikiSource::Reader(Box::new(reader))
    }

    fn open(self) -> Result<Box<dyn BufRead + Send>> {
        match self {
            WikiSource::Path(path) => {
                let file = File::open(&path)
                    .with_context(|| format!("Failed to open wiki dump at: {}", path.display()))?;
                let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");
                if is_bz2 {
                    Ok(Box::new(BufReader::with_capacity(
                        READ_BUFFER_SIZE,
                        MultiBzDecoder::new(file),
                    )))
                } else {
                    Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
                }
            }
            WikiSource::Reader(reader) => {
                Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, reader)))
            }
        }
    }
}

impl fmt::Display for WikiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WikiSource::Path(path) => write!(f, "{}", path.display()),
            WikiSource::Reader(_) => write!(f, "<stream>"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Title,
    Ns,
    Id,
    Timestamp,
    Text,
}

#[derive(Default)]
struct PageBuilder {
    title: String,
    ns: String,
    id: String,
    timestamp: String,
    text: Option<String>,
    redirect: Option<String>,
}

impl PageBuilder {
    fn push(&mut self, field: Field, value: &str) {
        match field {
            Field::Title => self.title.push_str(value),
            Field::Ns => self.ns.push_str(value),
            Field::Id => self.id.push_str(value),
            Field::Timestamp => self.timestamp.push_str(value),
            Field::Text => self.text.get_or_insert_with(String::new).push_str(value),
            Field::None => {}
        }
    }

    fn build(self) -> Result<WikiPage> {
        let id: u32 = self
            .id
            .trim()
            .parse()
            .with_context(|| format!("Invalid or missing page id for: {:?}", self.title))?;
        let ns = self.ns.trim().parse::<i32>().ok();

        let page_type = match self.redirect {
            Some(target) => PageType::Redirect(target),
            None if ns.unwrap_or(0) != 0 => PageType::Special,
            None => PageType::Article,
        };

        Ok(WikiPage {
            id,
            title: self.title,
            ns,
            page_type,
            timestamp: (!self.timestamp.is_empty()).then_some(self.timestamp),
            text: self.text,
        })
    }
}

/// Streams `<page>` records out of a MediaWiki XML dump without buffering the file.
pub struct WikiReader {
    reader: Reader<Box<dyn BufRead + Send>>,
    buf: Vec<u8>,
    finished: bool,
}

impl WikiReader {
    pub fn from_source(source: WikiSource) -> Result<Self> {
        let mut reader = Reader::from_reader(source.open()?);
        reader.trim_text(true);
        Ok(Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
            finished: false,
        })
    }

    /// Reads the next page. `Ok(None)` marks a clean end of the dump.
    pub fn next_page(&mut self) -> Result<Option<WikiPage>> {
        if self.finished {
            return Ok(None);
        }

        let mut page: Option<PageBuilder> = None;
        let mut in_revision = false;
        let mut field = Field::None;

        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .with_context(|| {
                    format!(
                        "Malformed XML near byte {}",
                        self.reader.buffer_position()
                    )
                })?;

            match event {
                Event::Start(e) => match e.name().as_ref() {
                    b"page" => page = Some(PageBuilder::default()),
                    b"revision" => in_revision = true,
                    b"title" => field = Field::Title,
                    b"ns" => field = Field::Ns,
                    b"id" if !in_revision => field = Field::Id,
                    b"timestamp" if in_revision => field = Field::Timestamp,
                    b"text" => field = Field::Text,
                    b"redirect" => {
                        if let Some(builder) = page.as_mut() {
                            builder.redirect = redirect_target(&e)?;
                        }
                    }
                    _ => field = Field::None,
                },
                Event::Empty(e) => {
                    if e.name().as_ref() == b"redirect" {
                        if let Some(builder) = page.as_mut() {
                            builder.redirect = redirect_target(&e)?;
                        }
                    }
                }
                Event::Text(e) => {
                    if let Some(builder) = page.as_mut() {
                        if field != Field::None {
                            let value = e.unescape().context("Invalid escape in page text")?;
                            builder.push(field, &value);
                        }
                    }
                }
                Event::CData(e) => {
                    if let Some(builder) = page.as_mut() {
                        if field != Field::None {
                            let value = String::from_utf8_lossy(&e);
                            builder.push(field, &value);
                        }
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"page" => {
                        if let Some(builder) = page.take() {
                            return builder.build().map(Some);
                        }
                    }
                    b"revision" => {
                        in_revision = false;
                        field = Field::None;
                    }
                    _ => field = Field::None,
                },
                Event::Eof => {
                    self.finished = true;
                    if page.is_some() {
                        bail!("Dump ended inside an unterminated <page>");
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

fn redirect_target(e: &BytesStart<'_>) -> Result<Option<String>> {
    let attr = e
        .try_get_attribute("title")
        .context("Invalid attribute on <redirect>")?;
    match attr {
        Some(attr) => Ok(Some(
            attr.unescape_value()
                .context("Invalid escape in redirect title")?
                .into_owned(),
        )),
        None => Ok(None),
    }
}
