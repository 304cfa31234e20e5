//! RSS 2.0 feed with `content:encoded`, kept on disk between runs.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devbot_core::{ActionKind, FeedEntry};
use devbot_storage::write_atomically;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, info};

use crate::{Delivery, NotificationSink, Notice, NotifyError};

pub const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 +0000`.
const RFC1123Z: &str = "%a, %d %b %Y %H:%M:%S %z";

fn xml_err(err: impl std::fmt::Display) -> NotifyError {
    NotifyError::Xml(err.to_string())
}

pub fn format_pub_date(at: DateTime<Utc>) -> String {
    at.format(RFC1123Z).to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub content_encoded: String,
    pub pub_date: String,
    pub guid: String,
    pub category: String,
    pub author: String,
    pub source: String,
    pub comments: String,
}

impl RssItem {
    pub fn from_entry(entry: &FeedEntry) -> Self {
        Self {
            title: entry.title.clone(),
            link: entry.link.clone(),
            description: entry.summary.clone(),
            content_encoded: entry.content.clone(),
            pub_date: format_pub_date(entry.pub_date),
            guid: entry.guid.clone(),
            category: entry.category.clone(),
            author: entry.author.clone(),
            source: entry.source.clone(),
            comments: entry.comments.clone(),
        }
    }

    fn set(&mut self, tag: &str, value: String) {
        match tag {
            "title" => self.title = value,
            "link" => self.link = value,
            "description" => self.description = value,
            "content:encoded" => self.content_encoded = value,
            "pubDate" => self.pub_date = value,
            "guid" => self.guid = value,
            "category" => self.category = value,
            "author" => self.author = value,
            "source" => self.source = value,
            "comments" => self.comments = value,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssChannel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
    pub last_build_date: String,
    /// Newest first.
    pub items: Vec<RssItem>,
}

impl Default for RssChannel {
    fn default() -> Self {
        Self {
            title: String::new(),
            link: String::new(),
            description: String::new(),
            language: "en-us".to_string(),
            last_build_date: String::new(),
            items: Vec::new(),
        }
    }
}

impl RssChannel {
    fn set(&mut self, tag: &str, value: String) {
        match tag {
            "title" => self.title = value,
            "link" => self.link = value,
            "description" => self.description = value,
            "language" => self.language = value,
            "lastBuildDate" => self.last_build_date = value,
            _ => {}
        }
    }
}

/// Channel metadata used when a feed is created from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMeta {
    pub title: String,
    pub description: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssFeed {
    pub channel: RssChannel,
}

impl RssFeed {
    pub fn new(meta: &FeedMeta, now: DateTime<Utc>) -> Self {
        Self {
            channel: RssChannel {
                title: meta.title.clone(),
                link: meta.link.clone(),
                description: meta.description.clone(),
                last_build_date: format_pub_date(now),
                ..RssChannel::default()
            },
        }
    }

    pub fn items(&self) -> &[RssItem] {
        &self.channel.items
    }

    pub fn find_item(&self, guid: &str) -> Option<&RssItem> {
        self.channel.items.iter().find(|item| item.guid == guid)
    }

    /// Inserts `item` at the front, or rewrites the item with the same GUID.
    /// Returns whether the feed changed.
    pub fn upsert_item(&mut self, item: RssItem, now: DateTime<Utc>) -> bool {
        match self.channel.items.iter_mut().find(|existing| existing.guid == item.guid) {
            Some(existing) if *existing == item => false,
            Some(existing) => {
                *existing = item;
                self.channel.last_build_date = format_pub_date(now);
                true
            }
            None => {
                self.channel.items.insert(0, item);
                self.channel.last_build_date = format_pub_date(now);
                true
            }
        }
    }

    /// Keeps the newest `max_items` items.
    pub fn trim_to(&mut self, max_items: usize) -> usize {
        let before = self.channel.items.len();
        self.channel.items.truncate(max_items);
        before - self.channel.items.len()
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, NotifyError> {
        let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:content", CONTENT_NS));
        w.write_event(Event::Start(rss)).map_err(xml_err)?;
        write_start(&mut w, "channel")?;

        let channel = &self.channel;
        write_text_elem(&mut w, "title", &channel.title)?;
        write_text_elem(&mut w, "link", &channel.link)?;
        write_text_elem(&mut w, "description", &channel.description)?;
        write_text_elem(&mut w, "language", &channel.language)?;
        write_text_elem(&mut w, "lastBuildDate", &channel.last_build_date)?;

        for item in &channel.items {
            write_start(&mut w, "item")?;
            write_text_elem(&mut w, "title", &item.title)?;
            write_text_elem(&mut w, "link", &item.link)?;
            write_cdata_elem(&mut w, "description", &item.description)?;
            write_cdata_elem(&mut w, "content:encoded", &item.content_encoded)?;
            write_text_elem(&mut w, "pubDate", &item.pub_date)?;
            write_text_elem(&mut w, "guid", &item.guid)?;
            for (tag, value) in [
                ("category", &item.category),
                ("author", &item.author),
                ("source", &item.source),
                ("comments", &item.comments),
            ] {
                if !value.is_empty() {
                    write_text_elem(&mut w, tag, value)?;
                }
            }
            write_end(&mut w, "item")?;
        }

        write_end(&mut w, "channel")?;
        write_end(&mut w, "rss")?;

        let mut bytes = w.into_inner();
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_xml(xml: &[u8]) -> Result<Self, NotifyError> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut channel = RssChannel::default();
        let mut open: Vec<String> = Vec::new();
        let mut item: Option<RssItem> = None;
        let mut text = String::new();
        let mut saw_rss = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf).map_err(xml_err)? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    match name.as_str() {
                        "rss" => saw_rss = true,
                        "item" => item = Some(RssItem::default()),
                        _ => {}
                    }
                    text.clear();
                    open.push(name);
                }
                Event::Text(e) => text.push_str(&e.unescape().map_err(xml_err)?),
                Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
                Event::End(_) => {
                    let name = open.pop().unwrap_or_default();
                    let value = std::mem::take(&mut text);
                    if name == "item" {
                        if let Some(done) = item.take() {
                            channel.items.push(done);
                        }
                    } else if let Some(current) = item.as_mut() {
                        current.set(&name, value);
                    } else if open.last().map(String::as_str) == Some("channel") {
                        channel.set(&name, value);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !saw_rss {
            return Err(NotifyError::Xml("document has no <rss> element".to_string()));
        }

        // Older feeds were written without content:encoded.
        for item in &mut channel.items {
            if item.content_encoded.is_empty() && !item.description.is_empty() {
                item.content_encoded = item.description.clone();
            }
        }
        Ok(Self { channel })
    }

    /// Reads the feed at `path`, or starts an empty one when there is none yet.
    pub async fn load_or_create(path: &Path, meta: &FeedMeta, now: DateTime<Utc>) -> Result<Self, NotifyError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let feed = Self::from_xml(&bytes)?;
                debug!(path = %path.display(), items = feed.items().len(), "loaded rss feed");
                Ok(feed)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "starting new rss feed");
                Ok(Self::new(meta, now))
            }
            Err(source) => Err(NotifyError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), NotifyError> {
        let bytes = self.to_xml()?;
        write_atomically(path, &bytes)
            .await
            .map_err(|source| NotifyError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn write_start<W: Write>(w: &mut Writer<W>, tag: &str) -> Result<(), NotifyError> {
    w.write_event(Event::Start(BytesStart::new(tag))).map_err(xml_err)
}

fn write_end<W: Write>(w: &mut Writer<W>, tag: &str) -> Result<(), NotifyError> {
    w.write_event(Event::End(BytesEnd::new(tag))).map_err(xml_err)
}

fn write_text_elem<W: Write>(w: &mut Writer<W>, tag: &str, text: &str) -> Result<(), NotifyError> {
    write_start(w, tag)?;
    w.write_event(Event::Text(BytesText::new(text))).map_err(xml_err)?;
    write_end(w, tag)
}

/// CDATA cannot contain `]]>`, so such text is split across sections.
fn write_cdata_elem<W: Write>(w: &mut Writer<W>, tag: &str, text: &str) -> Result<(), NotifyError> {
    write_start(w, tag)?;
    let pieces: Vec<&str> = text.split("]]>").collect();
    let last = pieces.len() - 1;
    for (i, piece) in pieces.iter().enumerate() {
        let mut section = String::new();
        if i > 0 {
            section.push('>');
        }
        section.push_str(piece);
        if i < last {
            section.push_str("]]");
        }
        w.write_event(Event::CData(BytesCData::new(section))).map_err(xml_err)?;
    }
    write_end(w, tag)
}

/// Feed sink: every CREATE, UPDATE and CLOSE rewrites the record's item.
#[derive(Debug)]
pub struct RssSink {
    feed: RssFeed,
    path: PathBuf,
    max_items: usize,
    dirty: bool,
}

impl RssSink {
    pub fn new(feed: RssFeed, path: impl Into<PathBuf>, max_items: usize) -> Self {
        Self {
            feed,
            path: path.into(),
            max_items,
            dirty: false,
        }
    }

    pub async fn open(path: impl Into<PathBuf>, meta: &FeedMeta, max_items: usize) -> Result<Self, NotifyError> {
        let path = path.into();
        let feed = RssFeed::load_or_create(&path, meta, Utc::now()).await?;
        Ok(Self::new(feed, path, max_items))
    }

    pub fn feed(&self) -> &RssFeed {
        &self.feed
    }
}

#[async_trait]
impl NotificationSink for RssSink {
    fn name(&self) -> &'static str {
        "rss"
    }

    async fn publish(&mut self, notice: Notice<'_>) -> Result<Delivery, NotifyError> {
        let kind = notice.action.kind;
        if kind == ActionKind::Skip {
            return Ok(Delivery::untouched());
        }
        let item = RssItem::from_entry(notice.entry);
        if self.feed.upsert_item(item, Utc::now()) {
            self.dirty = true;
            debug!(guid = %notice.entry.guid, action = %kind, "rss item written");
        }
        Ok(Delivery {
            handle: Some(notice.entry.guid.clone()),
            closed: kind == ActionKind::Close,
        })
    }

    async fn finish(&mut self) -> Result<(), NotifyError> {
        let trimmed = self.feed.trim_to(self.max_items);
        if !self.dirty && trimmed == 0 {
            debug!(path = %self.path.display(), "rss feed unchanged");
            return Ok(());
        }
        self.feed.save(&self.path).await?;
        self.dirty = false;
        info!(path = %self.path.display(), items = self.feed.items().len(), trimmed, "saved rss feed");
        Ok(())
    }
}
