//! In-memory decoy filesystem served to ordinary web visitors.
//!
//! A [`VirtualFileStore`] is built from a decoded CPIO archive and answers
//! HTTP-shaped GET requests. The reserved entry `/.config` configures the
//! store (index files, hidden paths, per-status response overrides, MIME
//! overrides) and is itself never servable or mutable from the outside.

pub mod http;
pub mod path;

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::archive::{self, ArchiveEntry, FileAttr, Format};
use crate::error::{Error, Result};
use crate::ini::Ini;

/// Reserved in-archive configuration entry.
pub const CONFIG_PATH: &str = "/.config";

/// One stored file. Hidden files stay in the store but are never served.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    pub attr: FileAttr,
    pub content: Vec<u8>,
    pub visible: bool,
}

/// Settings derived from `/.config`. Rebuilt in full on every (re)load,
/// never merged incrementally.
#[derive(Debug, Default)]
struct StoreConfig {
    index: Vec<String>,
    heads: HashMap<u16, String>,
    bodies: HashMap<u16, String>,
    mime: HashMap<String, String>,
}

struct Inner {
    files: BTreeMap<String, VirtualFile>,
    config: StoreConfig,
    format: Format,
}

/// The decoy web store. Read-mostly after startup; mutation takes the
/// write lock against concurrent responders.
pub struct VirtualFileStore {
    inner: RwLock<Inner>,
    web_timeout: u64,
}

impl VirtualFileStore {
    /// An empty store advertising the given keep-alive timeout (seconds;
    /// zero disables keep-alive headers).
    pub fn new(web_timeout: u64) -> Self {
        VirtualFileStore {
            inner: RwLock::new(Inner {
                files: BTreeMap::new(),
                config: StoreConfig::default(),
                format: Format::Newc,
            }),
            web_timeout,
        }
    }

    /// Open an archive file and load it. An unreadable file is a startup
    /// failure; a readable file that decodes to nothing yields an empty
    /// store.
    pub fn open(archive_path: impl AsRef<Path>, web_timeout: u64) -> Result<Self> {
        let file = File::open(archive_path.as_ref()).map_err(|e| {
            Error::archive(format!("{}: {}", archive_path.as_ref().display(), e))
        })?;
        let decoded = archive::read_archive(std::io::BufReader::new(file))?;
        let store = Self::new(web_timeout);
        store.load(decoded.entries, decoded.format);
        info!(
            files = store.len(),
            "loaded decoy archive {}",
            archive_path.as_ref().display()
        );
        Ok(store)
    }

    /// Replace the store contents with the given entries and re-derive the
    /// configuration from `/.config`.
    pub fn load(&self, entries: Vec<ArchiveEntry>, format: Option<Format>) {
        let mut inner = self.inner.write();
        if let Some(format) = format {
            inner.format = format;
        }
        inner.files.clear();
        for entry in entries {
            if entry.is_trailer() {
                continue;
            }
            inner.files.insert(
                path::normalize(&entry.path),
                VirtualFile {
                    attr: entry.attr,
                    content: entry.content.unwrap_or_default(),
                    visible: true,
                },
            );
        }
        refresh_config(&mut inner);
    }

    /// Number of stored entries, hidden ones included.
    pub fn len(&self) -> usize {
        self.inner.read().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().files.is_empty()
    }

    /// Fetch a visible file. `/.config` is never resolvable here; an empty
    /// or root path resolves to the first configured index file present.
    pub fn get(&self, request_path: &str) -> Option<(FileAttr, Vec<u8>)> {
        let inner = self.inner.read();
        resolve(&inner, request_path).map(|(_, file)| (file.attr, file.content.clone()))
    }

    /// Insert or replace a file. Returns false for the reserved config
    /// path. Replacement keeps the existing visibility flag.
    pub fn put(&self, request_path: &str, attr: FileAttr, content: Vec<u8>) -> bool {
        let key = path::normalize(request_path);
        if key == CONFIG_PATH {
            return false;
        }
        let mut inner = self.inner.write();
        match inner.files.get_mut(&key) {
            Some(file) => {
                file.attr = attr;
                file.content = content;
            }
            None => {
                inner.files.insert(
                    key,
                    VirtualFile {
                        attr,
                        content,
                        visible: true,
                    },
                );
                refresh_config(&mut inner);
            }
        }
        true
    }

    /// Remove a file. Returns false for `/.config` and unknown paths.
    pub fn delete(&self, request_path: &str) -> bool {
        let key = path::normalize(request_path);
        if key == CONFIG_PATH {
            return false;
        }
        self.inner.write().files.remove(&key).is_some()
    }

    /// Synthesize the HTTP response for one request.
    pub fn respond(&self, method: &str, request_path: &str) -> Vec<u8> {
        let inner = self.inner.read();

        if method != "GET" {
            return http::error_response(
                400,
                inner.config.heads.get(&400).map(String::as_str),
                inner.config.bodies.get(&400).map(String::as_str),
                self.web_timeout,
            );
        }

        match self.content_response(&inner, request_path) {
            Some(response) => response,
            None => http::error_response(
                404,
                inner.config.heads.get(&404).map(String::as_str),
                inner.config.bodies.get(&404).map(String::as_str),
                self.web_timeout,
            ),
        }
    }

    fn content_response(&self, inner: &Inner, request_path: &str) -> Option<Vec<u8>> {
        let (key, file) = resolve(inner, request_path)?;

        if file.attr.is_regular() {
            return Some(http::ok_response(
                inner.config.heads.get(&200).map(String::as_str),
                mime_for(inner, &key),
                self.web_timeout,
                &file.content,
            ));
        }

        if file.attr.is_symlink() && !file.content.is_empty() {
            let target = String::from_utf8_lossy(&file.content);
            return Some(http::redirect_response(
                inner.config.heads.get(&301).map(String::as_str),
                self.web_timeout,
                target.trim_end_matches('\0'),
            ));
        }

        if file.attr.is_dir() {
            for index in &inner.config.index {
                let candidate = path::normalize(&format!("{key}/{index}"));
                if let Some(hit) = inner.files.get(&candidate).filter(|f| f.visible) {
                    if hit.attr.is_regular() {
                        return Some(http::ok_response(
                            inner.config.heads.get(&200).map(String::as_str),
                            mime_for(inner, &candidate),
                            self.web_timeout,
                            &hit.content,
                        ));
                    }
                }
            }
        }

        None
    }

    /// Write the store back out as an archive in its original variant,
    /// `/.config` and hidden entries included.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let inner = self.inner.read();
        let entries: Vec<ArchiveEntry> = inner
            .files
            .iter()
            .map(|(key, file)| ArchiveEntry {
                path: key.clone(),
                attr: FileAttr {
                    size: file.content.len() as u32,
                    ..file.attr
                },
                content: if file.content.is_empty() {
                    None
                } else {
                    Some(file.content.clone())
                },
            })
            .collect();
        archive::write_archive(writer, inner.format, &entries)
    }
}

/// Resolve a request path to a visible entry and its store key.
fn resolve<'a>(inner: &'a Inner, request_path: &str) -> Option<(String, &'a VirtualFile)> {
    let mut key = path::normalize(request_path);

    if key == CONFIG_PATH {
        return None;
    }

    if key.is_empty() || key == "/" {
        key = inner
            .config
            .index
            .iter()
            .map(|index| path::normalize(index))
            .find(|candidate| inner.files.contains_key(candidate))?;
    }

    let file = inner.files.get(&key).filter(|f| f.visible)?;
    Some((key, file))
}

fn mime_for<'a>(inner: &'a Inner, key: &str) -> &'a str {
    if key == "/" {
        return "text/html";
    }
    if let Some(ext) = path::extension(key) {
        if let Some(mime) = inner.config.mime.get(ext) {
            return mime;
        }
        if let Some(mime) = http::builtin_mime(ext) {
            return mime;
        }
    }
    "application/octet-stream"
}

/// Re-derive the store configuration from `/.config`. The previous
/// configuration is fully replaced.
fn refresh_config(inner: &mut Inner) {
    inner.config = StoreConfig::default();

    let Some(config_file) = inner.files.get(CONFIG_PATH) else {
        return;
    };
    let doc = Ini::parse_bytes(&config_file.content);

    inner.config.index = doc.numbered("index");

    for hidden in doc.numbered("hide") {
        let key = path::normalize(&hidden);
        if let Some(file) = inner.files.get_mut(&key) {
            file.visible = false;
            debug!("hiding {key}");
        }
    }

    for (section, by_code) in [("head", true), ("error", false)] {
        let mut table = HashMap::new();
        for (code, source) in doc.pairs(section) {
            let Ok(status) = code.parse::<u16>() else {
                continue;
            };
            let source_key = path::normalize(source);
            if let Some(file) = inner.files.get(&source_key) {
                if !file.content.is_empty() {
                    table.insert(status, String::from_utf8_lossy(&file.content).into_owned());
                }
            }
        }
        if by_code {
            inner.config.heads = table;
        } else {
            inner.config.bodies = table;
        }
    }

    for (mime, extensions) in doc.pairs("mime") {
        for ext in extensions.split([';', ',']) {
            if !ext.is_empty() {
                inner.config.mime.insert(ext.to_string(), mime.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::mode;

    fn config_entry(text: &str) -> ArchiveEntry {
        ArchiveEntry::file("/.config", text.as_bytes().to_vec())
    }

    fn store_with(entries: Vec<ArchiveEntry>) -> VirtualFileStore {
        let store = VirtualFileStore::new(0);
        store.load(entries, None);
        store
    }

    fn body_of(response: &[u8]) -> &[u8] {
        let pos = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("no header/body separator");
        &response[pos + 4..]
    }

    #[test]
    fn test_index_fallback_for_root() {
        // Scenario: "/" resolves to the first configured index file
        let store = store_with(vec![
            config_entry("[index]\n0=index.html\n"),
            ArchiveEntry::file("/index.html", b"<h1>home</h1>".to_vec()),
        ]);
        let (_, content) = store.get("/").expect("index fallback");
        assert_eq!(content, b"<h1>home</h1>");
        assert_eq!(store.get("").unwrap().1, b"<h1>home</h1>");

        let resp = store.respond("GET", "/");
        assert_eq!(body_of(&resp), b"<h1>home</h1>");
    }

    #[test]
    fn test_hidden_file_not_served_but_retained() {
        // Scenario: hidden entries 404 yet stay in the store
        let store = store_with(vec![
            config_entry("[hide]\n0=/secretfile\n"),
            ArchiveEntry::file("/secretfile", b"classified".to_vec()),
            ArchiveEntry::file("/public", b"open".to_vec()),
        ]);
        assert!(store.get("/secretfile").is_none());
        assert!(store.get("/public").is_some());
        // hidden, not deleted
        assert_eq!(store.len(), 3);
        let resp = store.respond("GET", "/secretfile");
        assert!(resp.starts_with(b"HTTP/1.1 404"));
    }

    #[test]
    fn test_config_never_resolvable_or_mutable() {
        let store = store_with(vec![config_entry("[index]\n0=index.html\n")]);
        assert!(store.get("/.config").is_none());
        assert!(store.get("/a/../.config").is_none());
        assert!(!store.put("/.config", FileAttr::regular(1), vec![b'x']));
        assert!(!store.delete("/.config"));
        assert!(store.respond("GET", "/.config").starts_with(b"HTTP/1.1 404"));
    }

    #[test]
    fn test_delete_vs_hide() {
        let store = store_with(vec![ArchiveEntry::file("/a", b"a".to_vec())]);
        assert_eq!(store.len(), 1);
        assert!(store.delete("/a"));
        assert_eq!(store.len(), 0);
        assert!(!store.delete("/a"));
    }

    #[test]
    fn test_put_then_get() {
        let store = store_with(vec![]);
        assert!(store.put("/new.txt", FileAttr::regular(3), b"abc".to_vec()));
        let (attr, content) = store.get("/new.txt").unwrap();
        assert!(attr.is_regular());
        assert_eq!(content, b"abc");
    }

    #[test]
    fn test_error_body_override() {
        let store = store_with(vec![
            config_entry("[error]\n404=/404.html\n"),
            ArchiveEntry::file("/404.html", b"<h1>custom miss</h1>".to_vec()),
        ]);
        let resp = store.respond("GET", "/nowhere");
        assert!(resp.starts_with(b"HTTP/1.1 404 Not Found"));
        assert_eq!(body_of(&resp), b"<h1>custom miss</h1>");
    }

    #[test]
    fn test_head_override() {
        let store = store_with(vec![
            config_entry("[head]\n200=/h200\n"),
            ArchiveEntry::file("/h200", b"HTTP/1.1 200 Fancy".to_vec()),
            ArchiveEntry::file("/page", b"body".to_vec()),
        ]);
        let resp = store.respond("GET", "/page");
        assert!(resp.starts_with(b"HTTP/1.1 200 Fancy\r\n"));
    }

    #[test]
    fn test_mime_override_and_fallbacks() {
        let store = store_with(vec![
            config_entry("[mime]\napplication/wasm=wasm\n"),
            ArchiveEntry::file("/m.wasm", vec![0]),
            ArchiveEntry::file("/p.png", vec![1]),
            ArchiveEntry::file("/blob", vec![2]),
        ]);
        let resp = String::from_utf8(store.respond("GET", "/m.wasm")).unwrap();
        assert!(resp.contains("Content-Type: application/wasm\r\n"));
        let resp = String::from_utf8(store.respond("GET", "/p.png")).unwrap();
        assert!(resp.contains("Content-Type: image/png\r\n"));
        let resp = String::from_utf8(store.respond("GET", "/blob")).unwrap();
        assert!(resp.contains("Content-Type: application/octet-stream\r\n"));
    }

    #[test]
    fn test_directory_serves_index() {
        let mut dir = ArchiveEntry {
            path: "/docs".to_string(),
            attr: FileAttr::directory(),
            content: None,
        };
        dir.attr.size = 0;
        let store = store_with(vec![
            config_entry("[index]\n0=index.html\n"),
            dir,
            ArchiveEntry::file("/docs/index.html", b"docs home".to_vec()),
        ]);
        let resp = store.respond("GET", "/docs");
        assert!(resp.starts_with(b"HTTP/1.1 200"));
        assert_eq!(body_of(&resp), b"docs home");
    }

    #[test]
    fn test_symlink_redirects() {
        let store = store_with(vec![ArchiveEntry {
            path: "/old".to_string(),
            attr: FileAttr::symlink(4),
            content: Some(b"/new".to_vec()),
        }]);
        let resp = String::from_utf8(store.respond("GET", "/old")).unwrap();
        assert!(resp.starts_with("HTTP/1.1 301"));
        assert!(resp.contains("Location: /new\r\n"));
    }

    #[test]
    fn test_non_get_is_bad_request() {
        let store = store_with(vec![ArchiveEntry::file("/a", b"a".to_vec())]);
        assert!(store.respond("POST", "/a").starts_with(b"HTTP/1.1 400"));
    }

    #[test]
    fn test_query_string_ignored() {
        let store = store_with(vec![ArchiveEntry::file("/page", b"content".to_vec())]);
        let resp = store.respond("GET", "/page?session=1");
        assert_eq!(body_of(&resp), b"content");
    }

    #[test]
    fn test_keepalive_header_follows_timeout() {
        let store = VirtualFileStore::new(45);
        store.load(vec![ArchiveEntry::file("/a", b"x".to_vec())], None);
        let resp = String::from_utf8(store.respond("GET", "/a")).unwrap();
        assert!(resp.contains("Keep-Alive: timeout=45\r\n"));
    }

    #[test]
    fn test_save_roundtrip() {
        let store = store_with(vec![
            config_entry("[hide]\n0=/hid\n"),
            ArchiveEntry::file("/hid", b"h".to_vec()),
            ArchiveEntry::file("/vis", b"v".to_vec()),
        ]);
        let mut buf = Vec::new();
        store.save(&mut buf).unwrap();

        let decoded = archive::read_archive(buf.as_slice()).unwrap();
        let paths: Vec<_> = decoded.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/.config", "/hid", "/vis"]);
        // reloading re-applies the hide list
        let reloaded = VirtualFileStore::new(0);
        reloaded.load(decoded.entries, decoded.format);
        assert!(reloaded.get("/hid").is_none());
        assert!(reloaded.get("/vis").is_some());
    }

    #[test]
    fn test_hidden_index_candidate_blocks_fallback() {
        let store = store_with(vec![
            config_entry("[index]\n0=index.html\n[hide]\n0=/index.html\n"),
            ArchiveEntry::file("/index.html", b"home".to_vec()),
        ]);
        // the candidate exists, so it is selected, then fails the
        // visibility check rather than falling through to another name
        assert!(store.get("/").is_none());
    }

    #[test]
    fn test_mode_constants() {
        assert_eq!(mode::REG & mode::TYPE_MASK, mode::REG);
        assert_eq!(mode::DIR | 0o755, FileAttr::directory().mode);
    }
}
