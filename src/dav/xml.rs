//! WebDAV XML document construction: multistatus listings and the
//! lockdiscovery property returned by the non-enforcing LOCK stub.

use chrono::{SecondsFormat, TimeZone, Utc};

/// Escape text for XML element content.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode a normalized path for use as an href, segment by segment.
pub fn encode_path(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    path.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// RFC 1123 date for `getlastmodified`.
pub fn http_date(secs: i64) -> String {
    let dt = Utc.timestamp_opt(secs, 0).single().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// RFC 3339 date for `creationdate`.
pub fn iso_date(secs: i64) -> String {
    let dt = Utc.timestamp_opt(secs, 0).single().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One entry of a multistatus document.
#[derive(Debug, Clone)]
pub struct DavEntry {
    /// Normalized path; the href is derived from it ("/" for root,
    /// trailing "/" appended for directories).
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub updated_at: i64,
}

impl DavEntry {
    fn href(&self) -> String {
        if self.path == "/" {
            return "/".to_string();
        }
        let enc = encode_path(&self.path);
        if self.is_dir {
            format!("{}/", enc)
        } else {
            enc
        }
    }

    fn display_name(&self) -> &str {
        if self.path == "/" {
            return "/";
        }
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Render a 207 multistatus body for a set of entries.
pub fn multistatus(entries: &[DavEntry]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n");
    for e in entries {
        let resourcetype = if e.is_dir { "<D:collection/>" } else { "" };
        out.push_str(&format!(
            "<D:response>\n\
             <D:href>{href}</D:href>\n\
             <D:propstat>\n\
             <D:prop>\n\
             <D:displayname>{name}</D:displayname>\n\
             <D:getcontentlength>{len}</D:getcontentlength>\n\
             <D:resourcetype>{rt}</D:resourcetype>\n\
             <D:getlastmodified>{modified}</D:getlastmodified>\n\
             <D:creationdate>{created}</D:creationdate>\n\
             </D:prop>\n\
             <D:status>HTTP/1.1 200 OK</D:status>\n\
             </D:propstat>\n\
             </D:response>\n",
            href = e.href(),
            name = escape_text(e.display_name()),
            len = e.size,
            rt = resourcetype,
            modified = http_date(e.updated_at),
            created = iso_date(e.updated_at),
        ));
    }
    out.push_str("</D:multistatus>\n");
    out
}

/// Render the lockdiscovery property for an unconditionally-granted
/// exclusive, infinite-depth write lock.
pub fn lock_discovery(owner: &str, timeout: &str, token: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <D:prop xmlns:D=\"DAV:\">\n\
         <D:lockdiscovery>\n\
         <D:activelock>\n\
         <D:locktype><D:write/></D:locktype>\n\
         <D:lockscope><D:exclusive/></D:lockscope>\n\
         <D:depth>infinity</D:depth>\n\
         <D:owner>{owner}</D:owner>\n\
         <D:timeout>{timeout}</D:timeout>\n\
         <D:locktoken><D:href>{token}</D:href></D:locktoken>\n\
         </D:activelock>\n\
         </D:lockdiscovery>\n\
         </D:prop>\n",
        owner = escape_text(owner),
        timeout = escape_text(timeout),
        token = escape_text(token),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_xml_special_characters() {
        assert_eq!(escape_text("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
    }

    #[test]
    fn directory_hrefs_end_in_slash_and_root_is_special() {
        let dir = DavEntry { path: "/docs".into(), is_dir: true, size: 0, updated_at: 0 };
        let file = DavEntry { path: "/docs/a.txt".into(), is_dir: false, size: 3, updated_at: 0 };
        let root = DavEntry { path: "/".into(), is_dir: true, size: 0, updated_at: 0 };
        assert_eq!(dir.href(), "/docs/");
        assert_eq!(file.href(), "/docs/a.txt");
        assert_eq!(root.href(), "/");
        assert_eq!(root.display_name(), "/");
        assert_eq!(file.display_name(), "a.txt");
    }

    #[test]
    fn multistatus_marks_collections() {
        let entries = vec![
            DavEntry { path: "/a".into(), is_dir: true, size: 0, updated_at: 1_700_000_000 },
            DavEntry { path: "/a/b.txt".into(), is_dir: false, size: 5, updated_at: 1_700_000_000 },
        ];
        let doc = multistatus(&entries);
        assert!(doc.contains("<D:multistatus"));
        assert!(doc.contains("<D:href>/a/</D:href>"));
        assert!(doc.contains("<D:href>/a/b.txt</D:href>"));
        assert!(doc.contains("<D:collection/>"));
        assert!(doc.contains("<D:getcontentlength>5</D:getcontentlength>"));
        assert_eq!(doc.matches("<D:status>HTTP/1.1 200 OK</D:status>").count(), 2);
    }

    #[test]
    fn hrefs_encode_reserved_characters() {
        let e = DavEntry { path: "/dir with space/f#1.txt".into(), is_dir: false, size: 0, updated_at: 0 };
        assert_eq!(e.href(), "/dir%20with%20space/f%231.txt");
    }

    #[test]
    fn lock_discovery_carries_token_and_timeout() {
        let doc = lock_discovery("admin", "Second-3600", "urn:uuid:1234");
        assert!(doc.contains("<D:lockscope><D:exclusive/></D:lockscope>"));
        assert!(doc.contains("<D:depth>infinity</D:depth>"));
        assert!(doc.contains("<D:timeout>Second-3600</D:timeout>"));
        assert!(doc.contains("<D:locktoken><D:href>urn:uuid:1234</D:href></D:locktoken>"));
    }

    #[test]
    fn date_rendering() {
        assert_eq!(http_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(iso_date(0), "1970-01-01T00:00:00Z");
    }
}
