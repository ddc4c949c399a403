//! Names and record types of a shared-folder state service.
//!
//! Listings live under `/localhost/<device>/chronoshare/<folder>/info`,
//! commands under `.../cmd`, and file content is published per device as
//! `/<device>/chronoshare/file/<hash>/<segment>`.

use crate::core::model::PageDescriptor;
use crate::core::naming::{NameComponent, ResourceName};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "chronoshare";

/// `{"files": [...], "more": "<next>"}`
pub const FILES: PageDescriptor<FileEntry> = PageDescriptor::new("files", "more");

/// `{"actions": [...], "more": "<next>"}`
pub const ACTIONS: PageDescriptor<ActionEntry> = PageDescriptor::new("actions", "more");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "seqNo")]
    pub seq_no: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    #[serde(default)]
    pub version: i64,
    pub owner: Owner,
    pub hash: String,
    pub timestamp: String,
    pub chmod: String,
    #[serde(rename = "segNum")]
    pub seg_num: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub hash: String,
    pub timestamp: String,
    pub chmod: String,
    #[serde(rename = "segNum")]
    pub seg_num: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub id: Owner,
    pub timestamp: String,
    pub filename: String,
    #[serde(default)]
    pub version: i64,
    pub action: ActionKind,
    #[serde(default)]
    pub update: Option<UpdateInfo>,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<serde_json::Value>,
}

/// Which history a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryScope {
    Folder(Option<String>),
    File(String),
}

/// Name builder for one user's view of one shared folder.
#[derive(Debug, Clone)]
pub struct SharedFolder {
    device: ResourceName,
    folder: String,
}

impl SharedFolder {
    pub fn new(device: ResourceName, folder: impl Into<String>) -> Self {
        Self { device, folder: folder.into() }
    }

    fn prefix(&self, kind: &str) -> ResourceName {
        ResourceName::from_components(["localhost"])
            .join(&self.device)
            .append(APP_NAME)
            .append(self.folder.as_str())
            .append(kind)
    }

    pub fn info_prefix(&self) -> ResourceName {
        self.prefix("info")
    }

    pub fn cmd_prefix(&self) -> ResourceName {
        self.prefix("cmd")
    }

    /// Base name of a recursive file listing; the page number is appended by the fetcher.
    pub fn files(&self, sub_folder: Option<&str>) -> ResourceName {
        let base = self.info_prefix().append("files").append("folder");
        match sub_folder.filter(|s| !s.is_empty()) {
            Some(s) => base.append(s),
            None => base,
        }
    }

    pub fn history(&self, scope: &HistoryScope) -> ResourceName {
        let base = self.info_prefix().append("actions");
        match scope {
            HistoryScope::Folder(Some(f)) if !f.is_empty() => base.append("folder").append(f.as_str()),
            HistoryScope::Folder(_) => base.append("folder"),
            HistoryScope::File(f) => base.append("file").append(f.as_str()),
        }
    }

    /// Single-shot restore of `file` at `version`, optionally pinned to a
    /// content hash. The version is a number component, like a segment.
    pub fn restore(&self, file: &str, version: u64, hash: Option<&[u8]>) -> ResourceName {
        let name = self
            .cmd_prefix()
            .append("restore")
            .append("file")
            .append(file)
            .append(NameComponent::segment(version));
        match hash {
            Some(h) => name.append(NameComponent::new(h.to_vec())),
            None => name,
        }
    }

    /// Base name of a file's content objects, without the segment number.
    pub fn content(&self, owner: &ResourceName, hash: &[u8]) -> ResourceName {
        owner.append(APP_NAME).append("file").append(NameComponent::new(hash.to_vec()))
    }
}

/// Parses a hex digest as printed in listings.
pub fn parse_hash(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 || hex.is_empty() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collection_fetcher::decode_page;

    fn shared() -> SharedFolder {
        SharedFolder::new("/ndn/ucla/alice".parse().unwrap(), "docs")
    }

    #[test]
    fn builds_state_service_names() {
        let s = shared();
        assert_eq!(s.files(None).to_uri(), "/localhost/ndn/ucla/alice/chronoshare/docs/info/files/folder");
        assert_eq!(
            s.files(Some("papers")).to_uri(),
            "/localhost/ndn/ucla/alice/chronoshare/docs/info/files/folder/papers"
        );
        assert_eq!(
            s.history(&HistoryScope::File("a.txt".into())).to_uri(),
            "/localhost/ndn/ucla/alice/chronoshare/docs/info/actions/file/a.txt"
        );
        assert_eq!(
            s.history(&HistoryScope::Folder(None)).to_uri(),
            "/localhost/ndn/ucla/alice/chronoshare/docs/info/actions/folder"
        );
        assert_eq!(
            s.restore("a.txt", 3, Some(&[0xab, 0x01])).to_uri(),
            "/localhost/ndn/ucla/alice/chronoshare/docs/cmd/restore/file/a.txt/%00%03/%AB%01"
        );
        let owner: ResourceName = "/ndn/ucla/bob".parse().unwrap();
        assert_eq!(s.content(&owner, &[0x0f]).to_uri(), "/ndn/ucla/bob/chronoshare/file/%0F");
    }

    #[test]
    fn hex_hashes_parse() {
        assert_eq!(parse_hash("ba0c"), Some(vec![0xba, 0x0c]));
        assert_eq!(parse_hash("abc"), None);
        assert_eq!(parse_hash("zz"), None);
        assert_eq!(parse_hash(""), None);
    }

    #[test]
    fn decodes_file_and_action_pages() {
        let name = shared().files(None).add_segment(0);
        let files = br#"{
            "files": [{
                "filename": "a.txt", "version": 2,
                "owner": {"userName": "/ndn/ucla/alice", "seqNo": 7},
                "hash": "ba0c", "timestamp": "2013-02-01T10:00:00", "chmod": "0644", "segNum": 3
            }],
            "more": "1"
        }"#;
        let (entries, more) = decode_page(&name, files, &FILES).unwrap();
        assert_eq!(entries[0].owner.seq_no, 7);
        assert_eq!(entries[0].seg_num, 3);
        assert_eq!(more, Some(1));

        let actions = br#"{
            "actions": [
                {"id": {"userName": "/ndn/ucla/alice", "seqNo": 1}, "timestamp": "t", "filename": "a.txt",
                 "version": 0, "action": "UPDATE",
                 "update": {"hash": "ba0c", "timestamp": "t", "chmod": "0644", "segNum": 1}},
                {"id": {"userName": "/ndn/ucla/alice", "seqNo": 2}, "timestamp": "t", "filename": "a.txt",
                 "version": 1, "action": "DELETE"}
            ]
        }"#;
        let (entries, more) = decode_page(&name, actions, &ACTIONS).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, ActionKind::Delete);
        assert!(entries[1].update.is_none());
        assert_eq!(more, None);
    }
}
