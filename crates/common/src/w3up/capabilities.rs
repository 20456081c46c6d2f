use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::linked_data::Cid;

pub const STORE_ADD: &str = "store/add";
pub const UPLOAD_ADD: &str = "upload/add";

/// Caveats of `store/add`: register one archive with the space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAddCaveats {
    pub link: Cid,
    pub size: u64,
}

/// Caveats of `upload/add`: tie a content root to the shards holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAddCaveats {
    pub root: Cid,
    pub shards: Vec<Cid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    /// The service already holds the bytes
    Done,
    /// The bytes must be sent to the returned URL
    Upload,
}

/// Successful result of `store/add`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAddOk {
    pub status: StoreStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated: Option<u64>,
}

impl StoreAddOk {
    pub fn done() -> Self {
        Self {
            status: StoreStatus::Done,
            url: None,
            headers: BTreeMap::new(),
            link: None,
            with: None,
            allocated: None,
        }
    }

    pub fn upload(url: impl Into<String>, headers: BTreeMap<String, String>) -> Self {
        Self {
            status: StoreStatus::Upload,
            url: Some(url.into()),
            headers,
            ..Self::done()
        }
    }
}

/// Successful result of `upload/add`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAddOk {
    pub root: Cid,
    #[serde(default)]
    pub shards: Vec<Cid>,
}
