// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 键值存储适配层
//!
//! POST 请求体中的 `key=value` 被记录到一个持久化的键值存储中，语义是“不存在才插入”：
//! 已有的键永远不会被覆盖。
//!
//! 存储由嵌入式数据库 `sled` 提供。同一路径的数据库在进程内只打开一次并在所有
//! [`SledStoreBackend`] 之间共享；每个请求打开一个新的 [`SledStore`] 句柄，请求结束时关闭。
//! 插入使用 `compare_and_swap`，因此并发的请求（包括不同服务端实例）对同一个键只会有一次写入成功。
//!
//! 每个值是一条 JSON 编码的 [`StoredRecord`]。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, error, info};
use serde_derive::{Deserialize, Serialize};

use crate::exception::Exception;

/// POST 记录所在的树
const TREE_NAME: &str = "post";

lazy_static! {
    /// 进程内已打开的数据库。`sled` 对数据库目录持有排他锁，同一路径不能重复打开。
    static ref DATABASES: Mutex<HashMap<PathBuf, sled::Db>> = Mutex::new(HashMap::new());
}

/// `insert_if_absent` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// 存储中的一条记录
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredRecord {
    key: String,
    value: String,
    /// RFC 3339 格式的写入时间
    stored_at: String,
}

impl StoredRecord {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn stored_at(&self) -> &str {
        &self.stored_at
    }
}

/// 一个已打开的存储句柄
#[cfg_attr(test, mockall::automock)]
pub trait KvStore {
    fn lookup(&self, key: &str) -> Result<Option<String>, Exception>;
    fn insert_if_absent(&mut self, key: &str, value: &str) -> Result<InsertOutcome, Exception>;
}

/// 按名称打开存储句柄的后端。返回的句柄在析构时关闭。
pub trait StoreBackend: Send + Sync {
    fn open(&self, id: u64) -> Result<Box<dyn KvStore + '_>, Exception>;
}

pub struct SledStoreBackend {
    path: PathBuf,
}

impl SledStoreBackend {
    /// 数据库在第一次 `open` 时才会创建。
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn database(&self, id: u64) -> Result<sled::Db, Exception> {
        if let Err(e) = fs::create_dir_all(&self.path) {
            error!("[ID{}]无法创建存储目录{}：{}", id, self.path.display(), e);
            return Err(Exception::StoreUnavailable);
        }
        let key = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());

        let mut databases = DATABASES.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(db) = databases.get(&key) {
            return Ok(db.clone());
        }
        match sled::open(&key) {
            Ok(db) => {
                info!("存储{}已打开", key.display());
                databases.insert(key, db.clone());
                Ok(db)
            }
            Err(e) => {
                error!("[ID{}]无法打开存储{}：{}", id, key.display(), e);
                Err(Exception::StoreUnavailable)
            }
        }
    }
}

impl StoreBackend for SledStoreBackend {
    fn open(&self, id: u64) -> Result<Box<dyn KvStore + '_>, Exception> {
        let db = self.database(id)?;
        match db.open_tree(TREE_NAME) {
            Ok(tree) => {
                debug!("[ID{}]存储{}已打开", id, self.path.display());
                Ok(Box::new(SledStore { tree, id }))
            }
            Err(e) => {
                error!("[ID{}]无法打开存储{}中的{}：{}", id, self.path.display(), TREE_NAME, e);
                Err(Exception::StoreUnavailable)
            }
        }
    }
}

/// 单个请求使用的存储句柄
pub struct SledStore {
    tree: sled::Tree,
    id: u64,
}

impl KvStore for SledStore {
    fn lookup(&self, key: &str) -> Result<Option<String>, Exception> {
        let raw = match self.tree.get(key.as_bytes()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                error!("[ID{}]读取存储失败：{}", self.id, e);
                return Err(Exception::StoreUnavailable);
            }
        };
        match serde_json::from_slice::<StoredRecord>(&raw) {
            Ok(record) => Ok(Some(record.value)),
            Err(e) => {
                error!("[ID{}]键{}对应的记录已损坏：{}", self.id, key, e);
                Err(Exception::StoreUnavailable)
            }
        }
    }

    fn insert_if_absent(&mut self, key: &str, value: &str) -> Result<InsertOutcome, Exception> {
        let record = StoredRecord {
            key: key.to_string(),
            value: value.to_string(),
            stored_at: Utc::now().to_rfc3339(),
        };
        let encoded = match serde_json::to_vec(&record) {
            Ok(v) => v,
            Err(e) => {
                error!("[ID{}]序列化记录失败：{}", self.id, e);
                return Err(Exception::StoreWriteFailed);
            }
        };
        let swapped = match self
            .tree
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(encoded))
        {
            Ok(swapped) => swapped,
            Err(e) => {
                error!("[ID{}]写入存储失败：{}", self.id, e);
                return Err(Exception::StoreWriteFailed);
            }
        };
        if swapped.is_err() {
            return Ok(InsertOutcome::AlreadyExists);
        }
        if let Err(e) = self.tree.flush() {
            error!("[ID{}]存储落盘失败：{}", self.id, e);
            return Err(Exception::StoreWriteFailed);
        }
        Ok(InsertOutcome::Inserted)
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        debug!("[ID{}]存储已关闭", self.id);
    }
}

/// 从请求体中取出键和值，不做 URL 解码。
///
/// 同时存在 `key=` 与 `value=` 两个字段时使用它们的值；
/// 否则取第一个 `&` 分隔的字段，在第一个 `=` 处切分。
pub fn parse_form(body: &[u8]) -> Result<(String, String), Exception> {
    let text = std::str::from_utf8(body).map_err(|_| Exception::RequestIsNotUtf8)?;
    let fields: Vec<(&str, &str)> = text
        .split('&')
        .filter_map(|field| field.split_once('='))
        .collect();

    let named_key = fields.iter().find(|(name, _)| *name == "key");
    let named_value = fields.iter().find(|(name, _)| *name == "value");
    let (key, value) = match (named_key, named_value) {
        (Some((_, k)), Some((_, v))) => (*k, *v),
        _ => text
            .split('&')
            .next()
            .and_then(|first| first.split_once('='))
            .ok_or(Exception::MalformedForm)?,
    };

    if key.is_empty() {
        return Err(Exception::MalformedForm);
    }
    Ok((key.to_string(), value.to_string()))
}

/// 处理一次 POST 提交：解析表单、打开存储、不存在时插入、关闭存储。
pub fn record_submission(
    backend: &dyn StoreBackend,
    body: &[u8],
    id: u64,
) -> Result<InsertOutcome, Exception> {
    let (key, value) = parse_form(body)?;
    let mut store = backend.open(id)?;
    match store.lookup(&key)? {
        Some(existing) => {
            info!("[ID{}]键{}已存在（值为{}），不覆盖", id, key, existing);
            Ok(InsertOutcome::AlreadyExists)
        }
        None => {
            let outcome = store.insert_if_absent(&key, &value)?;
            match outcome {
                InsertOutcome::Inserted => info!("[ID{}]键{}已写入，值为{}", id, key, value),
                InsertOutcome::AlreadyExists => info!("[ID{}]键{}已被并发写入，不覆盖", id, key),
            }
            Ok(outcome)
        }
    }
}
