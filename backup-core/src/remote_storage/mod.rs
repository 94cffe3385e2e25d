// 远程存储（Google Drive）
//
// 状态机：未授权 -> 已授权 -> (刷新中) -> 已授权
// - oauth: 授权码流程、刷新、吊销
// - drive: 令牌生命周期管理与 Drive v3 文件操作

mod drive;
mod oauth;

pub use drive::DriveClient;
pub use oauth::{OAuthClient, TokenResponse};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 上传后的远程文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

/// 存储空间（字节），`limit` 为空表示不限量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageQuota {
    pub limit: Option<u64>,
    pub usage: u64,
    pub usage_in_drive: u64,
    pub usage_in_drive_trash: u64,
}

/// 连通性测试结果，提供方返回错误时 `success` 为假而不是返回 `Err`
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub quota: Option<StorageQuota>,
    pub error: Option<String>,
}

/// 远程存储状态
#[derive(Debug, Clone, Serialize)]
pub struct DriveStatus {
    pub enabled: bool,
    pub connected: bool,
    pub quota: Option<StorageQuota>,
    pub error: Option<String>,
}

/// 编排器使用的远程存储接口
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// 功能开关
    fn is_enabled(&self) -> bool;

    /// 只检查令牌记录是否存在，不校验令牌是否有效
    async fn is_authorized(&self, user_id: i64) -> Result<bool>;

    /// 流式上传本地文件，返回远程文件
    async fn upload(&self, local_path: &Path, filename: &str, user_id: i64) -> Result<RemoteFile>;
}
