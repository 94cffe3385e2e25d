use std::path::PathBuf;

/// 解析外部工具路径
///
/// 配置的路径看起来属于另一个平台（非 Windows 上出现盘符或反斜杠，
/// Windows 上出现 `/` 开头的路径）时，回退到在当前 PATH 中按名称查找。
pub fn resolve_tool(configured: &str, default_name: &str) -> PathBuf {
    let configured = configured.trim();
    if configured.is_empty() {
        return lookup(default_name);
    }

    if is_foreign_path(configured) {
        tracing::warn!(
            "工具路径 {} 不适用于当前平台，改为在 PATH 中查找 {}",
            configured,
            default_name
        );
        return lookup(default_name);
    }

    if is_bare_name(configured) {
        return lookup(configured);
    }

    PathBuf::from(configured)
}

fn lookup(name: &str) -> PathBuf {
    match which::which(name) {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!("在 PATH 中未找到 {}: {}", name, e);
            // 交给进程启动时报错
            PathBuf::from(name)
        }
    }
}

fn is_bare_name(value: &str) -> bool {
    !value.contains('/') && !value.contains('\\')
}

#[cfg(not(windows))]
fn is_foreign_path(value: &str) -> bool {
    has_drive_letter(value) || value.contains('\\')
}

#[cfg(windows)]
fn is_foreign_path(value: &str) -> bool {
    value.starts_with('/')
}

#[cfg_attr(windows, allow(dead_code))]
fn has_drive_letter(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
