// DuckDB数据库模块
//
// 通过Actor模式保证DuckDB的单线程访问，对外提供异步接口。
//
// 主要组件：
// - DuckDbManager: 发送消息并等待回复的句柄，可克隆
// - DuckDbActor: 处理实际的数据库操作，文件数据库只在处理消息期间持有连接

mod actor;
mod manager;
mod messages;

pub use manager::DuckDbManager;
