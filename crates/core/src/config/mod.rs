//! 配置管理
//!
//! 配置按以下顺序叠加：
//! 1. 各配置段的默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `DELEGATE_SCHEDULER`，层级分隔符 `__`）
//!
//! 每个配置段都提供 `validate()`，加载完成后统一校验。

pub mod models;

pub use models::*;
