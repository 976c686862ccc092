//! middleware 模块集成测试

pub mod integration;
