pub mod companion;
pub mod config;
pub mod console;
pub mod context;
pub mod host;
pub mod ipc;
pub mod modmgr;
pub mod plugin;  // 모듈 스크립트 실행
pub mod python_env;
pub mod supervisor;
pub mod utils;
