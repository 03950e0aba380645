//! 引导引擎统一错误类型：最小化枚举，避免依赖第三方错误栈；
//! 组件初始化器抛出的动态失败通过 anyhow 原样透传。
use std::{error::Error as StdError, fmt};

#[derive(Debug)]
pub enum BusbootError {
    BadBinaryFormat(String),  // 扫到的文件不是可加载的组件二进制（致命，提示排除）
    NativeMismatch(String),   // 本地库架构与进程不符（致命，附纠正指引）
    RegistrarNotSet,          // registrar 尚未提供就被访问（时序错误）
    BuilderNotSet,            // builder 尚未提供就被访问（时序错误）
    MissingConfig(&'static str), // 必需的配置节不存在
    Component(anyhow::Error), // 组件初始化器或协作方抛出的失败，原样向上传播
    Other(&'static str),      // 简单静态消息
    Dynamic(String),          // 动态字符串（按二进制隔离的失败多用此变体）
}

impl fmt::Display for BusbootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusbootError::BadBinaryFormat(path) => write!(
                f,
                "could not load {path}: not a loadable component binary; add it to the exclude filter if it should not be scanned"
            ),
            BusbootError::NativeMismatch(path) => write!(
                f,
                "could not load {path}: the native library was built for a different architecture than this process; install the build matching the host"
            ),
            BusbootError::RegistrarNotSet => {
                write!(f, "component registrar accessed before one was supplied")
            }
            BusbootError::BuilderNotSet => {
                write!(f, "component builder accessed before one was supplied")
            }
            BusbootError::MissingConfig(t) => write!(f, "missing config section: {t}"),
            BusbootError::Component(e) => write!(f, "{e}"),
            BusbootError::Other(msg) => write!(f, "{msg}"),
            BusbootError::Dynamic(s) => write!(f, "{s}"),
        }
    }
}
impl StdError for BusbootError {}

impl From<anyhow::Error> for BusbootError {
    fn from(e: anyhow::Error) -> Self {
        BusbootError::Component(e)
    }
}

impl BusbootError {
    /// Fatal load failures abort the bootstrap call; everything else raised
    /// while loading one binary stays isolated to that binary.
    pub fn is_fatal_load_failure(&self) -> bool {
        matches!(
            self,
            BusbootError::BadBinaryFormat(_) | BusbootError::NativeMismatch(_)
        )
    }
}

pub type Result<T = ()> = std::result::Result<T, BusbootError>;
